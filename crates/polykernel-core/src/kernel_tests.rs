use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;

use polykernel_protocols::commands::REQUEST_KERNEL_INFO;
use polykernel_protocols::events::{COMMAND_FAILED, COMMAND_SUCCEEDED, KERNEL_INFO_PRODUCED};
use polykernel_protocols::{
    CommandFailed, KernelCommand, KernelCommandEnvelope, KernelEventEnvelope, KernelInfoProduced,
};

use super::{DefaultKernel, Kernel, command_handler_fn, submit_command_and_get_result};
use crate::error::KernelError;

fn submit_code(target: &str) -> KernelCommandEnvelope {
    KernelCommandEnvelope::new("SubmitCode", KernelCommand::for_target(target))
}

fn capture_events(kernel: &Arc<DefaultKernel>) -> Arc<Mutex<Vec<KernelEventEnvelope>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    kernel
        .events()
        .subscribe(move |event| sink.lock().push(event))
        .detach();
    seen
}

fn events_of_type(
    seen: &Arc<Mutex<Vec<KernelEventEnvelope>>>,
    event_type: &str,
) -> Vec<KernelEventEnvelope> {
    seen.lock()
        .iter()
        .filter(|event| event.event_type() == event_type)
        .cloned()
        .collect()
}

#[tokio::test]
async fn a_registered_handler_runs_and_the_command_succeeds() {
    let kernel = DefaultKernel::new("csharp");
    kernel.register_command_handler(
        "SubmitCode",
        command_handler_fn(|_invocation| async move { Ok(()) }),
    );
    let seen = capture_events(&kernel);

    let envelope = submit_code("csharp");
    kernel.send(envelope.clone()).await.unwrap();

    let succeeded = events_of_type(&seen, COMMAND_SUCCEEDED);
    assert_eq!(succeeded.len(), 1);
    let command = succeeded[0].command().unwrap();
    assert!(command.same_envelope_as(&envelope));
    assert_eq!(
        envelope.routing_slip_entries(),
        vec![
            "kernel://local/csharp?tag=arrived".to_string(),
            "kernel://local/csharp".to_string(),
        ]
    );
    assert!(succeeded[0].routing_slip_contains("kernel://local/csharp", false));
}

#[tokio::test]
async fn a_failing_handler_publishes_command_failed_and_rejects_send() {
    let kernel = DefaultKernel::new("csharp");
    kernel.register_command_handler(
        "SubmitCode",
        command_handler_fn(|_invocation| async move {
            Err(KernelError::CommandFailed {
                message: "boom".to_string(),
            })
        }),
    );
    let seen = capture_events(&kernel);

    let error = kernel.send(submit_code("csharp")).await.unwrap_err();

    assert_eq!(error.to_string(), "boom");
    let failed = events_of_type(&seen, COMMAND_FAILED);
    assert_eq!(failed.len(), 1);
    let payload: CommandFailed = failed[0].event_as().unwrap();
    assert_eq!(payload.message, "boom");
    assert!(events_of_type(&seen, COMMAND_SUCCEEDED).is_empty());
}

#[tokio::test]
async fn sending_an_unsupported_command_fails() {
    let kernel = DefaultKernel::new("csharp");
    let seen = capture_events(&kernel);

    let error = kernel.send(submit_code("csharp")).await.unwrap_err();

    assert_eq!(
        error.to_string(),
        "No handler found for command type SubmitCode"
    );
    let failed = events_of_type(&seen, COMMAND_FAILED);
    assert_eq!(failed.len(), 1);
    let payload: CommandFailed = failed[0].event_as().unwrap();
    assert_eq!(payload.message, "No handler found for command type SubmitCode");
    assert!(events_of_type(&seen, COMMAND_SUCCEEDED).is_empty());
}

#[tokio::test]
async fn nested_sends_inherit_the_root_token() {
    let kernel = DefaultKernel::new("csharp");
    kernel.register_command_handler(
        "DoWork",
        command_handler_fn(|_invocation| async move { Ok(()) }),
    );

    let child_envelope = KernelCommandEnvelope::new("DoWork", KernelCommand::for_target("csharp"));
    let weak = Arc::downgrade(&kernel);
    let nested = child_envelope.clone();
    kernel.register_command_handler(
        "SubmitCode",
        command_handler_fn(move |_invocation| {
            let kernel = weak.upgrade();
            let child = nested.clone();
            async move {
                match kernel {
                    Some(kernel) => kernel.send(child).await,
                    None => Ok(()),
                }
            }
        }),
    );
    let seen = capture_events(&kernel);

    let root_envelope = submit_code("csharp");
    kernel.send(root_envelope.clone()).await.unwrap();

    assert_eq!(child_envelope.token(), root_envelope.token());
    assert!(child_envelope.token().is_some());
    assert_ne!(child_envelope.id(), root_envelope.id());

    // The nested command settles as a child of the root context: only the
    // root publishes a CommandSucceeded.
    let succeeded = events_of_type(&seen, COMMAND_SUCCEEDED);
    assert_eq!(succeeded.len(), 1);
    assert!(succeeded[0].command().unwrap().same_envelope_as(&root_envelope));
}

#[tokio::test]
async fn registering_a_new_handler_announces_updated_kernel_info() {
    let kernel = DefaultKernel::new("csharp");
    let seen = capture_events(&kernel);

    kernel.register_command_handler(
        "SubmitCode",
        command_handler_fn(|_invocation| async move { Ok(()) }),
    );

    let produced = events_of_type(&seen, KERNEL_INFO_PRODUCED);
    assert_eq!(produced.len(), 1);
    let payload: KernelInfoProduced = produced[0].event_as().unwrap();
    let supported: Vec<&str> = payload
        .kernel_info
        .supported_kernel_commands
        .iter()
        .map(|command| command.name.as_str())
        .collect();
    assert_eq!(supported, vec![REQUEST_KERNEL_INFO, "SubmitCode"]);
    assert!(produced[0].routing_slip_contains("kernel://local/csharp", false));

    // Replacing the handler for an already-supported command type is silent.
    kernel.register_command_handler(
        "SubmitCode",
        command_handler_fn(|_invocation| async move { Ok(()) }),
    );
    assert_eq!(events_of_type(&seen, KERNEL_INFO_PRODUCED).len(), 1);
}

#[tokio::test]
async fn request_kernel_info_reports_language_and_supported_commands() {
    let kernel =
        DefaultKernel::with_language("csharp", Some("C#".to_string()), Some("12.0".to_string()));
    let seen = capture_events(&kernel);

    let envelope =
        KernelCommandEnvelope::new(REQUEST_KERNEL_INFO, KernelCommand::for_target("csharp"));
    kernel.send(envelope.clone()).await.unwrap();

    let produced = events_of_type(&seen, KERNEL_INFO_PRODUCED);
    assert_eq!(produced.len(), 1);
    assert!(produced[0].command().unwrap().same_envelope_as(&envelope));
    let payload: KernelInfoProduced = produced[0].event_as().unwrap();
    assert_eq!(payload.kernel_info.local_name, "csharp");
    assert_eq!(payload.kernel_info.language_name.as_deref(), Some("C#"));
    assert_eq!(events_of_type(&seen, COMMAND_SUCCEEDED).len(), 1);
}

#[tokio::test]
async fn submit_command_and_get_result_returns_the_expected_event() {
    let kernel = DefaultKernel::new("csharp");
    kernel.register_command_handler(
        "RequestValues",
        command_handler_fn(|invocation| async move {
            let event = KernelEventEnvelope::with_command(
                "ValuesProduced",
                json!({ "values": [1, 2, 3] }),
                invocation.command_envelope.clone(),
            );
            invocation.context.publish(&event);
            Ok(())
        }),
    );

    let envelope = KernelCommandEnvelope::new("RequestValues", KernelCommand::for_target("csharp"));
    let payload: serde_json::Value =
        submit_command_and_get_result(kernel.as_ref(), envelope, "ValuesProduced")
            .await
            .unwrap();

    assert_eq!(payload["values"], json!([1, 2, 3]));
}

#[tokio::test]
async fn submit_command_and_get_result_without_the_event_reports_no_result() {
    let kernel = DefaultKernel::new("csharp");
    kernel.register_command_handler(
        "RequestValues",
        command_handler_fn(|_invocation| async move { Ok(()) }),
    );

    let envelope = KernelCommandEnvelope::new("RequestValues", KernelCommand::for_target("csharp"));
    let result: Result<serde_json::Value, _> =
        submit_command_and_get_result(kernel.as_ref(), envelope, "ValuesProduced").await;

    assert!(matches!(result, Err(KernelError::NoResultProduced)));
}

#[tokio::test]
async fn submit_command_and_get_result_surfaces_command_failure() {
    let kernel = DefaultKernel::new("csharp");
    kernel.register_command_handler(
        "RequestValues",
        command_handler_fn(|_invocation| async move {
            Err(KernelError::CommandFailed {
                message: "boom".to_string(),
            })
        }),
    );

    let envelope = KernelCommandEnvelope::new("RequestValues", KernelCommand::for_target("csharp"));
    let result: Result<serde_json::Value, _> =
        submit_command_and_get_result(kernel.as_ref(), envelope, "ValuesProduced").await;

    match result {
        Err(KernelError::CommandFailed { message }) => assert_eq!(message, "boom"),
        other => panic!("expected CommandFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn can_handle_checks_target_destination_and_support() {
    let kernel = DefaultKernel::new("csharp");
    kernel.register_command_handler(
        "SubmitCode",
        command_handler_fn(|_invocation| async move { Ok(()) }),
    );

    assert!(kernel.can_handle(&submit_code("csharp")));
    assert!(!kernel.can_handle(&submit_code("other")));

    // An untargeted command is acceptable as long as the type is supported.
    let untargeted = KernelCommandEnvelope::new("SubmitCode", KernelCommand::default());
    assert!(kernel.can_handle(&untargeted));
    let unsupported = KernelCommandEnvelope::new("WhoKnows", KernelCommand::default());
    assert!(!kernel.can_handle(&unsupported));

    let mut command = KernelCommand::for_target("csharp");
    command.destination_uri = Some("kernel://local/other".to_string());
    assert!(!kernel.can_handle(&KernelCommandEnvelope::new("SubmitCode", command)));

    let mut command = KernelCommand::for_target("csharp");
    command.destination_uri = Some("kernel://local/csharp".to_string());
    assert!(kernel.can_handle(&KernelCommandEnvelope::new("SubmitCode", command)));
}
