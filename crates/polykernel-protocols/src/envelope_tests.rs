use serde_json::json;

use super::*;
use crate::events::{CommandFailed, COMMAND_FAILED};

fn submit_code(target: &str) -> KernelCommandEnvelope {
    let mut command = KernelCommand::for_target(target);
    command.fields.insert("code".into(), json!("1 + 1"));
    KernelCommandEnvelope::new("SubmitCode", command)
}

#[test]
fn token_is_assigned_at_most_once() {
    let envelope = submit_code("csharp");
    assert_eq!(envelope.token(), None);

    envelope.ensure_token(None);
    let first = envelope.token().unwrap();

    envelope.ensure_token(Some("parent-token".into()));
    assert_eq!(envelope.token().unwrap(), first);
}

#[test]
fn ensure_token_inherits_when_one_is_offered() {
    let envelope = submit_code("csharp");
    envelope.ensure_token(Some("parent-token".into()));
    assert_eq!(envelope.token().unwrap(), "parent-token");
}

#[test]
fn get_or_create_token_is_stable() {
    let envelope = submit_code("csharp");
    let token = envelope.get_or_create_token();
    assert_eq!(envelope.get_or_create_token(), token);
    assert_eq!(envelope.token().unwrap(), token);
}

#[test]
fn id_is_assigned_at_most_once() {
    let envelope = submit_code("csharp");
    envelope.ensure_id();
    let id = envelope.id().unwrap();
    envelope.ensure_id();
    assert_eq!(envelope.id().unwrap(), id);
}

#[test]
fn clones_share_the_routing_slip() {
    let envelope = submit_code("csharp");
    let clone = envelope.clone();

    envelope
        .stamp_as_arrived("kernel://local/csharp")
        .unwrap();

    assert!(clone.routing_slip_contains("kernel://local/csharp?tag=arrived", false));
    assert!(envelope.same_envelope_as(&clone));
}

#[test]
fn origin_and_destination_uris_are_set_once() {
    let envelope = submit_code("csharp");

    envelope.set_origin_uri_if_absent("kernel://a/");
    envelope.set_origin_uri_if_absent("kernel://b/");
    envelope.set_destination_uri_if_absent("kernel://c/");
    envelope.set_destination_uri_if_absent("kernel://d/");

    assert_eq!(envelope.origin_uri().unwrap(), "kernel://a/");
    assert_eq!(envelope.destination_uri().unwrap(), "kernel://c/");
}

#[test]
fn same_command_matches_on_type_token_and_id() {
    let first = submit_code("csharp");
    first.ensure_token(Some("t".into()));
    first.ensure_id();

    let mut model = first.to_model();
    let rebuilt = KernelCommandEnvelope::from_model(model.clone());
    assert!(first.is_same_command_as(&rebuilt));
    assert!(!first.same_envelope_as(&rebuilt));

    model.id = Some("different".into());
    let other = KernelCommandEnvelope::from_model(model);
    assert!(!first.is_same_command_as(&other));
}

#[test]
fn command_model_round_trip_preserves_identity_and_slip() {
    let envelope = submit_code("csharp");
    envelope.ensure_token(None);
    envelope.ensure_id();
    envelope.stamp_as_arrived("kernel://local/root").unwrap();
    envelope.stamp("kernel://local/root").unwrap();

    let rebuilt = KernelCommandEnvelope::from_model(envelope.to_model());

    assert_eq!(rebuilt.command_type(), "SubmitCode");
    assert_eq!(rebuilt.token(), envelope.token());
    assert_eq!(rebuilt.id(), envelope.id());
    assert_eq!(rebuilt.routing_slip_entries(), envelope.routing_slip_entries());
    assert_eq!(rebuilt.command().target_kernel_name.as_deref(), Some("csharp"));
}

#[test]
fn event_command_is_attached_at_most_once() {
    let command = submit_code("csharp");
    let event = KernelEventEnvelope::new(COMMAND_FAILED, json!({ "message": "boom" }));

    event.set_command_if_absent(&command);
    let other = submit_code("fsharp");
    event.set_command_if_absent(&other);

    assert!(event.command().unwrap().same_envelope_as(&command));
}

#[test]
fn event_payload_deserializes() {
    let event = KernelEventEnvelope::new(COMMAND_FAILED, json!({ "message": "boom" }));
    let payload: CommandFailed = event.event_as().unwrap();
    assert_eq!(payload.message, "boom");
}

#[test]
fn event_model_round_trip_carries_the_command() {
    let command = submit_code("csharp");
    command.ensure_token(None);
    command.ensure_id();

    let event =
        KernelEventEnvelope::with_command(COMMAND_FAILED, json!({ "message": "boom" }), command.clone());
    event.stamp("kernel://local/csharp").unwrap();

    let rebuilt = KernelEventEnvelope::from_model(event.to_model());

    assert_eq!(rebuilt.event_type(), COMMAND_FAILED);
    assert_eq!(rebuilt.routing_slip_entries(), vec!["kernel://local/csharp".to_string()]);
    let rebuilt_command = rebuilt.command().unwrap();
    assert!(rebuilt_command.is_same_command_as(&command));
}
