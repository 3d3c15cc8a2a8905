//! A local stand-in for a kernel running in another process.
//!
//! Every command addressed to the proxy is serialized and forwarded over
//! its transport; the events the remote publishes in response are
//! correlated back by token, replayed locally with the proxy's stamp on
//! their routing slips, and the matching terminal event settles the
//! forwarded command. `KernelInfoProduced` events from the remote keep the
//! proxy's own descriptor up to date.

use std::sync::{Arc, OnceLock, Weak};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use polykernel_protocols::commands::REQUEST_KERNEL_INFO;
use polykernel_protocols::events::{
    COMMAND_CANCELLED, COMMAND_FAILED, COMMAND_SUCCEEDED, KERNEL_INFO_PRODUCED,
};
use polykernel_protocols::{
    CommandFailed, KernelCommandAndEventReceiver, KernelCommandAndEventSender,
    KernelCommandEnvelope, KernelEventEnvelope, KernelInfoProduced, KernelMessage, TransportError,
};

use crate::completion::CompletionSource;
use crate::context::KernelInvocationContext;
use crate::error::{KernelError, KernelResult};
use crate::kernel::{
    Kernel, KernelCommandHandler, KernelCommandInvocation, KernelCore, KernelType,
    command_handler_fn,
};

/// Forwards commands to a remote kernel and replays its events locally.
pub struct ProxyKernel {
    core: KernelCore,
    sender: Arc<dyn KernelCommandAndEventSender>,
    receiver: Arc<dyn KernelCommandAndEventReceiver>,
    weak_self: OnceLock<Weak<ProxyKernel>>,
}

impl std::fmt::Debug for ProxyKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyKernel")
            .field("name", &self.core.name())
            .finish_non_exhaustive()
    }
}

impl ProxyKernel {
    pub fn new(
        name: impl Into<String>,
        sender: Arc<dyn KernelCommandAndEventSender>,
        receiver: Arc<dyn KernelCommandAndEventReceiver>,
    ) -> Arc<Self> {
        let kernel = Arc::new(Self {
            core: KernelCore::new(name, KernelType::Proxy),
            sender,
            receiver,
            weak_self: OnceLock::new(),
        });
        let _ = kernel.weak_self.set(Arc::downgrade(&kernel));
        let weak = Arc::downgrade(&kernel) as Weak<dyn Kernel>;
        kernel.core.bind_self(weak);
        kernel
    }

    /// The URI of the kernel this proxy forwards to.
    pub fn remote_uri(&self) -> Option<String> {
        self.core.kernel_info().remote_uri
    }

    pub fn set_remote_uri(&self, uri: impl Into<String>) {
        self.core.set_remote_uri(uri);
    }

    async fn forward_command(&self, invocation: KernelCommandInvocation) -> KernelResult<()> {
        let command_envelope = invocation.command_envelope.clone();
        let context = Arc::clone(&invocation.context);
        command_envelope.get_or_create_token();
        let command_id = command_envelope.id();

        let completion: Arc<CompletionSource<KernelResult<KernelEventEnvelope>>> =
            Arc::new(CompletionSource::new());

        let mut receiver = self.receiver.subscribe();
        let pump_kernel = self.weak_self.get().cloned();
        let pump_completion = Arc::clone(&completion);
        let pump_context = Arc::clone(&context);
        let pump_command = command_envelope.clone();
        let pump_name = self.core.name().to_string();
        let pump = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(KernelMessage::Event(model)) => {
                        let event = KernelEventEnvelope::from_model(model);
                        let Some(proxy) = pump_kernel.as_ref().and_then(Weak::upgrade) else {
                            break;
                        };
                        proxy.on_remote_event(
                            event,
                            &pump_command,
                            command_id.as_deref(),
                            &pump_context,
                            &pump_completion,
                        );
                    }
                    Ok(KernelMessage::Command(_)) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Proxy kernel {} event receiver lagged, {skipped} messages were dropped", pump_name);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        pump_completion
                            .resolve(Err(KernelError::Transport(TransportError::Closed)));
                        break;
                    }
                }
            }
        });

        let forwarded = self
            .forward_and_await(&command_envelope, &context, &completion)
            .await;
        pump.abort();

        if let Err(error) = forwarded {
            context.fail(error.to_string());
        }
        Ok(())
    }

    async fn forward_and_await(
        &self,
        command_envelope: &KernelCommandEnvelope,
        context: &Arc<KernelInvocationContext>,
        completion: &Arc<CompletionSource<KernelResult<KernelEventEnvelope>>>,
    ) -> KernelResult<()> {
        let remote_uri = self.remote_uri();

        {
            let command = command_envelope.command();
            if command.origin_uri.is_none() || command.destination_uri.is_none() {
                command_envelope.set_origin_uri_if_absent(self.core.uri());
                if let Some(remote_uri) = &remote_uri {
                    command_envelope.set_destination_uri_if_absent(remote_uri.clone());
                }
            }
        }

        // A kernel-info request that already passed through the remote
        // would bounce forever; answer it by doing nothing.
        if command_envelope.command_type() == REQUEST_KERNEL_INFO {
            if let Some(remote_uri) = &remote_uri {
                if command_envelope.routing_slip_contains(remote_uri, true) {
                    return Ok(());
                }
            }
        }

        debug!(
            "proxy kernel {} forwarding command {} to {}",
            self.core.name(),
            command_envelope.command_type(),
            remote_uri.as_deref().unwrap_or("<unset>")
        );
        self.sender
            .send(KernelMessage::Command(command_envelope.to_model()))
            .await?;

        let event = match completion.wait().await {
            Some(Ok(event)) => event,
            Some(Err(error)) => return Err(error),
            None => return Err(KernelError::Transport(TransportError::Closed)),
        };

        if event.event_type() == COMMAND_FAILED {
            let message = event
                .event_as::<CommandFailed>()
                .map(|failed| failed.message)
                .unwrap_or_default();
            context.fail(message);
        }
        Ok(())
    }

    fn on_remote_event(
        &self,
        event: KernelEventEnvelope,
        local_command: &KernelCommandEnvelope,
        command_id: Option<&str>,
        context: &Arc<KernelInvocationContext>,
        completion: &Arc<CompletionSource<KernelResult<KernelEventEnvelope>>>,
    ) {
        let Some(event_command) = event.command() else {
            // Unsolicited kernel-info updates from the remote side refresh
            // the proxy's descriptor; everything else is not for us.
            if event.event_type() == KERNEL_INFO_PRODUCED {
                if let Ok(produced) = event.event_as::<KernelInfoProduced>() {
                    if self.remote_uri().as_deref() == Some(produced.kernel_info.uri.as_str()) {
                        self.core.merge_info_from(&produced.kernel_info);
                        let updated = KernelEventEnvelope::new(
                            KERNEL_INFO_PRODUCED,
                            json!({ "kernelInfo": self.kernel_info() }),
                        );
                        self.publish_event(&updated);
                    }
                }
            }
            return;
        };

        if event_command.token() != local_command.token() {
            return;
        }

        if let Err(error) =
            local_command.continue_routing_slip_with(&event_command.routing_slip_entries())
        {
            error!(
                "Proxy kernel {} could not continue the command routing slip: {error}",
                self.core.name()
            );
        }

        match event.event_type() {
            KERNEL_INFO_PRODUCED => match event.event_as::<KernelInfoProduced>() {
                Ok(produced)
                    if self.remote_uri().as_deref() == Some(produced.kernel_info.uri.as_str()) =>
                {
                    self.core.merge_info_from(&produced.kernel_info);
                    let updated = KernelEventEnvelope::with_command(
                        KERNEL_INFO_PRODUCED,
                        json!({ "kernelInfo": self.kernel_info() }),
                        local_command.clone(),
                    );
                    if let Err(error) =
                        updated.continue_routing_slip_with(&event.routing_slip_entries())
                    {
                        error!(
                            "Proxy kernel {} could not continue the event routing slip: {error}",
                            self.core.name()
                        );
                    }
                    self.delegate_publication(&updated, context);
                    self.delegate_publication(&event, context);
                }
                _ => self.delegate_publication(&event, context),
            },
            COMMAND_SUCCEEDED | COMMAND_FAILED | COMMAND_CANCELLED => {
                if event_command.id().as_deref() == command_id {
                    completion.resolve(Ok(event));
                } else {
                    self.delegate_publication(&event, context);
                }
            }
            _ => self.delegate_publication(&event, context),
        }
    }

    /// Republishes a remote event under the local context: stamps the
    /// proxy's URI onto it, then publishes unless the event originated
    /// elsewhere or had already passed through this proxy.
    fn delegate_publication(
        &self,
        event: &KernelEventEnvelope,
        context: &Arc<KernelInvocationContext>,
    ) {
        let kernel_uri = self.core.uri();
        let mut already_seen = false;
        if !event.routing_slip_contains(&kernel_uri, false) {
            if let Err(error) = event.stamp(&kernel_uri) {
                warn!(
                    "Failed to stamp {} on a {} event: {error}",
                    kernel_uri,
                    event.event_type()
                );
            }
        } else {
            already_seen = true;
        }

        if self.has_same_origin(event) && !already_seen {
            context.publish(event);
        }
    }

    fn has_same_origin(&self, event: &KernelEventEnvelope) -> bool {
        match event.command() {
            Some(command) => {
                let kernel_uri = self.core.uri();
                command.origin_uri().unwrap_or_else(|| kernel_uri.clone()) == kernel_uri
            }
            None => true,
        }
    }
}

#[async_trait]
impl Kernel for ProxyKernel {
    fn core(&self) -> &KernelCore {
        &self.core
    }

    fn kernel_type(&self) -> KernelType {
        KernelType::Proxy
    }

    /// Every command type gets the forwarding handler; the proxy never
    /// declines a command locally.
    fn get_command_handler(&self, _command_type: &str) -> Option<Arc<dyn KernelCommandHandler>> {
        let weak = self.weak_self.get()?.clone();
        Some(command_handler_fn(move |invocation| {
            let proxy = weak.upgrade();
            async move {
                match proxy {
                    Some(proxy) => proxy.forward_command(invocation).await,
                    None => Ok(()),
                }
            }
        }))
    }
}

#[cfg(test)]
#[path = "proxy_tests.rs"]
mod tests;
