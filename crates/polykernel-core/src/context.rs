//! Per-command invocation context.
//!
//! A context is established for the first command a kernel tree starts
//! working on and stays current until that root command settles. Commands
//! submitted while it is current are registered as its children and share
//! its token lineage. Events published through the context are filtered so
//! that only the root command's own events and those of registered children
//! reach subscribers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::json;
use tracing::warn;

use polykernel_protocols::events::{COMMAND_FAILED, COMMAND_SUCCEEDED};
use polykernel_protocols::{KernelCommandEnvelope, KernelEventEnvelope};

use crate::bus::KernelEventBus;
use crate::completion::CompletionSource;
use crate::kernel::Kernel;

/// Holds the current invocation context of one kernel tree.
///
/// Every kernel owns a slot, but only the root kernel's slot is ever used:
/// context lookups walk to the root so that all kernels of a tree share one
/// notion of "the current command".
#[derive(Default)]
pub struct ContextSlot {
    current: Mutex<Option<Arc<KernelInvocationContext>>>,
}

impl ContextSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// The context currently in charge, if any.
    pub fn current(&self) -> Option<Arc<KernelInvocationContext>> {
        self.current.lock().clone()
    }

    /// Returns the context `envelope` should run under, creating one when
    /// none is current.
    ///
    /// A fresh context adopts `envelope` as its root command and ensures the
    /// root carries a token. While a context is current and not complete,
    /// any other command establishes against it and is registered as a
    /// child; the root command itself is simply handed the existing context.
    pub fn establish(self: &Arc<Self>, envelope: &KernelCommandEnvelope) -> Arc<KernelInvocationContext> {
        let mut current = self.current.lock();
        match current.as_ref() {
            Some(context) if !context.is_complete() => {
                if !envelope.is_same_command_as(&context.command_envelope) {
                    context.register_child_command(envelope);
                }
                Arc::clone(context)
            }
            _ => {
                envelope.get_or_create_token();
                let context = Arc::new(KernelInvocationContext {
                    command_envelope: envelope.clone(),
                    child_commands: Mutex::new(Vec::new()),
                    events: KernelEventBus::new(),
                    is_complete: AtomicBool::new(false),
                    handling_kernel: Mutex::new(None),
                    completion: CompletionSource::new(),
                    slot: Arc::downgrade(self),
                });
                *current = Some(Arc::clone(&context));
                context
            }
        }
    }

    fn clear_if_current(&self, context: &Arc<KernelInvocationContext>) {
        let mut current = self.current.lock();
        if current
            .as_ref()
            .is_some_and(|held| Arc::ptr_eq(held, context))
        {
            *current = None;
        }
    }
}

/// Tracks one root command from establishment to settlement.
pub struct KernelInvocationContext {
    command_envelope: KernelCommandEnvelope,
    // Removal leaves a hole so sibling indices stay stable.
    child_commands: Mutex<Vec<Option<KernelCommandEnvelope>>>,
    events: KernelEventBus,
    is_complete: AtomicBool,
    handling_kernel: Mutex<Option<Arc<dyn Kernel>>>,
    completion: CompletionSource<()>,
    slot: Weak<ContextSlot>,
}

impl KernelInvocationContext {
    /// The root command this context was established for.
    pub fn command_envelope(&self) -> KernelCommandEnvelope {
        self.command_envelope.clone()
    }

    /// Events published under this context, after filtering.
    pub fn events(&self) -> &KernelEventBus {
        &self.events
    }

    pub fn is_complete(&self) -> bool {
        self.is_complete.load(Ordering::SeqCst)
    }

    /// The kernel currently working on the command, if one has been named.
    pub fn handling_kernel(&self) -> Option<Arc<dyn Kernel>> {
        self.handling_kernel.lock().clone()
    }

    pub fn set_handling_kernel(&self, kernel: Option<Arc<dyn Kernel>>) {
        *self.handling_kernel.lock() = kernel;
    }

    /// Whether `envelope` is one of the child commands registered with this
    /// context. Membership is by envelope identity, not value equality.
    pub fn is_parent_of_command(&self, envelope: &KernelCommandEnvelope) -> bool {
        self.child_commands
            .lock()
            .iter()
            .flatten()
            .any(|child| child.same_envelope_as(envelope))
    }

    fn register_child_command(&self, envelope: &KernelCommandEnvelope) {
        let mut children = self.child_commands.lock();
        let already_registered = children
            .iter()
            .flatten()
            .any(|child| child.same_envelope_as(envelope));
        if !already_registered {
            children.push(Some(envelope.clone()));
        }
    }

    /// Publishes `event` unless the context has already settled.
    pub fn publish(&self, event: &KernelEventEnvelope) {
        if !self.is_complete() {
            self.internal_publish(event);
        }
    }

    fn internal_publish(&self, event: &KernelEventEnvelope) {
        event.set_command_if_absent(&self.command_envelope);
        if let Some(kernel) = self.handling_kernel() {
            let kernel_uri = kernel.core().uri();
            if !event.routing_slip_contains(&kernel_uri, false) {
                if let Err(error) = event.stamp(&kernel_uri) {
                    warn!(
                        "Failed to stamp {} on a {} event: {error}",
                        kernel_uri,
                        event.event_type()
                    );
                }
            }
        }

        let should_publish = match event.command() {
            None => true,
            Some(command) => {
                command.is_same_command_as(&self.command_envelope)
                    || self.is_parent_of_command(&command)
            }
        };
        if should_publish {
            self.events.publish(event);
        }
    }

    /// Marks `envelope` as done.
    ///
    /// For the root command this settles the context: a `CommandSucceeded`
    /// event goes out and the completion future resolves, exactly once no
    /// matter how often completion is attempted. For a child command the
    /// child is merely unregistered.
    pub fn complete(&self, envelope: &KernelCommandEnvelope) {
        if envelope.is_same_command_as(&self.command_envelope) {
            if self.is_complete.swap(true, Ordering::SeqCst) {
                return;
            }
            let event = KernelEventEnvelope::with_command(
                COMMAND_SUCCEEDED,
                json!({}),
                self.command_envelope.clone(),
            );
            self.internal_publish(&event);
            self.completion.resolve(());
        } else {
            let mut children = self.child_commands.lock();
            if let Some(slot) = children
                .iter_mut()
                .find(|slot| {
                    slot.as_ref()
                        .is_some_and(|child| child.same_envelope_as(envelope))
                })
            {
                *slot = None;
            }
        }
    }

    /// Settles the context as failed, publishing a `CommandFailed` event
    /// carrying `message`. Like [`complete`](Self::complete), this fires
    /// exactly once; later attempts are ignored.
    pub fn fail(&self, message: impl Into<String>) {
        if self.is_complete.swap(true, Ordering::SeqCst) {
            return;
        }
        let event = KernelEventEnvelope::with_command(
            COMMAND_FAILED,
            json!({ "message": message.into() }),
            self.command_envelope.clone(),
        );
        self.internal_publish(&event);
        self.completion.resolve(());
    }

    /// Resolves once the context has settled, successfully or not.
    ///
    /// Backed by a single-consumer completion source: at most one caller
    /// can usefully await this.
    pub async fn completed(&self) {
        if self.is_complete() {
            return;
        }
        self.completion.wait().await;
    }

    /// Settles the context if it has not settled yet and releases the slot,
    /// but only if this context is still the one the slot holds.
    pub fn dispose(self: &Arc<Self>) {
        if !self.is_complete() {
            self.complete(&self.command_envelope);
        }
        if let Some(slot) = self.slot.upgrade() {
            slot.clear_if_current(self);
        }
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod tests;
