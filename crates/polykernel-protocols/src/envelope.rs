//! Command and event envelopes.
//!
//! Runtime envelopes are cheap-to-clone shared handles: every clone refers to
//! the same underlying envelope, so routing-slip stamps made while a command
//! is in flight are observed by every holder, and `token`/`id` are assigned
//! at most once for the envelope's lifetime. Sharing stops at the transport
//! boundary, where envelopes are converted to the owned wire models in
//! [`crate::model`].

use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::commands::KernelCommand;
use crate::error::RoutingSlipError;
use crate::model::{KernelCommandEnvelopeModel, KernelEventEnvelopeModel};
use crate::routing_slip::{CommandRoutingSlip, EventRoutingSlip};
use crate::token;

/// A command envelope, shared by every participant in its handling.
#[derive(Debug, Clone)]
pub struct KernelCommandEnvelope {
    inner: Arc<CommandInner>,
}

#[derive(Debug)]
struct CommandInner {
    command_type: String,
    command: Mutex<KernelCommand>,
    token: OnceLock<String>,
    id: OnceLock<String>,
    routing_slip: Mutex<CommandRoutingSlip>,
}

impl KernelCommandEnvelope {
    /// Creates an envelope for `command_type` carrying `command`.
    pub fn new(command_type: impl Into<String>, command: KernelCommand) -> Self {
        Self {
            inner: Arc::new(CommandInner {
                command_type: command_type.into(),
                command: Mutex::new(command),
                token: OnceLock::new(),
                id: OnceLock::new(),
                routing_slip: Mutex::new(CommandRoutingSlip::new()),
            }),
        }
    }

    pub fn command_type(&self) -> &str {
        &self.inner.command_type
    }

    /// The causal-chain token, when assigned.
    pub fn token(&self) -> Option<String> {
        self.inner.token.get().cloned()
    }

    /// This envelope's unique id, when assigned.
    pub fn id(&self) -> Option<String> {
        self.inner.id.get().cloned()
    }

    /// Assigns the token when absent: the inherited token when given, else a
    /// fresh one. A token already present is never reassigned.
    pub fn ensure_token(&self, inherited: Option<String>) {
        self.inner
            .token
            .get_or_init(|| inherited.unwrap_or_else(token::new_token));
    }

    /// Returns the token, assigning a fresh one when absent.
    pub fn get_or_create_token(&self) -> String {
        self.inner.token.get_or_init(token::new_token).clone()
    }

    /// Assigns a fresh id when absent. An id already present is kept.
    pub fn ensure_id(&self) {
        self.inner.id.get_or_init(token::new_command_id);
    }

    /// Snapshot of the command payload.
    pub fn command(&self) -> KernelCommand {
        self.inner.command.lock().clone()
    }

    pub fn target_kernel_name(&self) -> Option<String> {
        self.inner.command.lock().target_kernel_name.clone()
    }

    pub fn origin_uri(&self) -> Option<String> {
        self.inner.command.lock().origin_uri.clone()
    }

    pub fn destination_uri(&self) -> Option<String> {
        self.inner.command.lock().destination_uri.clone()
    }

    /// Sets the origin URI unless one is already present.
    pub fn set_origin_uri_if_absent(&self, uri: impl Into<String>) {
        let mut command = self.inner.command.lock();
        if command.origin_uri.is_none() {
            command.origin_uri = Some(uri.into());
        }
    }

    /// Sets the destination URI unless one is already present.
    pub fn set_destination_uri_if_absent(&self, uri: impl Into<String>) {
        let mut command = self.inner.command.lock();
        if command.destination_uri.is_none() {
            command.destination_uri = Some(uri.into());
        }
    }

    /// Stamps arrival at `kernel_uri` on the routing slip.
    pub fn stamp_as_arrived(&self, kernel_uri: &str) -> Result<(), RoutingSlipError> {
        self.inner.routing_slip.lock().stamp_as_arrived(kernel_uri)
    }

    /// Stamps departure from `kernel_uri` on the routing slip.
    pub fn stamp(&self, kernel_uri: &str) -> Result<(), RoutingSlipError> {
        self.inner.routing_slip.lock().stamp(kernel_uri)
    }

    pub fn routing_slip_contains(&self, kernel_uri: &str, ignore_query: bool) -> bool {
        self.inner.routing_slip.lock().contains(kernel_uri, ignore_query)
    }

    /// Merges a peer's already-traveled slip into this envelope's slip.
    pub fn continue_routing_slip_with(&self, kernel_uris: &[String]) -> Result<(), RoutingSlipError> {
        self.inner.routing_slip.lock().continue_with(kernel_uris)
    }

    /// Snapshot of the routing-slip entries in traversal order.
    pub fn routing_slip_entries(&self) -> Vec<String> {
        self.inner.routing_slip.lock().entries().to_vec()
    }

    /// Handle identity: both handles refer to one underlying envelope.
    pub fn same_envelope_as(&self, other: &KernelCommandEnvelope) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Two envelopes denote the same command when they are the same
    /// underlying envelope, or when command type, token, and id all match.
    pub fn is_same_command_as(&self, other: &KernelCommandEnvelope) -> bool {
        self.same_envelope_as(other)
            || (self.inner.command_type == other.inner.command_type
                && self.token() == other.token()
                && self.id() == other.id())
    }

    /// Owned wire form of this envelope (deep copy).
    pub fn to_model(&self) -> KernelCommandEnvelopeModel {
        KernelCommandEnvelopeModel {
            token: self.token(),
            id: self.id(),
            command_type: self.inner.command_type.clone(),
            command: self.command(),
            routing_slip: self.routing_slip_entries(),
        }
    }

    /// Rebuilds a runtime envelope from its wire form.
    pub fn from_model(model: KernelCommandEnvelopeModel) -> Self {
        let envelope = Self::new(model.command_type, model.command);
        if let Some(token_value) = model.token {
            let _ = envelope.inner.token.set(token_value);
        }
        if let Some(id) = model.id {
            let _ = envelope.inner.id.set(id);
        }
        *envelope.inner.routing_slip.lock() = CommandRoutingSlip::from_entries(model.routing_slip);
        envelope
    }
}

/// An event envelope emitted during command handling.
///
/// The payload is immutable after construction; the routing slip is
/// append-only; the command back-reference is attached at most once.
#[derive(Debug, Clone)]
pub struct KernelEventEnvelope {
    inner: Arc<EventInner>,
}

#[derive(Debug)]
struct EventInner {
    event_type: String,
    event: serde_json::Value,
    command: OnceLock<KernelCommandEnvelope>,
    routing_slip: Mutex<EventRoutingSlip>,
}

impl KernelEventEnvelope {
    /// Creates an event envelope with no command back-reference yet.
    pub fn new(event_type: impl Into<String>, event: serde_json::Value) -> Self {
        Self {
            inner: Arc::new(EventInner {
                event_type: event_type.into(),
                event,
                command: OnceLock::new(),
                routing_slip: Mutex::new(EventRoutingSlip::new()),
            }),
        }
    }

    /// Creates an event envelope with the triggering command attached.
    pub fn with_command(
        event_type: impl Into<String>,
        event: serde_json::Value,
        command: KernelCommandEnvelope,
    ) -> Self {
        let envelope = Self::new(event_type, event);
        let _ = envelope.inner.command.set(command);
        envelope
    }

    pub fn event_type(&self) -> &str {
        &self.inner.event_type
    }

    pub fn event(&self) -> &serde_json::Value {
        &self.inner.event
    }

    /// Deserializes the event payload.
    pub fn event_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.inner.event.clone())
    }

    /// The triggering command, when attached.
    pub fn command(&self) -> Option<KernelCommandEnvelope> {
        self.inner.command.get().cloned()
    }

    /// Attaches the triggering command unless one is already attached.
    pub fn set_command_if_absent(&self, command: &KernelCommandEnvelope) {
        let _ = self.inner.command.set(command.clone());
    }

    /// Stamps `kernel_uri` on the routing slip.
    pub fn stamp(&self, kernel_uri: &str) -> Result<(), RoutingSlipError> {
        self.inner.routing_slip.lock().stamp(kernel_uri)
    }

    pub fn routing_slip_contains(&self, kernel_uri: &str, ignore_query: bool) -> bool {
        self.inner.routing_slip.lock().contains(kernel_uri, ignore_query)
    }

    /// Merges a peer's already-traveled slip into this envelope's slip.
    pub fn continue_routing_slip_with(&self, kernel_uris: &[String]) -> Result<(), RoutingSlipError> {
        self.inner.routing_slip.lock().continue_with(kernel_uris)
    }

    /// Snapshot of the routing-slip entries in traversal order.
    pub fn routing_slip_entries(&self) -> Vec<String> {
        self.inner.routing_slip.lock().entries().to_vec()
    }

    /// Owned wire form of this envelope (deep copy).
    pub fn to_model(&self) -> KernelEventEnvelopeModel {
        KernelEventEnvelopeModel {
            event_type: self.inner.event_type.clone(),
            event: self.inner.event.clone(),
            command: self.command().map(|command| command.to_model()),
            routing_slip: self.routing_slip_entries(),
        }
    }

    /// Rebuilds a runtime envelope from its wire form.
    pub fn from_model(model: KernelEventEnvelopeModel) -> Self {
        let envelope = Self::new(model.event_type, model.event);
        if let Some(command) = model.command {
            let _ = envelope
                .inner
                .command
                .set(KernelCommandEnvelope::from_model(command));
        }
        *envelope.inner.routing_slip.lock() = EventRoutingSlip::from_entries(model.routing_slip);
        envelope
    }
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
