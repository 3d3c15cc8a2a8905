//! Sender/receiver contract for crossing process boundaries.
//!
//! A host talks to a remote peer through one sender and one receiver pair.
//! Implementations adapt whatever carries the bytes (stdio, sockets, test
//! loopbacks); the runtime only sees [`KernelMessage`] values.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::TransportError;
use crate::model::KernelMessage;

/// Outbound half of a transport.
#[async_trait]
pub trait KernelCommandAndEventSender: Send + Sync {
    /// Delivers one message to the remote peer.
    async fn send(&self, message: KernelMessage) -> Result<(), TransportError>;
}

/// Inbound half of a transport.
pub trait KernelCommandAndEventReceiver: Send + Sync {
    /// Returns a fresh subscription to the inbound message stream.
    ///
    /// Every subscriber observes every message received after it
    /// subscribed; subscribing never consumes messages from other
    /// subscribers.
    fn subscribe(&self) -> broadcast::Receiver<KernelMessage>;
}
