//! Single-assignment completion sources.
//!
//! Bridges callback-driven completion (an event listener observing a terminal
//! event, a scheduler settling an operation) into async call sites. Created
//! pending, resolved at most once; later resolutions are ignored.

use parking_lot::Mutex;
use tokio::sync::oneshot;

/// A future that is resolved exactly once from the outside.
pub struct CompletionSource<T> {
    sender: Mutex<Option<oneshot::Sender<T>>>,
    receiver: Mutex<Option<oneshot::Receiver<T>>>,
}

impl<T> CompletionSource<T> {
    pub fn new() -> Self {
        let (sender, receiver) = oneshot::channel();
        Self {
            sender: Mutex::new(Some(sender)),
            receiver: Mutex::new(Some(receiver)),
        }
    }

    /// Resolves the source. Returns `false` when it was already resolved
    /// (the value is dropped in that case).
    pub fn resolve(&self, value: T) -> bool {
        match self.sender.lock().take() {
            Some(sender) => sender.send(value).is_ok(),
            None => false,
        }
    }

    /// True once [`resolve`](Self::resolve) has been called.
    pub fn is_resolved(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Awaits the resolution value.
    ///
    /// The receiving half is single-use: the first caller gets the value,
    /// any later caller (or a caller racing a dropped sender) gets `None`.
    pub async fn wait(&self) -> Option<T> {
        let receiver = self.receiver.lock().take()?;
        receiver.await.ok()
    }
}

impl<T> Default for CompletionSource<T> {
    fn default() -> Self {
        Self::new()
    }
}
