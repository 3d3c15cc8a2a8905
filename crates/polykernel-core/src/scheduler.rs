//! FIFO operation scheduler with an immediate-dispatch fast path.
//!
//! One scheduler serializes the commands of a kernel tree: queued operations
//! run strictly one at a time, in submission order. An operation submitted
//! while another is already in flight is dispatched immediately and out of
//! band instead of queued, which lets a handler submit a sub-command to its
//! own scheduler without deadlocking on itself.

use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::completion::CompletionSource;
use crate::error::{KernelError, KernelResult};

type Executor<T> = Box<dyn FnOnce(T) -> BoxFuture<'static, KernelResult<()>> + Send>;

struct Operation<T> {
    value: T,
    executor: Executor<T>,
    completion: Arc<CompletionSource<KernelResult<()>>>,
}

struct InFlight<T> {
    value: T,
    completion: Arc<CompletionSource<KernelResult<()>>>,
}

/// Sequences asynchronous operations over values of type `T`.
pub struct KernelScheduler<T> {
    queue_tx: mpsc::UnboundedSender<Operation<T>>,
    in_flight: Arc<Mutex<Option<InFlight<T>>>>,
}

impl<T> KernelScheduler<T>
where
    T: Clone + Send + 'static,
{
    /// Creates an idle scheduler and starts its queue worker.
    pub fn new() -> Self {
        let (queue_tx, mut queue_rx) = mpsc::unbounded_channel::<Operation<T>>();
        let in_flight = Arc::new(Mutex::new(None::<InFlight<T>>));

        let worker_slot = Arc::clone(&in_flight);
        tokio::spawn(async move {
            while let Some(operation) = queue_rx.recv().await {
                let completion = Arc::clone(&operation.completion);
                *worker_slot.lock() = Some(InFlight {
                    value: operation.value.clone(),
                    completion: Arc::clone(&completion),
                });
                let result = (operation.executor)(operation.value).await;
                *worker_slot.lock() = None;
                completion.resolve(result);
            }
        });

        Self {
            queue_tx,
            in_flight,
        }
    }

    /// Submits an operation and returns a future that settles with its
    /// outcome.
    ///
    /// The submission itself happens before this returns: when an operation
    /// is already in flight the new one starts immediately on its own task,
    /// otherwise it joins the FIFO queue. Dropping the returned future
    /// abandons the wait, not the work.
    pub fn run_async<F, Fut>(
        &self,
        value: T,
        executor: F,
    ) -> impl std::future::Future<Output = KernelResult<()>> + Send + 'static
    where
        F: FnOnce(T) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = KernelResult<()>> + Send + 'static,
    {
        let completion = Arc::new(CompletionSource::new());
        let boxed: Executor<T> = Box::new(move |value| Box::pin(executor(value)));

        if self.in_flight.lock().is_some() {
            let task_completion = Arc::clone(&completion);
            tokio::spawn(async move {
                let result = boxed(value).await;
                task_completion.resolve(result);
            });
        } else {
            let operation = Operation {
                value,
                executor: boxed,
                completion: Arc::clone(&completion),
            };
            if self.queue_tx.send(operation).is_err() {
                completion.resolve(Err(KernelError::SchedulerShutdown));
            }
        }

        async move {
            match completion.wait().await {
                Some(result) => result,
                None => Err(KernelError::SchedulerShutdown),
            }
        }
    }

    /// Stops waiting on the in-flight queued operation, if any.
    ///
    /// The waiter's future settles with [`KernelError::Cancelled`] after
    /// `on_cancel` has observed the operation's value. The executor itself
    /// keeps running to settlement on its own; only the wait is cancelled.
    pub fn cancel_current_operation<F>(&self, on_cancel: F)
    where
        F: FnOnce(T),
    {
        let taken = self.in_flight.lock().take();
        if let Some(in_flight) = taken {
            on_cancel(in_flight.value);
            in_flight.completion.resolve(Err(KernelError::Cancelled));
        }
    }
}

impl<T> Default for KernelScheduler<T>
where
    T: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
