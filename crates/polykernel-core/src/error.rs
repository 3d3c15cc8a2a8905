//! Error types for the kernel runtime.

use thiserror::Error;

use polykernel_protocols::error::{RoutingSlipError, TransportError};

/// Errors surfaced while routing, scheduling, or handling commands.
#[derive(Debug, Error)]
pub enum KernelError {
    /// No handler is registered for the command type.
    #[error("No handler found for command type {0}")]
    HandlerNotFound(String),

    /// A named, aliased, or URI-addressed kernel could not be resolved.
    #[error("Kernel not found: {0}")]
    KernelNotFound(String),

    /// A child kernel's name is already taken in the collection.
    #[error("kernel with name {0} already exists")]
    DuplicateKernelName(String),

    /// A child kernel's alias is already taken in the collection.
    #[error("kernel with alias {0} already exists")]
    DuplicateKernelAlias(String),

    /// A handled command reported failure.
    #[error("{message}")]
    CommandFailed {
        /// Human-readable failure description.
        message: String,
    },

    /// The waiter for the in-flight operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// The awaited command settled without producing the expected event.
    #[error("Command was handled before reporting expected result.")]
    NoResultProduced,

    /// Routing-slip protocol violation.
    #[error(transparent)]
    RoutingSlip(#[from] RoutingSlipError),

    /// Transport failure while forwarding.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The scheduler's worker is gone.
    #[error("Scheduler has shut down")]
    SchedulerShutdown,

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for kernel operations.
pub type KernelResult<T> = Result<T, KernelError>;
