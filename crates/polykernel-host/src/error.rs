//! Error types for the host layer.

use thiserror::Error;

use polykernel_core::KernelError;
use polykernel_protocols::{RoutingSlipError, TransportError};

/// Errors raised while binding a kernel tree to its transports.
#[derive(Debug, Error)]
pub enum HostError {
    /// No registered connector can reach the remote kernel URI.
    #[error("Cannot find connector to reach {0}")]
    ConnectorNotFound(String),

    /// The kernel tree rejected the operation.
    #[error(transparent)]
    Kernel(#[from] KernelError),

    /// The transport failed while sending.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A host-stamped routing slip was rejected.
    #[error(transparent)]
    RoutingSlip(#[from] RoutingSlipError),
}

pub type HostResult<T> = Result<T, HostError>;
