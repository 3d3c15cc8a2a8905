//! # PolyKernel Protocols
//!
//! Wire contract and pure protocol logic for the PolyKernel runtime:
//!
//! - [`uri`]: kernel-URI canonicalization
//! - [`routing_slip`]: ordered per-hop stamping with duplicate suppression
//! - [`envelope`]: command and event envelopes shared across the runtime
//! - [`model`]: their serializable wire forms
//! - [`commands`] / [`events`]: built-in command and event types
//! - [`kernel_info`]: kernel descriptors and merge rules
//! - [`token`]: correlation token and command-id generation
//! - [`transport`]: sender/receiver contract for crossing process boundaries
//! - [`error`]: protocol error types

pub mod commands;
pub mod envelope;
pub mod error;
pub mod events;
pub mod kernel_info;
pub mod model;
pub mod routing_slip;
pub mod token;
pub mod transport;
pub mod uri;

pub use commands::KernelCommand;
pub use envelope::{KernelCommandEnvelope, KernelEventEnvelope};
pub use error::{RoutingSlipError, TransportError};
pub use events::{CommandCancelled, CommandFailed, CommandSucceeded, KernelInfoProduced, KernelReady};
pub use kernel_info::{KernelCommandInfo, KernelDirectiveInfo, KernelInfo, update_kernel_info};
pub use model::{KernelCommandEnvelopeModel, KernelEventEnvelopeModel, KernelMessage};
pub use routing_slip::{CommandRoutingSlip, EventRoutingSlip};
pub use transport::{KernelCommandAndEventReceiver, KernelCommandAndEventSender};
