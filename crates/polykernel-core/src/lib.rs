//! # PolyKernel Core
//!
//! The kernel runtime: kernel trees, command scheduling, and per-command
//! invocation contexts.
//!
//! ```text
//!   send(command)
//!        │
//!        ▼
//!   KernelScheduler ── one command at a time, FIFO ──┐
//!        │                                           │
//!        ▼                                           │
//!   CompositeKernel ── routes by uri/name/default    │
//!    ├── DefaultKernel ("csharp")                    │
//!    ├── DefaultKernel ("fsharp")                    │
//!    └── ProxyKernel ──▶ transport ──▶ remote kernel │
//!        │                                           │
//!        ▼                                           ▼
//!   KernelInvocationContext ── events ──▶ kernel event buses
//! ```
//!
//! Commands travel as [`KernelCommandEnvelope`] handles whose routing slips
//! record each kernel they arrive at and depart from. A
//! [`KernelInvocationContext`] is established for the root command of each
//! submission; handlers publish events through it and the context settles
//! the command with `CommandSucceeded` or `CommandFailed` exactly once.
//!
//! ## Key components
//!
//! - [`Kernel`]: the contract all kernels share, with the base dispatch
//!   behavior as default methods
//! - [`DefaultKernel`]: a leaf kernel running registered handlers
//! - [`CompositeKernel`]: the tree root, routing to child kernels
//! - [`ProxyKernel`]: a local stand-in forwarding to a remote kernel
//! - [`KernelScheduler`]: FIFO execution with an immediate-dispatch fast
//!   path for nested submissions
//! - [`KernelEventBus`]: synchronous fan-out of event envelopes
//!
//! [`KernelCommandEnvelope`]: polykernel_protocols::KernelCommandEnvelope

pub mod bus;
mod collection;
pub mod completion;
pub mod composite;
pub mod context;
pub mod error;
pub mod kernel;
pub mod proxy;
pub mod scheduler;

pub use bus::{KernelEventBus, Subscription};
pub use completion::CompletionSource;
pub use composite::CompositeKernel;
pub use context::{ContextSlot, KernelInvocationContext};
pub use error::{KernelError, KernelResult};
pub use kernel::{
    DefaultKernel, Kernel, KernelCommandHandler, KernelCommandInvocation, KernelCore, KernelType,
    command_handler_fn, submit_command_and_get_result,
};
pub use proxy::ProxyKernel;
pub use scheduler::KernelScheduler;
