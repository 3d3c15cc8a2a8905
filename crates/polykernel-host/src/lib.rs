//! # PolyKernel Host
//!
//! Binds a kernel tree to the transports that connect it to other processes.
//!
//! ```text
//!                        ┌────────────── KernelHost ──────────────┐
//!   remote peer ◀─ sender │  composite events, KernelReady,       │
//!        │                │  KernelInfoProduced                   │
//!        │                │                                       │
//!        └─ receiver ────▶│  commands ─▶ scheduler ─▶ composite   │
//!                         │  events   ─▶ proxy kernels            │
//!                         └───────────────────────────────────────┘
//! ```
//!
//! A [`KernelHost`] owns one [`CompositeKernel`] and re-roots every kernel
//! URI in the tree under its own URI. Connecting bridges the tree to the
//! default transport pair; further pairs register as [`Connector`]s, which
//! learn the remote host roots reachable through them from the traffic they
//! observe. Proxy kernels for remote peers are grafted onto the tree over
//! whichever connector reaches them.
//!
//! ## Key components
//!
//! - [`KernelHost`]: owns the tree, its inbound scheduler, and the
//!   registered connectors
//! - [`Connector`]: one sender/receiver pair with passively-learned
//!   reachability
//! - [`HostError`]: failures while wiring kernels to transports
//!
//! [`CompositeKernel`]: polykernel_core::CompositeKernel

pub mod connector;
pub mod error;
pub mod host;

pub use connector::Connector;
pub use error::{HostError, HostResult};
pub use host::KernelHost;
