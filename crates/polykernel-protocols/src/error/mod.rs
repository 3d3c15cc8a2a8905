//! Protocol error types.

mod routing_slip;
mod transport;

pub use routing_slip::RoutingSlipError;
pub use transport::TransportError;
