//! Routing-slip protocol violations.

use thiserror::Error;

/// Raised when a routing-slip operation would violate the at-most-once or
/// arrived-before-departed invariants. These indicate a protocol bug in the
/// caller (or genuine duplicate delivery), not a recoverable condition.
#[derive(Debug, Error)]
pub enum RoutingSlipError {
    /// The kernel URI could not be parsed.
    #[error("invalid kernel uri {uri}: {source}")]
    InvalidUri {
        uri: String,
        #[source]
        source: url::ParseError,
    },

    /// The URI is already present in the slip.
    #[error("the uri {uri} is already in the routing slip [{slip}]")]
    AlreadyInSlip { uri: String, slip: String },

    /// A departure stamp was attempted for a hop that never arrived.
    #[error("the uri {uri} is not in the routing slip [{slip}]")]
    NotInSlip { uri: String, slip: String },

    /// A continuation would duplicate an entry already in the slip.
    #[error(
        "the uri {uri} is already in the routing slip [{slip}], cannot continue with routing slip [{continuation}]"
    )]
    CannotContinue {
        uri: String,
        slip: String,
        continuation: String,
    },
}
