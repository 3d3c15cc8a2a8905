//! Correlation token and command-id generation.
//!
//! A token identifies a causal chain: a root command and every sub-command it
//! transitively spawns carry the same token. An id identifies one specific
//! envelope instance.

use uuid::Uuid;

/// Generates a fresh correlation token for a new causal chain.
pub fn new_token() -> String {
    Uuid::new_v4().to_string()
}

/// Generates a unique identifier for a single command envelope.
pub fn new_command_id() -> String {
    Uuid::new_v4().to_string()
}
