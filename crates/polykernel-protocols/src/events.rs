//! Built-in event types produced by the runtime.

use serde::{Deserialize, Serialize};

use crate::kernel_info::KernelInfo;

pub const COMMAND_SUCCEEDED: &str = "CommandSucceeded";
pub const COMMAND_FAILED: &str = "CommandFailed";
pub const COMMAND_CANCELLED: &str = "CommandCancelled";
pub const KERNEL_INFO_PRODUCED: &str = "KernelInfoProduced";
pub const KERNEL_READY: &str = "KernelReady";

/// Terminal event: the command completed successfully.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandSucceeded {}

/// Terminal event: the command failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandFailed {
    pub message: String,
}

/// Terminal event: the command was cancelled before completion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandCancelled {}

/// A kernel described itself, on request or when its capabilities changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KernelInfoProduced {
    pub kernel_info: KernelInfo,
}

/// A host finished connecting and announces every kernel it serves.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KernelReady {
    #[serde(default)]
    pub kernel_infos: Vec<KernelInfo>,
}

/// True for the terminal event types that settle a command.
pub fn is_terminal_event_type(event_type: &str) -> bool {
    matches!(
        event_type,
        COMMAND_SUCCEEDED | COMMAND_FAILED | COMMAND_CANCELLED
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_failed_carries_its_message_on_the_wire() {
        let encoded = serde_json::to_string(&CommandFailed {
            message: "boom".to_string(),
        })
        .unwrap();
        assert_eq!(encoded, r#"{"message":"boom"}"#);
    }

    #[test]
    fn terminal_event_types_are_recognized() {
        assert!(is_terminal_event_type(COMMAND_SUCCEEDED));
        assert!(is_terminal_event_type(COMMAND_FAILED));
        assert!(is_terminal_event_type(COMMAND_CANCELLED));
        assert!(!is_terminal_event_type(KERNEL_INFO_PRODUCED));
    }
}
