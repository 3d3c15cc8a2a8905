//! Built-in command types and the generic command payload.

use serde::{Deserialize, Serialize};

/// Command type every kernel handles: requests its
/// [`KernelInfo`](crate::kernel_info::KernelInfo) descriptor.
pub const REQUEST_KERNEL_INFO: &str = "RequestKernelInfo";

/// The payload of a command envelope: the routing fields the runtime
/// understands plus opaque command-specific data, dispatched purely by the
/// envelope's command type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KernelCommand {
    /// Name or alias of the kernel this command is addressed to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_kernel_name: Option<String>,

    /// URI of the kernel that issued the command.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_uri: Option<String>,

    /// URI of the kernel this command is addressed to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_uri: Option<String>,

    /// Command-specific fields, carried verbatim.
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl KernelCommand {
    /// A payload addressed to `target_kernel_name`.
    pub fn for_target(target_kernel_name: impl Into<String>) -> Self {
        Self {
            target_kernel_name: Some(target_kernel_name.into()),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_fields_and_payload_fields_round_trip() {
        let json = serde_json::json!({
            "targetKernelName": "csharp",
            "originUri": "kernel://local/",
            "code": "1 + 1"
        });
        let command: KernelCommand = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(command.target_kernel_name.as_deref(), Some("csharp"));
        assert_eq!(command.fields["code"], "1 + 1");
        assert_eq!(serde_json::to_value(&command).unwrap(), json);
    }

    #[test]
    fn absent_routing_fields_are_omitted_from_the_wire() {
        let encoded = serde_json::to_string(&KernelCommand::default()).unwrap();
        assert_eq!(encoded, "{}");
    }
}
