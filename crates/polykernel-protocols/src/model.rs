//! Serializable wire forms of the runtime envelopes.
//!
//! The runtime shares envelopes by handle; what crosses a transport is one of
//! these owned models instead, so every process boundary gets deep-clone
//! semantics from plain serialization.

use serde::{Deserialize, Serialize};

use crate::commands::KernelCommand;

/// Wire form of a command envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KernelCommandEnvelopeModel {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub command_type: String,
    pub command: KernelCommand,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routing_slip: Vec<String>,
}

/// Wire form of an event envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KernelEventEnvelopeModel {
    pub event_type: String,
    #[serde(default)]
    pub event: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<KernelCommandEnvelopeModel>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routing_slip: Vec<String>,
}

/// A command or event crossing the transport boundary; the two interleave on
/// one channel and are discriminated by which of `commandType`/`eventType`
/// is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KernelMessage {
    Command(KernelCommandEnvelopeModel),
    Event(KernelEventEnvelopeModel),
}

impl KernelMessage {
    pub fn is_command(&self) -> bool {
        matches!(self, KernelMessage::Command(_))
    }

    pub fn is_event(&self) -> bool {
        matches!(self, KernelMessage::Event(_))
    }

    pub fn as_command(&self) -> Option<&KernelCommandEnvelopeModel> {
        match self {
            KernelMessage::Command(command) => Some(command),
            KernelMessage::Event(_) => None,
        }
    }

    pub fn as_event(&self) -> Option<&KernelEventEnvelopeModel> {
        match self {
            KernelMessage::Command(_) => None,
            KernelMessage::Event(event) => Some(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_discriminated_by_their_type_field() {
        let command: KernelMessage = serde_json::from_str(
            r#"{"commandType":"SubmitCode","command":{"targetKernelName":"csharp"}}"#,
        )
        .unwrap();
        assert!(command.is_command());

        let event: KernelMessage =
            serde_json::from_str(r#"{"eventType":"CommandSucceeded","event":{}}"#).unwrap();
        assert!(event.is_event());
    }

    #[test]
    fn command_model_round_trips_with_camel_case_fields() {
        let model = KernelCommandEnvelopeModel {
            token: Some("token-1".to_string()),
            id: Some("id-1".to_string()),
            command_type: "SubmitCode".to_string(),
            command: KernelCommand::for_target("csharp"),
            routing_slip: vec!["kernel://local/?tag=arrived".to_string()],
        };
        let encoded = serde_json::to_value(&model).unwrap();
        assert_eq!(encoded["commandType"], "SubmitCode");
        assert_eq!(encoded["routingSlip"][0], "kernel://local/?tag=arrived");
        let decoded: KernelCommandEnvelopeModel = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, model);
    }

    #[test]
    fn event_model_carries_its_command_backreference() {
        let json = r#"{
            "eventType": "CommandSucceeded",
            "event": {},
            "command": {"commandType": "SubmitCode", "command": {}},
            "routingSlip": ["kernel://local/"]
        }"#;
        let decoded: KernelEventEnvelopeModel = serde_json::from_str(json).unwrap();
        assert_eq!(decoded.event_type, "CommandSucceeded");
        assert_eq!(
            decoded.command.as_ref().map(|c| c.command_type.as_str()),
            Some("SubmitCode")
        );
    }
}
