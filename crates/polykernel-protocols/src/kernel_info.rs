//! Kernel descriptors and their merge rules.

use serde::{Deserialize, Serialize};

/// A command type supported by a kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelCommandInfo {
    pub name: String,
}

/// A directive supported by a kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelDirectiveInfo {
    pub name: String,
}

/// Describes one kernel: identity, addressing, and capabilities.
///
/// `uri` is owned by the kernel's parent composite once the kernel is added
/// to one; `remote_uri` is set at proxy construction and never changes;
/// `aliases` reflects every name the hosting collection indexes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KernelInfo {
    pub local_name: String,
    pub uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_version: Option<String>,
    pub display_name: String,
    #[serde(default)]
    pub is_composite: bool,
    #[serde(default)]
    pub is_proxy: bool,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub supported_kernel_commands: Vec<KernelCommandInfo>,
    #[serde(default)]
    pub supported_directives: Vec<KernelDirectiveInfo>,
}

impl KernelInfo {
    /// Descriptor for a freshly constructed local kernel.
    pub fn new(local_name: impl Into<String>, uri: impl Into<String>) -> Self {
        let local_name = local_name.into();
        Self {
            display_name: local_name.clone(),
            local_name,
            uri: uri.into(),
            remote_uri: None,
            description: None,
            language_name: None,
            language_version: None,
            is_composite: false,
            is_proxy: false,
            aliases: Vec::new(),
            supported_kernel_commands: Vec::new(),
            supported_directives: Vec::new(),
        }
    }
}

/// Merges `incoming` into `destination` without dropping capabilities.
///
/// Language name and version are taken only when `incoming` provides them;
/// the display name is taken unconditionally; supported commands and
/// directives are unioned by name, never removed.
pub fn update_kernel_info(destination: &mut KernelInfo, incoming: &KernelInfo) {
    if let Some(language_name) = &incoming.language_name {
        destination.language_name = Some(language_name.clone());
    }
    if let Some(language_version) = &incoming.language_version {
        destination.language_version = Some(language_version.clone());
    }
    destination.display_name = incoming.display_name.clone();

    for directive in &incoming.supported_directives {
        if !destination
            .supported_directives
            .iter()
            .any(|existing| existing.name == directive.name)
        {
            destination.supported_directives.push(directive.clone());
        }
    }
    for command in &incoming.supported_kernel_commands {
        if !destination
            .supported_kernel_commands
            .iter()
            .any(|existing| existing.name == command.name)
        {
            destination.supported_kernel_commands.push(command.clone());
        }
    }
}
