//! Function metadata as registered with a worker.
//!
//! Metadata is discovered upstream (script folder scanning, manifest
//! parsing) and handed to the channel read-only. The channel forwards it
//! verbatim inside `FunctionLoadRequest` and keys its registries by
//! [`FunctionId`].

use crate::FunctionId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Direction of a binding relative to the function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BindingDirection {
    /// Trigger or input binding.
    In,
    /// Output binding.
    Out,
    /// Bidirectional binding.
    InOut,
}

/// A named, directional channel between a function parameter and a
/// trigger/input/output source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingInfo {
    /// Binding name as it appears in the function's parameter list.
    pub name: String,
    /// Direction of data flow.
    pub direction: BindingDirection,
    /// Binding type (e.g. `httpTrigger`, `queue`, `http`).
    pub binding_type: String,
    /// Optional declared data type (e.g. `binary`, `string`, `stream`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
}

impl BindingInfo {
    /// Creates an input binding.
    #[must_use]
    pub fn input(name: impl Into<String>, binding_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            direction: BindingDirection::In,
            binding_type: binding_type.into(),
            data_type: None,
        }
    }

    /// Creates an output binding.
    #[must_use]
    pub fn output(name: impl Into<String>, binding_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            direction: BindingDirection::Out,
            binding_type: binding_type.into(),
            data_type: None,
        }
    }

    /// Sets the declared data type.
    #[must_use]
    pub fn with_data_type(mut self, data_type: impl Into<String>) -> Self {
        self.data_type = Some(data_type.into());
        self
    }
}

/// Read-only description of one user function.
///
/// # Example
///
/// ```
/// use glossa_types::{BindingInfo, FunctionId, FunctionMetadata};
///
/// let meta = FunctionMetadata::new(FunctionId::from("f1"), "HttpTrigger1")
///     .with_entry_point("handler")
///     .with_script_file("HttpTrigger1/run.py")
///     .with_binding(BindingInfo::input("req", "httpTrigger"))
///     .with_binding(BindingInfo::output("res", "http"));
///
/// assert_eq!(meta.name, "HttpTrigger1");
/// assert_eq!(meta.bindings.len(), 2);
/// assert!(!meta.is_proxy);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionMetadata {
    /// Stable opaque id, unique within a channel.
    pub function_id: FunctionId,
    /// Human-readable function name; also the per-function logger category.
    pub name: String,
    /// Entry point within the script file, when the language needs one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<String>,
    /// Path to the script implementing the function.
    pub script_file: PathBuf,
    /// Directory containing the function.
    pub directory: PathBuf,
    /// Whether this function is a proxy rather than user code.
    pub is_proxy: bool,
    /// Ordered binding descriptors.
    pub bindings: Vec<BindingInfo>,
}

impl FunctionMetadata {
    /// Creates metadata with the given id and name and no bindings.
    #[must_use]
    pub fn new(function_id: FunctionId, name: impl Into<String>) -> Self {
        Self {
            function_id,
            name: name.into(),
            entry_point: None,
            script_file: PathBuf::new(),
            directory: PathBuf::new(),
            is_proxy: false,
            bindings: Vec::new(),
        }
    }

    /// Sets the entry point.
    #[must_use]
    pub fn with_entry_point(mut self, entry_point: impl Into<String>) -> Self {
        self.entry_point = Some(entry_point.into());
        self
    }

    /// Sets the script file path.
    #[must_use]
    pub fn with_script_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.script_file = path.into();
        self
    }

    /// Sets the function directory.
    #[must_use]
    pub fn with_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.directory = path.into();
        self
    }

    /// Marks the function as a proxy.
    #[must_use]
    pub fn proxy(mut self) -> Self {
        self.is_proxy = true;
        self
    }

    /// Appends a binding, preserving registration order.
    #[must_use]
    pub fn with_binding(mut self, binding: BindingInfo) -> Self {
        self.bindings.push(binding);
        self
    }

    /// Returns the input bindings in declaration order.
    pub fn input_bindings(&self) -> impl Iterator<Item = &BindingInfo> {
        self.bindings
            .iter()
            .filter(|b| matches!(b.direction, BindingDirection::In | BindingDirection::InOut))
    }

    /// Returns the output bindings in declaration order.
    pub fn output_bindings(&self) -> impl Iterator<Item = &BindingInfo> {
        self.bindings
            .iter()
            .filter(|b| matches!(b.direction, BindingDirection::Out | BindingDirection::InOut))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http_function() -> FunctionMetadata {
        FunctionMetadata::new(FunctionId::from("f1"), "HttpTrigger1")
            .with_entry_point("handler")
            .with_script_file("HttpTrigger1/run.py")
            .with_directory("HttpTrigger1")
            .with_binding(BindingInfo::input("req", "httpTrigger"))
            .with_binding(BindingInfo::output("res", "http"))
    }

    #[test]
    fn builder_sets_fields() {
        let meta = http_function();

        assert_eq!(meta.function_id, FunctionId::from("f1"));
        assert_eq!(meta.entry_point.as_deref(), Some("handler"));
        assert_eq!(meta.script_file, PathBuf::from("HttpTrigger1/run.py"));
        assert!(!meta.is_proxy);
    }

    #[test]
    fn binding_order_is_preserved() {
        let meta = http_function();
        let names: Vec<_> = meta.bindings.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["req", "res"]);
    }

    #[test]
    fn direction_filters() {
        let meta = http_function().with_binding(
            BindingInfo {
                name: "state".into(),
                direction: BindingDirection::InOut,
                binding_type: "blob".into(),
                data_type: None,
            },
        );

        let inputs: Vec<_> = meta.input_bindings().map(|b| b.name.as_str()).collect();
        let outputs: Vec<_> = meta.output_bindings().map(|b| b.name.as_str()).collect();
        assert_eq!(inputs, vec!["req", "state"]);
        assert_eq!(outputs, vec!["res", "state"]);
    }

    #[test]
    fn metadata_serde_round_trip() {
        let meta = http_function();
        let json = serde_json::to_string(&meta).unwrap();
        let back: FunctionMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);
    }
}
