//! Environment Configuration

use serde::{Deserialize, Serialize};

/// Environment configuration options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BindConfig {
    /// Name of the global object every binding is installed on
    pub namespace: String,

    /// Engine heap limit (bytes)
    pub memory_limit: Option<usize>,

    /// Maximum native stack the engine may use (bytes)
    pub max_stack_size: Option<usize>,

    /// Allocation volume that triggers a GC cycle (bytes)
    pub gc_threshold: Option<usize>,

    /// Install the `console` object on the global object
    pub install_console: bool,
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            namespace: "Module".to_string(),
            memory_limit: Some(32 * 1024 * 1024), // 32MB
            max_stack_size: None,
            gc_threshold: None,
            install_console: true,
        }
    }
}

impl BindConfig {
    /// Use a different namespace object name
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }
}
