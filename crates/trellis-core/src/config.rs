//! Serializer configuration

use serde::{Deserialize, Serialize};

/// Configuration for the graph serializer's autosave machinery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializerConfig {
    /// Debounce window for coalescing dirty-object flushes, in milliseconds
    pub debounce_ms: u64,

    /// How many recent flushes to keep for diagnostics
    pub history_limit: usize,
}

impl Default for SerializerConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 5,
            history_limit: 50,
        }
    }
}
