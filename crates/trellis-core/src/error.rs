//! Error types for the Trellis engine

use thiserror::Error;

/// Result type alias for Trellis operations
pub type Result<T> = std::result::Result<T, TrellisError>;

/// Main error type for Trellis operations
///
/// Every backend returns these as rejected futures rather than panicking
/// across the async boundary.
#[derive(Error, Debug)]
pub enum TrellisError {
    /// Unknown object or list id
    #[error("not found: {0}")]
    NotFound(String),

    /// Class id with no registered schema
    #[error("schema not found: {0}")]
    SchemaNotFound(String),

    /// Schema misuse: wrong container type, unknown local key, field mismatch
    #[error("schema violation: {0}")]
    SchemaViolation(String),

    /// `select_range` guard against unbounded fetches
    #[error("range too large: requested {requested}, max {max}")]
    InvalidRange { requested: usize, max: usize },

    /// Opaque pass-through of a transport failure
    #[error("transport failure: {0}")]
    Transport(String),

    /// Storage-layer failure (SQL errors are mapped here at the boundary)
    #[error("backend error: {0}")]
    Backend(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TrellisError {
    /// Stable kind tag, used by the wire protocol to round-trip errors.
    pub fn kind(&self) -> &'static str {
        match self {
            TrellisError::NotFound(_) => "not_found",
            TrellisError::SchemaNotFound(_) => "schema_not_found",
            TrellisError::SchemaViolation(_) => "schema_violation",
            TrellisError::InvalidRange { .. } => "invalid_range",
            TrellisError::Transport(_) => "transport",
            TrellisError::Backend(_) => "backend",
            TrellisError::Serialization(_) => "serialization",
        }
    }

    /// Rebuild an error from a wire `{kind, message}` pair.
    pub fn from_kind(kind: &str, message: String) -> Self {
        match kind {
            "not_found" => TrellisError::NotFound(message),
            "schema_not_found" => TrellisError::SchemaNotFound(message),
            "schema_violation" => TrellisError::SchemaViolation(message),
            "transport" => TrellisError::Transport(message),
            _ => TrellisError::Backend(message),
        }
    }
}
