//! Error types for the reconciler crate.

use thiserror::Error;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciler error types.
#[derive(Debug, Error)]
pub enum Error {
    /// A host, file or command operation failed.
    #[error(transparent)]
    Core(#[from] igw_core::Error),
    /// A leader-only operation ran on a non-leader unit.
    #[error("'{operation}' must be run on the leader")]
    NotLeader { operation: String },
    /// Action parameters are missing or malformed.
    #[error("invalid action parameters: {reason}")]
    InvalidParams { reason: String },
    /// A template referenced a value the render context lacks.
    #[error("template '{template}' references unknown value '{key}'")]
    TemplateValueMissing { template: String, key: String },
}

impl Error {
    /// Create a leadership violation error.
    pub fn not_leader(operation: impl Into<String>) -> Self {
        Self::NotLeader {
            operation: operation.into(),
        }
    }

    /// Create an invalid parameters error.
    pub fn invalid_params(reason: impl Into<String>) -> Self {
        Self::InvalidParams {
            reason: reason.into(),
        }
    }

    /// Create a missing template value error.
    pub fn template_value_missing(template: impl Into<String>, key: impl Into<String>) -> Self {
        Self::TemplateValueMissing {
            template: template.into(),
            key: key.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Core(igw_core::Error::json_parse_failed(e.to_string()))
    }
}
