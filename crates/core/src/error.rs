//! Core error types for igw operations.
//!
//! All errors are explicit, typed, and recoverable - no panics allowed.

use std::path::PathBuf;

use thiserror::Error;

/// Core error type for igw operations.
#[derive(Debug, Error)]
pub enum Error {
    // External command errors
    #[error("command '{program} {args}' failed with exit code {exit_code:?}: {stderr}")]
    CommandFailed {
        program: String,
        args: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("failed to execute '{program}': {reason}")]
    CommandSpawnFailed { program: String, reason: String },

    // I/O errors
    #[error("failed to read file '{path}': {reason}")]
    FileReadFailed { path: PathBuf, reason: String },

    #[error("failed to write file '{path}': {reason}")]
    FileWriteFailed { path: PathBuf, reason: String },

    #[error("failed to create directory '{path}': {reason}")]
    DirectoryCreationFailed { path: PathBuf, reason: String },

    // Parsing errors
    #[error("JSON parse error: {reason}")]
    JsonParseFailed { reason: String },

    #[error("TOML parse error: {reason}")]
    TomlParseFailed { reason: String },

    // Configuration errors
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // Relation errors
    #[error("relation '{name}' is not established")]
    RelationNotFound { name: String },

    // Generic I/O error wrapper
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a command failure error.
    pub fn command_failed(
        program: impl Into<String>,
        args: &[String],
        exit_code: Option<i32>,
        stderr: impl Into<String>,
    ) -> Self {
        Self::CommandFailed {
            program: program.into(),
            args: args.join(" "),
            exit_code,
            stderr: stderr.into(),
        }
    }

    /// Create a command spawn error.
    pub fn command_spawn_failed(program: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CommandSpawnFailed {
            program: program.into(),
            reason: reason.into(),
        }
    }

    /// Create a file read error.
    pub fn file_read_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::FileReadFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a file write error.
    pub fn file_write_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::FileWriteFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a directory creation error.
    pub fn directory_creation_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::DirectoryCreationFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a JSON parse error.
    pub fn json_parse_failed(reason: impl Into<String>) -> Self {
        Self::JsonParseFailed {
            reason: reason.into(),
        }
    }

    /// Create a TOML parse error.
    pub fn toml_parse_failed(reason: impl Into<String>) -> Self {
        Self::TomlParseFailed {
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create a missing relation error.
    pub fn relation_not_found(name: impl Into<String>) -> Self {
        Self::RelationNotFound { name: name.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_failed_display() {
        let args = vec!["restart".to_string(), "rbd-target-api".to_string()];
        let err = Error::command_failed("systemctl", &args, Some(5), "unit not found");
        let msg = err.to_string();
        assert!(msg.contains("systemctl restart rbd-target-api"));
        assert!(msg.contains("unit not found"));
    }

    #[test]
    fn test_relation_not_found() {
        let err = Error::relation_not_found("cluster");
        assert_eq!(err.to_string(), "relation 'cluster' is not established");
    }
}
