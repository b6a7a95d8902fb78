//! Error types for runledger startup and plumbing.
//!
//! Domain failures (runs, costs, pricing) live in their own crates. This enum
//! covers what a binary needs before the service is up: configuration,
//! filesystem and logging setup.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using [`CoreError`].
pub type Result<T> = std::result::Result<T, CoreError>;

/// Process exit code for configuration problems.
pub const EXIT_CONFIG: u8 = 2;

/// Process exit code for every other startup failure.
pub const EXIT_FAILURE: u8 = 1;

/// Errors raised while configuring and starting runledger.
#[derive(Debug, Error)]
pub enum CoreError {
    // =========================================================================
    // Configuration
    // =========================================================================
    /// An explicitly named config file does not exist
    #[error("Configuration not found at {path}")]
    ConfigNotFound {
        path: PathBuf,
        #[source]
        source: Option<std::io::Error>,
    },

    /// The config file is not valid YAML for the expected shape
    #[error("Invalid configuration at {path}: {message}")]
    ConfigInvalid { path: PathBuf, message: String },

    /// A value is present but unusable
    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String },

    /// A required value was set neither in the file nor the environment
    #[error("Missing required config field: {field}")]
    ConfigMissingField { field: String },

    // =========================================================================
    // Filesystem
    // =========================================================================
    #[error("I/O error {operation}: {path}")]
    Io {
        operation: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create directory: {path}")]
    DirectoryCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Anything else that prevents startup
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl CoreError {
    pub fn config_not_found_with_source(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ConfigNotFound {
            path: path.into(),
            source: Some(source),
        }
    }

    pub fn config_validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    pub fn io(operation: impl Into<String>, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            path: path.into(),
            source,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound { .. }
                | Self::ConfigInvalid { .. }
                | Self::ConfigValidation { .. }
                | Self::ConfigMissingField { .. }
        )
    }

    /// Exit code a binary should terminate with for this error.
    pub fn exit_code(&self) -> u8 {
        if self.is_config_error() { EXIT_CONFIG } else { EXIT_FAILURE }
    }

    /// Returns actionable guidance for the operator
    pub fn guidance(&self) -> Option<&'static str> {
        match self {
            Self::ConfigNotFound { .. } => Some("Create the file or drop --config to use ~/.runledger/config.yaml"),
            Self::ConfigInvalid { .. } => Some("Check YAML syntax in the configuration file"),
            Self::ConfigMissingField { .. } => {
                Some("Set the field in the config file or via its environment variable")
            }
            Self::DirectoryCreation { .. } => Some("Check permissions on the parent directory or pass --log-dir"),
            _ => None,
        }
    }
}
