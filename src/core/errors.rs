//! RMG-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, RmgateError>;

/// Top-level error type for rmgate.
#[derive(Debug, Error)]
pub enum RmgateError {
    #[error("[RMG-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[RMG-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[RMG-1101] unsupported platform: {details}")]
    UnsupportedPlatform { details: String },

    #[error("[RMG-1102] required tool not found: {tool}")]
    MissingTool { tool: &'static str },

    #[error("[RMG-2001] cannot locate the real `{command}` binary")]
    Resolution { command: &'static str },

    #[error("[RMG-3001] permission denied: {details}")]
    PermissionDenied { details: String },

    #[error("[RMG-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[RMG-3101] dpkg-divert failed for {path}: {details}")]
    DivertFailed { path: PathBuf, details: String },

    #[error("[RMG-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl RmgateError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "RMG-1001",
            Self::ConfigParse { .. } => "RMG-1003",
            Self::UnsupportedPlatform { .. } => "RMG-1101",
            Self::MissingTool { .. } => "RMG-1102",
            Self::Resolution { .. } => "RMG-2001",
            Self::PermissionDenied { .. } => "RMG-3001",
            Self::Io { .. } => "RMG-3002",
            Self::DivertFailed { .. } => "RMG-3101",
            Self::Runtime { .. } => "RMG-3900",
        }
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<toml::de::Error> for RmgateError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
