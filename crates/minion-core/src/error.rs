use std::path::PathBuf;

use minion_service::Command;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("service exists: {0}")]
    Exists(String),

    #[error("service not found: {0}")]
    NotFound(String),

    #[error("operation already in progress for service: {0}")]
    Busy(String),

    #[error("invalid service descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("{step} step failed for {id}: {message}")]
    BuildFailure {
        id: String,
        step: &'static str,
        message: String,
        output: String,
    },

    #[error("`{command}` failed for {id}: {message}")]
    RunFailure {
        id: String,
        command: Command,
        message: String,
        output: String,
    },

    #[error("stats output of {id} is not a JSON object: {source}")]
    ParseFailure {
        id: String,
        output: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("persistence failure at {}: {source}", .path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Caller-visible classification of a [`ControlError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Exists,
    NotFound,
    Busy,
    InvalidDescriptor,
    BuildFailure,
    RunFailure,
    ParseFailure,
    PersistenceFailure,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Exists => "exists",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Busy => "busy",
            ErrorKind::InvalidDescriptor => "invalid_descriptor",
            ErrorKind::BuildFailure => "build_failure",
            ErrorKind::RunFailure => "run_failure",
            ErrorKind::ParseFailure => "parse_failure",
            ErrorKind::PersistenceFailure => "persistence_failure",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ControlError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ControlError::Exists(_) => ErrorKind::Exists,
            ControlError::NotFound(_) => ErrorKind::NotFound,
            ControlError::Busy(_) => ErrorKind::Busy,
            ControlError::InvalidDescriptor(_) => ErrorKind::InvalidDescriptor,
            ControlError::BuildFailure { .. } => ErrorKind::BuildFailure,
            ControlError::RunFailure { .. } => ErrorKind::RunFailure,
            ControlError::ParseFailure { .. } => ErrorKind::ParseFailure,
            ControlError::Persistence { .. } | ControlError::Encoding(_) => {
                ErrorKind::PersistenceFailure
            }
        }
    }

    /// Output captured from the failing child process, if any.
    pub fn output(&self) -> Option<&str> {
        match self {
            ControlError::BuildFailure { output, .. }
            | ControlError::RunFailure { output, .. }
            | ControlError::ParseFailure { output, .. } => Some(output),
            _ => None,
        }
    }

    pub(crate) fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ControlError::Persistence {
            path: path.into(),
            source,
        }
    }
}
