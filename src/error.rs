//! Error types for the relay.

use std::path::PathBuf;

/// Configuration resolution errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("failed to parse settings: {0}")]
    ParseError(String),

    #[error("failed to read settings file '{path}': {reason}")]
    Io { path: PathBuf, reason: String },
}

/// Errors raised while bringing a channel up or down.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },
}

/// Case registry errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("No active case. Send case_id via POST /api/conversation or POST /api/conversation/clear first.")]
    NoActiveCase,

    #[error("Case '{case_id}' not found. Send case_id via POST /api/conversation or POST /api/conversation/clear first.")]
    CaseNotFound { case_id: String },
}

/// Case file store errors.
#[derive(Debug, thiserror::Error)]
pub enum FileStoreError {
    #[error("Invalid or missing caseId")]
    InvalidCaseId,

    #[error("Invalid path")]
    InvalidPath,

    #[error("File not found")]
    NotFound,

    #[error("I/O error at '{path}': {reason}")]
    Io { path: PathBuf, reason: String },
}

impl FileStoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            reason: err.to_string(),
        }
    }
}
