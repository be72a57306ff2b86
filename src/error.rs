// MIT License - Copyright (c) 2021 TJForc
// Error types

use std::path::PathBuf;

/// Errors raised by the integration session with the Lutron controller.
///
/// None of these are fatal to the bridge: the session reader recovers from
/// every variant by reconnecting.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection timeout")]
    ConnectTimeout,

    #[error("Timed out waiting for prompt {prompt:?}")]
    PromptTimeout { prompt: String },

    #[error("Session disconnected")]
    Disconnected,
}

impl SessionError {
    /// Whether the error happened before the session reached the ready prompt.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            SessionError::PromptTimeout { .. } | SessionError::ConnectTimeout
        )
    }
}

/// Errors raised while reading or parsing scene and Pico configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{origin}, line {line}: {details}")]
    Syntax {
        origin: String,
        line: usize,
        details: String,
    },

    #[error("Invalid value {value:?} for [{section}] {key}: {details}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        details: String,
    },
}

pub type Result<T> = std::result::Result<T, SessionError>;
