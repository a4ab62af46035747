//! Danmaku client error types.

use thiserror::Error;

use crate::session::SessionState;

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, DanmakuError>;

/// Errors that can occur while running a danmaku session.
#[derive(Error, Debug)]
pub enum DanmakuError {
    /// Startup failed; the session never reached `Established`.
    #[error("Startup failed while {stage}: {message}")]
    Startup {
        stage: SessionState,
        message: String,
    },

    /// Malformed packet, frame or JSON body. The offending unit is dropped.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Read/write failure on the live connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Failed HTTP exchange (transport error, bad status, API error code)
    #[error("HTTP error: {0}")]
    Http(String),

    /// Periodic room poll failed; the next tick retries.
    #[error("Poll error: {0}")]
    Poll(String),

    /// The chat message was not accepted.
    #[error("Send rejected: {0}")]
    SendRejected(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for DanmakuError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Connection(e.to_string())
    }
}

impl From<futures::channel::mpsc::SendError> for DanmakuError {
    fn from(e: futures::channel::mpsc::SendError) -> Self {
        Self::Connection(e.to_string())
    }
}

impl DanmakuError {
    /// Create a startup error for the given stage.
    pub fn startup(stage: SessionState, msg: impl Into<String>) -> Self {
        Self::Startup {
            stage,
            message: msg.into(),
        }
    }

    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create an HTTP error.
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Create a poll error.
    pub fn poll(msg: impl Into<String>) -> Self {
        Self::Poll(msg.into())
    }

    /// Create a send-rejected error.
    pub fn send_rejected(msg: impl Into<String>) -> Self {
        Self::SendRejected(msg.into())
    }

    /// Create a generic error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Whether this error aborted session startup.
    pub fn is_startup(&self) -> bool {
        matches!(self, Self::Startup { .. })
    }

    /// Re-tag any error as a startup failure at `stage`, keeping its message.
    pub(crate) fn at_stage(self, stage: SessionState) -> Self {
        match self {
            Self::Startup { .. } => self,
            other => Self::startup(stage, other.to_string()),
        }
    }
}
