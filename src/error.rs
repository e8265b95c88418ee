//! Signaling Errors
//!
//! Per-message failures. Every variant is reported to the originating
//! connection only and none of them closes it.

use thiserror::Error;

use crate::auth::GrantError;

/// Broad error category, used for logging and by callers that branch on it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Routing,
    Protocol,
    Auth,
    Expired,
    Config,
    Shutdown,
}

/// Errors raised while handling one signaling message
#[derive(Error, Debug)]
pub enum SignalError {
    #[error("Missing required field(s) for {kind}: {}", .fields.join(", "))]
    Validation {
        kind: String,
        fields: Vec<&'static str>,
    },
    #[error("User {0} is not online")]
    Routing(String),
    #[error("Invalid message format")]
    Malformed,
    #[error("Unknown message type: {0}")]
    UnknownKind(String),
    #[error(transparent)]
    Grant(#[from] GrantError),
    #[error("Server is shutting down")]
    ShuttingDown,
}

impl SignalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SignalError::Validation { .. } => ErrorKind::Validation,
            SignalError::Routing(_) => ErrorKind::Routing,
            SignalError::Malformed | SignalError::UnknownKind(_) => ErrorKind::Protocol,
            SignalError::Grant(GrantError::Auth(_)) => ErrorKind::Auth,
            SignalError::Grant(GrantError::Expired(_)) => ErrorKind::Expired,
            SignalError::Grant(GrantError::Config(_)) => ErrorKind::Config,
            SignalError::ShuttingDown => ErrorKind::Shutdown,
        }
    }
}
