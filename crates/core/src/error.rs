use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    /// Refresh failed or the token was rejected; the next credential request re-runs consent.
    #[error("Authorization expired: {0}")]
    AuthExpired(String),

    #[error("Insufficient scope for {service}: missing {}", join_scopes(.missing))]
    AuthInsufficientScope { service: String, missing: Vec<String> },

    #[error("Classification service unavailable: {0}")]
    ClassificationUnavailable(String),

    #[error("Sorry, I didn't understand that{}", unresolved_suffix(.0))]
    IntentUnresolved(String),

    #[error("Missing parameter '{slot}' for {service}.{operation}")]
    ParameterMissing {
        service: String,
        operation: String,
        slot: String,
    },

    #[error("Invalid parameter '{slot}': {reason}")]
    ParameterInvalid { slot: String, reason: String },

    #[error("No item {index} in the last result ({available} available)")]
    ReferenceOutOfRange { index: usize, available: usize },

    #[error("{service} request failed: {detail}")]
    RemoteOperationFailed { service: String, detail: String },

    #[error("{0}")]
    Other(String),
}

fn join_scopes(missing: &[String]) -> String {
    missing.join(", ")
}

fn unresolved_suffix(detail: &str) -> String {
    if detail.is_empty() {
        String::new()
    } else {
        format!(" ({})", detail)
    }
}

/// Coarse error classes, used for rendering and for deciding recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    AuthExpired,
    AuthInsufficientScope,
    ClassificationUnavailable,
    IntentUnresolved,
    ParameterMissing,
    ParameterInvalid,
    ReferenceOutOfRange,
    RemoteOperationFailed,
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::AuthExpired(_) => ErrorKind::AuthExpired,
            Error::AuthInsufficientScope { .. } => ErrorKind::AuthInsufficientScope,
            Error::ClassificationUnavailable(_) => ErrorKind::ClassificationUnavailable,
            Error::IntentUnresolved(_) => ErrorKind::IntentUnresolved,
            Error::ParameterMissing { .. } => ErrorKind::ParameterMissing,
            Error::ParameterInvalid { .. } => ErrorKind::ParameterInvalid,
            Error::ReferenceOutOfRange { .. } => ErrorKind::ReferenceOutOfRange,
            Error::RemoteOperationFailed { .. } => ErrorKind::RemoteOperationFailed,
            Error::Config(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::Storage(_)
            | Error::Other(_) => ErrorKind::Internal,
        }
    }

    pub fn remote(service: &str, detail: impl Into<String>) -> Self {
        Error::RemoteOperationFailed {
            service: service.to_string(),
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
