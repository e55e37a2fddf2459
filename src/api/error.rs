use serde::Deserialize;

use crate::batch::conflict::is_conflict;

/// Server error message, which the backend sends either as one string or as
/// a list of validation messages.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ApiMessage {
    Text(String),
    List(Vec<String>),
}

impl ApiMessage {
    pub fn joined(&self) -> String {
        match self {
            ApiMessage::Text(s) => s.clone(),
            ApiMessage::List(items) => items.join(" | "),
        }
    }
}

impl From<&str> for ApiMessage {
    fn from(s: &str) -> Self {
        ApiMessage::Text(s.to_string())
    }
}

/// Body shape of a backend error response.
#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    pub message: Option<ApiMessage>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NetworkFailure,
    ValidationFailure,
    ConflictSkip,
    UnexpectedFailure,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("network error: {message}")]
    Network { message: String },

    #[error("{message}")]
    Status { status: u16, message: String },

    #[error("unexpected response body: {reason}")]
    Decode { reason: String },
}

impl ApiError {
    pub fn status(status: u16, message: impl Into<ApiMessage>) -> Self {
        ApiError::Status {
            status,
            message: message.into().joined(),
        }
    }

    /// Builds a status error from a raw response body. Bodies that are not
    /// the usual `{message}` JSON fall back to the raw text.
    pub fn from_body(status: u16, body: &str) -> Self {
        let message = match serde_json::from_str::<ErrorBody>(body) {
            Ok(ErrorBody {
                message: Some(m), ..
            }) => m.joined(),
            Ok(ErrorBody { error: Some(e), .. }) => e,
            _ if body.trim().is_empty() => format!("HTTP {}", status),
            _ => body.trim().to_string(),
        };
        ApiError::Status { status, message }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Network { .. } => ErrorKind::NetworkFailure,
            ApiError::Status { status, message } if is_conflict(*status, message) => {
                ErrorKind::ConflictSkip
            }
            ApiError::Status { status, .. } if (400..500).contains(status) => {
                ErrorKind::ValidationFailure
            }
            _ => ErrorKind::UnexpectedFailure,
        }
    }

    pub fn message(&self) -> String {
        match self {
            ApiError::Status { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ApiError::Decode {
                reason: e.to_string(),
            }
        } else {
            ApiError::Network {
                message: e.to_string(),
            }
        }
    }
}
