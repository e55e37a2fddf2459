use serde_json::json;

use crate::api::{ApiError, ErrorKind};
use crate::batch::BatchError;
use crate::import::ImportError;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// Handler failure, turned into an error response at the handler boundary.
#[derive(Debug)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

pub fn bad_params(message: impl Into<String>) -> HandlerErr {
    HandlerErr::new("bad_params", message)
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| bad_params(format!("missing params.{}", key)))
}

pub fn get_opt_usize(params: &serde_json::Value, key: &str) -> Result<Option<usize>, HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(|n| Some(n as usize))
            .ok_or_else(|| bad_params(format!("params.{} must be a non-negative integer", key))),
    }
}

pub fn get_opt_bool(params: &serde_json::Value, key: &str) -> Result<Option<bool>, HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_bool()
            .map(Some)
            .ok_or_else(|| bad_params(format!("params.{} must be a boolean", key))),
    }
}

fn kind_name(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::NetworkFailure => "network",
        ErrorKind::ValidationFailure => "validation",
        ErrorKind::ConflictSkip => "conflict",
        ErrorKind::UnexpectedFailure => "unexpected",
    }
}

impl From<ApiError> for HandlerErr {
    fn from(e: ApiError) -> Self {
        let status = match &e {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        };
        HandlerErr::new("api_error", e.message()).with_details(json!({
            "status": status,
            "kind": kind_name(e.kind()),
        }))
    }
}

impl From<BatchError> for HandlerErr {
    fn from(e: BatchError) -> Self {
        match e {
            BatchError::Precondition(message) => HandlerErr::new("precondition", message),
            BatchError::Api(e) => e.into(),
        }
    }
}

impl From<ImportError> for HandlerErr {
    fn from(e: ImportError) -> Self {
        let code = match &e {
            ImportError::NoEntity => "no_entity",
            ImportError::NoFile => "no_file",
            ImportError::Read { .. } => "io_failed",
            ImportError::CommitRejected(_) => "commit_rejected",
            ImportError::Busy => "busy",
            ImportError::Protocol(_) => "protocol_error",
            ImportError::Api(_) => "api_error",
        };
        match e {
            ImportError::Api(e) => e.into(),
            other => HandlerErr::new(code, other.to_string()),
        }
    }
}
