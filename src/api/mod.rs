//! Request/response contract with the academic backend.

mod error;
pub mod http;
pub mod local;

pub use error::{ApiError, ApiMessage, ErrorKind};
pub use http::HttpApi;
pub use local::LocalApi;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::import::ImportReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

/// One remote write. `endpoint` is relative to the backend base URL.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mutation {
    pub method: Method,
    pub endpoint: String,
    pub payload: Value,
}

impl Mutation {
    pub fn post(endpoint: impl Into<String>, payload: Value) -> Self {
        Self {
            method: Method::Post,
            endpoint: endpoint.into(),
            payload,
        }
    }

    pub fn patch(endpoint: impl Into<String>, payload: Value) -> Self {
        Self {
            method: Method::Patch,
            endpoint: endpoint.into(),
            payload,
        }
    }
}

/// A file selected for import.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait ApiClient: Send + Sync {
    async fn fetch(&self, endpoint: &str) -> Result<Value, ApiError>;

    async fn mutate(&self, mutation: &Mutation) -> Result<Value, ApiError>;

    async fn upload(
        &self,
        endpoint: &str,
        file: &UploadFile,
        dry_run: bool,
    ) -> Result<ImportReport, ApiError>;
}
