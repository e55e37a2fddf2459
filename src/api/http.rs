//! REST backend over HTTP.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::{ApiClient, ApiError, Method, Mutation, UploadFile};
use crate::import::ImportReport;

#[derive(Debug, Clone)]
pub struct HttpApi {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpApi {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Network {
                message: format!("failed to create HTTP client: {}", e),
            })?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn read_json(response: reqwest::Response) -> Result<Value, ApiError> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ApiError::from_body(status.as_u16(), &body));
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| ApiError::Decode {
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl ApiClient for HttpApi {
    async fn fetch(&self, endpoint: &str) -> Result<Value, ApiError> {
        let url = self.url(endpoint);
        debug!(%url, "GET");
        let response = self.authorize(self.client.get(&url)).send().await?;
        Self::read_json(response).await
    }

    async fn mutate(&self, mutation: &Mutation) -> Result<Value, ApiError> {
        let url = self.url(&mutation.endpoint);
        debug!(method = mutation.method.as_str(), %url, "mutate");
        let builder = match mutation.method {
            Method::Post => self.client.post(&url),
            Method::Put => self.client.put(&url),
            Method::Patch => self.client.patch(&url),
            Method::Delete => self.client.delete(&url),
        };
        let response = self
            .authorize(builder)
            .json(&mutation.payload)
            .send()
            .await?;
        Self::read_json(response).await
    }

    async fn upload(
        &self,
        endpoint: &str,
        file: &UploadFile,
        dry_run: bool,
    ) -> Result<ImportReport, ApiError> {
        let url = self.url(endpoint);
        debug!(%url, dry_run, file = %file.file_name, "upload");
        let part = Part::bytes(file.bytes.clone())
            .file_name(file.file_name.clone())
            .mime_str("text/csv")?;
        let form = Form::new().part("file", part);
        let response = self
            .authorize(self.client.post(&url))
            .query(&[("dryRun", if dry_run { "true" } else { "false" })])
            .multipart(form)
            .send()
            .await?;
        let body = Self::read_json(response).await?;
        serde_json::from_value(body).map_err(|e| ApiError::Decode {
            reason: e.to_string(),
        })
    }
}
