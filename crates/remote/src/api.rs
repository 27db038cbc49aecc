//! HTTP client for the remote generation service.
//!
//! Wraps the service's job endpoints (submission, status) using [`reqwest`]
//! with bearer-token authentication, and funnels every response through
//! [`crate::wire`] for normalization.

use async_trait::async_trait;
use genq_core::Category;

use crate::backend::{JobBackend, SubmitJob, SubmitReceipt};
use crate::error::BackendError;
use crate::wire::{self, PollSnapshot};

/// HTTP implementation of [`JobBackend`].
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpBackend {
    /// Create a new client.
    ///
    /// * `base_url` - Base HTTP URL, e.g. `https://api.example.com`.
    /// * `token` - Bearer token attached to every request.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, token)
    }

    /// Create a client reusing an existing [`reqwest::Client`]
    /// (useful for connection pooling).
    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn jobs_url(&self, category: Category) -> String {
        format!("{}/api/jobs/{}", self.base_url, category)
    }

    /// Ensure the response has a success status code.
    ///
    /// 401/403 map to [`BackendError::Unauthorized`]; any other non-2xx
    /// becomes [`BackendError::Api`] with the status and body text.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, BackendError> {
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(BackendError::Unauthorized);
        }
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(BackendError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful response body as JSON.
    async fn parse_body(response: reqwest::Response) -> Result<serde_json::Value, BackendError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<serde_json::Value>().await?)
    }
}

#[async_trait]
impl JobBackend for HttpBackend {
    async fn submit(&self, job: &SubmitJob) -> Result<SubmitReceipt, BackendError> {
        let mut body = serde_json::json!({ "prompt": job.payload.prompt });
        if let Some(url) = &job.payload.source_url {
            body["source_url"] = serde_json::json!(url);
        }
        if let Some(ratio) = &job.payload.aspect_ratio {
            body["aspect_ratio"] = serde_json::json!(ratio);
        }
        if let Some(secs) = job.payload.duration_secs {
            body["duration"] = serde_json::json!(secs);
        }

        let response = self
            .client
            .post(self.jobs_url(job.category))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;

        let body = Self::parse_body(response).await?;
        let remote_job_id = wire::extract_job_id(&body)
            .ok_or_else(|| BackendError::MissingJobId(body.to_string()))?;
        Ok(SubmitReceipt { remote_job_id })
    }

    async fn poll(
        &self,
        category: Category,
        remote_job_id: &str,
    ) -> Result<PollSnapshot, BackendError> {
        let response = self
            .client
            .get(format!("{}/{}", self.jobs_url(category), remote_job_id))
            .bearer_auth(&self.token)
            .send()
            .await?;

        let body = Self::parse_body(response).await?;
        Ok(wire::normalize_poll(&body))
    }
}
