//! HTTP implementation of the API contracts
//!
//! Uses reqwest with JSON bodies and multipart file transfer. A 401 from
//! any endpoint maps to `ApiError::Unauthorized` without inspecting the
//! body; other non-success statuses carry the server's message when one
//! can be decoded.

use async_trait::async_trait;
use reqwest::multipart;
use reqwest::{Method, StatusCode};
use serde::Deserialize;

use super::{ApiError, ProcessingClient, TransferClient, UploadReceipt};
use crate::config::Config;
use crate::processing::{JobKind, Snapshot, StatusFilter};
use crate::uploads::FileInput;

/// reqwest-backed client for the Quorum backend
pub struct HttpApi {
    client: reqwest::Client,
    base_url: String,
    session_token: Option<String>,
}

/// Error body shape shared by all backend endpoints
#[derive(Debug, Deserialize)]
struct ServerError {
    message: String,
}

impl HttpApi {
    pub fn new(config: &Config) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            session_token: config.session_token.clone(),
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(token) = &self.session_token {
            req = req.bearer_auth(token);
        }
        req
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized);
        }
        if !status.is_success() {
            let message = response
                .json::<ServerError>()
                .await
                .map(|e| e.message)
                .unwrap_or_else(|_| status.to_string());
            return Err(ApiError::Server {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl TransferClient for HttpApi {
    async fn upload(&self, file: &FileInput) -> Result<UploadReceipt, ApiError> {
        let part = multipart::Part::stream(file.payload.clone()).file_name(file.name.clone());
        let form = multipart::Form::new().part("file", part);

        let response = self
            .request(Method::POST, "/api/documents/upload")
            .multipart(form)
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        Ok(response.json::<UploadReceipt>().await?)
    }
}

#[async_trait]
impl ProcessingClient for HttpApi {
    async fn fetch_snapshot(&self, filter: StatusFilter) -> Result<Snapshot, ApiError> {
        let mut req = self.request(Method::GET, "/api/processing/snapshot");
        if let StatusFilter::Status(status) = filter {
            req = req.query(&[("status", status.as_str())]);
        }
        let response = Self::check_status(req.send().await?).await?;
        Ok(response.json::<Snapshot>().await?)
    }

    async fn retry(&self, kind: JobKind, id: &str) -> Result<(), ApiError> {
        let response = self
            .request(Method::POST, "/api/processing/retry")
            .json(&serde_json::json!({ "kind": kind, "id": id }))
            .send()
            .await?;
        Self::check_status(response).await?;
        Ok(())
    }
}
