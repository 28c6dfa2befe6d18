//! HTTP client for the MinerU cloud API.

use std::path::Path;
use std::time::Duration;

use log::{debug, info};
use reqwest::{Client, RequestBuilder, Response, StatusCode};

use crate::api::{BatchCreation, BatchStatus, RemoteService};
use crate::config::ParseOptions;
use crate::error::ApiError;
use crate::task::UploadFile;

const BASE_URL: &str = "https://mineru.net/api/v4";

/// Default connect timeout for HTTP requests (10 seconds).
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default request timeout for HTTP requests (30 seconds).
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Transport-level retries per request.
const MAX_TRANSPORT_RETRIES: u32 = 4;

/// Base delay multiplied by `2^(attempt - 1)` between transport retries.
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

fn is_retryable_status(status: StatusCode) -> bool {
    RETRYABLE_STATUSES.contains(&status.as_u16())
}

/// Creates an HTTP client with appropriate timeouts.
fn create_http_client() -> Result<Client, ApiError> {
    Client::builder()
        .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
        .timeout(DEFAULT_REQUEST_TIMEOUT)
        .build()
        .map_err(|err| ApiError::new(format!("Failed to create HTTP client: {}", err)))
}

/// Decodes a response body. Successful responses must be JSON; error
/// responses surface `msg`/`message` or fall back to the raw text.
fn decode_body(status: StatusCode, body: &str) -> Result<serde_json::Value, ApiError> {
    if status.is_success() {
        return serde_json::from_str(body)
            .map_err(|_| ApiError::with_status("Failed to parse API response", status.as_u16()));
    }

    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(payload) => {
            let message = payload
                .get("msg")
                .and_then(|value| value.as_str())
                .filter(|text| !text.is_empty())
                .or_else(|| {
                    payload
                        .get("message")
                        .and_then(|value| value.as_str())
                        .filter(|text| !text.is_empty())
                })
                .unwrap_or(body)
                .to_string();
            Err(ApiError::with_payload(
                message,
                Some(status.as_u16()),
                payload,
            ))
        }
        Err(_) => Err(ApiError::with_status(body, status.as_u16())),
    }
}

/// HTTP implementation of [`RemoteService`].
///
/// Every request replays up to [`MAX_TRANSPORT_RETRIES`] times with
/// exponential backoff on connect failures, timeouts and retryable statuses.
pub struct HttpRemoteService {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpRemoteService {
    /// Creates a client against the production endpoint.
    pub fn new(api_key: impl Into<String>) -> Result<Self, ApiError> {
        Self::with_base_url(api_key, BASE_URL)
    }

    /// Creates a client against a custom endpoint.
    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, ApiError> {
        Ok(Self {
            client: create_http_client()?,
            base_url: base_url.into(),
            api_key: api_key.into(),
        })
    }

    async fn send_with_retry(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let mut last_error = ApiError::new("request failed");
        for attempt in 0..=MAX_TRANSPORT_RETRIES {
            if attempt > 0 {
                let delay = RETRY_BACKOFF * (1 << (attempt - 1));
                debug!(
                    "Transport retry {}/{} after {:?}",
                    attempt, MAX_TRANSPORT_RETRIES, delay
                );
                tokio::time::sleep(delay).await;
            }

            let Some(next) = request.try_clone() else {
                return Err(ApiError::new("request body cannot be replayed"));
            };
            match next.send().await {
                Ok(response) if is_retryable_status(response.status()) => {
                    last_error = ApiError::with_status(
                        format!("server returned {}", response.status()),
                        response.status().as_u16(),
                    );
                }
                Ok(response) => return Ok(response),
                Err(err) if err.is_connect() || err.is_timeout() => {
                    last_error = ApiError::from(err);
                }
                Err(err) => return Err(ApiError::from(err)),
            }
        }
        Err(last_error)
    }

    async fn handle_response(
        &self,
        response: Response,
    ) -> Result<(StatusCode, serde_json::Value), ApiError> {
        let status = response.status();
        let body = response.text().await?;
        decode_body(status, &body).map(|value| (status, value))
    }
}

#[async_trait::async_trait]
impl RemoteService for HttpRemoteService {
    async fn create_batch(
        &self,
        files: &[UploadFile],
        options: &ParseOptions,
    ) -> Result<BatchCreation, ApiError> {
        let payload = serde_json::json!({
            "enable_formula": options.enable_formula,
            "enable_table": options.enable_table,
            "language": options.language,
            "files": files
                .iter()
                .map(|file| {
                    serde_json::json!({
                        "name": file.display_name,
                        "is_ocr": options.is_ocr,
                    })
                })
                .collect::<Vec<_>>(),
        });

        info!("Creating batch for {} files", files.len());
        let request = self
            .client
            .post(format!("{}/file-urls/batch", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&payload);
        let response = self.send_with_retry(request).await?;
        let (status, value) = self.handle_response(response).await?;

        if value.get("code").and_then(|code| code.as_i64()) != Some(0) {
            let message = value
                .get("msg")
                .and_then(|msg| msg.as_str())
                .unwrap_or("Failed to create upload batch")
                .to_string();
            return Err(ApiError::with_payload(message, Some(status.as_u16()), value));
        }

        let data = value.get("data").cloned().unwrap_or_default();
        serde_json::from_value(data)
            .map_err(|_| ApiError::with_status("Failed to parse API response", status.as_u16()))
    }

    async fn upload_file(&self, signed_url: &str, path: &Path) -> Result<(), ApiError> {
        debug!("Uploading {}", path.display());
        let body = tokio::fs::read(path)
            .await
            .map_err(|err| ApiError::new(format!("Failed to read {}: {}", path.display(), err)))?;

        // Signed URLs carry their own authorization.
        let request = self.client.put(signed_url).body(body);
        let response = self.send_with_retry(request).await?;
        if !response.status().is_success() {
            let status = response.status();
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::with_payload(
                format!("Failed to upload {}", name),
                Some(status.as_u16()),
                serde_json::json!({ "response": text }),
            ));
        }
        Ok(())
    }

    async fn fetch_batch_status(&self, batch_id: &str) -> Result<BatchStatus, ApiError> {
        let request = self
            .client
            .get(format!(
                "{}/extract-results/batch/{}",
                self.base_url, batch_id
            ))
            .bearer_auth(&self.api_key);
        let response = self.send_with_retry(request).await?;
        let (status, value) = self.handle_response(response).await?;

        if let Some(code) = value.get("code").and_then(|code| code.as_i64()) {
            if code != 0 {
                let message = value
                    .get("msg")
                    .and_then(|msg| msg.as_str())
                    .unwrap_or("Failed to fetch batch status")
                    .to_string();
                return Err(ApiError::with_payload(message, Some(status.as_u16()), value));
            }
        }

        match value.get("data") {
            Some(data) => serde_json::from_value(data.clone())
                .map_err(|_| ApiError::with_status("Failed to parse API response", status.as_u16())),
            None => Ok(BatchStatus::default()),
        }
    }

    async fn download_result(&self, url: &str) -> Result<Vec<u8>, ApiError> {
        let request = self.client.get(url);
        let response = self.send_with_retry(request).await?;
        if !response.status().is_success() {
            return Err(ApiError::with_payload(
                "Failed to download result package",
                Some(response.status().as_u16()),
                serde_json::json!({ "url": url }),
            ));
        }
        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_body_success_requires_json() {
        let value = decode_body(StatusCode::OK, r#"{"code": 0}"#).unwrap();
        assert_eq!(value["code"], 0);

        let err = decode_body(StatusCode::OK, "<html>").unwrap_err();
        assert_eq!(err.message, "Failed to parse API response");
        assert_eq!(err.status_code, Some(200));
    }

    #[test]
    fn test_decode_body_error_prefers_msg_field() {
        let err = decode_body(StatusCode::BAD_REQUEST, r#"{"msg": "bad key"}"#).unwrap_err();
        assert_eq!(err.message, "bad key");
        assert_eq!(err.status_code, Some(400));
        assert!(err.payload.is_some());
    }

    #[test]
    fn test_decode_body_error_falls_back_to_message_field() {
        let err =
            decode_body(StatusCode::BAD_REQUEST, r#"{"message": "quota exceeded"}"#).unwrap_err();
        assert_eq!(err.message, "quota exceeded");
    }

    #[test]
    fn test_decode_body_error_uses_raw_text_without_json() {
        let err = decode_body(StatusCode::BAD_GATEWAY, "upstream exploded").unwrap_err();
        assert_eq!(err.message, "upstream exploded");
        assert!(err.payload.is_none());
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable_status(StatusCode::BAD_REQUEST));
        assert!(!is_retryable_status(StatusCode::OK));
    }
}
