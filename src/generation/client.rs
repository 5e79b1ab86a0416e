use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::sync::mpsc;
use url::Url;

use super::stream::consume_frames;
use super::types::{GenerateError, GenerateRequest, StreamEvent};

const ACCESS_PASSWORD_HEADER: &str = "x-access-password";

/// Narrow seam over the generation endpoint so the turn pipeline can be
/// driven by a scripted boundary in tests.
#[async_trait]
pub trait GenerationBoundary: Send + Sync {
    async fn stream_generate(
        &self,
        request: &GenerateRequest,
        access_password: Option<&str>,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), GenerateError>;
}

pub struct GenerateClient {
    client: Client,
    endpoint: Url,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

impl GenerateClient {
    pub fn new(endpoint: Url) -> Self {
        Self {
            client: Client::new(),
            endpoint,
        }
    }

    fn error_for_status(status: StatusCode, body: &str) -> GenerateError {
        let detail = serde_json::from_str::<ErrorBody>(body)
            .ok()
            .map(|b| b.error);
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GenerateError::Auth(
                detail.unwrap_or_else(|| "Invalid or missing credentials".to_string()),
            ),
            StatusCode::TOO_MANY_REQUESTS => GenerateError::RateLimited,
            s if s.is_server_error() => {
                GenerateError::Server(detail.unwrap_or_else(|| format!("HTTP {}", s.as_u16())))
            }
            s => GenerateError::RequestFailed(
                detail.unwrap_or_else(|| format!("HTTP {}", s.as_u16())),
            ),
        }
    }
}

#[async_trait]
impl GenerationBoundary for GenerateClient {
    async fn stream_generate(
        &self,
        request: &GenerateRequest,
        access_password: Option<&str>,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), GenerateError> {
        let mut builder = self.client.post(self.endpoint.clone()).json(request);
        if let Some(password) = access_password {
            builder = builder.header(ACCESS_PASSWORD_HEADER, password);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| GenerateError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::error_for_status(status, &body));
        }

        consume_frames(response.bytes_stream(), tx).await;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_statuses_map_to_auth() {
        assert!(matches!(
            GenerateClient::error_for_status(StatusCode::UNAUTHORIZED, ""),
            GenerateError::Auth(_)
        ));
        assert!(matches!(
            GenerateClient::error_for_status(StatusCode::FORBIDDEN, ""),
            GenerateError::Auth(_)
        ));
    }

    #[test]
    fn test_rate_limit_status() {
        assert!(matches!(
            GenerateClient::error_for_status(StatusCode::TOO_MANY_REQUESTS, ""),
            GenerateError::RateLimited
        ));
    }

    #[test]
    fn test_server_error_prefers_body_message() {
        let err = GenerateClient::error_for_status(
            StatusCode::BAD_GATEWAY,
            "{\"error\":\"upstream unavailable\"}",
        );
        assert!(matches!(err, GenerateError::Server(msg) if msg == "upstream unavailable"));
    }

    #[test]
    fn test_other_statuses_are_generic() {
        let err = GenerateClient::error_for_status(StatusCode::BAD_REQUEST, "not json");
        assert!(matches!(err, GenerateError::RequestFailed(msg) if msg == "HTTP 400"));
    }
}
