//! Upstream completion service client.
//!
//! The caching core treats the generative-AI proxy as an external
//! collaborator: a JSON POST to an HTTP(S) provider with a bounded timeout
//! and a bounded retry on transient failure (HTTP 429/503/504 or a network
//! abort). Provider status and body are relayed verbatim; nothing here is
//! ever cached.

use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use pwakit_common::RetryConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};
use url::Url;

use crate::NetError;

/// Model used when the caller supplies only a bare prompt.
pub const DEFAULT_MODEL: &str = "google/gemini-3-flash-preview";

const DEFAULT_MAX_TOKENS: u32 = 300;
const DEFAULT_TEMPERATURE: f32 = 0.2;

/// Errors specific to the completion collaborator.
#[derive(Error, Debug)]
pub enum CompletionError {
    #[error("Missing API key")]
    MissingApiKey,

    #[error(transparent)]
    Net(#[from] NetError),
}

/// Configuration for the upstream completion client.
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    /// Provider endpoint (e.g. a chat/completions URL).
    pub endpoint: Url,
    /// Bearer token for the provider.
    pub api_key: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Retry policy for transient failures.
    pub retry: RetryConfig,
}

impl CompletionConfig {
    /// Create a config with the default timeout and retry policy.
    pub fn new(endpoint: Url, api_key: impl Into<String>) -> Self {
        Self {
            endpoint,
            api_key: api_key.into(),
            request_timeout: Duration::from_secs(25),
            retry: RetryConfig::default(),
        }
    }

    /// Set the request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the retry policy.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// One message of a chat payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Incoming completion request: either a full chat payload or a bare prompt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<ChatMessage>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    /// Create a request from a bare prompt.
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: Some(prompt.into()),
            ..Default::default()
        }
    }

    /// Normalize into the payload sent upstream.
    ///
    /// A request that already carries `messages` or a `model` is forwarded
    /// as-is; a bare prompt is wrapped into a single-message chat payload
    /// with defaults.
    pub fn into_payload(self) -> ChatPayload {
        if self.messages.is_some() || self.model.is_some() {
            ChatPayload {
                model: self.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
                messages: self.messages.unwrap_or_default(),
                max_tokens: self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
                temperature: self.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            }
        } else {
            ChatPayload {
                model: DEFAULT_MODEL.to_string(),
                messages: vec![ChatMessage::user(
                    self.prompt.unwrap_or_else(|| "Hello".to_string()),
                )],
                max_tokens: self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
                temperature: self.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            }
        }
    }
}

/// Normalized chat payload sent to the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatPayload {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Response relayed from the provider.
#[derive(Debug)]
pub struct CompletionResponse {
    /// Provider status code, relayed verbatim.
    pub status: StatusCode,
    /// Provider body, relayed verbatim.
    pub body: Bytes,
}

impl CompletionResponse {
    /// Check if the provider answered with a success status.
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Get the body as text.
    pub fn text(&self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|e| NetError::RequestFailed(e.to_string()))
    }

    /// Get the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, NetError> {
        serde_json::from_slice(&self.body).map_err(|e| NetError::RequestFailed(e.to_string()))
    }
}

/// Whether a provider status is worth retrying.
fn is_transient_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

/// Client for the upstream completion service.
pub struct CompletionClient {
    client: reqwest::Client,
    config: CompletionConfig,
}

impl CompletionClient {
    /// Create a new completion client.
    pub fn new(config: CompletionConfig) -> Result<Self, CompletionError> {
        if config.api_key.is_empty() {
            return Err(CompletionError::MissingApiKey);
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| CompletionError::Net(NetError::RequestFailed(e.to_string())))?;

        Ok(Self { client, config })
    }

    /// Send a completion request upstream.
    ///
    /// Transient failures (429/503/504 or a transport error) are retried
    /// with the configured backoff; the last provider response is relayed
    /// once attempts are exhausted. Non-transient statuses are relayed
    /// immediately without retry.
    pub async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, NetError> {
        let payload = request.into_payload();
        let retry = &self.config.retry;

        let mut last_result: Option<Result<CompletionResponse, NetError>> = None;

        for attempt in 1..=retry.max_attempts {
            if attempt > 1 {
                let delay = retry.delay_for_attempt(attempt);
                debug!(attempt, ?delay, "Retrying completion request");
                sleep(delay).await;
            }

            let result = self
                .client
                .post(self.config.endpoint.clone())
                .bearer_auth(&self.config.api_key)
                .json(&payload)
                .send()
                .await;

            match result {
                Ok(response) => {
                    let status = response.status();
                    let body = response.bytes().await.unwrap_or_default();
                    let relayed = CompletionResponse { status, body };

                    if is_transient_status(status) && attempt < retry.max_attempts {
                        warn!(attempt, status = %status, "Transient provider status");
                        last_result = Some(Ok(relayed));
                        continue;
                    }
                    return Ok(relayed);
                }
                Err(e) => {
                    let net_err = if e.is_timeout() {
                        NetError::Timeout(self.config.request_timeout)
                    } else {
                        NetError::HttpError(e)
                    };

                    if attempt < retry.max_attempts {
                        warn!(attempt, error = %net_err, "Completion transport failure");
                        last_result = Some(Err(net_err));
                        continue;
                    }
                    return Err(net_err);
                }
            }
        }

        last_result.expect("At least one attempt should have been made")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pwakit_common::RetryConfig;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            jitter: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_prompt_normalization() {
        let payload = CompletionRequest::from_prompt("hello there").into_payload();
        assert_eq!(payload.model, DEFAULT_MODEL);
        assert_eq!(payload.messages, vec![ChatMessage::user("hello there")]);
        assert_eq!(payload.max_tokens, DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn test_full_payload_passes_through() {
        let request = CompletionRequest {
            model: Some("provider/custom-model".to_string()),
            messages: Some(vec![ChatMessage::user("hi")]),
            max_tokens: Some(64),
            temperature: Some(0.7),
            ..Default::default()
        };
        let payload = request.into_payload();
        assert_eq!(payload.model, "provider/custom-model");
        assert_eq!(payload.max_tokens, 64);
    }

    #[test]
    fn test_missing_api_key_rejected() {
        let endpoint = Url::parse("https://provider.example/v1/chat/completions").unwrap();
        let result = CompletionClient::new(CompletionConfig::new(endpoint, ""));
        assert!(matches!(result, Err(CompletionError::MissingApiKey)));
    }

    #[tokio::test]
    async fn test_complete_relays_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(serde_json::json!({
                "model": DEFAULT_MODEL,
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"choices":[]}"#))
            .mount(&server)
            .await;

        let endpoint = Url::parse(&format!("{}/v1/chat/completions", server.uri())).unwrap();
        let client =
            CompletionClient::new(CompletionConfig::new(endpoint, "test-key")).unwrap();

        let response = client
            .complete(CompletionRequest::from_prompt("hi"))
            .await
            .unwrap();
        assert!(response.ok());
        assert_eq!(response.text().unwrap(), r#"{"choices":[]}"#);
    }

    #[tokio::test]
    async fn test_complete_retries_transient_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let endpoint = Url::parse(&format!("{}/v1/chat/completions", server.uri())).unwrap();
        let config = CompletionConfig::new(endpoint, "test-key").retry(fast_retry());
        let client = CompletionClient::new(config).unwrap();

        let response = client
            .complete(CompletionRequest::from_prompt("hi"))
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_complete_does_not_retry_client_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(400).set_body_string(r#"{"error":"bad"}"#))
            .expect(1)
            .mount(&server)
            .await;

        let endpoint = Url::parse(&format!("{}/v1/chat/completions", server.uri())).unwrap();
        let config = CompletionConfig::new(endpoint, "test-key").retry(fast_retry());
        let client = CompletionClient::new(config).unwrap();

        let response = client
            .complete(CompletionRequest::from_prompt("hi"))
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert_eq!(response.text().unwrap(), r#"{"error":"bad"}"#);
    }

    #[tokio::test]
    async fn test_complete_relays_exhausted_transient_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let endpoint = Url::parse(&format!("{}/v1/chat/completions", server.uri())).unwrap();
        let config = CompletionConfig::new(endpoint, "test-key").retry(fast_retry());
        let client = CompletionClient::new(config).unwrap();

        let response = client
            .complete(CompletionRequest::from_prompt("hi"))
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
