//! HTTP model query client.
//!
//! Talks to a local text-generation endpoint that accepts
//! `POST <base>/api/generate` with `{model, prompt, stream: false}` and
//! answers `{"response": "..."}`.

#![allow(clippy::missing_errors_doc)]

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::traits::ModelClient;

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Model client over HTTP.
#[derive(Debug, Clone)]
pub struct HttpModelClient {
    client: Client,
    base_url: String,
    model: String,
}

impl HttpModelClient {
    /// Create a client for `model` served at `base_url`.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Result<Self, ModelError> {
        let client = Client::builder()
            .build()
            .map_err(|e| ModelError::Unavailable {
                message: format!("Failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }

    /// Endpoint base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Model identifier.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    async fn send(&self, prompt: &str, timeout: Duration, timeout_ms: u64) -> Result<String, ModelError> {
        let url = format!("{}/api/generate", self.base_url);
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
        };

        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ModelError::Timeout { timeout_ms }
                } else {
                    ModelError::Unavailable {
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Unavailable {
                message: format!("HTTP {}: {}", status.as_u16(), body.trim()),
            });
        }

        let body: GenerateResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                ModelError::Timeout { timeout_ms }
            } else {
                ModelError::Unavailable {
                    message: format!("Malformed response body: {e}"),
                }
            }
        })?;
        Ok(body.response)
    }
}

#[async_trait]
impl ModelClient for HttpModelClient {
    async fn query(&self, prompt: &str, timeout: Duration) -> Result<String, ModelError> {
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        tracing::debug!(model = %self.model, timeout_ms, prompt_chars = prompt.len(), "Querying model");

        let result = tokio::time::timeout(timeout, self.send(prompt, timeout, timeout_ms))
            .await
            .unwrap_or(Err(ModelError::Timeout { timeout_ms }));

        if let Err(e) = &result {
            tracing::warn!(model = %self.model, error = %e, "Model query failed");
        }
        result
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> HttpModelClient {
        HttpModelClient::new(server.uri(), "test-model").unwrap()
    }

    #[tokio::test]
    async fn test_query_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(json!({
                "model": "test-model",
                "prompt": "hello",
                "stream": false
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"response": "hi there"})))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let text = client.query("hello", Duration::from_secs(5)).await.unwrap();
        assert_eq!(text, "hi there");
    }

    #[tokio::test]
    async fn test_server_error_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(503).set_body_string("loading model"))
            .mount(&server)
            .await;

        let result = client_for(&server)
            .query("hello", Duration::from_secs(5))
            .await;
        assert_eq!(
            result,
            Err(ModelError::Unavailable {
                message: "HTTP 503: loading model".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_slow_response_is_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"response": "late"}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let result = client_for(&server)
            .query("hello", Duration::from_millis(100))
            .await;
        assert_eq!(result, Err(ModelError::Timeout { timeout_ms: 100 }));
    }

    #[tokio::test]
    async fn test_malformed_body_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": "wrong field"})))
            .mount(&server)
            .await;

        let result = client_for(&server)
            .query("hello", Duration::from_secs(5))
            .await;
        assert!(matches!(result, Err(ModelError::Unavailable { .. })));
    }

    #[tokio::test]
    async fn test_connection_refused_is_unavailable() {
        let client = HttpModelClient::new("http://127.0.0.1:9", "m").unwrap();
        let result = client.query("hello", Duration::from_secs(2)).await;
        assert!(matches!(result, Err(ModelError::Unavailable { .. })));
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let client = HttpModelClient::new("http://localhost:11434/", "m").unwrap();
        assert_eq!(client.base_url(), "http://localhost:11434");
        assert_eq!(client.model(), "m");
    }
}
