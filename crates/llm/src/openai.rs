//! OpenAI-compatible chat-completions generator.

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, StatusCode};
use serde_json::json;
use tracing::debug;

use crate::error::GenerateError;
use crate::traits::Generator;

/// Configuration for the OpenAI-compatible backend.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Base URL, e.g. `https://api.openai.com/v1`.
    pub api_base: String,
    /// Bearer token.
    pub api_key: String,
    /// Model identifier.
    pub model: String,
    /// Per-call HTTP timeout.
    pub timeout: std::time::Duration,
}

impl OpenAiConfig {
    /// Read configuration from `CODELOOM_API_BASE`, `CODELOOM_API_KEY` and
    /// `CODELOOM_MODEL`.
    pub fn from_env() -> Result<Self, GenerateError> {
        let api_key = std::env::var("CODELOOM_API_KEY")
            .map_err(|_| GenerateError::Fatal("CODELOOM_API_KEY is not set".to_string()))?;
        Ok(Self {
            api_base: std::env::var("CODELOOM_API_BASE")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            api_key,
            model: std::env::var("CODELOOM_MODEL").unwrap_or_else(|_| "gpt-4o".to_string()),
            timeout: std::time::Duration::from_secs(120),
        })
    }
}

/// Generator backed by an OpenAI-compatible chat-completions endpoint.
pub struct OpenAiGenerator {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiGenerator {
    /// Create a generator from the given configuration. Fails if the HTTP
    /// client cannot be built, rather than dropping the configured timeout.
    pub fn new(config: OpenAiConfig) -> Result<Self, GenerateError> {
        let client = ClientBuilder::new()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GenerateError::Fatal(format!("building http client: {e}")))?;
        Ok(Self { client, config })
    }

    fn classify_status(status: StatusCode) -> fn(String) -> GenerateError {
        if status == StatusCode::REQUEST_TIMEOUT
            || status == StatusCode::TOO_MANY_REQUESTS
            || status.is_server_error()
        {
            GenerateError::Transient
        } else {
            GenerateError::Fatal
        }
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerateError> {
        let payload = json!({
            "model": self.config.model,
            "messages": [
                {"role": "user", "content": prompt}
            ],
        });

        debug!(model = %self.config.model, "Calling chat completions");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.api_base))
            .bearer_auth(&self.config.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                // connection resets and client-side timeouts are retryable
                GenerateError::Transient(format!("request failed: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status)(format!(
                "status {status}: {body}"
            )));
        }

        #[derive(serde::Deserialize)]
        struct Response {
            choices: Vec<Choice>,
        }

        #[derive(serde::Deserialize)]
        struct Choice {
            message: Message,
        }

        #[derive(serde::Deserialize)]
        struct Message {
            content: String,
        }

        let data: Response = response
            .json()
            .await
            .map_err(|e| GenerateError::Transient(format!("malformed response: {e}")))?;

        data.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| GenerateError::Fatal("response contained no choices".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        let transient = [
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::REQUEST_TIMEOUT,
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::BAD_GATEWAY,
        ];
        for status in transient {
            assert!(matches!(
                OpenAiGenerator::classify_status(status)("x".to_string()),
                GenerateError::Transient(_)
            ));
        }
        let fatal = [StatusCode::UNAUTHORIZED, StatusCode::BAD_REQUEST];
        for status in fatal {
            assert!(matches!(
                OpenAiGenerator::classify_status(status)("x".to_string()),
                GenerateError::Fatal(_)
            ));
        }
    }

    #[test]
    fn test_generator_builds_with_configured_timeout() {
        let config = OpenAiConfig {
            api_base: "http://localhost:9999/v1".to_string(),
            api_key: "test-key".to_string(),
            model: "test-model".to_string(),
            timeout: std::time::Duration::from_secs(5),
        };
        let generator = OpenAiGenerator::new(config).unwrap();
        assert_eq!(generator.config.timeout, std::time::Duration::from_secs(5));
    }
}
