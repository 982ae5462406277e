//! OpenAI API client for the parley relay.
//!
//! One client, four operations: single-shot chat completion, streaming chat
//! completion (SSE), Whisper transcription, and image generation. Errors are
//! a typed enum so callers can pattern-match the context-length-exceeded
//! condition instead of comparing strings.

mod audio;
mod chat;
mod error;
mod image;

pub use chat::ChatMessage;
pub use error::CompletionError;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;

pub const ROLE_USER: &str = "user";
pub const ROLE_ASSISTANT: &str = "assistant";

const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// OpenAI API client.
///
/// Cheap to clone; the inner `reqwest::Client` is reference-counted.
#[derive(Clone)]
pub struct OpenAiClient {
    pub(crate) client: reqwest::Client,
    pub(crate) base_url: String,
    pub(crate) model: String,
}

impl OpenAiClient {
    /// Create a client against the public OpenAI endpoint.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, "https://api.openai.com")
    }

    /// Create with a custom base URL (Azure OpenAI, compatible APIs, tests).
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        let api_key = api_key.into();
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {api_key}"))
                .unwrap_or_else(|_| HeaderValue::from_static("")),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: base_url.into(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Override the chat model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Turn a failed response into a typed error, recognizing the
    /// context-length condition from the API error `code` field.
    pub(crate) async fn response_error(response: reqwest::Response) -> CompletionError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();

        if let Ok(parsed) = serde_json::from_str::<ApiErrorBody>(&body) {
            if parsed.error.code.as_deref() == Some("context_length_exceeded") {
                return CompletionError::ContextLengthExceeded;
            }
            return CompletionError::Api {
                status,
                message: parsed.error.message,
            };
        }

        CompletionError::Api {
            status,
            message: body,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
    #[serde(default)]
    code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_base_and_path() {
        let client = OpenAiClient::with_base_url("sk-test", "http://localhost:9999");
        assert_eq!(
            client.url("/v1/chat/completions"),
            "http://localhost:9999/v1/chat/completions"
        );
    }

    #[test]
    fn default_model() {
        let client = OpenAiClient::new("sk-test");
        assert_eq!(client.model, "gpt-3.5-turbo");
    }

    #[test]
    fn with_model_overrides() {
        let client = OpenAiClient::new("sk-test").with_model("gpt-4o-mini");
        assert_eq!(client.model, "gpt-4o-mini");
    }

    #[test]
    fn api_error_body_parses_code() {
        let body = r#"{"error":{"message":"too long","type":"invalid_request_error","code":"context_length_exceeded"}}"#;
        let parsed: ApiErrorBody = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.error.code.as_deref(), Some("context_length_exceeded"));
        assert_eq!(parsed.error.message, "too long");
    }

    #[test]
    fn api_error_body_tolerates_missing_code() {
        let body = r#"{"error":{"message":"nope"}}"#;
        let parsed: ApiErrorBody = serde_json::from_str(body).unwrap();
        assert!(parsed.error.code.is_none());
    }
}
