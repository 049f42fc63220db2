mod client;
pub(crate) mod schema;
pub(crate) mod types;

pub use schema::StructuredOutput;

use std::time::Duration;

use leadpilot_common::retry::RetryConfig;

use crate::error::{AiError, Result};
use crate::util::extract_json_object;
use client::OpenAiClient;

const DEFAULT_MAX_TOKENS: u32 = 1024;

// =============================================================================
// OpenAi
// =============================================================================

#[derive(Clone)]
pub struct OpenAi {
    api_key: String,
    model: String,
    base_url: Option<String>,
    http: reqwest::Client,
    retry: RetryConfig,
}

impl OpenAi {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(90))
            .build()
            .unwrap_or_default();
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: None,
            http,
            retry: RetryConfig::default(),
        }
    }

    pub fn from_env(model: impl Into<String>) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| AiError::Config("OPENAI_API_KEY environment variable not set".into()))?;
        Ok(Self::new(api_key, model))
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn client(&self) -> OpenAiClient {
        let client = OpenAiClient::new(&self.api_key, self.http.clone()).with_retry(self.retry.clone());
        match self.base_url {
            Some(ref url) => client.with_base_url(url),
            None => client,
        }
    }

    /// Simple chat completion: one system + one user message, text back.
    pub async fn chat_completion(
        &self,
        system: impl Into<String>,
        user: impl Into<String>,
    ) -> Result<String> {
        self.chat_completion_with(system, user, DEFAULT_MAX_TOKENS, 0.7).await
    }

    /// Chat completion with explicit token budget and temperature.
    pub async fn chat_completion_with(
        &self,
        system: impl Into<String>,
        user: impl Into<String>,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String> {
        let request = types::ChatRequest::new(&self.model)
            .message(types::WireMessage::system(system))
            .message(types::WireMessage::user(user))
            .limits(max_tokens, temperature);

        self.client().chat(&request).await
    }

    /// Type-safe structured output. The JSON schema is derived from `T`.
    pub async fn extract<T: StructuredOutput>(
        &self,
        system: impl Into<String>,
        user: impl Into<String>,
    ) -> Result<T> {
        let request = types::ChatRequest::new(&self.model)
            .message(types::WireMessage::system(system))
            .message(types::WireMessage::user(user))
            .limits(DEFAULT_MAX_TOKENS, 0.0)
            .response_format(types::ResponseFormat::json_schema(
                schema_name::<T>(),
                T::openai_schema(),
            ));

        let raw = self.client().chat(&request).await?;

        serde_json::from_str(extract_json_object(&raw))
            .map_err(|e| AiError::Parse(format!("failed to deserialize {}: {e}", T::type_name())))
    }
}

/// OpenAI schema names allow `[a-zA-Z0-9_-]` only.
fn schema_name<T: StructuredOutput>() -> String {
    let name: String = T::type_name()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    if name.is_empty() {
        "structured_response".to_string()
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemars::JsonSchema;
    use serde::Deserialize;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Deserialize, JsonSchema)]
    struct Verdict {
        relevant: bool,
        score: u8,
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            ..RetryConfig::default()
        }
    }

    fn completion(content: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": content }, "finish_reason": "stop" }],
            "usage": { "prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15 }
        })
    }

    #[test]
    fn test_openai_new() {
        let ai = OpenAi::new("sk-test", "gpt-4o-mini");
        assert_eq!(ai.model(), "gpt-4o-mini");
        assert_eq!(ai.api_key, "sk-test");
        assert!(ai.base_url.is_none());
    }

    #[test]
    fn schema_name_is_sanitized() {
        assert_eq!(schema_name::<Verdict>(), "Verdict");
    }

    #[tokio::test]
    async fn chat_completion_returns_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("hello there")))
            .mount(&server)
            .await;

        let ai = OpenAi::new("sk-test", "gpt-4o-mini").with_base_url(server.uri());
        let out = ai.chat_completion("system", "user").await.unwrap();
        assert_eq!(out, "hello there");
    }

    #[tokio::test]
    async fn extract_parses_fenced_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion("```json\n{\"relevant\": true, \"score\": 87}\n```")),
            )
            .mount(&server)
            .await;

        let ai = OpenAi::new("sk-test", "gpt-4o-mini").with_base_url(server.uri());
        let v: Verdict = ai.extract("system", "user").await.unwrap();
        assert!(v.relevant);
        assert_eq!(v.score, 87);
    }

    #[tokio::test]
    async fn rate_limit_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("ok")))
            .mount(&server)
            .await;

        let ai = OpenAi::new("sk-test", "gpt-4o-mini")
            .with_base_url(server.uri())
            .with_retry(fast_retry());
        let out = tokio_test::assert_ok!(ai.chat_completion("s", "u").await);
        assert_eq!(out, "ok");
    }

    #[tokio::test]
    async fn api_error_surfaces_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let ai = OpenAi::new("sk-test", "gpt-4o-mini").with_base_url(server.uri());
        match ai.chat_completion("s", "u").await {
            Err(AiError::Api { status, message }) => {
                assert_eq!(status, 401);
                assert_eq!(message, "bad key");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_content_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("  ")))
            .mount(&server)
            .await;

        let ai = OpenAi::new("sk-test", "gpt-4o-mini").with_base_url(server.uri());
        assert!(matches!(
            ai.chat_completion("s", "u").await,
            Err(AiError::EmptyResponse)
        ));
    }
}
