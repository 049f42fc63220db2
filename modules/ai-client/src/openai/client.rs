use leadpilot_common::retry::{send_with_retry, RetryConfig, RetryOutcome};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use tracing::debug;

use super::types::*;
use crate::error::{AiError, Result};

pub(crate) const OPENAI_API_URL: &str = "https://api.openai.com/v1";

#[derive(Clone)]
pub(crate) struct OpenAiClient {
    api_key: String,
    http: reqwest::Client,
    base_url: String,
    retry: RetryConfig,
}

impl OpenAiClient {
    pub fn new(api_key: &str, http: reqwest::Client) -> Self {
        Self {
            api_key: api_key.to_string(),
            http,
            base_url: OPENAI_API_URL.to_string(),
            retry: RetryConfig::default(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .map_err(|e| AiError::Config(format!("invalid API key header: {e}")))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    /// One chat completion. Returns the first choice's content.
    pub async fn chat(&self, request: &ChatRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let headers = self.headers()?;

        debug!(model = %request.model, structured = request.response_format.is_some(), "OpenAI chat request");

        let outcome = send_with_retry(
            || self.http.post(&url).headers(headers.clone()).json(request),
            &self.retry,
        )
        .await;

        let response = match outcome {
            RetryOutcome::Success(r) => r,
            RetryOutcome::HttpError(r) => {
                let status = r.status().as_u16();
                let message = r.text().await.unwrap_or_default();
                return Err(AiError::Api { status, message });
            }
            RetryOutcome::Transport { attempts, source } => {
                return Err(AiError::Network(format!(
                    "{source} (after {attempts} attempts)"
                )));
            }
        };

        let chat: ChatResponse = response.json().await?;
        if let Some(usage) = &chat.usage {
            debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                total_tokens = usage.total_tokens,
                "OpenAI usage"
            );
        }

        let message = chat
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or(AiError::EmptyResponse)?;

        if let Some(refusal) = message.refusal {
            return Err(AiError::Api {
                status: 200,
                message: format!("model refused: {refusal}"),
            });
        }

        message
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or(AiError::EmptyResponse)
    }
}
