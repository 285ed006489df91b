//! LLM completion client
//!
//! Talks to an OpenAI-compatible HTTP API. Both chat-style and
//! completion-style endpoints are supported, in the configured order, with
//! bounded retries and linear backoff.

use crate::config::{EndpointStyle, LlmSettings};
use crate::error::{NlqError, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

lazy_static::lazy_static! {
    static ref CODE_FENCE: Regex = Regex::new(r"^```[a-zA-Z0-9]*\n([\s\S]*?)\n```$").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Response-format hint sent with a completion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Text,
    JsonObject,
}

impl ResponseFormat {
    fn as_json(&self) -> serde_json::Value {
        match self {
            ResponseFormat::Text => serde_json::json!({ "type": "text" }),
            ResponseFormat::JsonObject => serde_json::json!({ "type": "json_object" }),
        }
    }
}

/// Anything that can turn role-tagged messages into text.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        max_tokens: u32,
        format: ResponseFormat,
    ) -> Result<String>;
}

#[derive(Debug, Default, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    output_text: Option<String>,
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Default, Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    message: Option<ChoiceMessage>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl CompletionResponse {
    /// `output_text`, else the first choice's message content, else its
    /// text. Empty strings count as missing.
    fn first_text(self) -> Option<String> {
        let non_empty = |s: Option<String>| s.filter(|s| !s.is_empty());
        if let Some(text) = non_empty(self.output_text) {
            return Some(text);
        }
        let choice = self.choices.into_iter().next()?;
        non_empty(choice.message.and_then(|m| m.content)).or_else(|| non_empty(choice.text))
    }
}

/// Extract the first available text from a raw response body.
pub fn first_text(body: &serde_json::Value) -> Option<String> {
    serde_json::from_value::<CompletionResponse>(body.clone())
        .ok()
        .and_then(CompletionResponse::first_text)
}

/// Unwrap a response that is exactly one fenced Markdown code block.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    match CODE_FENCE.captures(trimmed).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str().trim().to_string(),
        None => trimmed.to_string(),
    }
}

pub struct LlmClient {
    settings: LlmSettings,
    client: Client,
}

impl LlmClient {
    pub fn new(settings: LlmSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| NlqError::Llm(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { settings, client })
    }

    fn url(&self, style: EndpointStyle) -> String {
        let base = self.settings.base_url.trim_end_matches('/');
        let base = base.strip_suffix("/v1").unwrap_or(base);
        match style {
            EndpointStyle::Chat => format!("{}/v1/chat/completions", base),
            EndpointStyle::Completion => format!("{}/v1/completions", base),
        }
    }

    fn body(
        &self,
        style: EndpointStyle,
        messages: &[ChatMessage],
        max_tokens: u32,
        format: Option<ResponseFormat>,
    ) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.settings.model,
            "messages": messages,
            "temperature": 0,
        });
        let token_key = match style {
            EndpointStyle::Chat => "max_tokens",
            EndpointStyle::Completion => "max_completion_tokens",
        };
        body[token_key] = serde_json::json!(max_tokens);
        if style == EndpointStyle::Completion {
            body["stream"] = serde_json::json!(false);
        }
        if let Some(format) = format {
            body["response_format"] = format.as_json();
        }
        body
    }

    async fn post(&self, url: &str, body: &serde_json::Value) -> Result<(StatusCode, String)> {
        let mut request = self.client.post(url).json(body);
        if let Some(key) = &self.settings.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }
        let response = request
            .send()
            .await
            .map_err(|e| NlqError::Llm(format!("LLM API call failed: {}", e)))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| NlqError::Llm(format!("Failed to read LLM response: {}", e)))?;
        Ok((status, text))
    }

    /// One request against one endpoint style. A 400/422 with a format hint
    /// is retried once without the hint.
    async fn call_style(
        &self,
        style: EndpointStyle,
        messages: &[ChatMessage],
        max_tokens: u32,
        format: ResponseFormat,
    ) -> Result<String> {
        let url = self.url(style);
        let hint = match format {
            ResponseFormat::Text => None,
            ResponseFormat::JsonObject => Some(format),
        };

        let (mut status, mut text) = self
            .post(&url, &self.body(style, messages, max_tokens, hint))
            .await?;

        if hint.is_some()
            && (status == StatusCode::BAD_REQUEST || status == StatusCode::UNPROCESSABLE_ENTITY)
        {
            debug!("{} rejected response_format, retrying without it", url);
            (status, text) = self
                .post(&url, &self.body(style, messages, max_tokens, None))
                .await?;
        }

        if !status.is_success() {
            return Err(NlqError::Llm(format!("LLM HTTP {}", status.as_u16())));
        }

        let parsed: CompletionResponse = serde_json::from_str(&text)
            .map_err(|e| NlqError::Llm(format!("Failed to parse LLM response: {}", e)))?;
        parsed
            .first_text()
            .ok_or_else(|| NlqError::Llm("No content in LLM response".to_string()))
    }
}

#[async_trait]
impl LlmProvider for LlmClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        max_tokens: u32,
        format: ResponseFormat,
    ) -> Result<String> {
        let mut last_error = NlqError::Llm("No LLM endpoint styles configured".to_string());

        for attempt in 0..=self.settings.retries {
            for style in &self.settings.endpoint_styles {
                match self.call_style(*style, messages, max_tokens, format).await {
                    Ok(text) => return Ok(text),
                    Err(e) => {
                        warn!("LLM {:?} attempt {} failed: {}", style, attempt + 1, e);
                        last_error = e;
                    }
                }
            }
            if attempt < self.settings.retries {
                let backoff = 500 * (u64::from(attempt) + 1);
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }
        }
        Err(last_error)
    }
}
