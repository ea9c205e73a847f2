//! OpenRouter gateway over the OpenAI-compatible chat completions API.

use async_trait::async_trait;
use reqwest::{header::RETRY_AFTER, Client};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{ProviderFailure, ProviderGateway, ProviderRequest, ProviderResponse, TokenUsage};
use crate::error::{Error, Result};
use crate::router::OPENROUTER_PROVIDER;

/// Configuration for the OpenRouter gateway.
#[derive(Debug, Clone)]
pub struct OpenRouterConfig {
    /// API key
    pub api_key: String,
    /// Base URL override
    pub base_url: Option<String>,
    /// HTTP-level request timeout in seconds
    pub timeout_secs: u64,
    /// Sampling temperature
    pub temperature: f64,
    /// Optional `HTTP-Referer` attribution header
    pub referer: Option<String>,
    /// Optional `X-Title` attribution header
    pub title: Option<String>,
}

impl OpenRouterConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            timeout_secs: 60,
            temperature: 0.1,
            referer: None,
            title: None,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_attribution(mut self, referer: impl Into<String>, title: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self.title = Some(title.into());
        self
    }
}

/// OpenRouter client.
pub struct OpenRouterGateway {
    config: OpenRouterConfig,
    http: Client,
}

impl OpenRouterGateway {
    const DEFAULT_BASE_URL: &'static str = "https://openrouter.ai/api/v1";

    pub fn new(config: OpenRouterConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(Error::config("OpenRouter API key must not be empty"));
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, http })
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or(Self::DEFAULT_BASE_URL)
            .trim_end_matches('/')
    }

    fn build_request(&self, request: ProviderRequest) -> ChatRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: request.prompt,
        });

        ChatRequest {
            model: request.model,
            messages,
            max_tokens: request.max_tokens,
            temperature: self.config.temperature,
        }
    }
}

impl std::fmt::Debug for OpenRouterGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRouterGateway")
            .field("base_url", &self.base_url())
            .finish_non_exhaustive()
    }
}

// OpenAI-compatible API types
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Map a non-success HTTP status to a classified failure.
pub fn classify_status(status: u16, retry_after: Option<Duration>, message: &str) -> ProviderFailure {
    let detail = format!("HTTP {}: {}", status, message);
    match status {
        401 | 402 => ProviderFailure::auth(detail),
        403 => ProviderFailure::moderation(detail),
        429 => ProviderFailure::RateLimited { retry_after },
        _ => ProviderFailure::transport(detail),
    }
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

fn error_message(body: &str) -> String {
    match serde_json::from_str::<ApiError>(body) {
        Ok(error) => error.error.message,
        Err(_) => body.chars().take(200).collect(),
    }
}

fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

fn parse_completion(body: &str, prompt: &str) -> std::result::Result<ProviderResponse, ProviderFailure> {
    let response: ChatResponse = serde_json::from_str(body)
        .map_err(|e| ProviderFailure::transport(format!("Failed to parse response: {}", e)))?;

    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderFailure::transport("No choices in response"))?;

    if choice.finish_reason.as_deref() == Some("content_filter") {
        return Err(ProviderFailure::moderation(
            "completion stopped by content filter",
        ));
    }

    let output = choice.message.content.unwrap_or_default();
    // Some upstream providers omit usage; fall back to a chars/4 estimate
    let usage = match response.usage {
        Some(usage) => TokenUsage::new(usage.prompt_tokens, usage.completion_tokens),
        None => TokenUsage::new(estimate_tokens(prompt), estimate_tokens(&output)),
    };

    Ok(ProviderResponse { output, usage })
}

#[async_trait]
impl ProviderGateway for OpenRouterGateway {
    fn name(&self) -> &str {
        OPENROUTER_PROVIDER
    }

    async fn call(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderFailure> {
        let prompt_for_estimate = request.prompt.clone();
        let api_request = self.build_request(request);
        let url = format!("{}/chat/completions", self.base_url());

        let mut builder = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("content-type", "application/json");
        if let Some(referer) = &self.config.referer {
            builder = builder.header("HTTP-Referer", referer);
        }
        if let Some(title) = &self.config.title {
            builder = builder.header("X-Title", title);
        }

        let response = builder.json(&api_request).send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderFailure::Timeout
            } else {
                ProviderFailure::transport(format!("HTTP request failed: {}", e))
            }
        })?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                ProviderFailure::Timeout
            } else {
                ProviderFailure::transport(format!("Failed to read response: {}", e))
            }
        })?;

        if !status.is_success() {
            debug!(model = %api_request.model, status = status.as_u16(), "OpenRouter call failed");
            return Err(classify_status(
                status.as_u16(),
                retry_after,
                &error_message(&body),
            ));
        }

        parse_completion(&body, &prompt_for_estimate)
    }
}
