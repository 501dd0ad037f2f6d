//! Hosted backend - Anthropic Messages API with prompt caching
//!
//! System instructions are sent as ordered blocks built by [`PromptCache`];
//! long blocks carry `cache_control` so repeat calls are billed at the
//! cache-read rate. Every call is budget-checked before it is sent and its
//! usage recorded afterwards.

use crate::breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::budget::{BudgetTracker, UsageInput};
use crate::completion::{GenerateOptions, GenerationResult, StreamChunk, TaskType, TokenUsage};
use crate::error::{Error, Result};
use crate::prompt_cache::{PromptCache, SystemBlock};
use crate::provider::{Provider, ProviderStatus};
use crate::util::{mask_api_key, truncate_safe, LineBuffer};
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

/// Provider name reported in results
pub const PROVIDER_NAME: &str = "claude";

/// Anthropic API version
const API_VERSION: &str = "2023-06-01";

/// Cheaper, faster tier
pub const FAST_MODEL: &str = "claude-haiku-4-5-20251001";

/// Stronger tier used for clinical text
pub const CLINICAL_MODEL: &str = "claude-sonnet-4-5-20250929";

/// Default model
pub const DEFAULT_MODEL: &str = CLINICAL_MODEL;

/// Default API base URL
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Internal alias → hosted model name
const MODEL_ALIASES: &[(&str, &str)] = &[
    ("fast", FAST_MODEL),
    ("haiku", FAST_MODEL),
    ("clinical", CLINICAL_MODEL),
    ("medical", CLINICAL_MODEL),
    ("sonnet", CLINICAL_MODEL),
];

/// Resolve an alias; unknown names pass through unchanged
#[must_use]
pub fn resolve_model(name: &str) -> &str {
    MODEL_ALIASES
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(name))
        .map_or(name, |&(_, model)| model)
}

/// Map a failed HTTP status to the error taxonomy
fn classify_status(status: u16, message: String) -> Error {
    match status {
        401 => Error::AuthFailed(message),
        429 => Error::RateLimited(message),
        529 => Error::Overloaded(message),
        _ => Error::Api { status, message },
    }
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: Vec<SystemContent>,
    messages: Vec<RequestMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct SystemContent {
    r#type: &'static str,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_control: Option<CacheControl>,
}

impl From<SystemBlock> for SystemContent {
    fn from(block: SystemBlock) -> Self {
        Self {
            r#type: "text",
            cache_control: block.cacheable.then_some(CacheControl {
                r#type: "ephemeral",
            }),
            text: block.text,
        }
    }
}

#[derive(Debug, Serialize)]
struct CacheControl {
    r#type: &'static str,
}

#[derive(Debug, Serialize)]
struct RequestMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    model: String,
    content: Vec<ResponseContentBlock>,
    usage: ApiUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: Option<u64>,
    #[serde(default)]
    cache_creation_input_tokens: Option<u64>,
}

impl From<ApiUsage> for TokenUsage {
    /// The API reports uncached input separately; fold cache tokens back
    /// into the total.
    fn from(usage: ApiUsage) -> Self {
        let cache_read = usage.cache_read_input_tokens.unwrap_or(0);
        let cache_creation = usage.cache_creation_input_tokens.unwrap_or(0);
        Self {
            input_tokens: usage.input_tokens + cache_read + cache_creation,
            output_tokens: usage.output_tokens,
            cache_read_tokens: cache_read,
            cache_creation_tokens: cache_creation,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

fn error_message(status: reqwest::StatusCode, body: &str) -> String {
    match serde_json::from_str::<ApiError>(body) {
        Ok(e) => e.error.message,
        Err(_) => format!("HTTP {}: {}", status, truncate_safe(body, 300)),
    }
}

/// Events of interest in the SSE stream
#[derive(Debug, PartialEq)]
enum StreamEvent {
    Text(String),
    Usage(TokenUsage),
    OutputTokens(u64),
    Stop,
    Error(String),
    Ignore,
}

fn parse_sse_data(data: &str) -> StreamEvent {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(data) else {
        return StreamEvent::Ignore;
    };

    match value["type"].as_str() {
        Some("content_block_delta") => value["delta"]["text"]
            .as_str()
            .map_or(StreamEvent::Ignore, |t| StreamEvent::Text(t.to_string())),
        Some("message_start") => {
            serde_json::from_value::<ApiUsage>(value["message"]["usage"].clone())
                .map_or(StreamEvent::Ignore, |u| StreamEvent::Usage(u.into()))
        }
        Some("message_delta") => value["usage"]["output_tokens"]
            .as_u64()
            .map_or(StreamEvent::Ignore, StreamEvent::OutputTokens),
        Some("message_stop") => StreamEvent::Stop,
        Some("error") => StreamEvent::Error(
            value["error"]["message"]
                .as_str()
                .unwrap_or("stream error")
                .to_string(),
        ),
        _ => StreamEvent::Ignore,
    }
}

// ============================================================================
// Provider Implementation
// ============================================================================

/// Hosted provider configuration
#[derive(Clone)]
pub struct HostedConfig {
    /// API key; calls fail with `NotConfigured` when absent
    pub api_key: Option<String>,
    /// Base URL
    pub base_url: String,
    /// Default model or alias
    pub default_model: String,
    /// Default max tokens
    pub default_max_tokens: u32,
    /// HTTP client timeout
    pub timeout: Duration,
}

impl fmt::Debug for HostedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostedConfig")
            .field("api_key", &self.api_key.as_deref().map(mask_api_key))
            .field("base_url", &self.base_url)
            .field("default_model", &self.default_model)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for HostedConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            default_max_tokens: 2048,
            timeout: Duration::from_secs(60),
        }
    }
}

impl HostedConfig {
    /// Create a configuration with an API key
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()).filter(|k: &String| !k.trim().is_empty()),
            ..Self::default()
        }
    }

    /// Read the key from `ANTHROPIC_API_KEY`; a missing key is not an error here
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            api_key: std::env::var("ANTHROPIC_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            base_url: std::env::var("ANTHROPIC_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            ..Self::default()
        }
    }

    /// Set the base URL
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the default model
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Set the default max tokens
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.default_max_tokens = max_tokens;
        self
    }

    /// Set the timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Hosted (Anthropic) provider
pub struct HostedProvider {
    client: Client,
    config: HostedConfig,
    breaker: CircuitBreaker,
    prompt_cache: Arc<PromptCache>,
    budget: Option<Arc<BudgetTracker>>,
}

impl HostedProvider {
    /// Create a provider with a default circuit breaker
    pub fn new(config: HostedConfig) -> Result<Self> {
        Self::with_breaker(config, CircuitBreakerConfig::default())
    }

    /// Create a provider with an explicit breaker configuration
    pub fn with_breaker(config: HostedConfig, breaker: CircuitBreakerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;

        Ok(Self {
            client,
            config,
            breaker: CircuitBreaker::new(PROVIDER_NAME, breaker),
            prompt_cache: Arc::new(PromptCache::new()),
            budget: None,
        })
    }

    /// Check and record spend through `budget`
    #[must_use]
    pub fn with_budget(mut self, budget: Arc<BudgetTracker>) -> Self {
        self.budget = Some(budget);
        self
    }

    /// Share a prompt cache (and its statistics)
    #[must_use]
    pub fn with_prompt_cache(mut self, cache: Arc<PromptCache>) -> Self {
        self.prompt_cache = cache;
        self
    }

    /// Prompt cache in use
    #[must_use]
    pub fn prompt_cache(&self) -> &PromptCache {
        &self.prompt_cache
    }

    /// Whether an API key is configured
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.config.api_key.is_some()
    }

    fn api_key(&self) -> Result<&str> {
        self.config
            .api_key
            .as_deref()
            .ok_or_else(|| Error::NotConfigured("ANTHROPIC_API_KEY not set".to_string()))
    }

    fn build_request<'a>(
        &'a self,
        model: &'a str,
        prompt: &'a str,
        task_type: TaskType,
        system_prompt: Option<&str>,
        options: &GenerateOptions,
        stream: bool,
    ) -> MessagesRequest<'a> {
        let system = self
            .prompt_cache
            .build_cacheable_messages(task_type, system_prompt)
            .into_iter()
            .map(SystemContent::from)
            .collect();

        MessagesRequest {
            model,
            max_tokens: options.max_tokens.unwrap_or(self.config.default_max_tokens),
            system,
            messages: vec![RequestMessage {
                role: "user",
                content: prompt,
            }],
            temperature: options.temperature,
            stream,
        }
    }

    fn post(&self, api_key: &str, request: &MessagesRequest<'_>) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}/v1/messages", self.config.base_url))
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(request)
    }

    fn map_send_error(&self, e: &reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Timeout(self.config.timeout.as_millis() as u64)
        } else {
            Error::Network(e.to_string())
        }
    }

    async fn send_request(
        &self,
        api_key: &str,
        request: &MessagesRequest<'_>,
    ) -> Result<MessagesResponse> {
        debug!("Sending request to hosted backend: {}", request.model);

        let response = self
            .post(api_key, request)
            .send()
            .await
            .map_err(|e| self.map_send_error(&e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.map_send_error(&e))?;

        if !status.is_success() {
            return Err(classify_status(status.as_u16(), error_message(status, &body)));
        }

        serde_json::from_str(&body).map_err(|e| Error::InvalidResponse(e.to_string()))
    }

    async fn record(&self, model: &str, usage: TokenUsage, task_type: TaskType, duration_ms: u64) {
        self.prompt_cache.observe(&usage);
        if let Some(budget) = &self.budget {
            budget
                .record_usage(UsageInput {
                    provider: PROVIDER_NAME.to_string(),
                    model: model.to_string(),
                    usage,
                    task_type,
                    duration_ms,
                    organization_id: None,
                })
                .await;
        }
    }

    /// Send a streaming request and wait for the response headers
    async fn open_stream(
        &self,
        api_key: &str,
        request: &MessagesRequest<'_>,
    ) -> Result<reqwest::Response> {
        let response = self
            .post(api_key, request)
            .send()
            .await
            .map_err(|e| self.map_send_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), error_message(status, &body)));
        }
        Ok(response)
    }

    async fn stream_inner(
        &self,
        model: Option<&str>,
        prompt: &str,
        sink: &mpsc::Sender<StreamChunk>,
    ) -> Result<()> {
        let api_key = self.api_key()?;
        if let Some(budget) = &self.budget {
            budget.check().await?;
        }

        let model = resolve_model(model.unwrap_or(&self.config.default_model));
        let options = GenerateOptions::default();
        let request = self.build_request(model, prompt, TaskType::General, None, &options, true);
        let started = Instant::now();

        let response = self.breaker.open(self.open_stream(api_key, &request)).await?;

        let mut usage = TokenUsage::default();
        let mut stream = response.bytes_stream();
        let mut lines = LineBuffer::new();

        // Input tokens are billed once the message starts, so a consumer
        // that goes away mid-stream still has its usage recorded below.
        'read: while let Some(item) = stream.next().await {
            let bytes = item.map_err(|e| {
                self.breaker.record_failure();
                Error::Network(e.to_string())
            })?;
            lines.push(&bytes);

            while let Some(line) = lines.next_line() {
                let line = line.map_err(|e| {
                    self.breaker.record_failure();
                    Error::InvalidResponse(format!("invalid UTF-8 in stream: {e}"))
                })?;
                let Some(data) = line.trim().strip_prefix("data:") else {
                    continue;
                };
                match parse_sse_data(data.trim()) {
                    StreamEvent::Text(text) => {
                        if sink.send(StreamChunk::Text(text)).await.is_err() {
                            debug!("Stream consumer went away");
                            break 'read;
                        }
                    }
                    StreamEvent::Usage(u) => usage = u,
                    StreamEvent::OutputTokens(n) => usage.output_tokens = n,
                    StreamEvent::Error(message) => {
                        self.breaker.record_failure();
                        return Err(Error::InvalidResponse(message));
                    }
                    StreamEvent::Stop => break 'read,
                    StreamEvent::Ignore => {}
                }
            }
        }

        self.breaker.record_success();
        let duration_ms = started.elapsed().as_millis() as u64;
        self.record(model, usage, TaskType::General, duration_ms).await;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Provider for HostedProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    #[instrument(skip(self, prompt, system_prompt, options), fields(model = tracing::field::Empty))]
    async fn generate(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        options: &GenerateOptions,
    ) -> Result<GenerationResult> {
        let api_key = self.api_key()?;
        if let Some(budget) = &self.budget {
            budget.check().await?;
        }

        let model = resolve_model(
            options
                .model
                .as_deref()
                .unwrap_or(&self.config.default_model),
        );
        tracing::Span::current().record("model", model);

        let task_type = options.task();
        let request = self.build_request(model, prompt, task_type, system_prompt, options, false);

        let started = Instant::now();
        let response = self
            .breaker
            .call(self.send_request(api_key, &request))
            .await?;
        let duration_ms = started.elapsed().as_millis() as u64;

        let text: String = response
            .content
            .into_iter()
            .filter_map(|block| match block {
                ResponseContentBlock::Text { text } => Some(text),
                ResponseContentBlock::Other => None,
            })
            .collect();
        let usage = TokenUsage::from(response.usage);

        self.record(&response.model, usage, task_type, duration_ms)
            .await;

        Ok(GenerationResult {
            text,
            model: response.model,
            provider: PROVIDER_NAME.to_string(),
            duration_ms,
            usage,
        })
    }

    async fn generate_stream(
        &self,
        model: Option<&str>,
        prompt: &str,
        sink: mpsc::Sender<StreamChunk>,
    ) {
        let terminal = match self.stream_inner(model, prompt, &sink).await {
            Ok(()) => StreamChunk::Done,
            Err(e) => {
                warn!(error = %e, "Hosted stream failed");
                StreamChunk::Error(e.to_string())
            }
        };
        let _ = sink.send(terminal).await;
    }

    async fn is_available(&self) -> bool {
        self.is_configured() && self.breaker.can_execute()
    }

    async fn status(&self) -> ProviderStatus {
        let detail = if self.is_configured() {
            let stats = self.prompt_cache.stats();
            format!(
                "prompt cache: {} hits, {} misses",
                stats.hits, stats.misses
            )
        } else {
            "ANTHROPIC_API_KEY not set".to_string()
        };

        ProviderStatus {
            name: PROVIDER_NAME.to_string(),
            available: self.is_available().await,
            model: Some(resolve_model(&self.config.default_model).to_string()),
            circuit: Some(self.breaker.state()),
            detail: Some(detail),
            ..Default::default()
        }
    }
}
