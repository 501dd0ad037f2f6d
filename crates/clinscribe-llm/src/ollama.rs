//! Local backend - Ollama-compatible inference server
//!
//! Sends one non-streaming `/api/generate` request per call, with the system
//! prompt folded into the prompt text. Transient failures (timeouts, refused
//! connections) are retried under the configured [`RetryPolicy`]; anything
//! else is reported as [`Error::Unavailable`] straight away.

use crate::breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::budget::{BudgetTracker, UsageInput};
use crate::completion::{GenerateOptions, GenerationResult, StreamChunk, TokenUsage};
use crate::error::{Error, Result};
use crate::provider::{Provider, ProviderStatus};
use crate::retry::RetryPolicy;
use crate::util::{join_prompt, LineBuffer};
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

/// Provider name reported in results
pub const PROVIDER_NAME: &str = "local";

/// Default local model
pub const DEFAULT_MODEL: &str = "llama3.2";

/// Default server URL
const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Sanitize backend error text before it reaches callers
fn sanitize_api_error(error: &str) -> String {
    let lower = error.to_lowercase();

    if lower.contains("/home")
        || lower.contains("/root")
        || lower.contains("/var")
        || lower.contains("\\users\\")
    {
        return "An internal error occurred in the local inference server.".to_string();
    }

    if lower.contains("model") && (lower.contains("not found") || lower.contains("pull")) {
        return "Model not available on the local inference server.".to_string();
    }

    if error.len() < 200 {
        return error.to_string();
    }

    format!("{}...", crate::util::truncate_safe(error, 200))
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct LocalGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<LocalOptions>,
}

#[derive(Debug, Serialize)]
struct LocalOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct LocalGenerateResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    /// Nanoseconds
    #[serde(default)]
    total_duration: Option<u64>,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LocalError {
    error: String,
}

#[derive(Debug, Deserialize)]
struct LocalTagsResponse {
    #[serde(default)]
    models: Vec<LocalModel>,
}

#[derive(Debug, Deserialize)]
struct LocalModel {
    name: String,
}

// ============================================================================
// Provider Implementation
// ============================================================================

/// Local provider configuration
#[derive(Debug, Clone)]
pub struct LocalConfig {
    /// Server URL
    pub base_url: String,
    /// Model used when a request names none
    pub default_model: String,
    /// Token budget used when a request names none
    pub default_max_tokens: u32,
    /// Temperature used when a request names none
    pub default_temperature: f32,
    /// HTTP client timeout
    pub timeout: Duration,
    /// Retry policy for transient failures
    pub retry: RetryPolicy,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            default_max_tokens: 2048,
            default_temperature: 0.3,
            timeout: Duration::from_secs(120),
            retry: RetryPolicy::default(),
        }
    }
}

impl LocalConfig {
    /// Create a new configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
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

    /// Set the HTTP timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry policy
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Local inference provider
pub struct LocalProvider {
    client: Client,
    config: LocalConfig,
    breaker: CircuitBreaker,
    budget: Option<Arc<BudgetTracker>>,
}

impl LocalProvider {
    /// Create a provider with a default circuit breaker
    pub fn new(config: LocalConfig) -> Result<Self> {
        Self::with_breaker(config, CircuitBreakerConfig::default())
    }

    /// Create a provider with an explicit breaker configuration
    pub fn with_breaker(config: LocalConfig, breaker: CircuitBreakerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;

        Ok(Self {
            client,
            config,
            breaker: CircuitBreaker::new(PROVIDER_NAME, breaker),
            budget: None,
        })
    }

    /// Record usage of completed generations
    #[must_use]
    pub fn with_budget(mut self, budget: Arc<BudgetTracker>) -> Self {
        self.budget = Some(budget);
        self
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &LocalConfig {
        &self.config
    }

    /// Models installed on the server
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.config.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.map_send_error(&e))?;

        if !response.status().is_success() {
            return Err(Error::Api {
                status: response.status().as_u16(),
                message: "model listing failed".to_string(),
            });
        }

        let tags: LocalTagsResponse = response
            .json()
            .await
            .map_err(|e| Error::InvalidResponse(e.to_string()))?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    fn map_send_error(&self, e: &reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Timeout(self.config.timeout.as_millis() as u64)
        } else if e.is_connect() {
            Error::Network(format!(
                "failed to connect to local backend at {}",
                self.config.base_url
            ))
        } else {
            Error::Network(e.to_string())
        }
    }

    async fn send_request(&self, request: &LocalGenerateRequest<'_>) -> Result<LocalGenerateResponse> {
        let url = format!("{}/api/generate", self.config.base_url);
        debug!("Sending request to local backend: {}", request.model);

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| self.map_send_error(&e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.map_send_error(&e))?;

        if !status.is_success() {
            let message = serde_json::from_str::<LocalError>(&body)
                .map(|e| e.error)
                .unwrap_or_else(|_| format!("HTTP {status}"));
            return Err(Error::Api {
                status: status.as_u16(),
                message: sanitize_api_error(&message),
            });
        }

        let parsed: LocalGenerateResponse = serde_json::from_str(&body)
            .map_err(|e| Error::InvalidResponse(e.to_string()))?;
        if let Some(error) = parsed.error {
            return Err(Error::Api {
                status: status.as_u16(),
                message: sanitize_api_error(&error),
            });
        }
        Ok(parsed)
    }

    /// Send a streaming request and wait for the response headers
    async fn open_stream(&self, request: &LocalGenerateRequest<'_>) -> Result<reqwest::Response> {
        let url = format!("{}/api/generate", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| self.map_send_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Api {
                status: status.as_u16(),
                message: format!("local backend returned HTTP {status}"),
            });
        }
        Ok(response)
    }

    /// Issue the request under the breaker, retrying transient failures
    async fn send_with_retry(
        &self,
        request: &LocalGenerateRequest<'_>,
    ) -> Result<LocalGenerateResponse> {
        let policy = &self.config.retry;
        let mut attempt = 1;

        loop {
            match self.breaker.call(self.send_request(request)).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() => {
                    if !policy.should_retry(attempt) {
                        return Err(Error::TimeoutAfterRetries {
                            attempts: attempt,
                            message: e.to_string(),
                        });
                    }
                    let delay = policy.delay_for(attempt);
                    warn!(attempt, error = %e, "Local backend transient failure, retrying in {:?}", delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(Error::Unavailable(e.to_string())),
            }
        }
    }
}

/// Parse one NDJSON line of a streamed response
fn parse_stream_line(line: &str) -> Option<std::result::Result<(String, bool), String>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str::<LocalGenerateResponse>(line) {
        Ok(chunk) => match chunk.error {
            Some(error) => Some(Err(sanitize_api_error(&error))),
            None => Some(Ok((chunk.response, chunk.done))),
        },
        Err(e) => Some(Err(format!("invalid stream chunk: {e}"))),
    }
}

#[async_trait::async_trait]
impl Provider for LocalProvider {
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
        let model = options
            .model
            .as_deref()
            .unwrap_or(&self.config.default_model);
        tracing::Span::current().record("model", model);

        let full_prompt = join_prompt(system_prompt, prompt);
        let request = LocalGenerateRequest {
            model,
            prompt: &full_prompt,
            stream: false,
            options: Some(LocalOptions {
                temperature: Some(options.temperature.unwrap_or(self.config.default_temperature)),
                num_predict: Some(options.max_tokens.unwrap_or(self.config.default_max_tokens)),
            }),
        };

        let started = Instant::now();
        let response = self.send_with_retry(&request).await?;

        let duration_ms = response
            .total_duration
            .map(|ns| ns / 1_000_000)
            .unwrap_or_else(|| started.elapsed().as_millis() as u64);
        let usage = TokenUsage::new(
            response.prompt_eval_count.unwrap_or(0),
            response.eval_count.unwrap_or(0),
        );
        let model = response.model.unwrap_or_else(|| model.to_string());

        if let Some(budget) = &self.budget {
            budget
                .record_usage(UsageInput {
                    provider: PROVIDER_NAME.to_string(),
                    model: model.clone(),
                    usage,
                    task_type: options.task(),
                    duration_ms,
                    organization_id: None,
                })
                .await;
        }

        Ok(GenerationResult {
            text: response.response,
            model,
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
        let model = model.unwrap_or(&self.config.default_model);
        let request = LocalGenerateRequest {
            model,
            prompt,
            stream: true,
            options: None,
        };

        let response = match self.breaker.open(self.open_stream(&request)).await {
            Ok(r) => r,
            Err(e) => {
                let _ = sink.send(StreamChunk::Error(e.to_string())).await;
                return;
            }
        };

        let mut stream = response.bytes_stream();
        let mut lines = LineBuffer::new();

        while let Some(item) = stream.next().await {
            let bytes = match item {
                Ok(b) => b,
                Err(e) => {
                    self.breaker.record_failure();
                    let _ = sink.send(StreamChunk::Error(e.to_string())).await;
                    return;
                }
            };
            lines.push(&bytes);

            while let Some(line) = lines.next_line() {
                let parsed = match line {
                    Ok(line) => parse_stream_line(&line),
                    Err(e) => Some(Err(format!("invalid UTF-8 in stream: {e}"))),
                };
                match parsed {
                    None => {}
                    Some(Ok((text, done))) => {
                        if !text.is_empty() && sink.send(StreamChunk::Text(text)).await.is_err() {
                            return;
                        }
                        if done {
                            self.breaker.record_success();
                            let _ = sink.send(StreamChunk::Done).await;
                            return;
                        }
                    }
                    Some(Err(message)) => {
                        self.breaker.record_failure();
                        let _ = sink.send(StreamChunk::Error(message)).await;
                        return;
                    }
                }
            }
        }

        // Trailing line without newline
        match lines.take_rest() {
            Some(Ok(rest)) => {
                if let Some(Ok((text, _))) = parse_stream_line(&rest) {
                    if !text.is_empty() {
                        let _ = sink.send(StreamChunk::Text(text)).await;
                    }
                }
            }
            Some(Err(e)) => {
                self.breaker.record_failure();
                let message = format!("invalid UTF-8 in stream: {e}");
                let _ = sink.send(StreamChunk::Error(message)).await;
                return;
            }
            None => {}
        }
        self.breaker.record_success();
        let _ = sink.send(StreamChunk::Done).await;
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.config.base_url);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(error = %e, "Local backend health probe failed");
                false
            }
        }
    }

    async fn status(&self) -> ProviderStatus {
        let (available, detail) = match self.list_models().await {
            Ok(models) => (true, Some(format!("{} models installed", models.len()))),
            Err(e) => (false, Some(e.to_string())),
        };

        ProviderStatus {
            name: PROVIDER_NAME.to_string(),
            available,
            model: Some(self.config.default_model.clone()),
            circuit: Some(self.breaker.state()),
            detail,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::BudgetConfig;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response per accepted connection
    async fn serve(responses: Vec<(u16, String)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = vec![0u8; 16 * 1024];
                let _ = socket.read(&mut buf).await;
                let reply = format!(
                    "HTTP/1.1 {status} OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(reply.as_bytes()).await.unwrap();
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{addr}")
    }

    /// Accept one connection, read the request and never answer
    async fn hold_open(listener: &TcpListener) {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 16 * 1024];
        let _ = socket.read(&mut buf).await;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });
    }

    /// Serve a chunked body as two separate writes split at byte `split`
    async fn serve_in_two_writes(body: Vec<u8>, split: usize) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 16 * 1024];
            let _ = socket.read(&mut buf).await;
            let head = "HTTP/1.1 200 OK\r\ncontent-type: application/x-ndjson\r\ntransfer-encoding: chunked\r\nconnection: close\r\n\r\n";
            socket.write_all(head.as_bytes()).await.unwrap();
            for part in [&body[..split], &body[split..]] {
                socket
                    .write_all(format!("{:x}\r\n", part.len()).as_bytes())
                    .await
                    .unwrap();
                socket.write_all(part).await.unwrap();
                socket.write_all(b"\r\n").await.unwrap();
                socket.flush().await.unwrap();
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            socket.write_all(b"0\r\n\r\n").await.unwrap();
            let _ = socket.shutdown().await;
        });
        format!("http://{addr}")
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::default().with_initial_delay(Duration::from_millis(1))
    }

    #[test]
    fn test_config_builder() {
        let config = LocalConfig::new()
            .with_model("mistral")
            .with_base_url("http://192.168.1.100:11434/")
            .with_max_tokens(512)
            .with_timeout(Duration::from_secs(30));

        assert_eq!(config.default_model, "mistral");
        assert_eq!(config.base_url, "http://192.168.1.100:11434");
        assert_eq!(config.default_max_tokens, 512);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.retry.max_attempts, 2);
    }

    #[test]
    fn test_parse_stream_line() {
        assert_eq!(
            parse_stream_line(r#"{"response":"Hei","done":false}"#),
            Some(Ok(("Hei".to_string(), false)))
        );
        assert_eq!(
            parse_stream_line(r#"{"response":"","done":true}"#),
            Some(Ok((String::new(), true)))
        );
        assert!(matches!(parse_stream_line(r#"{"error":"boom"}"#), Some(Err(_))));
        assert_eq!(parse_stream_line("   "), None);
    }

    #[test]
    fn test_sanitize_api_error() {
        let sanitized = sanitize_api_error("failed to load /home/user/.ollama/models/x");
        assert!(!sanitized.contains("/home"));

        let sanitized = sanitize_api_error("model 'llama9' not found, try pulling it first");
        assert!(sanitized.contains("not available"));
    }

    #[tokio::test]
    async fn test_generate_reports_backend_duration_and_usage() {
        let body = r#"{"model":"llama3.2","response":"Oppsummering","done":true,"total_duration":2500000000,"prompt_eval_count":120,"eval_count":40}"#;
        let base = serve(vec![(200, body.to_string())]).await;
        let budget = Arc::new(BudgetTracker::new(BudgetConfig::default()));
        let provider = LocalProvider::new(LocalConfig::new().with_base_url(base))
            .unwrap()
            .with_budget(budget.clone());

        let result = provider
            .generate("Pasient med ryggsmerter", Some("Du er lege"), &GenerateOptions::default())
            .await
            .unwrap();

        assert_eq!(result.text, "Oppsummering");
        assert_eq!(result.provider, "local");
        assert_eq!(result.duration_ms, 2500);
        assert_eq!(result.usage.input_tokens, 120);
        assert_eq!(result.usage.output_tokens, 40);
        assert_eq!(result.usage.cache_read_tokens, 0);
        // Local models are not billed
        assert_eq!(budget.status().await.daily.spent, 0.0);
    }

    #[tokio::test]
    async fn test_api_error_is_unavailable_without_retry() {
        let base = serve(vec![(500, r#"{"error":"out of memory"}"#.to_string())]).await;
        let provider =
            LocalProvider::new(LocalConfig::new().with_base_url(base).with_retry(fast_retry()))
                .unwrap();

        let err = provider
            .generate("x", None, &GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unavailable(_)));
        assert!(err.to_string().starts_with("AI service unavailable"));
    }

    #[tokio::test]
    async fn test_connection_refused_retries_then_gives_up() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let provider = LocalProvider::new(
            LocalConfig::new()
                .with_base_url(format!("http://{addr}"))
                .with_retry(fast_retry()),
        )
        .unwrap();

        let err = provider
            .generate("x", None, &GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TimeoutAfterRetries { attempts: 2, .. }));
        assert!(!provider.is_available().await);
    }

    #[tokio::test]
    async fn test_stream_to_unreachable_backend_ends_with_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let provider =
            LocalProvider::new(LocalConfig::new().with_base_url(format!("http://{addr}"))).unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        provider.generate_stream(None, "hei", tx).await;

        let chunk = rx.recv().await.unwrap();
        assert!(matches!(chunk, StreamChunk::Error(_)));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_yields_text_then_done() {
        let body = concat!(
            r#"{"response":"Hei ","done":false}"#,
            "\n",
            r#"{"response":"der","done":false}"#,
            "\n",
            r#"{"response":"","done":true}"#,
            "\n"
        );
        let base = serve(vec![(200, body.to_string())]).await;
        let provider = LocalProvider::new(LocalConfig::new().with_base_url(base)).unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        provider.generate_stream(None, "hei", tx).await;

        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk);
        }
        assert_eq!(
            chunks,
            vec![
                StreamChunk::Text("Hei ".to_string()),
                StreamChunk::Text("der".to_string()),
                StreamChunk::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_stream_keeps_character_split_across_writes() {
        let body = concat!(
            r#"{"response":"rød","done":false}"#,
            "\n",
            r#"{"response":"","done":true}"#,
            "\n"
        )
        .as_bytes()
        .to_vec();
        // Cut between the two bytes of 'ø'
        let split = body.iter().position(|b| *b == 0xC3).unwrap() + 1;
        let base = serve_in_two_writes(body, split).await;
        let provider = LocalProvider::new(LocalConfig::new().with_base_url(base)).unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        provider.generate_stream(None, "hei", tx).await;

        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk);
        }
        assert_eq!(
            chunks,
            vec![StreamChunk::Text("rød".to_string()), StreamChunk::Done]
        );
    }

    #[tokio::test]
    async fn test_stream_times_out_when_backend_never_answers() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move { hold_open(&listener).await });

        let breaker = CircuitBreakerConfig::new().with_request_timeout(Duration::from_millis(100));
        let provider =
            LocalProvider::with_breaker(LocalConfig::new().with_base_url(base), breaker).unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        tokio::time::timeout(Duration::from_secs(5), provider.generate_stream(None, "hei", tx))
            .await
            .expect("stream should give up at the request timeout");

        match rx.recv().await {
            Some(StreamChunk::Error(message)) => assert_eq!(message, "timeout after 100ms"),
            other => panic!("expected timeout error, got {other:?}"),
        }
        assert!(rx.recv().await.is_none());
        assert_eq!(provider.breaker.failure_count(), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_then_success_returns_second_response() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            hold_open(&listener).await;

            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 16 * 1024];
            let _ = socket.read(&mut buf).await;
            let body = r#"{"model":"llama3.2","response":"Andre forsøk","done":true}"#;
            let reply = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(reply.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        });

        let breaker = CircuitBreakerConfig::new().with_request_timeout(Duration::from_millis(100));
        let provider = LocalProvider::with_breaker(
            LocalConfig::new().with_base_url(base).with_retry(fast_retry()),
            breaker,
        )
        .unwrap();

        let result = provider
            .generate("x", None, &GenerateOptions::default())
            .await
            .unwrap();
        assert_eq!(result.text, "Andre forsøk");
        assert_eq!(provider.breaker.failure_count(), 0);
    }
}
