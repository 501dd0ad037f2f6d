//! Mock provider for testing
//!
//! Replies are scripted per [`TaskType`]; every call is logged so tests can
//! assert on the number and order of backend calls.

use crate::completion::{GenerateOptions, GenerationResult, StreamChunk, TaskType, TokenUsage};
use crate::error::{Error, Result};
use crate::provider::{Provider, ProviderStatus};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

type ErrorFactory = Arc<dyn Fn() -> Error + Send + Sync>;

#[derive(Clone)]
enum Reply {
    Text(String),
    Fail(ErrorFactory),
}

/// One recorded `generate` call
#[derive(Debug, Clone, PartialEq)]
pub struct MockCall {
    /// Task tag of the request
    pub task_type: TaskType,
    /// Prompt text
    pub prompt: String,
    /// System prompt, if any
    pub system_prompt: Option<String>,
    /// Requested model
    pub model: Option<String>,
}

/// A scripted provider
pub struct MockProvider {
    name: String,
    replies: HashMap<TaskType, Reply>,
    default: Reply,
    available: bool,
    delay: Option<Duration>,
    calls: Mutex<Vec<MockCall>>,
}

impl MockProvider {
    /// Create a mock that answers "mock response" to everything
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            replies: HashMap::new(),
            default: Reply::Text("mock response".to_string()),
            available: true,
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Reply to `task_type` with `text`
    #[must_use]
    pub fn with_response(mut self, task_type: TaskType, text: impl Into<String>) -> Self {
        self.replies.insert(task_type, Reply::Text(text.into()));
        self
    }

    /// Fail `task_type` with the error built by `error`
    #[must_use]
    pub fn with_failure(
        mut self,
        task_type: TaskType,
        error: impl Fn() -> Error + Send + Sync + 'static,
    ) -> Self {
        self.replies.insert(task_type, Reply::Fail(Arc::new(error)));
        self
    }

    /// Reply for tasks without a scripted reply
    #[must_use]
    pub fn with_default_response(mut self, text: impl Into<String>) -> Self {
        self.default = Reply::Text(text.into());
        self
    }

    /// Fail every unscripted task
    #[must_use]
    pub fn fail_all_with(mut self, error: impl Fn() -> Error + Send + Sync + 'static) -> Self {
        self.default = Reply::Fail(Arc::new(error));
        self
    }

    /// Health probe result
    #[must_use]
    pub fn with_available(mut self, available: bool) -> Self {
        self.available = available;
        self
    }

    /// Sleep before answering
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Calls made so far, in order
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of `generate` calls
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Task tags of the calls made so far, in order
    pub fn called_tasks(&self) -> Vec<TaskType> {
        self.calls().into_iter().map(|c| c.task_type).collect()
    }

    fn reply_for(&self, task_type: TaskType) -> Reply {
        self.replies
            .get(&task_type)
            .unwrap_or(&self.default)
            .clone()
    }
}

#[async_trait::async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        options: &GenerateOptions,
    ) -> Result<GenerationResult> {
        let task_type = options.task();
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(MockCall {
                task_type,
                prompt: prompt.to_string(),
                system_prompt: system_prompt.map(str::to_string),
                model: options.model.clone(),
            });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self.reply_for(task_type) {
            Reply::Text(text) => Ok(GenerationResult {
                usage: TokenUsage::new(prompt.len() as u64 / 4, text.len() as u64 / 4),
                text,
                model: options
                    .model
                    .clone()
                    .unwrap_or_else(|| "mock-model".to_string()),
                provider: self.name.clone(),
                duration_ms: 1,
            }),
            Reply::Fail(error) => Err(error()),
        }
    }

    async fn generate_stream(
        &self,
        _model: Option<&str>,
        _prompt: &str,
        sink: mpsc::Sender<StreamChunk>,
    ) {
        match self.reply_for(TaskType::General) {
            Reply::Text(text) => {
                for word in text.split_inclusive(' ') {
                    if sink.send(StreamChunk::Text(word.to_string())).await.is_err() {
                        return;
                    }
                }
                let _ = sink.send(StreamChunk::Done).await;
            }
            Reply::Fail(error) => {
                let _ = sink.send(StreamChunk::Error(error().to_string())).await;
            }
        }
    }

    async fn is_available(&self) -> bool {
        self.available
    }

    async fn status(&self) -> ProviderStatus {
        ProviderStatus {
            name: self.name.clone(),
            available: self.available,
            model: Some("mock-model".to_string()),
            ..Default::default()
        }
    }
}
