//! Generation request/response types shared by every provider

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Tag selecting system instructions and safety handling for a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Red-flag / safety screening
    RedFlagAnalysis,
    /// Clinical summary of a SOAP note
    ClinicalSummary,
    /// Differential diagnosis
    DifferentialDiagnosis,
    /// Referral letter draft
    LetterDraft,
    /// Cross-model synthesis of earlier sections
    Synthesis,
    /// Inline completion while typing
    Suggestion,
    /// No specific task
    General,
}

impl TaskType {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RedFlagAnalysis => "red_flag_analysis",
            Self::ClinicalSummary => "clinical_summary",
            Self::DifferentialDiagnosis => "differential_diagnosis",
            Self::LetterDraft => "letter_draft",
            Self::Synthesis => "synthesis",
            Self::Suggestion => "suggestion",
            Self::General => "general",
        }
    }

    /// Whether the request needs the explicit safety-context block
    #[must_use]
    pub fn is_safety_task(&self) -> bool {
        matches!(self, Self::RedFlagAnalysis)
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "red_flag_analysis" | "red_flags" | "safety" => Ok(Self::RedFlagAnalysis),
            "clinical_summary" => Ok(Self::ClinicalSummary),
            "differential_diagnosis" => Ok(Self::DifferentialDiagnosis),
            "letter_draft" | "referral_letter" => Ok(Self::LetterDraft),
            "synthesis" => Ok(Self::Synthesis),
            "suggestion" => Ok(Self::Suggestion),
            "general" => Ok(Self::General),
            other => Err(format!("unknown task type: {other}")),
        }
    }
}

/// Per-request generation options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateOptions {
    /// Model name or alias; provider default when unset
    pub model: Option<String>,
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Task tag
    pub task_type: Option<TaskType>,
}

impl GenerateOptions {
    /// Options for a task type
    #[must_use]
    pub fn for_task(task_type: TaskType) -> Self {
        Self {
            task_type: Some(task_type),
            ..Default::default()
        }
    }

    /// Set the model
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set max tokens
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Task type, defaulting to general
    #[must_use]
    pub fn task(&self) -> TaskType {
        self.task_type.unwrap_or(TaskType::General)
    }
}

/// A complete generation request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// User prompt
    pub prompt: String,
    /// Optional system prompt
    pub system_prompt: Option<String>,
    /// Options
    pub options: GenerateOptions,
}

impl GenerationRequest {
    /// Create a request from a prompt
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    /// Set the system prompt
    #[must_use]
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    /// Set the options
    #[must_use]
    pub fn with_options(mut self, options: GenerateOptions) -> Self {
        self.options = options;
        self
    }
}

/// Token counters reported by a backend
///
/// `input_tokens` is the total prompt size, including any tokens that were
/// read from or written to the prompt cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Total input tokens
    pub input_tokens: u64,
    /// Output tokens
    pub output_tokens: u64,
    /// Input tokens served from the prompt cache
    pub cache_read_tokens: u64,
    /// Input tokens written to the prompt cache
    pub cache_creation_tokens: u64,
}

impl TokenUsage {
    /// Usage without any cache activity
    #[must_use]
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            ..Default::default()
        }
    }

    /// Input tokens billed at the standard rate
    #[must_use]
    pub fn uncached_input_tokens(&self) -> u64 {
        self.input_tokens
            .saturating_sub(self.cache_read_tokens)
            .saturating_sub(self.cache_creation_tokens)
    }
}

/// Result of a completed generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResult {
    /// Generated text
    pub text: String,
    /// Model that produced the text
    pub model: String,
    /// Backend that produced the text
    pub provider: String,
    /// Wall-clock or backend-reported duration
    pub duration_ms: u64,
    /// Token usage
    pub usage: TokenUsage,
}

/// One chunk delivered to a streaming sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamChunk {
    /// Incremental text
    Text(String),
    /// Stream finished successfully (terminal)
    Done,
    /// Stream failed (terminal)
    Error(String),
}

impl StreamChunk {
    /// Whether this chunk ends the stream
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Text(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_type_round_trip_names() {
        assert_eq!(
            "red-flag-analysis".parse::<TaskType>(),
            Ok(TaskType::RedFlagAnalysis)
        );
        assert_eq!(TaskType::ClinicalSummary.as_str(), "clinical_summary");
        assert!("nonsense".parse::<TaskType>().is_err());
        assert!(TaskType::RedFlagAnalysis.is_safety_task());
        assert!(!TaskType::ClinicalSummary.is_safety_task());
    }

    #[test]
    fn test_uncached_input_tokens() {
        let usage = TokenUsage {
            input_tokens: 5_000,
            output_tokens: 100,
            cache_read_tokens: 3_000,
            cache_creation_tokens: 1_000,
        };
        assert_eq!(usage.uncached_input_tokens(), 1_000);

        let odd = TokenUsage {
            input_tokens: 10,
            cache_read_tokens: 50,
            ..Default::default()
        };
        assert_eq!(odd.uncached_input_tokens(), 0);
    }

    #[test]
    fn test_stream_chunk_terminal() {
        assert!(!StreamChunk::Text("a".into()).is_terminal());
        assert!(StreamChunk::Done.is_terminal());
        assert!(StreamChunk::Error("x".into()).is_terminal());
    }

    #[test]
    fn test_options_builder() {
        let opts = GenerateOptions::for_task(TaskType::Suggestion)
            .with_model("fast")
            .with_max_tokens(64)
            .with_temperature(0.2);
        assert_eq!(opts.task(), TaskType::Suggestion);
        assert_eq!(opts.model.as_deref(), Some("fast"));
        assert_eq!(GenerateOptions::default().task(), TaskType::General);
    }
}
