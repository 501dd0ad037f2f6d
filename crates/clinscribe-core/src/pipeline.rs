//! Pipeline result types

use crate::safety::SafetyAssessment;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pipeline step identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    /// Red-flag screening
    Safety,
    /// Clinical summary
    Clinical,
    /// Differential diagnosis
    Differential,
    /// Referral letter draft
    Letter,
    /// Cross-model synthesis
    Synthesis,
}

impl StepKind {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Safety => "safety",
            Self::Clinical => "clinical",
            Self::Differential => "differential",
            Self::Letter => "letter",
            Self::Synthesis => "synthesis",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal state of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Produced output
    Completed,
    /// Failed or cancelled
    Error,
}

/// One executed step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStep {
    /// Step identity
    pub step: StepKind,
    /// Outcome
    pub status: StepStatus,
    /// Backend that answered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Model that answered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Failure text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Step wall-clock time
    pub duration_ms: u64,
}

impl PipelineStep {
    /// Successful step
    #[must_use]
    pub fn completed(step: StepKind, provider: String, model: String, duration_ms: u64) -> Self {
        Self {
            step,
            status: StepStatus::Completed,
            provider: Some(provider),
            model: Some(model),
            error: None,
            duration_ms,
        }
    }

    /// Failed step
    #[must_use]
    pub fn failed(step: StepKind, error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            step,
            status: StepStatus::Error,
            provider: None,
            model: None,
            error: Some(error.into()),
            duration_ms,
        }
    }

    /// Whether the step completed
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == StepStatus::Completed
    }
}

/// Outcome of the synthesis step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "text", rename_all = "snake_case")]
pub enum SynthesisOutcome {
    /// Not attempted (hosted backend disabled, too few sections, or halted)
    #[default]
    NotRun,
    /// Attempted and failed
    Failed,
    /// Merged narrative
    Completed(String),
}

impl SynthesisOutcome {
    /// Synthesised text, if any
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Completed(text) => Some(text),
            Self::NotRun | Self::Failed => None,
        }
    }

    /// Whether synthesis was attempted
    #[must_use]
    pub fn was_run(&self) -> bool {
        !matches!(self, Self::NotRun)
    }
}

/// Result of one pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResult {
    /// Stopped after safety screening
    pub halted: bool,
    /// Why, when halted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halt_reason: Option<String>,
    /// Safety screening
    pub safety: SafetyAssessment,
    /// Clinical summary
    pub clinical: Option<String>,
    /// Differential diagnosis
    pub differential: Option<String>,
    /// Referral letter draft
    pub letter: Option<String>,
    /// Cross-model synthesis
    pub synthesis: SynthesisOutcome,
    /// Executed steps
    pub steps: Vec<PipelineStep>,
    /// End-to-end time
    pub total_time_ms: u64,
}

impl PipelineResult {
    /// Step record by identity
    #[must_use]
    pub fn step(&self, kind: StepKind) -> Option<&PipelineStep> {
        self.steps.iter().find(|s| s.step == kind)
    }

    /// Steps that failed
    pub fn failed_steps(&self) -> impl Iterator<Item = &PipelineStep> {
        self.steps.iter().filter(|s| !s.is_completed())
    }
}
