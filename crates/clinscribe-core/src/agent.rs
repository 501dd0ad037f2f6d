//! Clinical agent façade
//!
//! Maps orchestrator output to a stable external shape and absorbs every
//! pipeline error into a halted result. Inline suggestions bypass the
//! orchestrator and go straight to a provider.

use crate::context::{Language, PatientData, PipelineOptions, SoapData};
use crate::orchestrator::{ClinicalOrchestrator, Orchestrate};
use crate::pipeline::{PipelineResult, PipelineStep, StepStatus};
use crate::safety::{RiskLevel, SafetyAssessment};
use clinscribe_llm::{GenerateOptions, Provider, ProviderSet, TaskType};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, instrument, warn};

const SUGGESTION_MAX_TOKENS: u32 = 256;
const SUGGESTION_TEMPERATURE: f32 = 0.2;

/// Caller options; unset fields take the pipeline defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentOptions {
    /// Language code, `no` when unset
    #[serde(default)]
    pub language: Option<String>,
    /// Run the differential step, `true` when unset
    #[serde(default)]
    pub include_differential: Option<bool>,
    /// Run the letter step, `false` when unset
    #[serde(default)]
    pub include_letter_draft: Option<bool>,
    /// Overall deadline in seconds
    #[serde(default)]
    pub deadline_secs: Option<u64>,
}

impl AgentOptions {
    fn to_pipeline_options(&self) -> PipelineOptions {
        let defaults = PipelineOptions::default();
        PipelineOptions {
            language: self
                .language
                .as_deref()
                .map_or(Language::No, Language::parse),
            include_differential: self
                .include_differential
                .unwrap_or(defaults.include_differential),
            include_letter_draft: self
                .include_letter_draft
                .unwrap_or(defaults.include_letter_draft),
            deadline: self.deadline_secs.map(Duration::from_secs),
        }
    }
}

/// Step as reported to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStep {
    /// Step name
    pub step: String,
    /// Whether the step completed
    pub success: bool,
    /// Backend that answered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Failure text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Step wall-clock time
    pub duration_ms: u64,
}

impl From<PipelineStep> for AgentStep {
    fn from(step: PipelineStep) -> Self {
        Self {
            step: step.step.as_str().to_string(),
            success: step.status == StepStatus::Completed,
            model: step.provider,
            error: step.error,
            duration_ms: step.duration_ms,
        }
    }
}

/// Pipeline result as reported to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResult {
    /// Stopped before generating content
    pub halted: bool,
    /// Why, when halted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halt_reason: Option<String>,
    /// Safety screening
    pub safety: SafetyAssessment,
    /// Best available narrative: synthesis, else the clinical summary
    pub polished: Option<String>,
    /// Clinical summary
    pub clinical: Option<String>,
    /// Differential diagnosis
    pub differential: Option<String>,
    /// Referral letter draft
    pub letter: Option<String>,
    /// Cross-model synthesis
    pub synthesis: Option<String>,
    /// Executed steps
    pub steps: Vec<AgentStep>,
    /// End-to-end time
    pub total_time_ms: u64,
}

impl AgentResult {
    /// Halted result for a pipeline that failed outright
    #[must_use]
    pub fn degraded(message: &str) -> Self {
        Self {
            halted: true,
            halt_reason: Some(format!("Pipeline error: {message}")),
            safety: SafetyAssessment {
                risk_level: RiskLevel::Unknown,
                can_treat: false,
                raw_text: String::new(),
                flags: Vec::new(),
            },
            polished: None,
            clinical: None,
            differential: None,
            letter: None,
            synthesis: None,
            steps: vec![AgentStep {
                step: "pipeline".to_string(),
                success: false,
                model: None,
                error: Some(message.to_string()),
                duration_ms: 0,
            }],
            total_time_ms: 0,
        }
    }
}

impl From<PipelineResult> for AgentResult {
    fn from(result: PipelineResult) -> Self {
        let synthesis = result.synthesis.text().map(str::to_string);
        Self {
            halted: result.halted,
            halt_reason: result.halt_reason,
            safety: result.safety,
            polished: synthesis.clone().or_else(|| result.clinical.clone()),
            clinical: result.clinical,
            differential: result.differential,
            letter: result.letter,
            synthesis,
            steps: result.steps.into_iter().map(AgentStep::from).collect(),
            total_time_ms: result.total_time_ms,
        }
    }
}

/// Inline suggestion outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    /// Suggested text, empty on failure
    pub suggestion: String,
    /// Whether the backend answered
    pub success: bool,
    /// Failure text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Entry point used by callers of the pipeline
pub struct ClinicalAgent {
    orchestrator: Arc<dyn Orchestrate>,
    suggestion_provider: Arc<dyn Provider>,
}

impl ClinicalAgent {
    /// Create an agent
    pub fn new(orchestrator: Arc<dyn Orchestrate>, suggestion_provider: Arc<dyn Provider>) -> Self {
        Self {
            orchestrator,
            suggestion_provider,
        }
    }

    /// Agent over a resolved provider selection
    pub fn from_providers(providers: &ProviderSet) -> Self {
        let suggestion_provider: Arc<dyn Provider> = providers.main.clone();
        Self::new(
            Arc::new(ClinicalOrchestrator::from_providers(providers)),
            suggestion_provider,
        )
    }

    /// Run the pipeline; never fails
    pub async fn run_clinical_pipeline(
        &self,
        patient: &PatientData,
        soap: &SoapData,
        options: &AgentOptions,
    ) -> AgentResult {
        self.run_clinical_pipeline_with_cancel(patient, soap, options, &CancellationToken::new())
            .await
    }

    /// Run the pipeline under an external cancellation token; never fails
    #[instrument(skip_all)]
    pub async fn run_clinical_pipeline_with_cancel(
        &self,
        patient: &PatientData,
        soap: &SoapData,
        options: &AgentOptions,
        cancel: &CancellationToken,
    ) -> AgentResult {
        let options = options.to_pipeline_options();
        match self
            .orchestrator
            .orchestrate(patient, soap, &options, cancel)
            .await
        {
            Ok(result) => result.into(),
            Err(e) => {
                error!(error = %e, "Clinical pipeline failed");
                AgentResult::degraded(&e.to_string())
            }
        }
    }

    /// Low-latency completion outside the pipeline; never fails
    #[instrument(skip_all, fields(provider = %self.suggestion_provider.name()))]
    pub async fn quick_suggestion(&self, prompt: &str) -> Suggestion {
        let options = GenerateOptions::for_task(TaskType::Suggestion)
            .with_max_tokens(SUGGESTION_MAX_TOKENS)
            .with_temperature(SUGGESTION_TEMPERATURE);

        match self
            .suggestion_provider
            .generate(prompt, None, &options)
            .await
        {
            Ok(result) => Suggestion {
                suggestion: result.text,
                success: true,
                error: None,
            },
            Err(e) => {
                warn!(error = %e, "Suggestion failed");
                Suggestion {
                    suggestion: String::new(),
                    success: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}
