//! Clinical orchestrator - the safety-gated generation pipeline
//!
//! Sequence per run:
//! 1. Safety screening. Always first; a CRITICAL result halts the run.
//! 2. Clinical summary, differential diagnosis and letter draft, dispatched
//!    concurrently. A failure in one never affects the others.
//! 3. Synthesis over the sections that produced text, on the hosted backend,
//!    when it is enabled and at least two sections exist.
//!
//! Step failures are recorded in the result rather than returned as errors.
//! An optional deadline and an external [`CancellationToken`] abort in-flight
//! calls; the affected steps are marked as errors and nothing is retried.

use crate::context::{Language, PatientData, PipelineOptions, SoapData};
use crate::error::{Error, Result};
use crate::pipeline::{PipelineResult, PipelineStep, StepKind, SynthesisOutcome};
use crate::prompts;
use crate::safety::{self, SafetyAssessment};
use clinscribe_llm::{GenerateOptions, GenerationResult, Provider, ProviderSet, TaskType};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Minimum number of generated sections before synthesis runs
const MIN_SECTIONS_FOR_SYNTHESIS: usize = 2;

/// Pipeline entry point, abstracted for the agent façade
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Orchestrate: Send + Sync {
    /// Run the pipeline once
    async fn orchestrate(
        &self,
        patient: &PatientData,
        soap: &SoapData,
        options: &PipelineOptions,
        cancel: &CancellationToken,
    ) -> Result<PipelineResult>;
}

/// Cancellation and deadline shared by every step of one run
struct RunGuard {
    cancel: CancellationToken,
    deadline: Option<tokio::time::Instant>,
}

impl RunGuard {
    fn new(parent: &CancellationToken, options: &PipelineOptions) -> Self {
        Self {
            cancel: parent.child_token(),
            deadline: options.deadline.map(|d| tokio::time::Instant::now() + d),
        }
    }

    async fn run<F>(&self, call: F) -> Result<GenerationResult>
    where
        F: Future<Output = clinscribe_llm::Result<GenerationResult>>,
    {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled("pipeline cancelled".to_string()));
        }

        let deadline = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled("pipeline cancelled".to_string())),
            _ = deadline => {
                self.cancel.cancel();
                Err(Error::Cancelled("deadline exceeded".to_string()))
            }
            result = call => result.map_err(Error::from),
        }
    }
}

/// Text recorded for a failed step
fn step_error_text(error: &Error) -> String {
    match error {
        Error::Llm(e) => e.to_string(),
        other => other.to_string(),
    }
}

fn halt_reason(safety: &SafetyAssessment, language: Language) -> String {
    let summary = safety.summary();
    match language {
        Language::No => format!("Kritisk risiko oppdaget: {summary}"),
        Language::En => format!("Critical risk detected: {summary}"),
    }
}

/// Safety-gated multi-step pipeline
pub struct ClinicalOrchestrator {
    provider: Arc<dyn Provider>,
    synthesis_provider: Option<Arc<dyn Provider>>,
}

impl ClinicalOrchestrator {
    /// Orchestrator without synthesis
    #[must_use]
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            synthesis_provider: None,
        }
    }

    /// Orchestrator for a resolved provider selection
    #[must_use]
    pub fn from_providers(providers: &ProviderSet) -> Self {
        let main: Arc<dyn Provider> = providers.main.clone();
        Self {
            provider: main,
            synthesis_provider: providers.synthesis_provider(),
        }
    }

    /// Enable synthesis through `provider`
    #[must_use]
    pub fn with_synthesis_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.synthesis_provider = Some(provider);
        self
    }

    /// Run with no external cancellation
    pub async fn run(
        &self,
        patient: &PatientData,
        soap: &SoapData,
        options: &PipelineOptions,
    ) -> Result<PipelineResult> {
        self.orchestrate(patient, soap, options, &CancellationToken::new())
            .await
    }

    async fn run_step(
        &self,
        guard: &RunGuard,
        kind: StepKind,
        task_type: TaskType,
        provider: &dyn Provider,
        prompt: String,
        language: Language,
    ) -> (Option<String>, PipelineStep) {
        let started = Instant::now();
        let options = GenerateOptions::for_task(task_type);
        let outcome = guard
            .run(provider.generate(&prompt, Some(prompts::system_prompt(language)), &options))
            .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(result) => {
                debug!(step = %kind, provider = %result.provider, duration_ms, "Step completed");
                let step =
                    PipelineStep::completed(kind, result.provider, result.model, duration_ms);
                (Some(result.text), step)
            }
            Err(e) => {
                warn!(step = %kind, error = %e, "Step failed");
                (None, PipelineStep::failed(kind, step_error_text(&e), duration_ms))
            }
        }
    }

    async fn optional_step(
        &self,
        enabled: bool,
        guard: &RunGuard,
        kind: StepKind,
        task_type: TaskType,
        prompt: impl FnOnce() -> String,
        language: Language,
    ) -> Option<(Option<String>, PipelineStep)> {
        if !enabled {
            return None;
        }
        Some(
            self.run_step(guard, kind, task_type, self.provider.as_ref(), prompt(), language)
                .await,
        )
    }
}

#[async_trait::async_trait]
impl Orchestrate for ClinicalOrchestrator {
    #[instrument(skip_all, fields(language = %options.language))]
    async fn orchestrate(
        &self,
        patient: &PatientData,
        soap: &SoapData,
        options: &PipelineOptions,
        cancel: &CancellationToken,
    ) -> Result<PipelineResult> {
        if soap.is_blank() {
            return Err(Error::InvalidInput("SOAP note is empty".to_string()));
        }

        let started = Instant::now();
        let guard = RunGuard::new(cancel, options);
        let language = options.language;
        let mut steps = Vec::new();

        // 1. Safety screening
        let (safety_text, safety_step) = self
            .run_step(
                &guard,
                StepKind::Safety,
                TaskType::RedFlagAnalysis,
                self.provider.as_ref(),
                prompts::safety_prompt(patient, soap, language),
                language,
            )
            .await;
        steps.push(safety_step);

        let safety = match safety_text {
            Some(text) => safety::classify(&text),
            None => SafetyAssessment::unknown(),
        };

        // 2. Halt check
        if safety.requires_halt() {
            let reason = halt_reason(&safety, language);
            info!(risk = %safety.risk_level, "Pipeline halted by safety screening");
            return Ok(PipelineResult {
                halted: true,
                halt_reason: Some(reason),
                safety,
                clinical: None,
                differential: None,
                letter: None,
                synthesis: SynthesisOutcome::NotRun,
                steps,
                total_time_ms: started.elapsed().as_millis() as u64,
            });
        }

        // 3-5. Independent generation steps
        let clinical = self.run_step(
            &guard,
            StepKind::Clinical,
            TaskType::ClinicalSummary,
            self.provider.as_ref(),
            prompts::clinical_prompt(patient, soap, language),
            language,
        );
        let differential = self.optional_step(
            options.include_differential,
            &guard,
            StepKind::Differential,
            TaskType::DifferentialDiagnosis,
            || prompts::differential_prompt(patient, soap, language),
            language,
        );
        let letter = self.optional_step(
            options.include_letter_draft,
            &guard,
            StepKind::Letter,
            TaskType::LetterDraft,
            || prompts::letter_prompt(patient, soap, language),
            language,
        );

        let ((clinical, clinical_step), differential, letter) =
            tokio::join!(clinical, differential, letter);

        steps.push(clinical_step);
        let differential = differential.and_then(|(text, step)| {
            steps.push(step);
            text
        });
        let letter = letter.and_then(|(text, step)| {
            steps.push(step);
            text
        });

        // 6. Synthesis
        let sections: Vec<(&str, &str)> = [
            (StepKind::Clinical, clinical.as_deref()),
            (StepKind::Differential, differential.as_deref()),
            (StepKind::Letter, letter.as_deref()),
        ]
        .into_iter()
        .filter_map(|(kind, text)| {
            text.filter(|t| !t.trim().is_empty())
                .map(|t| (prompts::section_title(kind, language), t))
        })
        .collect();

        let synthesis = match &self.synthesis_provider {
            Some(hosted) if sections.len() >= MIN_SECTIONS_FOR_SYNTHESIS => {
                let (text, step) = self
                    .run_step(
                        &guard,
                        StepKind::Synthesis,
                        TaskType::Synthesis,
                        hosted.as_ref(),
                        prompts::synthesis_prompt(&sections, language),
                        language,
                    )
                    .await;
                steps.push(step);
                text.map_or(SynthesisOutcome::Failed, SynthesisOutcome::Completed)
            }
            _ => SynthesisOutcome::NotRun,
        };

        let total_time_ms = started.elapsed().as_millis() as u64;
        info!(
            risk = %safety.risk_level,
            steps = steps.len(),
            total_time_ms,
            "Pipeline completed"
        );

        Ok(PipelineResult {
            halted: false,
            halt_reason: None,
            safety,
            clinical,
            differential,
            letter,
            synthesis,
            steps,
            total_time_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::StepStatus;
    use crate::safety::RiskLevel;
    use clinscribe_llm::{Error as LlmError, MockProvider};
    use std::time::Duration;

    fn soap() -> SoapData {
        SoapData {
            subjective: "Korsryggsmerter med utstråling til venstre bein".to_string(),
            objective: "Positiv Lasègue venstre".to_string(),
            assessment: "Mistenkt lumbal radikulopati".to_string(),
            plan: "Øvelser, kontroll om 2 uker".to_string(),
        }
    }

    fn local_low() -> MockProvider {
        MockProvider::new("local")
            .with_response(TaskType::RedFlagAnalysis, "Ingen røde flagg funnet.")
            .with_response(TaskType::ClinicalSummary, "Oppsummering")
            .with_response(TaskType::DifferentialDiagnosis, "Differensial")
            .with_response(TaskType::LetterDraft, "Brev")
    }

    #[tokio::test]
    async fn test_low_risk_runs_clinical_and_differential() {
        let local = Arc::new(local_low());
        let orchestrator = ClinicalOrchestrator::new(local.clone());

        let result = orchestrator
            .run(&PatientData::with_age(45), &soap(), &PipelineOptions::default())
            .await
            .unwrap();

        assert!(!result.halted);
        assert_eq!(result.safety.risk_level, RiskLevel::Low);
        assert!(result.safety.can_treat);
        assert_eq!(result.clinical.as_deref(), Some("Oppsummering"));
        assert_eq!(result.differential.as_deref(), Some("Differensial"));
        assert!(result.letter.is_none());
        assert_eq!(result.synthesis, SynthesisOutcome::NotRun);
        assert_eq!(local.call_count(), 3);
        assert_eq!(local.called_tasks()[0], TaskType::RedFlagAnalysis);

        let kinds: Vec<_> = result.steps.iter().map(|s| s.step).collect();
        assert_eq!(
            kinds,
            vec![StepKind::Safety, StepKind::Clinical, StepKind::Differential]
        );
    }

    #[tokio::test]
    async fn test_critical_halts_after_safety() {
        let local = Arc::new(
            local_low().with_response(TaskType::RedFlagAnalysis, "KRITISK: cauda equina syndrom"),
        );
        let hosted = Arc::new(MockProvider::new("claude"));
        let orchestrator =
            ClinicalOrchestrator::new(local.clone()).with_synthesis_provider(hosted.clone());

        let result = orchestrator
            .run(&PatientData::default(), &soap(), &PipelineOptions::default())
            .await
            .unwrap();

        assert!(result.halted);
        assert!(result.halt_reason.as_deref().unwrap().contains("Kritisk"));
        assert!(!result.safety.can_treat);
        assert_eq!(result.steps.len(), 1);
        assert_eq!(result.steps[0].step, StepKind::Safety);
        assert!(result.clinical.is_none());
        assert!(result.differential.is_none());
        assert!(result.letter.is_none());
        assert!(!result.synthesis.was_run());
        assert_eq!(local.call_count(), 1);
        assert_eq!(hosted.call_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_safety_call_is_unknown_and_continues() {
        let local = Arc::new(local_low().with_failure(TaskType::RedFlagAnalysis, || {
            LlmError::Unavailable("connection reset".to_string())
        }));
        let orchestrator = ClinicalOrchestrator::new(local.clone());

        let result = orchestrator
            .run(&PatientData::default(), &soap(), &PipelineOptions::default())
            .await
            .unwrap();

        assert!(!result.halted);
        assert_eq!(result.safety.risk_level, RiskLevel::Unknown);
        assert!(result.safety.can_treat);
        assert_eq!(result.steps[0].status, StepStatus::Error);
        assert!(result.steps[0]
            .error
            .as_deref()
            .unwrap()
            .contains("connection reset"));
        assert_eq!(result.clinical.as_deref(), Some("Oppsummering"));
    }

    #[tokio::test]
    async fn test_sibling_failure_is_isolated() {
        let local = Arc::new(local_low().with_failure(TaskType::ClinicalSummary, || {
            LlmError::Timeout(35_000)
        }));
        let orchestrator = ClinicalOrchestrator::new(local);

        let result = orchestrator
            .run(
                &PatientData::default(),
                &soap(),
                &PipelineOptions::default().with_letter_draft(true),
            )
            .await
            .unwrap();

        assert!(result.clinical.is_none());
        assert_eq!(result.differential.as_deref(), Some("Differensial"));
        assert_eq!(result.letter.as_deref(), Some("Brev"));
        let clinical = result.step(StepKind::Clinical).unwrap();
        assert_eq!(clinical.status, StepStatus::Error);
        assert_eq!(result.failed_steps().count(), 1);
    }

    #[tokio::test]
    async fn test_synthesis_runs_with_two_sections() {
        let local = Arc::new(local_low());
        let hosted = Arc::new(
            MockProvider::new("claude").with_response(TaskType::Synthesis, "Samlet tekst"),
        );
        let orchestrator =
            ClinicalOrchestrator::new(local).with_synthesis_provider(hosted.clone());

        let result = orchestrator
            .run(&PatientData::default(), &soap(), &PipelineOptions::default())
            .await
            .unwrap();

        assert_eq!(result.synthesis.text(), Some("Samlet tekst"));
        let step = result.step(StepKind::Synthesis).unwrap();
        assert_eq!(step.provider.as_deref(), Some("claude"));
        assert_eq!(result.steps.last().unwrap().step, StepKind::Synthesis);

        let prompt = &hosted.calls()[0].prompt;
        assert!(prompt.contains("Oppsummering"));
        assert!(prompt.contains("Differensial"));
    }

    #[tokio::test]
    async fn test_synthesis_skipped_with_one_section() {
        let local = Arc::new(local_low());
        let hosted = Arc::new(MockProvider::new("claude"));
        let orchestrator =
            ClinicalOrchestrator::new(local).with_synthesis_provider(hosted.clone());

        let result = orchestrator
            .run(
                &PatientData::default(),
                &soap(),
                &PipelineOptions::default().with_differential(false),
            )
            .await
            .unwrap();

        assert_eq!(result.synthesis, SynthesisOutcome::NotRun);
        assert_eq!(hosted.call_count(), 0);
    }

    #[tokio::test]
    async fn test_blank_soap_is_rejected() {
        let local = Arc::new(local_low());
        let orchestrator = ClinicalOrchestrator::new(local.clone());

        let err = orchestrator
            .run(&PatientData::default(), &SoapData::default(), &PipelineOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(local.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_marks_steps_cancelled() {
        let local = Arc::new(local_low().with_delay(Duration::from_secs(10)));
        let orchestrator = ClinicalOrchestrator::new(local.clone());

        let result = orchestrator
            .run(
                &PatientData::default(),
                &soap(),
                &PipelineOptions::default().with_deadline(Duration::from_secs(5)),
            )
            .await
            .unwrap();

        assert_eq!(result.safety.risk_level, RiskLevel::Unknown);
        assert!(result.steps.iter().all(|s| s.status == StepStatus::Error));
        assert!(result.steps[0]
            .error
            .as_deref()
            .unwrap()
            .contains("deadline exceeded"));
        // Later steps never reach the backend
        assert_eq!(local.call_count(), 1);
    }

    #[tokio::test]
    async fn test_external_cancellation() {
        let local = Arc::new(local_low());
        let orchestrator = ClinicalOrchestrator::new(local.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = orchestrator
            .orchestrate(&PatientData::default(), &soap(), &PipelineOptions::default(), &cancel)
            .await
            .unwrap();

        assert!(result.steps.iter().all(|s| !s.is_completed()));
        assert_eq!(local.call_count(), 0);
    }
}
