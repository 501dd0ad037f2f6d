//! Clinscribe Core - safety-gated clinical documentation pipeline
//!
//! This crate provides:
//! - Safety: keyword classification of red-flag screening output
//! - Orchestrator: safety gate, concurrent generation steps, synthesis
//! - Agent: stable external result shape and inline suggestions
//! - Prompts: Norwegian and English templates per step

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod agent;
pub mod context;
pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod prompts;
pub mod safety;

pub use agent::{AgentOptions, AgentResult, AgentStep, ClinicalAgent, Suggestion};
pub use context::{Language, PatientData, PipelineOptions, SoapData};
pub use error::{Error, Result};
pub use orchestrator::{ClinicalOrchestrator, Orchestrate};
pub use pipeline::{PipelineResult, PipelineStep, StepKind, StepStatus, SynthesisOutcome};
pub use safety::{classify, RiskLevel, SafetyAssessment};
