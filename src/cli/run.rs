//! CLI command: `clinscribe run`

use crate::runtime::config::AppConfig;
use crate::runtime::Runtime;
use anyhow::{Context, Result};
use clinscribe_core::{AgentOptions, PatientData, SoapData};
use serde::Deserialize;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Flags that take precedence over the input file
#[derive(Debug, Default)]
pub struct Overrides {
    pub language: Option<String>,
    pub letter: bool,
    pub no_differential: bool,
}

/// Input file layout
#[derive(Debug, Deserialize)]
struct PipelineInput {
    #[serde(default)]
    patient: PatientData,
    soap: SoapData,
    #[serde(default)]
    options: AgentOptions,
}

fn merge_options(config: &AppConfig, file: AgentOptions, overrides: Overrides) -> AgentOptions {
    let mut options = file;
    if overrides.language.is_some() {
        options.language = overrides.language;
    }
    if overrides.letter {
        options.include_letter_draft = Some(true);
    }
    if overrides.no_differential {
        options.include_differential = Some(false);
    }
    config.pipeline.apply_defaults(options)
}

pub async fn run(
    runtime: &Runtime,
    config: &AppConfig,
    input: &Path,
    overrides: Overrides,
) -> Result<()> {
    let raw = tokio::fs::read_to_string(input)
        .await
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let input: PipelineInput =
        serde_json::from_str(&raw).context("Input must contain `soap` and optional `patient`/`options`")?;
    let options = merge_options(config, input.options, overrides);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling pipeline");
            on_interrupt.cancel();
        }
    });

    let result = runtime
        .agent()
        .run_clinical_pipeline_with_cancel(&input.patient, &input.soap, &options, &cancel)
        .await;

    if result.halted {
        eprintln!(
            "HALTED: {}",
            result.halt_reason.as_deref().unwrap_or("unknown reason")
        );
    }
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
