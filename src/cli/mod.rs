//! CLI module for Clinscribe
//!
//! Commands:
//! - `run`: full clinical pipeline over a JSON input file
//! - `suggest`: inline suggestion, bypassing the pipeline
//! - `stream`: stream a completion to stdout
//! - `status`: backend health and prompt cache statistics
//! - `budget`: spend against the daily and monthly caps

use crate::runtime::{build_runtime, load_config};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod budget;
pub mod run;
pub mod status;
pub mod stream;
pub mod suggest;

/// Clinscribe clinical documentation assistant
#[derive(Parser, Debug)]
#[command(name = "clinscribe")]
#[command(about = "Safety-gated AI drafting for clinical notes")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the clinical pipeline on a JSON file
    Run {
        /// Input file with `patient`, `soap` and optional `options`
        #[arg(short, long)]
        input: PathBuf,
        /// Output language (no, en)
        #[arg(short, long)]
        language: Option<String>,
        /// Also draft a referral letter
        #[arg(long)]
        letter: bool,
        /// Skip the differential diagnosis
        #[arg(long)]
        no_differential: bool,
    },
    /// Ask for an inline suggestion
    Suggest {
        /// Text to complete
        prompt: String,
    },
    /// Stream a completion
    Stream {
        /// Prompt text
        prompt: String,
        /// Model override
        #[arg(short, long)]
        model: Option<String>,
    },
    /// Show backend status
    Status,
    /// Show spend against the caps
    Budget {
        /// Number of recent ledger rows to list
        #[arg(short, long, default_value_t = 10)]
        recent: u32,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Run the CLI command
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let Some(command) = cli.command else {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        cmd.print_help()?;
        println!();
        return Ok(());
    };

    let config = load_config()?;
    let runtime = build_runtime(&config).await?;

    let result = match command {
        Commands::Run {
            input,
            language,
            letter,
            no_differential,
        } => {
            let overrides = run::Overrides {
                language,
                letter,
                no_differential,
            };
            run::run(&runtime, &config, &input, overrides).await
        }
        Commands::Suggest { prompt } => suggest::run(&runtime, &prompt).await,
        Commands::Stream { prompt, model } => {
            stream::run(&runtime, model.as_deref(), &prompt).await
        }
        Commands::Status => status::run(&runtime).await,
        Commands::Budget { recent, json } => budget::run(&runtime, recent, json).await,
    };

    runtime.shutdown().await;
    result
}
