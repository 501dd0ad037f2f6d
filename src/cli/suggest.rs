//! CLI command: `clinscribe suggest`

use crate::runtime::Runtime;
use anyhow::Result;

pub async fn run(runtime: &Runtime, prompt: &str) -> Result<()> {
    let suggestion = runtime.agent().quick_suggestion(prompt).await;
    if suggestion.success {
        println!("{}", suggestion.suggestion);
    } else {
        eprintln!(
            "No suggestion: {}",
            suggestion.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}
