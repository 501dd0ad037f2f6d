//! CLI command: `clinscribe status`

use crate::runtime::Runtime;
use anyhow::Result;
use clinscribe_llm::Provider;
use serde_json::json;

pub async fn run(runtime: &Runtime) -> Result<()> {
    let providers = runtime.providers.main.status().await;
    let report = json!({
        "mode": runtime.providers.mode.as_str(),
        "providers": providers,
        "hostedConfigured": runtime.hosted.is_configured(),
        "promptCache": runtime.hosted.prompt_cache().stats(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
