//! CLI command: `clinscribe budget`
//!
//! Spend against the daily and monthly caps, plus the latest ledger rows.

use crate::runtime::Runtime;
use anyhow::Result;
use clinscribe_llm::PeriodStatus;
use serde_json::json;

pub async fn run(runtime: &Runtime, recent: u32, json: bool) -> Result<()> {
    let status = runtime.budget.status().await;
    let records = runtime.budget.recent_usage(recent).await;

    if json {
        let report = json!({ "status": status, "recent": records });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!();
    println!("  AI Spend");
    println!("  {}", "-".repeat(60));
    print_period("Daily", &status.daily);
    print_period("Monthly", &status.monthly);
    println!("  {}", "-".repeat(60));

    if records.is_empty() {
        println!("  (no usage recorded yet)");
    } else {
        println!(
            "  {:<20} {:<10} {:<28} {:>10}",
            "Time", "Provider", "Model", "Cost"
        );
        for record in &records {
            println!(
                "  {:<20} {:<10} {:<28} {:>10}",
                record.created_at.format("%Y-%m-%d %H:%M:%S"),
                record.provider,
                record.model,
                format!("${:.4}", record.cost_usd)
            );
        }
    }
    println!();
    Ok(())
}

fn print_period(label: &str, period: &PeriodStatus) {
    let warn = if period.percent_used >= 80.0 { " !!" } else { "" };
    println!(
        "  {:<10} ${:>8.2} of ${:>8.2}  ({:>5.1}%){}",
        label, period.spent, period.budget, period.percent_used, warn
    );
}
