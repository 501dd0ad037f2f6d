//! CLI command: `clinscribe stream`

use crate::runtime::Runtime;
use anyhow::{bail, Result};
use clinscribe_llm::{Provider, StreamChunk};
use std::io::Write;
use tokio::sync::mpsc;

const CHANNEL_CAPACITY: usize = 64;

pub async fn run(runtime: &Runtime, model: Option<&str>, prompt: &str) -> Result<()> {
    let (tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);
    let provider = runtime.providers.main.clone();
    let model = model.map(str::to_string);
    let prompt = prompt.to_string();

    let producer = tokio::spawn(async move {
        provider.generate_stream(model.as_deref(), &prompt, tx).await;
    });

    let mut stdout = std::io::stdout();
    let mut failure = None;
    while let Some(chunk) = rx.recv().await {
        match chunk {
            StreamChunk::Text(text) => {
                write!(stdout, "{text}")?;
                stdout.flush()?;
            }
            StreamChunk::Done => break,
            StreamChunk::Error(message) => {
                failure = Some(message);
                break;
            }
        }
    }
    println!();
    producer.await?;

    if let Some(message) = failure {
        bail!("Stream failed: {message}");
    }
    Ok(())
}
