//! Standalone upstream probe.
//!
//! Dials the queue endpoint directly, sends a single prompt with no history,
//! and prints the reconciled reply as it streams. Useful for checking an
//! upstream deployment without going through the HTTP surface.

use std::io::Write;

use anyhow::Result;
use clap::Parser;

use qbridge::reconcile::DeltaReconciler;
use qbridge::upstream::{InferenceRequest, SessionUpdate, UpstreamConfig, UpstreamSession};

#[derive(Debug, Parser)]
#[command(author, version, about = "Probe a queue upstream with a single prompt.")]
struct Args {
    /// Websocket endpoint of the queue
    #[arg(long, value_name = "URL")]
    url: String,
    /// Model name to request
    #[arg(long, default_value = "gpt-4o")]
    model: String,
    /// The prompt to send
    prompt: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = UpstreamConfig {
        url: args.url,
        ..Default::default()
    };

    let session = UpstreamSession::connect(&config).await?;
    let mut updates = session.stream(InferenceRequest {
        model: args.model,
        query: args.prompt,
        history: Vec::new(),
    });

    let mut reconciler = DeltaReconciler::new();
    let mut stdout = std::io::stdout();
    while let Some(update) = updates.recv().await {
        match update {
            SessionUpdate::Snapshot { text, last } => {
                let delta = reconciler.push(&text);
                if !delta.is_empty() {
                    write!(stdout, "{delta}")?;
                    stdout.flush()?;
                }
                if last {
                    break;
                }
            }
            SessionUpdate::Failed(err) => {
                return Err(err.into());
            }
        }
    }

    writeln!(stdout)?;
    Ok(())
}
