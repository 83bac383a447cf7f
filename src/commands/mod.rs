pub mod check;
pub mod run;
pub mod watch;

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::watch as signal_watch;

use hintbatch::batch::{BatchRunner, BatchStats};
use hintbatch::config::Config;
use hintbatch::credentials::CredentialPool;
use hintbatch::llm::GeminiClient;

// Re-export command functions for convenience
pub use check::check;
pub use run::run;
pub use watch::watch;

/// Build a batch runner backed by the Gemini client and the keys in the environment
pub(crate) fn build_runner(
    config: &Config,
    shutdown: signal_watch::Receiver<bool>,
) -> Result<BatchRunner> {
    let pool = CredentialPool::from_env(config.credentials.max_numbered_keys)
        .context("No API keys configured (set API_KEY_1.. or GEMINI_API_KEY)")?;
    let client = GeminiClient::new(config.gemini.clone()).context("Failed to create Gemini client")?;

    let runner = BatchRunner::new(config, Arc::new(client), pool)
        .context("Failed to prepare batch runner")?
        .with_shutdown(shutdown);
    Ok(runner)
}

/// Flip a watch flag on Ctrl-C or SIGTERM
pub(crate) fn shutdown_signal() -> signal_watch::Receiver<bool> {
    let (tx, rx) = signal_watch::channel(false);

    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("Shutdown signal received");
        println!("\nShutdown signal received, finishing current row...");
        let _ = tx.send(true);
    });

    rx
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let ctrl_c = tokio::signal::ctrl_c();
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                result = ctrl_c => {
                    if let Err(e) = result {
                        tracing::error!("Failed to listen for shutdown signal: {e}");
                    }
                }
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!("Failed to install SIGTERM handler: {e}");
            if let Err(e) = ctrl_c.await {
                tracing::error!("Failed to listen for shutdown signal: {e}");
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
    }
}

/// Print the end-of-pass summary
pub(crate) fn print_summary(stats: &BatchStats) {
    println!("\nBatch Summary");
    println!("=============");
    println!("Rows recorded: {}", stats.processed);
    println!("  Success: {}", stats.succeeded);
    println!("  Skipped: {}", stats.skipped);
    println!("  Error:   {}", stats.failed);
    println!("Success rate: {:.1}%", stats.success_rate() * 100.0);
    println!("Elapsed: {:.1}s", stats.elapsed.as_secs_f64());
    println!("Output file: {}", stats.output.display());
    if stats.interrupted {
        println!("Stopped early by shutdown signal");
    }

    println!("\nAPI Key Usage");
    println!("-------------");
    for usage in &stats.usage {
        println!("{}: {} requests", usage.identity, usage.requests);
    }
}
