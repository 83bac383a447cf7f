//! Polling service
//!
//! Watches a fixed input location. Each poll either finds nothing (a normal
//! outcome), or runs one full pass and then moves the consumed input into
//! the processed directory with an atomic rename. A pass stopped by
//! shutdown leaves its input where it was so the next start picks it up.

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::batch::{BatchRunner, BatchStats};
use crate::dispatch::cancellable;
use crate::error::{Error, HintbatchError, Result};
use crate::output::timestamped_file_name;

/// Polling service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Directory watched for input
    pub input_dir: PathBuf,

    /// File name looked for inside `input_dir`
    pub input_file: String,

    /// Archive directory; `<input_dir>/processed` when unset
    pub processed_dir: Option<PathBuf>,

    /// Seconds between polls
    pub poll_interval_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("input"),
            input_file: String::from("input.csv"),
            processed_dir: None,
            poll_interval_secs: 60,
        }
    }
}

impl ServiceConfig {
    /// Path of the watched input file
    pub fn input_path(&self) -> PathBuf {
        self.input_dir.join(&self.input_file)
    }

    /// Archive directory
    pub fn processed_dir(&self) -> PathBuf {
        self.processed_dir
            .clone()
            .unwrap_or_else(|| self.input_dir.join("processed"))
    }

    /// Delay between polls
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Result of a single poll
#[derive(Debug)]
pub enum PollOutcome {
    /// No input file present
    NoInput,

    /// Pass finished and the input was archived
    Completed {
        stats: BatchStats,
        archived_to: PathBuf,
    },

    /// Pass stopped by shutdown; input left in place
    Interrupted { stats: BatchStats },
}

/// Long-running poll, process, archive loop
pub struct Service {
    runner: BatchRunner,
    config: ServiceConfig,
    output_dir: PathBuf,
    shutdown: Option<watch::Receiver<bool>>,
}

impl Service {
    /// Create a service writing results under `output_dir`
    pub fn new(runner: BatchRunner, config: ServiceConfig, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            config,
            output_dir: output_dir.into(),
            shutdown: None,
        }
    }

    /// Stop polling, and interrupt any running pass, when `shutdown` turns true
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.runner = self.runner.with_shutdown(shutdown.clone());
        self.shutdown = Some(shutdown);
        self
    }

    /// Batch runner, for usage statistics
    pub fn runner(&self) -> &BatchRunner {
        &self.runner
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Check for input once and process it if present
    pub async fn poll_once(&mut self) -> Result<PollOutcome> {
        let input = self.config.input_path();
        if !tokio::fs::try_exists(&input).await? {
            debug!(input = %input.display(), "No input file");
            return Ok(PollOutcome::NoInput);
        }

        let started_at = Local::now();
        let stats = self
            .runner
            .run_pass(&input, &self.output_dir, started_at)
            .await?;

        if stats.interrupted {
            info!(input = %input.display(), "Pass interrupted; input left in place");
            return Ok(PollOutcome::Interrupted { stats });
        }

        let processed_dir = self.config.processed_dir();
        tokio::fs::create_dir_all(&processed_dir).await?;

        let archived_to = processed_dir.join(timestamped_file_name("input", started_at));
        archive(&input, &archived_to).await?;
        info!(from = %input.display(), to = %archived_to.display(), "Archived input");

        Ok(PollOutcome::Completed { stats, archived_to })
    }

    /// Poll until shutdown
    ///
    /// A failing pass is logged and the loop keeps polling; only a
    /// configuration error stops the service.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            input = %self.config.input_path().display(),
            interval_secs = self.config.poll_interval_secs,
            "Service started"
        );

        while !self.shutdown_requested() {
            match self.poll_once().await {
                Ok(PollOutcome::NoInput) => {}
                Ok(PollOutcome::Completed { stats, archived_to }) => {
                    info!(
                        processed = stats.processed,
                        output = %stats.output.display(),
                        archived = %archived_to.display(),
                        "Pass completed"
                    );
                }
                Ok(PollOutcome::Interrupted { .. }) => break,
                Err(e) if e.is_config() => return Err(e),
                Err(e) => {
                    error!(
                        error = %e,
                        category = e.category().as_str(),
                        "Pass failed; will retry on next poll"
                    );
                }
            }

            let sleep = tokio::time::sleep(self.config.poll_interval());
            if cancellable(&mut self.shutdown, sleep).await.is_none() {
                break;
            }
        }

        info!("Service stopped");
        Ok(())
    }
}

async fn archive(from: &Path, to: &Path) -> Result<()> {
    if tokio::fs::try_exists(to).await? {
        return Err(Error::other(format!(
            "Archive target {} already exists",
            to.display()
        )));
    }

    tokio::fs::rename(from, to).await.map_err(|e| {
        warn!(from = %from.display(), to = %to.display(), error = %e, "Archive failed");
        Error::with_source(format!("Failed to archive {}", from.display()), e)
    })
}
