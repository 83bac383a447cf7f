//! Batch orchestration: one pass over an input table
//!
//! ```text
//! ┌────────────┐     ┌──────────────┐     ┌──────────────────┐     ┌────────────┐
//! │ RowSource  │────▶│ RowProcessor │────▶│ RetryDispatcher  │     │ ResultSink │
//! │ (csv rows) │     │ (fields,     │◀────│ (pool + adapter) │     │ (append +  │
//! └────────────┘     │  prompt)     │─────────────────────────────▶│  sync)     │
//!                    └──────────────┘                              └────────────┘
//! ```
//!
//! Rows are processed strictly in order by a single worker; each record is
//! durable before the next row is read. Shutdown is honoured between rows
//! and inside dispatch waits.

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::Config;
use crate::credentials::{CredentialPool, CredentialUsage};
use crate::dispatch::{DispatchError, RetryDispatcher};
use crate::error::{Error, Result};
use crate::input::{InputConfig, RowSource};
use crate::llm::TextGenerator;
use crate::models::RecordStatus;
use crate::output::ResultSink;
use crate::processor::RowProcessor;
use crate::prompt::PromptTemplate;

/// Summary of one pass
#[derive(Debug, Clone, Default)]
pub struct BatchStats {
    /// Records written
    pub processed: usize,

    /// Rows answered by the service
    pub succeeded: usize,

    /// Rows in the skip set
    pub skipped: usize,

    /// Rows recorded as errors
    pub failed: usize,

    /// Pass stopped early by shutdown
    pub interrupted: bool,

    /// Output file of this pass
    pub output: PathBuf,

    /// Per-credential usage at the end of the pass (cumulative for the process)
    pub usage: Vec<CredentialUsage>,

    /// Wall time of the pass
    pub elapsed: Duration,
}

impl BatchStats {
    fn record(&mut self, status: RecordStatus) {
        self.processed += 1;
        match status {
            RecordStatus::Success => self.succeeded += 1,
            RecordStatus::Skipped => self.skipped += 1,
            RecordStatus::Error => self.failed += 1,
        }
    }

    /// Success rate over dispatched rows (0.0 - 1.0)
    pub fn success_rate(&self) -> f64 {
        let dispatched = self.succeeded + self.failed;
        if dispatched == 0 {
            return 1.0;
        }
        self.succeeded as f64 / dispatched as f64
    }
}

/// Drives passes over input tables; the credential pool persists across passes
pub struct BatchRunner {
    processor: RowProcessor,
    input: InputConfig,
    shutdown: Option<watch::Receiver<bool>>,
}

impl BatchRunner {
    /// Assemble a runner from configuration
    ///
    /// # Errors
    ///
    /// Returns `Error::Template` / `Error::Config` if the prompt template
    /// cannot be loaded.
    pub fn new(
        config: &Config,
        generator: Arc<dyn TextGenerator>,
        pool: CredentialPool,
    ) -> Result<Self> {
        let template = PromptTemplate::load(config.prompt.template_path.as_deref())?;
        let dispatcher = RetryDispatcher::new(generator, pool, config.dispatch.policy());
        Ok(Self::from_parts(
            RowProcessor::new(template, dispatcher),
            config.input.clone(),
        ))
    }

    /// Assemble a runner from an existing processor
    pub fn from_parts(processor: RowProcessor, input: InputConfig) -> Self {
        Self {
            processor,
            input,
            shutdown: None,
        }
    }

    /// Honour `shutdown` between rows and inside dispatch
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.processor = self.processor.with_shutdown(shutdown.clone());
        self.shutdown = Some(shutdown);
        self
    }

    /// Credential pool and usage counters
    pub fn pool(&self) -> &CredentialPool {
        self.processor.dispatcher().pool()
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Process `input` into `output_<timestamp>.csv` under `output_dir`
    ///
    /// The field mapping is resolved before the output file is created, so a
    /// configuration error leaves no empty output behind.
    pub async fn run_pass(
        &mut self,
        input: &Path,
        output_dir: &Path,
        started_at: DateTime<Local>,
    ) -> Result<BatchStats> {
        info!(input = %input.display(), "Processing file");

        let source = RowSource::open(input, &self.input)?;
        let mut sink = ResultSink::create_timestamped(output_dir, started_at)?;

        self.run_into(source, &mut sink).await
    }

    /// Process every row of `source` into `sink`
    pub async fn run_into(
        &mut self,
        source: RowSource,
        sink: &mut ResultSink,
    ) -> Result<BatchStats> {
        let started = Instant::now();
        let mapping = source.mapping();
        let mut stats = BatchStats {
            output: sink.path().to_path_buf(),
            ..Default::default()
        };

        for row in source {
            if self.shutdown_requested() {
                info!("Shutdown requested, stopping before next row");
                stats.interrupted = true;
                break;
            }

            let row = row?;
            let record = match self.processor.process(&mapping, &row).await {
                Ok(record) => record,
                Err(Error::Dispatch(DispatchError::Cancelled { attempts })) => {
                    warn!(row = row.number, attempts, "Row interrupted by shutdown; not recorded");
                    stats.interrupted = true;
                    break;
                }
                Err(e) => return Err(e),
            };

            sink.append(&record)?;
            stats.record(record.status);

            info!(
                row = record.row,
                status = ?record.status,
                attempts = record.attempts,
                key = record.api_key.as_deref().unwrap_or("-"),
                requests = record.total_requests.unwrap_or(0),
                "Row recorded"
            );
        }

        stats.usage = self.pool().usage();
        stats.elapsed = started.elapsed();

        info!(
            processed = stats.processed,
            succeeded = stats.succeeded,
            skipped = stats.skipped,
            failed = stats.failed,
            interrupted = stats.interrupted,
            output = %stats.output.display(),
            "Pass finished"
        );
        for usage in &stats.usage {
            info!(key = %usage.identity, requests = usage.requests, "API key usage");
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Credential;
    use crate::dispatch::DispatchConfig;
    use crate::llm::CallError;
    use crate::models::ResultRecord;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Answers every prompt except those containing `fail_on`, which fail fatally
    struct Echo {
        fail_on: &'static str,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TextGenerator for Echo {
        async fn generate(
            &self,
            _credential: &Credential,
            prompt: &str,
        ) -> std::result::Result<String, CallError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            if prompt.contains(self.fail_on) {
                Err(CallError::Fatal("HTTP 400: bad request".to_string()))
            } else {
                Ok(format!("hint for {prompt}"))
            }
        }
    }

    const TABLE: &str = "id,problem,code,answer\n\
                         1,first,c1,a1\n\
                         2,second,c2,a2\n\
                         3,broken,c3,a3\n\
                         4,fourth,c4,a4\n\
                         ,,,\n\
                         6,after blank,c6,a6\n";

    fn runner(generator: Arc<Echo>, input: InputConfig) -> BatchRunner {
        let pool = CredentialPool::new(vec![
            Credential::new("key-aaaa"),
            Credential::new("key-bbbb"),
        ])
        .unwrap();
        let dispatcher = RetryDispatcher::new(generator, pool, DispatchConfig::default().policy());
        let template = PromptTemplate::from_source("{{problem}}/{{code}}/{{answer}}").unwrap();
        BatchRunner::from_parts(RowProcessor::new(template, dispatcher), input)
    }

    fn echo() -> Arc<Echo> {
        Arc::new(Echo {
            fail_on: "broken",
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn read_records(path: &Path) -> Vec<ResultRecord> {
        csv::Reader::from_path(path)
            .unwrap()
            .deserialize()
            .collect::<std::result::Result<_, _>>()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_pass_records_every_row_in_order() {
        let dir = TempDir::new().unwrap();
        let generator = echo();
        let input = InputConfig {
            skip_rows: [3].into_iter().collect(),
            ..Default::default()
        };
        let mut runner = runner(generator.clone(), input.clone());

        let source = RowSource::from_reader(TABLE.as_bytes(), &input).unwrap();
        let mut sink = ResultSink::create(&dir.path().join("out.csv")).unwrap();
        let stats = runner.run_into(source, &mut sink).await.unwrap();

        assert_eq!(stats.processed, 4);
        assert_eq!(stats.succeeded, 2);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.failed, 1);
        assert!(!stats.interrupted);

        let records = read_records(&dir.path().join("out.csv"));
        let rows: Vec<usize> = records.iter().map(|r| r.row).collect();
        assert_eq!(rows, vec![2, 3, 4, 5]);

        let statuses: Vec<RecordStatus> = records.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![
                RecordStatus::Success,
                RecordStatus::Skipped,
                RecordStatus::Error,
                RecordStatus::Success
            ]
        );

        // Skipped row never reached the service; the fatal row was tried once
        let prompts = generator.prompts.lock().unwrap().clone();
        assert_eq!(prompts, vec!["first/c1/a1", "broken/c3/a3", "fourth/c4/a4"]);

        assert_eq!(records[3].api_key.as_deref(), Some("...aaaa"));
        assert_eq!(records[3].total_requests, Some(2));
        assert_eq!(stats.usage[0].requests, 2);
        assert_eq!(stats.usage[1].requests, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_undecodable_row_recorded_and_pass_continues() {
        let dir = TempDir::new().unwrap();
        let generator = echo();
        let input = InputConfig::default();
        let mut runner = runner(generator.clone(), input.clone());

        let mut table = b"id,problem,code,answer\n1,first,c1,a1\n2,".to_vec();
        table.extend_from_slice(&[0xff, 0xfe]);
        table.extend_from_slice(b",c2,a2\n3,third,c3,a3\n\n4,after empty line,c4,a4\n");

        let source = RowSource::from_bytes(table, &input).unwrap();
        let mut sink = ResultSink::create(&dir.path().join("out.csv")).unwrap();
        let stats = runner.run_into(source, &mut sink).await.unwrap();

        assert_eq!(stats.processed, 3);
        assert_eq!(stats.succeeded, 2);
        assert_eq!(stats.failed, 1);

        let records = read_records(&dir.path().join("out.csv"));
        assert_eq!(records.iter().map(|r| r.row).collect::<Vec<_>>(), vec![2, 3, 4]);
        assert_eq!(records[1].status, RecordStatus::Error);
        assert!(records[1].response.contains("invalid UTF-8"));

        let prompts = generator.prompts.lock().unwrap().clone();
        assert_eq!(prompts, vec!["first/c1/a1", "third/c3/a3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_before_first_row() {
        let dir = TempDir::new().unwrap();
        let generator = echo();
        let (_tx, rx) = watch::channel(true);
        let input = InputConfig::default();
        let mut runner = runner(generator.clone(), input.clone()).with_shutdown(rx);

        let source = RowSource::from_reader(TABLE.as_bytes(), &input).unwrap();
        let mut sink = ResultSink::create(&dir.path().join("out.csv")).unwrap();
        let stats = runner.run_into(source, &mut sink).await.unwrap();

        assert!(stats.interrupted);
        assert_eq!(stats.processed, 0);
        assert!(read_records(&dir.path().join("out.csv")).is_empty());
        assert!(generator.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_mapping_error_creates_no_output() {
        let dir = TempDir::new().unwrap();
        let input_path = dir.path().join("input.csv");
        std::fs::write(&input_path, "only,two\nx,y\n").unwrap();
        let output_dir = dir.path().join("output");

        let mut runner = runner(echo(), InputConfig::default());
        let err = runner
            .run_pass(&input_path, &output_dir, Local::now())
            .await
            .unwrap_err();

        assert!(err.is_config());
        assert!(!output_dir.exists());
    }

    #[test]
    fn test_success_rate() {
        let stats = BatchStats {
            succeeded: 3,
            failed: 1,
            skipped: 10,
            ..Default::default()
        };
        assert!((stats.success_rate() - 0.75).abs() < f64::EPSILON);
        assert!((BatchStats::default().success_rate() - 1.0).abs() < f64::EPSILON);
    }
}
