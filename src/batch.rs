use std::{io, path::PathBuf, sync::Arc};

use futures_util::future::join_all;
use tokio::{fs, io::AsyncWriteExt};
use tracing::{error, info};

use crate::config::ProbeSettings;
use crate::error::{ProbeError, Result};
use crate::iteration::{self, IterationOutcome};

const TRACES_DIR: &str = "traces";
const SCREENSHOTS_DIR: &str = "screenshots";
const RESULTS_FILE: &str = "response_times.txt";

/// Canonical output paths for one batch: the two artifact trees and the
/// append-only results log. Constructed once at batch start and passed by
/// reference into each iteration; there is no ambient global state.
#[derive(Debug, Clone)]
pub struct OutputContext {
    root: PathBuf,
}

impl OutputContext {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn traces_dir(&self) -> PathBuf {
        self.root.join(TRACES_DIR)
    }

    pub fn screenshots_dir(&self) -> PathBuf {
        self.root.join(SCREENSHOTS_DIR)
    }

    pub fn results_path(&self) -> PathBuf {
        self.root.join(RESULTS_FILE)
    }

    /// Serialized trace destination for one iteration.
    pub fn trace_path(&self, index: u32) -> PathBuf {
        self.traces_dir().join(format!("trace-{index}.json"))
    }

    /// Failure-artifact destination for one iteration.
    pub fn screenshot_path(&self, index: u32) -> PathBuf {
        self.screenshots_dir()
            .join(format!("iteration-{index}"))
            .join("screenshot.png")
    }

    /// Remove and recreate both artifact trees, then truncate the results log.
    /// Idempotent; must complete before any iteration starts.
    pub async fn reset(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        tokio::try_join!(
            clear_tree(self.traces_dir()),
            clear_tree(self.screenshots_dir())
        )?;
        fs::write(self.results_path(), b"").await?;
        Ok(())
    }

    /// Append one formatted metric line. A single write-to-end per call, so
    /// concurrent iterations need no locking around the log.
    pub async fn append_metric(&self, index: u32, response_time_ms: f64) -> Result<()> {
        let line = format!("Iteration {index}: {response_time_ms} ms\n");
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.results_path())
            .await?;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }
}

async fn clear_tree(dir: PathBuf) -> Result<()> {
    match fs::remove_dir_all(&dir).await {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }
    fs::create_dir_all(&dir).await?;
    Ok(())
}

/// Fans out independent iterations and reports once all of them have settled.
pub struct BatchCoordinator {
    settings: Arc<ProbeSettings>,
    outputs: OutputContext,
}

impl BatchCoordinator {
    pub fn new(settings: ProbeSettings) -> Self {
        let outputs = OutputContext::new(settings.output_root.clone());
        Self {
            settings: Arc::new(settings),
            outputs,
        }
    }

    pub fn outputs(&self) -> &OutputContext {
        &self.outputs
    }

    /// Reset output state, launch every iteration concurrently and wait for
    /// all of them. A failed iteration never cancels its siblings; once every
    /// task has settled the first failure (if any) is reported for the batch.
    pub async fn run(&self) -> Result<BatchReport> {
        self.outputs.reset().await?;

        let requested = self.settings.iterations;
        info!(
            iterations = requested,
            url = %self.settings.launch_url,
            "starting batch"
        );

        let mut handles = Vec::with_capacity(requested as usize);
        for index in 0..requested {
            let settings = Arc::clone(&self.settings);
            let outputs = self.outputs.clone();
            handles.push(tokio::spawn(async move {
                iteration::run_iteration(index, &settings, &outputs).await
            }));
        }

        let mut report = BatchReport {
            requested,
            measured: 0,
            missing: 0,
        };
        let mut first_error: Option<ProbeError> = None;
        for joined in join_all(handles).await {
            let outcome = joined.unwrap_or_else(|err| Err(ProbeError::Task(err.to_string())));
            match outcome {
                Ok(IterationOutcome::Measured { .. }) => report.measured += 1,
                Ok(IterationOutcome::MetricMissing) => report.missing += 1,
                Err(err) => {
                    error!(error = %err, "iteration failed");
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }
        info!(
            measured = report.measured,
            missing = report.missing,
            "all iterations completed"
        );
        Ok(report)
    }
}

/// Per-batch tally; successful iterations either measured a response time or
/// found no `navigationStart` marker in their trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub requested: u32,
    pub measured: u32,
    pub missing: u32,
}
