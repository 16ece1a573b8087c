use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::batch::OutputContext;
use crate::config::ProbeSettings;
use crate::error::{ProbeError, Result};
use crate::session::BrowserSession;
use crate::trace;

/// How one settled iteration concluded. `MetricMissing` is a clean finish:
/// the trace simply carried no `navigationStart` marker, so no line was
/// appended for this index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IterationOutcome {
    Measured { response_time_ms: f64 },
    MetricMissing,
}

/// Run one measurement end to end: open a fresh session, trace, navigate,
/// extract the metric, record it, and release the session.
///
/// Any fault after the session is open captures a diagnostic screenshot to
/// the iteration's canonical path before the error propagates. The session is
/// closed exactly once on every path, including when the screenshot itself
/// fails. Errors leave here wrapped with the iteration index; the original
/// message stays in the source chain.
pub async fn run_iteration(
    index: u32,
    settings: &ProbeSettings,
    outputs: &OutputContext,
) -> Result<IterationOutcome> {
    info!(index, "starting iteration");
    let mut session = BrowserSession::open(&settings.session)
        .await
        .map_err(|err| ProbeError::for_iteration(index, err))?;

    let outcome = drive(index, &mut session, settings, outputs).await;

    if let Err(err) = &outcome {
        let destination = outputs.screenshot_path(index);
        match session.screenshot(&destination).await {
            Ok(()) => {
                info!(index, path = %destination.display(), "captured failure screenshot");
            }
            Err(screenshot_err) => {
                warn!(
                    index,
                    error = %screenshot_err,
                    "failed to capture failure screenshot"
                );
            }
        }
        debug!(index, error = %err, "iteration faulted");
    }

    session.close().await;

    match outcome {
        Ok(outcome) => {
            info!(index, "finished iteration");
            Ok(outcome)
        }
        Err(err) => Err(ProbeError::for_iteration(index, err)),
    }
}

async fn drive(
    index: u32,
    session: &mut BrowserSession,
    settings: &ProbeSettings,
    outputs: &OutputContext,
) -> Result<IterationOutcome> {
    session.start_tracing(&outputs.trace_path(index)).await?;

    // Navigation wall-clock time is diagnostic only; the persisted metric
    // comes from the trace.
    let navigation_started = Instant::now();
    session
        .navigate(settings.launch_url.as_str(), settings.navigation_timeout)
        .await?;
    debug!(
        index,
        elapsed_ms = navigation_started.elapsed().as_millis() as u64,
        "navigation settled"
    );

    let trace = session.stop_tracing().await?;
    match trace::extract_response_time(&trace) {
        Some(response_time_ms) => {
            outputs.append_metric(index, response_time_ms).await?;
            Ok(IterationOutcome::Measured { response_time_ms })
        }
        None => {
            error!(index, "trace contains no navigationStart event; skipping metric");
            Ok(IterationOutcome::MetricMissing)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionOptions;
    use std::time::Duration;
    use tempfile::tempdir;

    #[tokio::test]
    async fn launch_failure_is_wrapped_with_the_index() {
        let temp = tempdir().unwrap();
        let outputs = OutputContext::new(temp.path());
        outputs.reset().await.unwrap();

        let settings = ProbeSettings::new("http://localhost:9/", 1, temp.path().to_path_buf())
            .unwrap()
            .with_session_options(SessionOptions {
                executable: Some(temp.path().join("no-such-chromium")),
                ..SessionOptions::default()
            });

        let err = run_iteration(4, &settings, &outputs).await.unwrap_err();
        assert!(matches!(err, ProbeError::Iteration { index: 4, .. }));

        // No session ever opened: no screenshot, no metric line.
        assert!(!outputs.screenshot_path(4).exists());
        let results = std::fs::read_to_string(outputs.results_path()).unwrap();
        assert_eq!(results, "");
    }

    // The two tests below need a local Chromium; run them with
    // `cargo test -- --ignored`.

    #[tokio::test]
    #[ignore]
    async fn navigation_failure_leaves_screenshot_and_wrapped_error() {
        let temp = tempdir().unwrap();
        let outputs = OutputContext::new(temp.path());
        outputs.reset().await.unwrap();

        // Port 9 (discard) refuses the connection immediately.
        let settings = ProbeSettings::new("http://127.0.0.1:9/", 1, temp.path().to_path_buf())
            .unwrap()
            .with_navigation_timeout(Duration::from_secs(10))
            .with_session_options(SessionOptions {
                no_sandbox: true,
                ..SessionOptions::default()
            });

        let err = run_iteration(0, &settings, &outputs).await.unwrap_err();
        assert!(matches!(err, ProbeError::Iteration { index: 0, .. }));
        assert!(outputs.screenshot_path(0).exists());
        let results = std::fs::read_to_string(outputs.results_path()).unwrap();
        assert_eq!(results, "");
    }

    #[tokio::test]
    #[ignore]
    async fn successful_iteration_records_one_metric_line() {
        let temp = tempdir().unwrap();
        let outputs = OutputContext::new(temp.path());
        outputs.reset().await.unwrap();

        let settings = ProbeSettings::new("data:text/html,probe", 1, temp.path().to_path_buf())
            .unwrap()
            .with_session_options(SessionOptions {
                no_sandbox: true,
                ..SessionOptions::default()
            });

        let outcome = run_iteration(0, &settings, &outputs).await.unwrap();
        assert!(matches!(outcome, IterationOutcome::Measured { .. }));
        assert!(outputs.trace_path(0).exists());
        assert!(!outputs.screenshot_path(0).exists());

        let results = std::fs::read_to_string(outputs.results_path()).unwrap();
        let lines: Vec<&str> = results.lines().collect();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("Iteration 0: "));
        assert!(lines[0].ends_with(" ms"));
    }
}
