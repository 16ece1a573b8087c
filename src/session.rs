use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use chromiumoxide::{
    Page,
    browser::{Browser, BrowserConfig, HeadlessMode},
    cdp::browser_protocol::{
        page::{
            CaptureScreenshotFormat, EnableParams, EventDomContentEventFired, NavigateParams,
        },
        tracing::{
            EndParams, EventDataCollected, EventTracingComplete, StartParams, StartTransferMode,
            TraceConfig,
        },
    },
    listeners::EventStream,
    page::ScreenshotParams,
};
use futures_util::{FutureExt, StreamExt};
use tokio::{fs, task::JoinHandle, time::sleep};
use tracing::{debug, warn};

use crate::config::SessionOptions;
use crate::error::{ProbeError, Result};
use crate::trace::Trace;

/// Trace categories matching the DevTools page-load defaults; `blink.user_timing`
/// carries the `navigationStart` marker the metric depends on.
const TRACE_CATEGORIES: &[&str] = &[
    "-*",
    "devtools.timeline",
    "v8.execute",
    "disabled-by-default-devtools.timeline",
    "disabled-by-default-devtools.timeline.frame",
    "toplevel",
    "blink.console",
    "blink.user_timing",
    "latencyInfo",
    "disabled-by-default-devtools.timeline.stack",
];

/// How long to wait for the freshly launched browser to register its first page.
const PAGE_DISCOVERY_ATTEMPTS: usize = 40;
const PAGE_DISCOVERY_INTERVAL: Duration = Duration::from_millis(50);

/// One isolated headless Chromium process and its single page.
///
/// A session belongs to exactly one iteration and is never shared. It must be
/// released with [`BrowserSession::close`], which is safe to call in a failed
/// state and consumes the session so it can only run once.
pub struct BrowserSession {
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
    capture: Option<TraceCapture>,
}

struct TraceCapture {
    destination: PathBuf,
    collected: EventStream<EventDataCollected>,
    complete: EventStream<EventTracingComplete>,
}

impl BrowserSession {
    /// Launch an isolated browser. Option overrides are honoured except for
    /// headless mode, which is always forced to the modern headless
    /// implementation.
    pub async fn open(options: &SessionOptions) -> Result<Self> {
        let config = build_browser_config(options)?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|err| ProbeError::Launch(err.to_string()))?;

        // The CDP event handler must be polled for the whole session lifetime.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = match wait_for_primary_page(&browser).await {
            Ok(page) => page,
            Err(err) => {
                let mut browser = browser;
                let _ = browser.close().await;
                let _ = browser.wait().await;
                handler_task.abort();
                return Err(err);
            }
        };

        Ok(Self {
            browser,
            page,
            handler_task,
            capture: None,
        })
    }

    /// The session's single default page. No additional pages are ever opened.
    pub fn primary_page(&self) -> &Page {
        &self.page
    }

    /// Begin capturing a performance trace destined for `destination`. The
    /// destination's parent directory is created concurrently with issuing the
    /// CDP start command.
    pub async fn start_tracing(&mut self, destination: &Path) -> Result<()> {
        if self.capture.is_some() {
            return Err(ProbeError::Tracing(
                "trace capture already in progress".into(),
            ));
        }

        // Subscribe before starting so no collected chunk can be missed.
        let collected = self
            .page
            .event_listener::<EventDataCollected>()
            .await
            .map_err(|err| ProbeError::Tracing(err.to_string()))?;
        let complete = self
            .page
            .event_listener::<EventTracingComplete>()
            .await
            .map_err(|err| ProbeError::Tracing(err.to_string()))?;

        let trace_config = TraceConfig {
            included_categories: Some(
                TRACE_CATEGORIES.iter().map(|s| (*s).to_string()).collect(),
            ),
            ..Default::default()
        };
        let params = StartParams::builder()
            .transfer_mode(StartTransferMode::ReportEvents)
            .trace_config(trace_config)
            .build();

        let ensure_dir = async {
            match destination.parent() {
                Some(parent) => fs::create_dir_all(parent).await,
                None => Ok(()),
            }
        };
        let (dir_made, started) = tokio::join!(ensure_dir, self.page.execute(params));
        dir_made?;
        started.map_err(|err| ProbeError::Tracing(err.to_string()))?;

        self.capture = Some(TraceCapture {
            destination: destination.to_path_buf(),
            collected,
            complete,
        });
        Ok(())
    }

    /// Navigate the page and suspend until the DOM-content-loaded readiness
    /// gate fires or `timeout` elapses.
    pub async fn navigate(&self, url: &str, timeout: Duration) -> Result<()> {
        let navigation_error = |message: String| ProbeError::Navigation {
            url: url.to_string(),
            message,
        };

        self.page
            .execute(EnableParams::default())
            .await
            .map_err(|err| navigation_error(err.to_string()))?;
        let mut dom_ready = self
            .page
            .event_listener::<EventDomContentEventFired>()
            .await
            .map_err(|err| navigation_error(err.to_string()))?;

        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(|message| navigation_error(message))?;
        let response = self
            .page
            .execute(params)
            .await
            .map_err(|err| navigation_error(err.to_string()))?;
        if let Some(error_text) = &response.error_text {
            return Err(navigation_error(error_text.clone()));
        }

        match tokio::time::timeout(timeout, dom_ready.next()).await {
            Ok(Some(_)) => Ok(()),
            Ok(None) => Err(navigation_error(
                "event stream closed before DOM content loaded".into(),
            )),
            Err(_) => Err(navigation_error(format!(
                "timed out after {}s waiting for DOM content loaded",
                timeout.as_secs()
            ))),
        }
    }

    /// End the capture, persist the serialized trace to its destination and
    /// return the deserialized [`Trace`].
    pub async fn stop_tracing(&mut self) -> Result<Trace> {
        let mut capture = self
            .capture
            .take()
            .ok_or_else(|| ProbeError::Tracing("tracing was never started".into()))?;

        self.page
            .execute(EndParams::default())
            .await
            .map_err(|err| ProbeError::Tracing(err.to_string()))?;

        let mut events: Vec<serde_json::Value> = Vec::new();
        loop {
            tokio::select! {
                Some(chunk) = capture.collected.next() => {
                    events.extend(chunk.value.iter().cloned());
                }
                Some(_) = capture.complete.next() => break,
                else => break,
            }
        }
        while let Some(Some(chunk)) = capture.collected.next().now_or_never() {
            events.extend(chunk.value.iter().cloned());
        }

        let payload = serde_json::to_vec(&serde_json::json!({ "traceEvents": events }))?;
        fs::write(&capture.destination, &payload).await?;
        debug!(
            path = %capture.destination.display(),
            events = events.len(),
            "persisted trace"
        );
        Trace::from_slice(&payload)
    }

    /// Capture the page's current rendered state as a PNG, creating parent
    /// directories as needed.
    pub async fn screenshot(&self, destination: &Path) -> Result<()> {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).await?;
        }
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .build();
        let data = self
            .page
            .screenshot(params)
            .await
            .map_err(|err| ProbeError::Screenshot(err.to_string()))?;
        fs::write(destination, &data).await?;
        Ok(())
    }

    /// Terminate the browser process and release all resources. Consuming
    /// `self` guarantees this runs at most once; failures while closing an
    /// already-broken session are logged and swallowed.
    pub async fn close(mut self) {
        if let Err(err) = self.browser.close().await {
            warn!(error = %err, "browser close reported an error");
        }
        let _ = self.browser.wait().await;
        self.handler_task.abort();
    }
}

fn build_browser_config(options: &SessionOptions) -> Result<BrowserConfig> {
    let mut builder = BrowserConfig::builder().headless_mode(HeadlessMode::New);
    if let Some(executable) = &options.executable {
        builder = builder.chrome_executable(executable);
    }
    if let Some((width, height)) = options.window_size {
        builder = builder.window_size(width, height);
    }
    if options.no_sandbox {
        builder = builder.no_sandbox();
    }
    builder = builder.args(options.extra_args.iter().map(String::as_str));
    builder.build().map_err(ProbeError::Launch)
}

async fn wait_for_primary_page(browser: &Browser) -> Result<Page> {
    for _ in 0..PAGE_DISCOVERY_ATTEMPTS {
        let pages = browser
            .pages()
            .await
            .map_err(|err| ProbeError::Launch(err.to_string()))?;
        if let Some(page) = pages.into_iter().next() {
            return Ok(page);
        }
        sleep(PAGE_DISCOVERY_INTERVAL).await;
    }
    Err(ProbeError::Launch(
        "browser exposed no initial page".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn browser_config_builds_with_pinned_executable() {
        let options = SessionOptions {
            executable: Some("/usr/bin/chromium".into()),
            ..SessionOptions::default()
        };
        assert!(build_browser_config(&options).is_ok());
    }

    #[test]
    fn browser_config_accepts_overrides() {
        let options = SessionOptions {
            executable: Some("/usr/bin/chromium".into()),
            extra_args: vec!["--disable-gpu".into()],
            no_sandbox: true,
            window_size: Some((1280, 800)),
        };
        assert!(build_browser_config(&options).is_ok());
    }
}
