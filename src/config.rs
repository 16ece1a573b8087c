use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use url::Url;

/// Default wait for the DOM-content-loaded readiness gate.
pub const DEFAULT_NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Resolved configuration for one batch of measurements.
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    /// Target address every iteration navigates to.
    pub launch_url: Url,
    /// Number of concurrent iterations in the batch.
    pub iterations: u32,
    /// Upper bound on the DOM-content-loaded wait per navigation.
    pub navigation_timeout: Duration,
    /// Directory under which `traces/`, `screenshots/` and the results log live.
    pub output_root: PathBuf,
    /// Browser launch overrides shared by every session.
    pub session: SessionOptions,
}

impl ProbeSettings {
    /// Build settings from raw inputs, validating the launch URL up front.
    pub fn new(launch_url: &str, iterations: u32, output_root: PathBuf) -> Result<Self> {
        let launch_url = Url::parse(launch_url)
            .with_context(|| format!("LAUNCH_URL is not a valid URL: {launch_url}"))?;
        Ok(Self {
            launch_url,
            iterations,
            navigation_timeout: DEFAULT_NAVIGATION_TIMEOUT,
            output_root,
            session: SessionOptions::default(),
        })
    }

    pub fn with_navigation_timeout(mut self, timeout: Duration) -> Self {
        self.navigation_timeout = timeout;
        self
    }

    pub fn with_session_options(mut self, session: SessionOptions) -> Self {
        self.session = session;
        self
    }
}

/// Launch overrides for a browser session. Headless mode is not an option
/// here: sessions always force the modern headless implementation.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Explicit Chromium executable; autodetected when unset.
    pub executable: Option<PathBuf>,
    /// Extra command-line arguments passed through to Chromium.
    pub extra_args: Vec<String>,
    /// Disable the Chromium sandbox (required in most containers).
    pub no_sandbox: bool,
    /// Viewport size as (width, height); browser default when unset.
    pub window_size: Option<(u32, u32)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_validate_launch_url() {
        let settings = ProbeSettings::new("https://example.org/", 5, PathBuf::from(".")).unwrap();
        assert_eq!(settings.launch_url.as_str(), "https://example.org/");
        assert_eq!(settings.iterations, 5);
        assert_eq!(settings.navigation_timeout, DEFAULT_NAVIGATION_TIMEOUT);
    }

    #[test]
    fn settings_reject_garbage_url() {
        let err = ProbeSettings::new("not a url", 1, PathBuf::from(".")).unwrap_err();
        assert!(err.to_string().contains("LAUNCH_URL"));
    }

    #[test]
    fn timeout_override_applies() {
        let settings = ProbeSettings::new("http://localhost:8080", 1, PathBuf::from("."))
            .unwrap()
            .with_navigation_timeout(Duration::from_secs(5));
        assert_eq!(settings.navigation_timeout, Duration::from_secs(5));
    }
}
