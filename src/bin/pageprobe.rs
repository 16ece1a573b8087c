use std::{path::PathBuf, time::Duration};

use anyhow::Result;
use clap::{ArgAction, Parser};
use pageprobe::{BatchCoordinator, ProbeSettings, SessionOptions};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pageprobe", version, about = "Page-load latency harness", long_about = None)]
struct Args {
    /// Target URL each iteration navigates to.
    #[arg(long, env = "LAUNCH_URL")]
    url: String,

    /// Number of concurrent measurement iterations.
    #[arg(long, env = "NUMBER_OF_ITERATIONS", default_value_t = 1)]
    iterations: u32,

    /// Directory holding traces/, screenshots/ and response_times.txt.
    #[arg(long, default_value = ".")]
    output: PathBuf,

    /// Seconds to wait for the DOM-content-loaded readiness gate.
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Explicit Chromium executable to launch.
    #[arg(long)]
    chrome: Option<PathBuf>,

    /// Extra argument passed through to Chromium (repeatable).
    #[arg(long = "chrome-arg", allow_hyphen_values = true)]
    chrome_args: Vec<String>,

    /// Disable the Chromium sandbox (required in most containers).
    #[arg(long, action = ArgAction::SetTrue)]
    no_sandbox: bool,

    /// Increase logging verbosity.
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose {
        "pageprobe=debug"
    } else {
        "pageprobe=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let session = SessionOptions {
        executable: args.chrome,
        extra_args: args.chrome_args,
        no_sandbox: args.no_sandbox,
        window_size: None,
    };
    let settings = ProbeSettings::new(&args.url, args.iterations, args.output)?
        .with_navigation_timeout(Duration::from_secs(args.timeout_secs))
        .with_session_options(session);

    let coordinator = BatchCoordinator::new(settings);
    let report = coordinator.run().await?;

    info!(
        requested = report.requested,
        measured = report.measured,
        missing = report.missing,
        results = %coordinator.outputs().results_path().display(),
        "batch complete"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_defaults() {
        let args = Args::parse_from(["pageprobe", "--url", "https://example.org/"]);
        assert_eq!(args.url, "https://example.org/");
        assert_eq!(args.iterations, 1);
        assert_eq!(args.timeout_secs, 30);
        assert_eq!(args.output, PathBuf::from("."));
        assert!(!args.no_sandbox);
    }

    #[test]
    fn parses_overrides() {
        let args = Args::parse_from([
            "pageprobe",
            "--url",
            "http://localhost:8080/",
            "--iterations",
            "12",
            "--timeout-secs",
            "5",
            "--chrome-arg",
            "--disable-gpu",
            "--chrome-arg",
            "--mute-audio",
            "--no-sandbox",
        ]);
        assert_eq!(args.iterations, 12);
        assert_eq!(args.timeout_secs, 5);
        assert_eq!(args.chrome_args, vec!["--disable-gpu", "--mute-audio"]);
        assert!(args.no_sandbox);
    }
}
