use thiserror::Error;

/// Result type alias using the probe error type.
pub type Result<T> = std::result::Result<T, ProbeError>;

/// Errors produced while driving a measurement run.
#[derive(Error, Debug)]
pub enum ProbeError {
    /// The Chromium process could not be launched or exposed no usable page.
    #[error("browser launch failed: {0}")]
    Launch(String),

    /// Navigation timed out or the browser reported a network-level failure.
    #[error("navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    /// The tracing session is in an unexpected state (start/stop mismatch,
    /// CDP command failure).
    #[error("trace capture failed: {0}")]
    Tracing(String),

    /// The serialized trace payload could not be deserialized.
    #[error("malformed trace payload: {0}")]
    TraceParse(String),

    /// Screenshot capture failed while recording a failure artifact.
    #[error("screenshot capture failed: {0}")]
    Screenshot(String),

    /// An iteration failed; the original error stays in the source chain.
    #[error("iteration {index} failed: {source}")]
    Iteration {
        index: u32,
        #[source]
        source: Box<ProbeError>,
    },

    /// An iteration task aborted before settling (panic or runtime shutdown).
    #[error("iteration task did not settle: {0}")]
    Task(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProbeError {
    /// Wrap an error escaping an iteration boundary with its index.
    pub fn for_iteration(index: u32, source: ProbeError) -> Self {
        ProbeError::Iteration {
            index,
            source: Box::new(source),
        }
    }
}
