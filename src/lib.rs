pub mod batch;
pub mod config;
pub mod error;
pub mod iteration;
pub mod session;
pub mod trace;

pub use batch::{BatchCoordinator, BatchReport, OutputContext};
pub use config::{ProbeSettings, SessionOptions};
pub use error::{ProbeError, Result};
pub use iteration::IterationOutcome;
pub use session::BrowserSession;
pub use trace::{Trace, TraceEvent, extract_response_time};
