use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{ProbeError, Result};

/// Marker event denoting the instant a navigation was initiated.
pub const NAVIGATION_START: &str = "navigationStart";

/// One performance trace captured across a single navigation.
///
/// Events are kept in capture order; the stream's natural order is
/// authoritative even when timestamps disagree with it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trace {
    pub trace_events: Vec<TraceEvent>,
}

/// A single named trace event. Timestamps are microseconds. Fields beyond
/// `name` and `ts` ride along opaquely and play no part in the metric.
#[derive(Debug, Clone, Deserialize)]
pub struct TraceEvent {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub ts: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Trace {
    /// Deserialize a trace from its serialized byte form.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|err| ProbeError::TraceParse(err.to_string()))
    }
}

/// Derive the response-time metric from a trace: milliseconds elapsed between
/// the first `navigationStart` event and the last event in capture order.
///
/// Returns `None` when the trace carries no `navigationStart` marker; callers
/// log and skip that iteration's metric. A negative result is a valid (if
/// unusual) measurement and is not guarded against.
pub fn extract_response_time(trace: &Trace) -> Option<f64> {
    let navigation_start = trace
        .trace_events
        .iter()
        .find(|event| event.name == NAVIGATION_START)?;
    let last = trace.trace_events.last()?;
    Some((last.ts - navigation_start.ts) / 1000.0)
}
