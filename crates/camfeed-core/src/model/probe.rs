// ── Probe result ──

use serde::{Deserialize, Serialize};

use super::candidate::StreamCandidate;
use crate::error::ErrorKind;

/// Outcome of one reachability check. Produced once per probe, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub candidate: StreamCandidate,
    pub reachable: bool,
    pub http_status: Option<u16>,
    pub content_type: Option<String>,
    pub latency_ms: Option<f64>,
    pub error: Option<ErrorKind>,
    /// Human-readable failure detail for diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ProbeResult {
    pub fn reachable(candidate: StreamCandidate) -> Self {
        Self {
            candidate,
            reachable: true,
            http_status: None,
            content_type: None,
            latency_ms: None,
            error: None,
            detail: None,
        }
    }

    pub fn failed(candidate: StreamCandidate, kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            candidate,
            reachable: false,
            http_status: None,
            content_type: None,
            latency_ms: None,
            error: Some(kind),
            detail: Some(detail.into()),
        }
    }

    /// Reachable and bindable as a live feed.
    pub fn is_usable_stream(&self) -> bool {
        self.reachable && self.candidate.is_stream()
    }
}
