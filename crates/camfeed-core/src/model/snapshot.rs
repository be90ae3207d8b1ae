// ── Snapshot frame ──

use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// One still image fetched by the snapshot fallback.
#[derive(Debug, Clone)]
pub struct SnapshotFrame {
    pub camera: String,
    pub bytes: Bytes,
    pub content_type: Option<String>,
    pub fetched_at: DateTime<Utc>,
    received: Instant,
}

impl SnapshotFrame {
    pub fn new(camera: impl Into<String>, bytes: Bytes, content_type: Option<String>) -> Self {
        Self {
            camera: camera.into(),
            bytes,
            content_type,
            fetched_at: Utc::now(),
            received: Instant::now(),
        }
    }

    /// Time since this frame was received.
    pub fn age(&self) -> Duration {
        self.received.elapsed()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
