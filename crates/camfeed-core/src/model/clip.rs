// ── Clip cache entry ──

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

/// Lifecycle of a cached clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CacheEntryState {
    Downloading,
    Ready,
    /// Download failed; the entry has been dropped from the registry.
    Failed,
    /// Removed to respect capacity; the file is gone.
    Evicted,
}

/// Why a download was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DownloadOrigin {
    /// Requested for immediate playback. Cancelled with its playback session.
    OnDemand,
    /// Speculative warm-up. Survives playback teardown.
    Preload,
}

/// Public view of one cache slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub local_path: PathBuf,
    pub size_bytes: u64,
    pub downloaded_at: Option<DateTime<Utc>>,
    pub state: CacheEntryState,
    pub origin: DownloadOrigin,
}
