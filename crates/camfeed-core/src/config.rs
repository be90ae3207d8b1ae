// ── Runtime pipeline configuration ──
//
// These types describe *how* to reach a recording backend and how the
// pipeline behaves around it. They carry credentials and tuning but never
// touch disk. The CLI builds a `BackendConfig` (via camfeed-config) and
// hands it to `Controller`.

use std::path::PathBuf;
use std::time::Duration;

use camfeed_api::{Credentials, QualityTier, TlsMode, TransportKind};
use url::Url;

/// Connection and pipeline settings for one backend.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Backend base URL (e.g., `http://nvr.local:5000`).
    pub base_url: Url,
    /// Credentials forwarded as request headers.
    pub credentials: Credentials,
    /// TLS verification strategy.
    pub tls: TlsMode,
    /// TCP/TLS connect timeout.
    pub connect_timeout: Duration,
    pub feed: FeedConfig,
    pub cache: CacheConfig,
}

impl BackendConfig {
    /// Defaults for everything but the base URL.
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            credentials: Credentials::None,
            tls: TlsMode::System,
            connect_timeout: Duration::from_secs(5),
            feed: FeedConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

// ── Feed session tuning ──────────────────────────────────────────────

/// Per-feed acquisition settings.
#[derive(Debug, Clone, Default)]
pub struct FeedConfig {
    /// Quality tier used when a feed is opened without one.
    pub quality: QualityTier,
    pub candidates: CandidatePolicy,
    pub probe: ProbeConfig,
    pub retry: RetryPolicy,
    pub snapshot: SnapshotPolicy,
}

/// Which candidates the generator emits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidatePolicy {
    /// Stream transports to try, in priority order. `RawSnapshot` entries
    /// are ignored: the snapshot candidate is always appended last.
    pub transports: Vec<TransportKind>,
    /// Try the other quality tier after the preferred one.
    pub fallback_to_other_tier: bool,
}

impl Default for CandidatePolicy {
    fn default() -> Self {
        Self {
            transports: vec![TransportKind::Hls, TransportKind::Mjpeg],
            fallback_to_other_tier: true,
        }
    }
}

/// How a candidate list is probed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProbeMode {
    /// One at a time, stop at the first reachable stream.
    #[default]
    Sequential,
    /// Up to `limit` probes in flight; results are still consumed in
    /// priority order.
    Concurrent { limit: usize },
}

impl ProbeMode {
    pub(crate) fn fan_out(self) -> usize {
        match self {
            Self::Sequential => 1,
            Self::Concurrent { limit } => limit.max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeConfig {
    /// Deadline for each individual probe.
    pub timeout: Duration,
    pub mode: ProbeMode,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            mode: ProbeMode::Sequential,
        }
    }
}

/// Reconnection policy after a live feed fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Fixed delay before re-probing.
    pub backoff: Duration,
    /// Reconnect cycles allowed before giving up and degrading until a
    /// manual refresh.
    pub max_reconnect_attempts: u32,
    /// A live binding that stays healthy this long clears the failure count.
    pub stable_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(2),
            max_reconnect_attempts: 3,
            stable_after: Duration::from_secs(30),
        }
    }
}

/// Still-image fallback settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotPolicy {
    pub interval: Duration,
    /// Deadline for each still-image fetch.
    pub timeout: Duration,
    /// Declare the feed offline when no image arrives within this window.
    /// `None` keeps it degraded forever.
    pub offline_after: Option<Duration>,
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(5),
            offline_after: Some(Duration::from_secs(60)),
        }
    }
}

// ── Clip cache tuning ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of entries before the oldest ready clip is evicted.
    pub capacity: usize,
    /// Scratch directory owned by the cache. Purged on open and shutdown.
    pub scratch_dir: PathBuf,
    /// Deadline for response headers of a clip download.
    pub header_timeout: Duration,
    /// Deadline between two body chunks.
    pub stall_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 3,
            scratch_dir: std::env::temp_dir().join("camfeed-clips"),
            header_timeout: Duration::from_secs(10),
            stall_timeout: Duration::from_secs(30),
        }
    }
}
