//! Media acquisition pipeline between `camfeed-api` and consumers (CLI).
//!
//! This crate owns the acquisition logic for one recording backend:
//!
//! - **[`Controller`]**: central facade. Builds the HTTP client, opens the
//!   clip cache and vends feed sessions via
//!   [`open_feed()`](Controller::open_feed). Probe, snapshot and playback
//!   backends are pluggable through [`ControllerBuilder`].
//!
//! - **[`FeedHandle`]**: one live camera feed. A background task runs the
//!   [`StreamSelector`] state machine (probe, bind, reconnect, snapshot
//!   fallback) and publishes a [`FeedStatus`] through a `watch` channel.
//!
//! - **[`ProbeEngine`]**: reachability checks over an ordered list of
//!   [`StreamCandidate`]s, sequential or bounded-concurrent, stopping at the
//!   highest-priority usable stream.
//!
//! - **[`SnapshotPoller`]**: periodic still-image retrieval while a feed is
//!   degraded. The latest frame is readable lock-free.
//!
//! - **[`ClipCache`]**: bounded scratch-directory cache of event clips with
//!   download de-duplication, cancellation and oldest-first eviction.
//!
//! - **Domain model** ([`model`]): plain value types shared by the stages.

pub mod cache;
pub mod candidates;
pub mod config;
pub mod controller;
pub mod error;
pub mod feed;
pub mod model;
pub mod playback;
pub mod poller;
pub mod probe;
pub mod selector;

// ── Primary re-exports ──────────────────────────────────────────────
pub use cache::{ClipCache, ClipHandle};
pub use config::{
    BackendConfig, CacheConfig, CandidatePolicy, FeedConfig, ProbeConfig, ProbeMode, RetryPolicy,
    SnapshotPolicy,
};
pub use controller::{ClipSession, Controller, ControllerBuilder};
pub use error::{CoreError, ErrorKind};
pub use feed::FeedHandle;
pub use playback::{
    NullPlayer, PlaySource, PlaybackEvent, PlaybackSignal, Player, Playout, ProcessPlayer,
    SignalSink,
};
pub use poller::{HttpSnapshotSource, SnapshotPoller, SnapshotSource};
pub use probe::{HttpProber, ProbeEngine, Prober};
pub use selector::StreamSelector;

// Re-export model types at the crate root for ergonomics.
pub use model::{
    AcquisitionState, CacheEntry, CacheEntryState, DownloadOrigin, FeedStatus, ProbeResult,
    SnapshotFrame, StreamCandidate,
};

// Transport types consumers need to build a `BackendConfig`.
pub use camfeed_api::{AuthScheme, Credentials, HlsEncoding, QualityTier, TlsMode, TransportKind};
