// ── Domain model ──
//
// Value types shared by the pipeline stages. Everything here is plain
// data: no I/O, no channels.

pub mod candidate;
pub mod clip;
pub mod probe;
pub mod snapshot;
pub mod state;

pub use candidate::StreamCandidate;
pub use clip::{CacheEntry, CacheEntryState, DownloadOrigin};
pub use probe::ProbeResult;
pub use snapshot::SnapshotFrame;
pub use state::{AcquisitionState, FeedStatus};
