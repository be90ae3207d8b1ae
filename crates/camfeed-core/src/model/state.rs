// ── Acquisition state ──

use std::fmt;

use camfeed_api::QualityTier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use super::candidate::StreamCandidate;
use crate::error::ErrorKind;

/// Where a feed session stands. Owned by the stream selector; every other
/// component only observes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum AcquisitionState {
    Idle,
    Probing,
    Live(StreamCandidate),
    /// Waiting out the backoff after a playback failure.
    Reconnecting { attempt: u32 },
    /// No stream reachable; the snapshot fallback is running.
    Degraded(ErrorKind),
    /// Degraded, and the snapshot fallback never produced an image.
    Offline,
}

impl AcquisitionState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Probing => "probing",
            Self::Live(_) => "live",
            Self::Reconnecting { .. } => "reconnecting",
            Self::Degraded(_) => "degraded",
            Self::Offline => "offline",
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live(_))
    }

    /// States in which the snapshot fallback is the displayed source.
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Degraded(_) | Self::Offline)
    }

    /// States that wait for an outside event rather than a timer.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Live(_) | Self::Degraded(_) | Self::Offline)
    }
}

impl fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Live(candidate) => write!(f, "live ({})", candidate.label()),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            Self::Degraded(kind) => write!(f, "degraded ({kind})"),
            other => f.write_str(other.name()),
        }
    }
}

/// Observable view of one camera feed session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedStatus {
    pub session_id: Uuid,
    pub camera: String,
    pub base_url: Url,
    pub quality: QualityTier,
    pub state: AcquisitionState,
    pub active_candidate: Option<StreamCandidate>,
    pub consecutive_failures: u32,
    pub created_at: DateTime<Utc>,
    /// When the snapshot fallback last produced an image.
    pub snapshot_at: Option<DateTime<Utc>>,
}
