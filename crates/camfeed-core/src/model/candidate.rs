// ── Stream candidate ──

use std::fmt;

use camfeed_api::{HlsEncoding, QualityTier, TransportKind};
use serde::{Deserialize, Serialize};
use url::Url;

/// One concrete transport URL that might serve a camera's feed.
///
/// Immutable. Generated fresh for each acquisition attempt and never
/// carried across a camera or quality change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamCandidate {
    pub url: Url,
    pub transport: TransportKind,
    pub tier: QualityTier,
    /// Segment container, for HLS candidates only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<HlsEncoding>,
}

impl StreamCandidate {
    pub fn new(url: Url, transport: TransportKind, tier: QualityTier) -> Self {
        Self {
            url,
            transport,
            tier,
            encoding: None,
        }
    }

    pub fn hls(url: Url, tier: QualityTier, encoding: HlsEncoding) -> Self {
        Self {
            url,
            transport: TransportKind::Hls,
            tier,
            encoding: Some(encoding),
        }
    }

    /// Whether a player can bind this candidate as a live feed.
    pub fn is_stream(&self) -> bool {
        self.transport.is_stream()
    }

    /// Short label such as `hls-fmp4/low` or `mjpeg/high`.
    pub fn label(&self) -> String {
        match self.encoding {
            Some(encoding) => format!("{}-{encoding}/{}", self.transport, self.tier),
            None => format!("{}/{}", self.transport, self.tier),
        }
    }
}

impl fmt::Display for StreamCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.label(), self.url)
    }
}
