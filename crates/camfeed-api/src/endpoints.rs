// Backend URL layout
//
// Frigate-style NVR paths relative to a base URL. The base may carry a path
// prefix (reverse-proxied installs); camera and event ids are pushed as
// percent-encoded path segments, never spliced into strings.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use url::Url;

use crate::error::Error;

/// Live transport family a URL serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(ascii_case_insensitive)]
pub enum TransportKind {
    #[strum(serialize = "hls")]
    #[serde(rename = "hls")]
    Hls,
    #[strum(serialize = "mjpeg")]
    #[serde(rename = "mjpeg")]
    Mjpeg,
    /// Single still image. Not playable; used as a reachability signal
    /// and by the snapshot fallback.
    #[strum(serialize = "snapshot")]
    #[serde(rename = "snapshot")]
    RawSnapshot,
}

impl TransportKind {
    /// Whether a player can bind this transport as a continuous feed.
    pub fn is_stream(self) -> bool {
        !matches!(self, Self::RawSnapshot)
    }
}

/// Stream quality tier. High is the camera's main stream, Low its substream.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    #[default]
    High,
    Low,
}

impl QualityTier {
    /// The opposite tier.
    pub fn other(self) -> Self {
        match self {
            Self::High => Self::Low,
            Self::Low => Self::High,
        }
    }
}

/// HLS segment container. Both are served from the same playlist endpoint;
/// some players only handle one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum HlsEncoding {
    MpegTs,
    Fmp4,
}

/// Still-image height requested for the Low tier.
const LOW_TIER_SNAPSHOT_HEIGHT: &str = "360";

/// URL builder for one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    base_url: Url,
}

impl Endpoints {
    /// Validate and wrap a backend base URL.
    ///
    /// Only `http`/`https` URLs that can carry a path are accepted; query
    /// and fragment are dropped.
    pub fn new(mut base_url: Url) -> Result<Self, Error> {
        if !matches!(base_url.scheme(), "http" | "https") || base_url.cannot_be_a_base() {
            return Err(Error::UnsupportedBaseUrl(base_url.to_string()));
        }
        base_url.set_query(None);
        base_url.set_fragment(None);
        Ok(Self { base_url })
    }

    /// Parse and validate a base URL string.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        Self::new(Url::parse(raw)?)
    }

    /// The backend base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Restream source name for a camera at a tier (`front` / `front_sub`).
    pub fn stream_name(camera: &str, tier: QualityTier) -> String {
        match tier {
            QualityTier::High => camera.to_owned(),
            QualityTier::Low => format!("{camera}_sub"),
        }
    }

    /// HLS playlist: `{base}/api/go2rtc/api/stream.m3u8?src={stream}[&mp4]`
    pub fn hls(&self, camera: &str, tier: QualityTier, encoding: HlsEncoding) -> Url {
        let mut url = self.join(&["api", "go2rtc", "api", "stream.m3u8"]);
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("src", &Self::stream_name(camera, tier));
            if encoding == HlsEncoding::Fmp4 {
                query.append_key_only("mp4");
            }
        }
        url
    }

    /// MJPEG multipart stream: `{base}/api/go2rtc/api/stream.mjpeg?src={stream}`
    pub fn mjpeg(&self, camera: &str, tier: QualityTier) -> Url {
        let mut url = self.join(&["api", "go2rtc", "api", "stream.mjpeg"]);
        url.query_pairs_mut()
            .append_pair("src", &Self::stream_name(camera, tier));
        url
    }

    /// Latest still image: `{base}/api/{camera}/latest.jpg[?h=360]`
    pub fn snapshot(&self, camera: &str, tier: QualityTier) -> Url {
        let mut url = self.join(&["api", camera, "latest.jpg"]);
        if tier == QualityTier::Low {
            url.query_pairs_mut()
                .append_pair("h", LOW_TIER_SNAPSHOT_HEIGHT);
        }
        url
    }

    /// Recorded clip for an event: `{base}/api/events/{event_id}/clip.mp4`
    pub fn clip(&self, event_id: &str) -> Url {
        self.join(&["api", "events", event_id, "clip.mp4"])
    }

    /// Append path segments to the base URL.
    fn join(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // `new` rejects cannot-be-a-base URLs, so segments are always available.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}
