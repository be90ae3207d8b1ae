// ── Candidate generation ──
//
// Pure, total, deterministic: the same inputs always produce the same
// ordered list, and the list is never empty.

use camfeed_api::{Endpoints, HlsEncoding, QualityTier, TransportKind};

use crate::config::CandidatePolicy;
use crate::model::StreamCandidate;

/// Ordered transport candidates for `camera` at the preferred `quality`.
///
/// Order: every enabled stream transport at the preferred tier (HLS
/// expands to MPEG-TS then fMP4), the same for the other tier when the
/// policy allows it, then one still-image candidate for the preferred
/// tier as a last "is anything there" signal.
pub fn generate(
    endpoints: &Endpoints,
    camera: &str,
    quality: QualityTier,
    policy: &CandidatePolicy,
) -> Vec<StreamCandidate> {
    let camera = camera.trim();
    let mut out = Vec::new();

    if !camera.is_empty() {
        let mut tiers = vec![quality];
        if policy.fallback_to_other_tier {
            tiers.push(quality.other());
        }

        let mut transports: Vec<TransportKind> = Vec::with_capacity(policy.transports.len());
        for &kind in &policy.transports {
            if kind.is_stream() && !transports.contains(&kind) {
                transports.push(kind);
            }
        }

        for tier in tiers {
            for &kind in &transports {
                match kind {
                    TransportKind::Hls => {
                        for encoding in [HlsEncoding::MpegTs, HlsEncoding::Fmp4] {
                            out.push(StreamCandidate::hls(
                                endpoints.hls(camera, tier, encoding),
                                tier,
                                encoding,
                            ));
                        }
                    }
                    TransportKind::Mjpeg => out.push(StreamCandidate::new(
                        endpoints.mjpeg(camera, tier),
                        TransportKind::Mjpeg,
                        tier,
                    )),
                    TransportKind::RawSnapshot => {}
                }
            }
        }
    }

    out.push(StreamCandidate::new(
        endpoints.snapshot(camera, quality),
        TransportKind::RawSnapshot,
        quality,
    ));
    out
}
