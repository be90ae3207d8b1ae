#![allow(clippy::unwrap_used)]
// Feed session tests with scripted probe, snapshot and playback backends.
// Time is paused, so backoff and polling intervals elapse instantly.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use url::Url;

use camfeed_core::{
    AcquisitionState, BackendConfig, Controller, CoreError, ErrorKind, FeedHandle, FeedStatus,
    PlaySource, Player, Playout, ProbeMode, ProbeResult, Prober, QualityTier, SignalSink,
    SnapshotFrame, SnapshotSource, StreamCandidate,
};

const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xD9];

// ── Scripted backends ───────────────────────────────────────────────

#[derive(Default)]
struct ScriptedProber {
    reachable: Mutex<HashSet<Url>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedProber {
    fn set_reachable(&self, urls: impl IntoIterator<Item = Url>) {
        *self.reachable.lock().unwrap() = urls.into_iter().collect();
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Prober for ScriptedProber {
    fn probe<'a>(
        &'a self,
        candidate: &'a StreamCandidate,
        _timeout: Duration,
    ) -> BoxFuture<'a, ProbeResult> {
        async move {
            self.calls.lock().unwrap().push(candidate.label());
            if self.reachable.lock().unwrap().contains(&candidate.url) {
                ProbeResult::reachable(candidate.clone())
            } else {
                ProbeResult::failed(candidate.clone(), ErrorKind::Unreachable, "connection refused")
            }
        }
        .boxed()
    }
}

#[derive(Default)]
struct CountingSnapshots {
    calls: Mutex<Vec<String>>,
}

impl CountingSnapshots {
    fn calls_for(&self, camera: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == camera)
            .count()
    }
}

impl SnapshotSource for CountingSnapshots {
    fn fetch<'a>(
        &'a self,
        camera: &'a str,
        _tier: QualityTier,
        _timeout: Duration,
    ) -> BoxFuture<'a, Result<SnapshotFrame, CoreError>> {
        async move {
            self.calls.lock().unwrap().push(camera.to_owned());
            Ok(SnapshotFrame::new(
                camera,
                Bytes::from_static(JPEG),
                Some("image/jpeg".into()),
            ))
        }
        .boxed()
    }
}

#[derive(Default)]
struct ScriptedPlayer {
    opened: AtomicUsize,
    live: Arc<AtomicUsize>,
    sink: Mutex<Option<SignalSink>>,
}

impl ScriptedPlayer {
    fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    fn fail_current(&self, reason: &str) {
        if let Some(sink) = self.sink.lock().unwrap().as_ref() {
            sink.failed(reason);
        }
    }
}

struct ScriptedPlayout {
    live: Arc<AtomicUsize>,
}

impl Playout for ScriptedPlayout {
    fn release(self: Box<Self>) -> BoxFuture<'static, ()> {
        self.live.fetch_sub(1, Ordering::SeqCst);
        async {}.boxed()
    }
}

impl Player for ScriptedPlayer {
    fn open<'a>(
        &'a self,
        _source: &'a PlaySource,
        signals: SignalSink,
    ) -> BoxFuture<'a, Result<Box<dyn Playout>, CoreError>> {
        async move {
            self.opened.fetch_add(1, Ordering::SeqCst);
            self.live.fetch_add(1, Ordering::SeqCst);
            *self.sink.lock().unwrap() = Some(signals);
            Ok(Box::new(ScriptedPlayout {
                live: self.live.clone(),
            }) as Box<dyn Playout>)
        }
        .boxed()
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

struct Harness {
    controller: Controller,
    prober: Arc<ScriptedProber>,
    snapshots: Arc<CountingSnapshots>,
    player: Arc<ScriptedPlayer>,
    _scratch: TempDir,
}

impl Harness {
    fn mjpeg(&self, camera: &str, tier: QualityTier) -> Url {
        self.controller.endpoints().mjpeg(camera, tier)
    }

    fn hls_ts(&self, camera: &str, tier: QualityTier) -> Url {
        self.controller
            .endpoints()
            .hls(camera, tier, camfeed_core::HlsEncoding::MpegTs)
    }
}

async fn setup() -> Harness {
    let scratch = tempfile::tempdir().unwrap();
    let mut config = BackendConfig::new(Url::parse("http://nvr.test:5000").unwrap());
    config.cache.scratch_dir = scratch.path().join("clips");
    config.feed.probe.mode = ProbeMode::Sequential;

    let prober = Arc::new(ScriptedProber::default());
    let snapshots = Arc::new(CountingSnapshots::default());
    let player = Arc::new(ScriptedPlayer::default());
    let controller = Controller::builder(config)
        .prober(prober.clone())
        .snapshot_source(snapshots.clone())
        .player(player.clone())
        .build()
        .await
        .unwrap();

    Harness {
        controller,
        prober,
        snapshots,
        player,
        _scratch: scratch,
    }
}

async fn wait_for(
    feed: &FeedHandle,
    what: &str,
    predicate: impl FnMut(&FeedStatus) -> bool,
) -> FeedStatus {
    let mut rx = feed.status();
    let status = tokio::time::timeout(Duration::from_secs(600), rx.wait_for(predicate))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
        .unwrap()
        .clone();
    status
}

// ── Acquisition ─────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_cascade_stops_at_first_reachable_stream() {
    let h = setup().await;
    h.prober
        .set_reachable([h.mjpeg("front", QualityTier::High), h.hls_ts("front", QualityTier::Low)]);

    let feed = h.controller.open_feed("front", Some(QualityTier::High)).unwrap();
    let status = wait_for(&feed, "live", |s| s.state.is_live()).await;

    assert_eq!(
        status.active_candidate.as_ref().map(StreamCandidate::label),
        Some("mjpeg/high".to_owned())
    );
    assert_eq!(
        h.prober.calls(),
        vec!["hls-mpegts/high", "hls-fmp4/high", "mjpeg/high"],
        "low-tier candidates must not be probed once a high-tier stream is live"
    );
    assert_eq!(h.player.live(), 1);

    feed.close().await.unwrap();
    assert_eq!(h.player.live(), 0, "close must release the player");
}

#[tokio::test(start_paused = true)]
async fn test_nothing_reachable_degrades_and_polls_snapshots() {
    let h = setup().await;

    let feed = h.controller.open_feed("front", None).unwrap();
    let status = wait_for(&feed, "degraded", |s| s.state.is_fallback()).await;
    assert_eq!(status.state, AcquisitionState::Degraded(ErrorKind::Unreachable));
    assert_eq!(status.active_candidate, None);
    assert_eq!(h.player.opened(), 0);

    wait_for(&feed, "first snapshot", |s| s.snapshot_at.is_some()).await;
    assert!(feed.latest_frame().is_some());
    let first = h.snapshots.calls_for("front");

    tokio::time::sleep(Duration::from_millis(10_100)).await;
    assert_eq!(
        h.snapshots.calls_for("front"),
        first + 2,
        "snapshot poller should fire every 5s"
    );

    feed.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_decode_failure_reconnects_to_same_candidate() {
    let h = setup().await;
    h.prober.set_reachable([h.hls_ts("front", QualityTier::High)]);

    let feed = h.controller.open_feed("front", None).unwrap();
    wait_for(&feed, "live", |s| s.state.is_live()).await;
    let probes_before = h.prober.calls().len();

    h.player.fail_current("decoder error");
    let status = wait_for(&feed, "reconnecting", |s| {
        matches!(s.state, AcquisitionState::Reconnecting { attempt: 1 })
    })
    .await;
    assert_eq!(status.consecutive_failures, 1);
    assert_eq!(h.player.live(), 0, "failed binding must be released");

    let status = wait_for(&feed, "live again", |s| s.state.is_live()).await;
    assert_eq!(
        status.active_candidate.as_ref().map(StreamCandidate::label),
        Some("hls-mpegts/high".to_owned())
    );
    assert_eq!(h.prober.calls().len(), probes_before + 1);
    assert_eq!(h.player.opened(), 2);
    assert_eq!(h.player.live(), 1);

    feed.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stable_playback_clears_failure_count() {
    let h = setup().await;
    h.prober.set_reachable([h.hls_ts("front", QualityTier::High)]);

    let feed = h.controller.open_feed("front", None).unwrap();
    wait_for(&feed, "live", |s| s.state.is_live()).await;
    h.player.fail_current("decoder error");
    wait_for(&feed, "live after failure", |s| {
        s.state.is_live() && s.consecutive_failures == 1
    })
    .await;

    wait_for(&feed, "failure count reset", |s| s.consecutive_failures == 0).await;
    assert!(feed.current().state.is_live());

    feed.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_limit_degrades_until_refresh() {
    let h = setup().await;
    h.prober.set_reachable([h.hls_ts("front", QualityTier::High)]);

    let feed = h.controller.open_feed("front", None).unwrap();
    wait_for(&feed, "live", |s| s.state.is_live()).await;

    for failures in 1..=3 {
        h.player.fail_current("decoder error");
        wait_for(&feed, "live after reconnect", |s| {
            s.state.is_live() && s.consecutive_failures == failures
        })
        .await;
    }

    h.player.fail_current("decoder error");
    let status = wait_for(&feed, "degraded", |s| s.state.is_fallback()).await;
    assert_eq!(status.state, AcquisitionState::Degraded(ErrorKind::DecodeFailure));
    assert_eq!(h.player.live(), 0);

    // Degraded is sticky: only an explicit refresh probes again.
    let probes = h.prober.calls().len();
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.prober.calls().len(), probes);

    feed.refresh().unwrap();
    let status = wait_for(&feed, "live after refresh", |s| s.state.is_live()).await;
    assert_eq!(status.consecutive_failures, 0);
    assert!(feed.latest_frame().is_some(), "frame kept until the next reset");

    feed.close().await.unwrap();
}

// ── Session changes ─────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_set_camera_tears_down_and_restarts() {
    let h = setup().await;
    h.prober.set_reachable([h.mjpeg("front", QualityTier::High)]);

    let feed = h.controller.open_feed("front", None).unwrap();
    wait_for(&feed, "live", |s| s.state.is_live()).await;

    feed.set_camera("back").unwrap();
    let status = wait_for(&feed, "degraded on new camera", |s| {
        s.camera == "back" && s.state.is_fallback()
    })
    .await;
    assert_eq!(status.active_candidate, None);
    assert_eq!(h.player.live(), 0, "old camera's stream must be released");

    wait_for(&feed, "snapshot for new camera", |s| s.snapshot_at.is_some()).await;
    assert!(h.snapshots.calls_for("back") >= 1);
    assert_eq!(h.snapshots.calls_for("front"), 0);

    feed.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_set_quality_switches_tier() {
    let h = setup().await;
    h.prober.set_reachable([
        h.mjpeg("front", QualityTier::High),
        h.mjpeg("front", QualityTier::Low),
    ]);

    let feed = h.controller.open_feed("front", Some(QualityTier::High)).unwrap();
    wait_for(&feed, "live high", |s| s.state.is_live()).await;

    feed.set_quality(QualityTier::Low).unwrap();
    let status = wait_for(&feed, "live low", |s| {
        s.quality == QualityTier::Low && s.state.is_live()
    })
    .await;
    assert_eq!(
        status.active_candidate.as_ref().map(StreamCandidate::label),
        Some("mjpeg/low".to_owned())
    );
    assert_eq!(h.player.live(), 1);

    feed.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_blank_camera_is_rejected() {
    let h = setup().await;
    let err = h.controller.open_feed("  ", None).unwrap_err();
    assert!(matches!(err, CoreError::Config { .. }), "got: {err:?}");
}

// ── Teardown ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_no_snapshot_polls_after_close() {
    let h = setup().await;

    let feed = h.controller.open_feed("front", None).unwrap();
    wait_for(&feed, "snapshot", |s| s.snapshot_at.is_some()).await;
    feed.close().await.unwrap();

    let polled = h.snapshots.calls_for("front");
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.snapshots.calls_for("front"), polled);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_handle_releases_player() {
    let h = setup().await;
    h.prober.set_reachable([h.mjpeg("front", QualityTier::High)]);

    let feed = h.controller.open_feed("front", None).unwrap();
    wait_for(&feed, "live", |s| s.state.is_live()).await;
    drop(feed);

    for _ in 0..100 {
        if h.player.live() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.player.live(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_controller_shutdown_stops_feeds() {
    let h = setup().await;
    h.prober.set_reachable([h.mjpeg("front", QualityTier::High)]);

    let feed = h.controller.open_feed("front", None).unwrap();
    wait_for(&feed, "live", |s| s.state.is_live()).await;

    h.controller.shutdown().await.unwrap();
    feed.close().await.unwrap();
    assert_eq!(h.player.live(), 0);

    let err = h.controller.open_feed("front", None).unwrap_err();
    assert!(matches!(err, CoreError::Cancelled), "got: {err:?}");
}
