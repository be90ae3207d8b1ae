// ── Controller facade ──
//
// Entry point for consumers. Owns the HTTP client, the clip cache and the
// pluggable probe/snapshot/playback seams, and hands out feed sessions
// that share a single cancellation tree.

use std::path::PathBuf;
use std::sync::Arc;

use camfeed_api::{Endpoints, MediaClient, QualityTier, TransportConfig};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::{ClipCache, ClipHandle, clip_key};
use crate::candidates::generate;
use crate::config::BackendConfig;
use crate::error::CoreError;
use crate::feed::{FeedHandle, FeedParts, spawn_feed};
use crate::model::{DownloadOrigin, ProbeResult, SnapshotFrame, StreamCandidate};
use crate::playback::{NullPlayer, PlaySource, PlaybackEvent, PlaybackSession, PlaybackSignal, Player};
use crate::poller::{HttpSnapshotSource, SnapshotSource};
use crate::probe::{HttpProber, ProbeEngine, Prober};

// ── Controller ───────────────────────────────────────────────────────

/// Cheaply cloneable handle to one recording backend.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    config: BackendConfig,
    client: MediaClient,
    cache: ClipCache,
    engine: ProbeEngine,
    snapshots: Arc<dyn SnapshotSource>,
    player: Arc<dyn Player>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("base_url", &self.inner.config.base_url.as_str())
            .field("cache", &self.inner.cache)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Controller`]. Every seam defaults to its HTTP or
/// headless implementation.
pub struct ControllerBuilder {
    config: BackendConfig,
    player: Option<Arc<dyn Player>>,
    prober: Option<Arc<dyn Prober>>,
    snapshots: Option<Arc<dyn SnapshotSource>>,
}

impl ControllerBuilder {
    /// Playback backend for live streams and clips. Defaults to [`NullPlayer`].
    pub fn player(mut self, player: Arc<dyn Player>) -> Self {
        self.player = Some(player);
        self
    }

    pub fn prober(mut self, prober: Arc<dyn Prober>) -> Self {
        self.prober = Some(prober);
        self
    }

    pub fn snapshot_source(mut self, source: Arc<dyn SnapshotSource>) -> Self {
        self.snapshots = Some(source);
        self
    }

    /// Build the HTTP client and open the clip cache.
    pub async fn build(self) -> Result<Controller, CoreError> {
        let config = self.config;
        let endpoints = Endpoints::new(config.base_url.clone())?;
        let transport = TransportConfig {
            tls: config.tls.clone(),
            connect_timeout: config.connect_timeout,
            credentials: config.credentials.clone(),
        };
        let client = MediaClient::new(endpoints, &transport)?;
        let cache = ClipCache::open(client.clone(), config.cache.clone()).await?;

        let prober = self
            .prober
            .unwrap_or_else(|| Arc::new(HttpProber::new(client.clone())));
        let snapshots = self
            .snapshots
            .unwrap_or_else(|| Arc::new(HttpSnapshotSource::new(client.clone())));
        let player = self.player.unwrap_or_else(|| Arc::new(NullPlayer));
        let engine = ProbeEngine::new(prober, config.feed.probe);

        info!(base_url = %config.base_url, "controller ready");
        Ok(Controller {
            inner: Arc::new(ControllerInner {
                config,
                client,
                cache,
                engine,
                snapshots,
                player,
                cancel: CancellationToken::new(),
            }),
        })
    }
}

impl Controller {
    /// Build a controller with the default HTTP seams and a headless player.
    pub async fn new(config: BackendConfig) -> Result<Self, CoreError> {
        Self::builder(config).build().await
    }

    pub fn builder(config: BackendConfig) -> ControllerBuilder {
        ControllerBuilder {
            config,
            player: None,
            prober: None,
            snapshots: None,
        }
    }

    pub fn config(&self) -> &BackendConfig {
        &self.inner.config
    }

    pub fn endpoints(&self) -> &Endpoints {
        self.inner.client.endpoints()
    }

    pub fn cache(&self) -> &ClipCache {
        &self.inner.cache
    }

    fn quality_or_default(&self, quality: Option<QualityTier>) -> QualityTier {
        quality.unwrap_or(self.inner.config.feed.quality)
    }

    fn ensure_open(&self) -> Result<(), CoreError> {
        if self.inner.cancel.is_cancelled() {
            Err(CoreError::Cancelled)
        } else {
            Ok(())
        }
    }

    // ── Live feeds ───────────────────────────────────────────────────

    /// Ordered candidate list for a camera.
    pub fn candidates(&self, camera: &str, quality: Option<QualityTier>) -> Vec<StreamCandidate> {
        generate(
            self.endpoints(),
            camera,
            self.quality_or_default(quality),
            &self.inner.config.feed.candidates,
        )
    }

    /// Probe candidates in priority order, stopping at the first usable
    /// stream.
    pub async fn probe(&self, camera: &str, quality: Option<QualityTier>) -> Vec<ProbeResult> {
        let candidates = self.candidates(camera, quality);
        self.inner.engine.run(&candidates).await
    }

    /// Probe every candidate, without short-circuiting.
    pub async fn probe_all(&self, camera: &str, quality: Option<QualityTier>) -> Vec<ProbeResult> {
        let candidates = self.candidates(camera, quality);
        self.inner.engine.probe_all(&candidates).await
    }

    /// Open a feed session. Acquisition starts immediately in the background.
    pub fn open_feed(
        &self,
        camera: &str,
        quality: Option<QualityTier>,
    ) -> Result<FeedHandle, CoreError> {
        self.ensure_open()?;
        if camera.trim().is_empty() {
            return Err(CoreError::Config {
                message: "camera id is empty".into(),
            });
        }

        let parts = FeedParts {
            camera: camera.to_owned(),
            quality: self.quality_or_default(quality),
            endpoints: self.endpoints().clone(),
            config: self.inner.config.feed.clone(),
            engine: self.inner.engine.clone(),
            snapshots: self.inner.snapshots.clone(),
            player: self.inner.player.clone(),
        };
        Ok(spawn_feed(parts, &self.inner.cancel))
    }

    /// One still image, outside any feed session.
    pub async fn fetch_snapshot(
        &self,
        camera: &str,
        quality: Option<QualityTier>,
    ) -> Result<SnapshotFrame, CoreError> {
        self.ensure_open()?;
        let timeout = self.inner.config.feed.snapshot.timeout;
        self.inner
            .snapshots
            .fetch(camera, self.quality_or_default(quality), timeout)
            .await
    }

    // ── Clips ────────────────────────────────────────────────────────

    /// Download (or reuse) the clip for an event and wait until it is on disk.
    pub async fn fetch_clip(&self, event_id: &str) -> Result<PathBuf, CoreError> {
        self.clip_handle(event_id, DownloadOrigin::OnDemand)
            .await?
            .ready()
            .await
    }

    /// Start a background download so a later fetch is instant.
    pub async fn preload_clip(&self, event_id: &str) -> Result<(), CoreError> {
        self.clip_handle(event_id, DownloadOrigin::Preload)
            .await
            .map(|_| ())
    }

    /// Start a clip playback session. The download starts now; call
    /// [`ClipSession::play`] to bind once it is on disk.
    pub async fn play_clip(&self, event_id: &str) -> Result<ClipSession, CoreError> {
        let handle = self.clip_handle(event_id, DownloadOrigin::OnDemand).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        Ok(ClipSession {
            key: handle.key().to_owned(),
            handle: Some(handle),
            cache: self.inner.cache.clone(),
            playback: PlaybackSession::new(self.inner.player.clone(), tx),
            signals: rx,
            path: None,
        })
    }

    async fn clip_handle(
        &self,
        event_id: &str,
        origin: DownloadOrigin,
    ) -> Result<ClipHandle, CoreError> {
        self.ensure_open()?;
        let key = clip_key(event_id)?;
        let url = self.endpoints().clip(&key);
        self.inner.cache.fetch(&key, &url, origin).await
    }

    /// Cancel every feed session and download, then purge the clip cache.
    pub async fn shutdown(&self) -> Result<(), CoreError> {
        debug!("controller shutting down");
        self.inner.cancel.cancel();
        self.inner.cache.shutdown().await
    }
}

// ── Clip playback ────────────────────────────────────────────────────

/// Playback of one cached event clip.
#[derive(Debug)]
pub struct ClipSession {
    key: String,
    handle: Option<ClipHandle>,
    cache: ClipCache,
    playback: PlaybackSession,
    signals: mpsc::UnboundedReceiver<PlaybackSignal>,
    path: Option<PathBuf>,
}

impl ClipSession {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Local file being played, once bound.
    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    /// Wait for the download, then bind the local file to the player.
    pub async fn play(&mut self) -> Result<PathBuf, CoreError> {
        if let Some(path) = &self.path {
            return Ok(path.clone());
        }
        let handle = self.handle.take().ok_or(CoreError::Cancelled)?;
        let path = handle.ready().await?;
        self.playback
            .bind(PlaySource::LocalFile(path.clone()), 1)
            .await?;
        self.path = Some(path.clone());
        Ok(path)
    }

    /// Wait for the player to report the end of playback.
    pub async fn finished(&mut self) -> PlaybackEvent {
        match self.signals.recv().await {
            Some(signal) => signal.event,
            None => PlaybackEvent::Ended,
        }
    }

    /// Release the player and cancel the download if it is still running
    /// and nobody else waits on it. Preloads of the same clip keep going.
    ///
    /// Dropping the session without closing also gives up its claim on
    /// the download, but does not wait for the download task to stop.
    pub async fn close(mut self) {
        self.playback.unbind().await;
        self.handle.take();
        if self.cache.cancel_on_demand(&self.key).await {
            debug!(key = %self.key, "cancelled clip download on close");
        }
    }
}
