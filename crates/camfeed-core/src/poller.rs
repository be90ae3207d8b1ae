// ── Snapshot fallback poller ──
//
// Periodic still-image retrieval for degraded feeds. The latest good frame
// is published through an `ArcSwapOption` the consumer reads lock-free;
// failures only show up as a growing frame age. Cancellation is checked
// before every fetch and raced against the fetch itself, so no request is
// issued once the owning session is torn down.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use camfeed_api::{MediaClient, QualityTier};
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::SnapshotPolicy;
use crate::error::CoreError;
use crate::model::SnapshotFrame;

/// Something that can fetch a still image for a camera.
pub trait SnapshotSource: Send + Sync + 'static {
    fn fetch<'a>(
        &'a self,
        camera: &'a str,
        tier: QualityTier,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<SnapshotFrame, CoreError>>;
}

/// Fetches `latest.jpg` from the backend.
#[derive(Debug, Clone)]
pub struct HttpSnapshotSource {
    client: MediaClient,
}

impl HttpSnapshotSource {
    pub fn new(client: MediaClient) -> Self {
        Self { client }
    }
}

impl SnapshotSource for HttpSnapshotSource {
    fn fetch<'a>(
        &'a self,
        camera: &'a str,
        tier: QualityTier,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<SnapshotFrame, CoreError>> {
        async move {
            let url = self.client.endpoints().snapshot(camera, tier);
            let image = self.client.fetch_image(&url, timeout).await?;
            Ok(SnapshotFrame::new(camera, image.bytes, image.content_type))
        }
        .boxed()
    }
}

// ── Poller task ──────────────────────────────────────────────────────

/// Floor for the poll interval; `tokio::time::interval` rejects zero.
const MIN_INTERVAL: Duration = Duration::from_millis(100);

/// Notifications from a running poller, tagged with its generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollerEvent {
    Updated {
        poller: u64,
        fetched_at: DateTime<Utc>,
    },
    /// The offline window passed without a single image.
    Stale { poller: u64 },
    /// First image after going stale.
    Recovered { poller: u64 },
}

/// What a poller polls.
#[derive(Debug, Clone)]
pub struct PollTarget {
    pub camera: String,
    pub tier: QualityTier,
    pub policy: SnapshotPolicy,
    pub generation: u64,
}

/// Handle to a running poller task.
#[derive(Debug)]
pub struct SnapshotPoller {
    generation: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl SnapshotPoller {
    /// Start polling. The first fetch is issued immediately.
    pub fn spawn(
        source: Arc<dyn SnapshotSource>,
        target: PollTarget,
        frame: Arc<ArcSwapOption<SnapshotFrame>>,
        events: mpsc::UnboundedSender<PollerEvent>,
        parent: &CancellationToken,
    ) -> Self {
        let cancel = parent.child_token();
        let generation = target.generation;
        let handle = tokio::spawn(poll_task(source, target, frame, events, cancel.clone()));
        Self {
            generation,
            cancel,
            handle,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Stop polling and wait for the task to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            if !e.is_cancelled() {
                warn!(error = %e, "snapshot poller task failed");
            }
        }
    }
}

async fn poll_task(
    source: Arc<dyn SnapshotSource>,
    target: PollTarget,
    frame: Arc<ArcSwapOption<SnapshotFrame>>,
    events: mpsc::UnboundedSender<PollerEvent>,
    cancel: CancellationToken,
) {
    let PollTarget {
        camera,
        tier,
        policy,
        generation,
    } = target;

    if policy.interval < MIN_INTERVAL {
        warn!(interval = ?policy.interval, "snapshot interval too short, using {MIN_INTERVAL:?}");
    }
    let mut interval = tokio::time::interval(policy.interval.max(MIN_INTERVAL));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let offline_at = policy.offline_after.map(|after| Instant::now() + after);
    let mut successes: u64 = 0;
    let mut stale = false;

    debug!(%camera, %tier, generation, "snapshot poller started");

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                let result = tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    result = source.fetch(&camera, tier, policy.timeout) => result,
                };

                match result {
                    Ok(image) => {
                        successes += 1;
                        let fetched_at = image.fetched_at;
                        frame.store(Some(Arc::new(image)));
                        let _ = events.send(PollerEvent::Updated { poller: generation, fetched_at });
                        if stale {
                            stale = false;
                            let _ = events.send(PollerEvent::Recovered { poller: generation });
                        }
                    }
                    Err(e) => {
                        debug!(%camera, error = %e, "snapshot poll failed");
                    }
                }

                if !stale && successes == 0 && offline_at.is_some_and(|at| Instant::now() >= at) {
                    stale = true;
                    let _ = events.send(PollerEvent::Stale { poller: generation });
                }
            }
        }
    }

    debug!(%camera, generation, successes, "snapshot poller stopped");
}
