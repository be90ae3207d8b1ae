// ── Feed session ──
//
// One task per open camera feed. The driver owns the stream selector and
// every resource the selector's directives refer to: the probe task, the
// playback session, the snapshot poller and the retry/stability timers.
// Consumers hold a `FeedHandle` and observe a `FeedStatus` watch channel.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use camfeed_api::{Endpoints, QualityTier};
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::candidates::generate;
use crate::config::FeedConfig;
use crate::error::{CoreError, ErrorKind};
use crate::model::{AcquisitionState, FeedStatus, ProbeResult, SnapshotFrame};
use crate::playback::{PlaySource, PlaybackEvent, PlaybackSession, PlaybackSignal, Player};
use crate::poller::{PollTarget, PollerEvent, SnapshotPoller, SnapshotSource};
use crate::probe::ProbeEngine;
use crate::selector::{Directive, SelectorInput, StreamSelector};

// ── Handle ───────────────────────────────────────────────────────────

#[derive(Debug)]
enum FeedCommand {
    Refresh,
    SetQuality(QualityTier),
    SetCamera(String),
}

/// Consumer side of a feed session.
///
/// Dropping the handle cancels the session; [`close`](Self::close) also
/// waits for every resource to be released.
#[derive(Debug)]
pub struct FeedHandle {
    session_id: Uuid,
    status: watch::Receiver<FeedStatus>,
    frame: Arc<ArcSwapOption<SnapshotFrame>>,
    commands: mpsc::UnboundedSender<FeedCommand>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl FeedHandle {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Watch receiver for the session status.
    pub fn status(&self) -> watch::Receiver<FeedStatus> {
        self.status.clone()
    }

    /// Status updates as a `Stream`, starting with the current value.
    pub fn status_stream(&self) -> WatchStream<FeedStatus> {
        WatchStream::new(self.status.clone())
    }

    /// Current status snapshot.
    pub fn current(&self) -> FeedStatus {
        self.status.borrow().clone()
    }

    /// Latest snapshot-fallback image, if any.
    pub fn latest_frame(&self) -> Option<Arc<SnapshotFrame>> {
        self.frame.load_full()
    }

    /// Age of the latest snapshot-fallback image.
    pub fn snapshot_age(&self) -> Option<Duration> {
        self.frame.load().as_ref().map(|frame| frame.age())
    }

    /// Re-probe from scratch. The only way out of `Degraded`.
    pub fn refresh(&self) -> Result<(), CoreError> {
        self.send(FeedCommand::Refresh)
    }

    /// Switch quality tier. Tears down the current attempt first.
    pub fn set_quality(&self, quality: QualityTier) -> Result<(), CoreError> {
        self.send(FeedCommand::SetQuality(quality))
    }

    /// Switch camera. Tears down the current attempt first.
    pub fn set_camera(&self, camera: impl Into<String>) -> Result<(), CoreError> {
        let camera = camera.into();
        if camera.trim().is_empty() {
            return Err(CoreError::Config {
                message: "camera id is empty".into(),
            });
        }
        self.send(FeedCommand::SetCamera(camera))
    }

    /// Cancel the session and wait until every resource is released.
    pub async fn close(mut self) -> Result<(), CoreError> {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| CoreError::Internal(format!("feed task failed: {e}")))?;
        }
        Ok(())
    }

    fn send(&self, command: FeedCommand) -> Result<(), CoreError> {
        if self.cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        self.commands
            .send(command)
            .map_err(|_| CoreError::Cancelled)
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── Spawning ─────────────────────────────────────────────────────────

/// Everything a feed session needs from its controller.
pub(crate) struct FeedParts {
    pub camera: String,
    pub quality: QualityTier,
    pub endpoints: Endpoints,
    pub config: FeedConfig,
    pub engine: ProbeEngine,
    pub snapshots: Arc<dyn SnapshotSource>,
    pub player: Arc<dyn Player>,
}

pub(crate) fn spawn_feed(parts: FeedParts, parent: &CancellationToken) -> FeedHandle {
    let session_id = Uuid::new_v4();
    let cancel = parent.child_token();
    let created_at = Utc::now();
    let base_url = parts.endpoints.base_url().clone();

    let candidates = generate(
        &parts.endpoints,
        &parts.camera,
        parts.quality,
        &parts.config.candidates,
    );
    let selector = StreamSelector::new(candidates, parts.config.retry);

    let (status_tx, status_rx) = watch::channel(FeedStatus {
        session_id,
        camera: parts.camera.clone(),
        base_url: base_url.clone(),
        quality: parts.quality,
        state: AcquisitionState::Idle,
        active_candidate: None,
        consecutive_failures: 0,
        created_at,
        snapshot_at: None,
    });
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (signal_tx, signal_rx) = mpsc::unbounded_channel();
    let (poller_tx, poller_rx) = mpsc::unbounded_channel();
    let frame = Arc::new(ArcSwapOption::empty());

    let driver = FeedDriver {
        session_id,
        camera: parts.camera,
        quality: parts.quality,
        endpoints: parts.endpoints,
        base_url,
        created_at,
        config: parts.config,
        engine: parts.engine,
        snapshots: parts.snapshots,
        selector,
        playback: PlaybackSession::new(parts.player, signal_tx),
        frame: frame.clone(),
        status: status_tx,
        snapshot_at: None,
        cancel: cancel.clone(),
        probe: None,
        poller: None,
        poller_tx,
        retry_at: None,
        stable_at: None,
    };
    let task = tokio::spawn(driver.run(command_rx, signal_rx, poller_rx));

    FeedHandle {
        session_id,
        status: status_rx,
        frame,
        commands: command_tx,
        cancel,
        task: Some(task),
    }
}

// ── Driver ───────────────────────────────────────────────────────────

struct ProbeReport {
    attempt: u64,
    results: Vec<ProbeResult>,
}

struct FeedDriver {
    session_id: Uuid,
    camera: String,
    quality: QualityTier,
    endpoints: Endpoints,
    base_url: Url,
    created_at: DateTime<Utc>,
    config: FeedConfig,
    engine: ProbeEngine,
    snapshots: Arc<dyn SnapshotSource>,
    selector: StreamSelector,
    playback: PlaybackSession,
    frame: Arc<ArcSwapOption<SnapshotFrame>>,
    status: watch::Sender<FeedStatus>,
    snapshot_at: Option<DateTime<Utc>>,
    cancel: CancellationToken,
    probe: Option<JoinHandle<ProbeReport>>,
    poller: Option<SnapshotPoller>,
    poller_tx: mpsc::UnboundedSender<PollerEvent>,
    retry_at: Option<Instant>,
    /// Binding generation and the instant it counts as stable.
    stable_at: Option<(u64, Instant)>,
}

impl FeedDriver {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<FeedCommand>,
        mut signals: mpsc::UnboundedReceiver<PlaybackSignal>,
        mut poller_events: mpsc::UnboundedReceiver<PollerEvent>,
    ) {
        info!(
            session = %self.session_id,
            camera = %self.camera,
            quality = %self.quality,
            "feed session opened"
        );
        self.dispatch(SelectorInput::Start).await;

        loop {
            let stable_deadline = self.stable_at.map(|(_, at)| at);
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => break,
                },
                report = join_probe(&mut self.probe) => {
                    self.probe = None;
                    self.on_probe_report(report).await;
                }
                () = sleep_until(self.retry_at) => {
                    self.retry_at = None;
                    self.dispatch(SelectorInput::BackoffElapsed).await;
                }
                () = sleep_until(stable_deadline) => {
                    if let Some((binding, _)) = self.stable_at.take() {
                        self.dispatch(SelectorInput::PlaybackStable { binding }).await;
                    }
                }
                Some(signal) = signals.recv() => self.on_signal(signal).await,
                Some(event) = poller_events.recv() => self.on_poller_event(event).await,
            }
        }

        self.shutdown().await;
    }

    // ── Inputs ───────────────────────────────────────────────────────

    async fn on_command(&mut self, command: FeedCommand) {
        debug!(session = %self.session_id, ?command, "feed command");
        match command {
            FeedCommand::Refresh => self.dispatch(SelectorInput::Refresh).await,
            FeedCommand::SetQuality(quality) => {
                if quality != self.quality {
                    self.quality = quality;
                    self.reset().await;
                }
            }
            FeedCommand::SetCamera(camera) => {
                if camera != self.camera {
                    self.camera = camera;
                    self.reset().await;
                }
            }
        }
    }

    async fn on_probe_report(&mut self, report: Result<ProbeReport, JoinError>) {
        let (attempt, results) = match report {
            Ok(report) => (report.attempt, report.results),
            Err(e) => {
                warn!(session = %self.session_id, error = %e, "probe task failed");
                (self.selector.attempt(), Vec::new())
            }
        };
        self.dispatch(SelectorInput::ProbeCompleted { attempt, results })
            .await;
    }

    async fn on_signal(&mut self, signal: PlaybackSignal) {
        match &signal.event {
            PlaybackEvent::Failed(reason) => {
                warn!(session = %self.session_id, generation = signal.generation, %reason, "playback failed");
            }
            PlaybackEvent::Ended => {
                info!(session = %self.session_id, generation = signal.generation, "live stream ended");
            }
        }
        self.dispatch(SelectorInput::PlaybackFailed {
            binding: signal.generation,
            kind: ErrorKind::DecodeFailure,
        })
        .await;
    }

    async fn on_poller_event(&mut self, event: PollerEvent) {
        match event {
            PollerEvent::Updated { poller, fetched_at } => {
                if self.poller.as_ref().is_some_and(|p| p.generation() == poller) {
                    self.snapshot_at = Some(fetched_at);
                    self.publish();
                }
            }
            PollerEvent::Stale { poller } => {
                self.dispatch(SelectorInput::SnapshotStale { poller }).await;
            }
            PollerEvent::Recovered { poller } => {
                self.dispatch(SelectorInput::SnapshotRecovered { poller })
                    .await;
            }
        }
    }

    /// Camera or quality changed: tear down, then start over.
    async fn reset(&mut self) {
        let candidates = generate(
            &self.endpoints,
            &self.camera,
            self.quality,
            &self.config.candidates,
        );
        self.dispatch(SelectorInput::Reset { candidates }).await;
        self.frame.store(None);
        self.snapshot_at = None;
        self.publish();
        self.dispatch(SelectorInput::Start).await;
    }

    // ── Directive execution ──────────────────────────────────────────

    async fn dispatch(&mut self, input: SelectorInput) {
        let mut queue = VecDeque::from([input]);
        while let Some(input) = queue.pop_front() {
            let before = self.selector.state().clone();
            for directive in self.selector.apply(input) {
                if let Some(follow_up) = self.execute(directive).await {
                    queue.push_back(follow_up);
                }
            }
            let after = self.selector.state();
            if *after != before {
                info!(
                    session = %self.session_id,
                    camera = %self.camera,
                    from = %before,
                    to = %after,
                    "feed state changed"
                );
            }
            self.publish();
        }
    }

    async fn execute(&mut self, directive: Directive) -> Option<SelectorInput> {
        match directive {
            Directive::Probe {
                attempt,
                candidates,
            } => {
                self.abort_probe();
                let engine = self.engine.clone();
                self.probe = Some(tokio::spawn(async move {
                    let results = engine.run(&candidates).await;
                    ProbeReport { attempt, results }
                }));
                None
            }
            Directive::CancelProbe => {
                self.abort_probe();
                None
            }
            Directive::Bind { binding, candidate } => {
                match self
                    .playback
                    .bind(PlaySource::Stream(candidate), binding)
                    .await
                {
                    Ok(()) => {
                        let stable_after = self.selector.policy().stable_after;
                        self.stable_at = Some((binding, Instant::now() + stable_after));
                        None
                    }
                    Err(e) => {
                        warn!(session = %self.session_id, error = %e, "player failed to open stream");
                        Some(SelectorInput::PlaybackFailed {
                            binding,
                            kind: ErrorKind::DecodeFailure,
                        })
                    }
                }
            }
            Directive::Unbind => {
                self.stable_at = None;
                self.playback.unbind().await;
                None
            }
            Directive::ScheduleRetry { delay } => {
                self.retry_at = Some(Instant::now() + delay);
                None
            }
            Directive::CancelRetry => {
                self.retry_at = None;
                None
            }
            Directive::StartPoller { poller } => {
                self.stop_poller().await;
                let target = PollTarget {
                    camera: self.camera.clone(),
                    tier: self.quality,
                    policy: self.config.snapshot,
                    generation: poller,
                };
                self.poller = Some(SnapshotPoller::spawn(
                    self.snapshots.clone(),
                    target,
                    self.frame.clone(),
                    self.poller_tx.clone(),
                    &self.cancel,
                ));
                None
            }
            Directive::StopPoller => {
                self.stop_poller().await;
                None
            }
        }
    }

    fn abort_probe(&mut self) {
        if let Some(task) = self.probe.take() {
            task.abort();
        }
    }

    async fn stop_poller(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.stop().await;
        }
    }

    fn publish(&self) {
        let next = FeedStatus {
            session_id: self.session_id,
            camera: self.camera.clone(),
            base_url: self.base_url.clone(),
            quality: self.quality,
            state: self.selector.state().clone(),
            active_candidate: self.selector.active().cloned(),
            consecutive_failures: self.selector.consecutive_failures(),
            created_at: self.created_at,
            snapshot_at: self.snapshot_at,
        };
        self.status.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    async fn shutdown(&mut self) {
        for directive in self.selector.teardown() {
            self.execute(directive).await;
        }
        self.abort_probe();
        self.stop_poller().await;
        self.playback.unbind().await;
        self.retry_at = None;
        self.stable_at = None;
        self.publish();
        info!(session = %self.session_id, camera = %self.camera, "feed session closed");
    }
}

async fn join_probe(task: &mut Option<JoinHandle<ProbeReport>>) -> Result<ProbeReport, JoinError> {
    match task {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
