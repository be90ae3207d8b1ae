// ── Playback session ──
//
// Owns at most one play-out resource. Binding always releases the previous
// resource before opening the next one; unbinding is idempotent. Failure
// and end-of-stream signals are forwarded upward tagged with the binding
// generation and are never retried here.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::model::StreamCandidate;

/// What to play.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaySource {
    Stream(StreamCandidate),
    LocalFile(PathBuf),
}

impl PlaySource {
    /// URL or path handed to the player.
    pub fn location(&self) -> String {
        match self {
            Self::Stream(candidate) => candidate.url.to_string(),
            Self::LocalFile(path) => path.display().to_string(),
        }
    }
}

impl fmt::Display for PlaySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream(candidate) => write!(f, "stream {}", candidate.label()),
            Self::LocalFile(path) => write!(f, "file {}", path.display()),
        }
    }
}

// ── Signals ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    Failed(String),
    Ended,
}

/// A play-out event, tagged with the binding it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackSignal {
    pub generation: u64,
    pub event: PlaybackEvent,
}

/// Where a play-out resource reports its fate.
#[derive(Debug, Clone)]
pub struct SignalSink {
    generation: u64,
    tx: mpsc::UnboundedSender<PlaybackSignal>,
}

impl SignalSink {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<PlaybackSignal>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn failed(&self, reason: impl Into<String>) {
        self.send(PlaybackEvent::Failed(reason.into()));
    }

    pub fn ended(&self) {
        self.send(PlaybackEvent::Ended);
    }

    fn send(&self, event: PlaybackEvent) {
        let _ = self.tx.send(PlaybackSignal {
            generation: self.generation,
            event,
        });
    }
}

// ── Player abstraction ───────────────────────────────────────────────

/// A live decoder/player resource.
pub trait Playout: Send + 'static {
    /// Stop playback and free the resource. Resolves once it is gone.
    fn release(self: Box<Self>) -> BoxFuture<'static, ()>;
}

/// Opens play-out resources.
pub trait Player: Send + Sync + 'static {
    fn open<'a>(
        &'a self,
        source: &'a PlaySource,
        signals: SignalSink,
    ) -> BoxFuture<'a, Result<Box<dyn Playout>, CoreError>>;
}

// ── Session ──────────────────────────────────────────────────────────

struct Bound {
    generation: u64,
    source: PlaySource,
    playout: Box<dyn Playout>,
}

/// Binds one play-out resource at a time.
pub struct PlaybackSession {
    player: Arc<dyn Player>,
    signals: mpsc::UnboundedSender<PlaybackSignal>,
    current: Option<Bound>,
}

impl fmt::Debug for PlaybackSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybackSession")
            .field("generation", &self.generation())
            .field("source", &self.source())
            .finish_non_exhaustive()
    }
}

impl PlaybackSession {
    pub fn new(player: Arc<dyn Player>, signals: mpsc::UnboundedSender<PlaybackSignal>) -> Self {
        Self {
            player,
            signals,
            current: None,
        }
    }

    /// Release the current resource, then open `source`.
    pub async fn bind(&mut self, source: PlaySource, generation: u64) -> Result<(), CoreError> {
        self.unbind().await;

        debug!(%source, generation, "binding playback");
        let sink = SignalSink::new(generation, self.signals.clone());
        let playout = self.player.open(&source, sink).await?;
        self.current = Some(Bound {
            generation,
            source,
            playout,
        });
        Ok(())
    }

    /// Release the current resource, if any. Safe to call repeatedly.
    pub async fn unbind(&mut self) {
        if let Some(bound) = self.current.take() {
            debug!(source = %bound.source, generation = bound.generation, "releasing playback");
            bound.playout.release().await;
        }
    }

    pub fn is_bound(&self) -> bool {
        self.current.is_some()
    }

    pub fn generation(&self) -> Option<u64> {
        self.current.as_ref().map(|b| b.generation)
    }

    pub fn source(&self) -> Option<&PlaySource> {
        self.current.as_ref().map(|b| &b.source)
    }
}

// ── Null player ──────────────────────────────────────────────────────

/// Headless player: binds without decoding anything and never signals.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullPlayer;

struct NullPlayout;

impl Playout for NullPlayout {
    fn release(self: Box<Self>) -> BoxFuture<'static, ()> {
        async {}.boxed()
    }
}

impl Player for NullPlayer {
    fn open<'a>(
        &'a self,
        source: &'a PlaySource,
        _signals: SignalSink,
    ) -> BoxFuture<'a, Result<Box<dyn Playout>, CoreError>> {
        async move {
            debug!(%source, "headless bind");
            Ok(Box::new(NullPlayout) as Box<dyn Playout>)
        }
        .boxed()
    }
}

// ── External process player ──────────────────────────────────────────

/// Placeholder replaced by the stream URL or file path.
pub const LOCATION_PLACEHOLDER: &str = "{url}";

/// Plays through an external program such as `ffplay` or `mpv`.
///
/// The child exiting is the only signal: exit code 0 is `Ended`, anything
/// else `Failed`. Releasing kills the child.
#[derive(Debug, Clone)]
pub struct ProcessPlayer {
    program: String,
    args: Vec<String>,
}

impl ProcessPlayer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Parse a whitespace-separated command line, e.g.
    /// `ffplay -loglevel error {url}`. Without a `{url}` argument the
    /// location is appended.
    pub fn from_command_line(line: &str) -> Result<Self, CoreError> {
        let mut parts = line.split_whitespace().map(str::to_owned);
        let program = parts.next().ok_or_else(|| CoreError::Config {
            message: "player command is empty".into(),
        })?;
        Ok(Self::new(program, parts.collect()))
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn command_args(&self, location: &str) -> Vec<String> {
        let mut substituted = false;
        let mut args: Vec<String> = self
            .args
            .iter()
            .map(|arg| {
                if arg.contains(LOCATION_PLACEHOLDER) {
                    substituted = true;
                    arg.replace(LOCATION_PLACEHOLDER, location)
                } else {
                    arg.clone()
                }
            })
            .collect();
        if !substituted {
            args.push(location.to_owned());
        }
        args
    }
}

impl Player for ProcessPlayer {
    fn open<'a>(
        &'a self,
        source: &'a PlaySource,
        signals: SignalSink,
    ) -> BoxFuture<'a, Result<Box<dyn Playout>, CoreError>> {
        async move {
            let args = self.command_args(&source.location());
            let mut child = Command::new(&self.program)
                .args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| CoreError::DecodeFailure {
                    message: format!("failed to start {}: {e}", self.program),
                })?;

            info!(program = %self.program, %source, pid = child.id(), "player started");

            let cancel = CancellationToken::new();
            let token = cancel.clone();
            let handle = tokio::spawn(async move {
                tokio::select! {
                    biased;
                    () = token.cancelled() => {
                        if let Err(e) = child.kill().await {
                            warn!(error = %e, "failed to kill player process");
                        }
                    }
                    status = child.wait() => match status {
                        Ok(status) if status.success() => signals.ended(),
                        Ok(status) => signals.failed(format!("player exited with {status}")),
                        Err(e) => signals.failed(format!("failed to wait for player: {e}")),
                    },
                }
            });

            Ok(Box::new(ProcessPlayout {
                cancel,
                handle: Some(handle),
            }) as Box<dyn Playout>)
        }
        .boxed()
    }
}

struct ProcessPlayout {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Playout for ProcessPlayout {
    fn release(self: Box<Self>) -> BoxFuture<'static, ()> {
        let mut this = *self;
        async move {
            this.cancel.cancel();
            if let Some(handle) = this.handle.take() {
                if let Err(e) = handle.await {
                    warn!(error = %e, "player watcher task failed");
                }
            }
        }
        .boxed()
    }
}

impl Drop for ProcessPlayout {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
