// ── Stream selector ──
//
// The acquisition state machine. It performs no I/O: each input yields a
// list of directives (probe, bind, schedule a retry, start the poller...)
// that the feed driver carries out, in order. Inputs carry the attempt,
// binding or poller generation they belong to, and anything from a
// superseded generation is ignored.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::RetryPolicy;
use crate::error::ErrorKind;
use crate::model::{AcquisitionState, ProbeResult, StreamCandidate};
use crate::probe::winner;

/// Events fed into the selector.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectorInput {
    /// Session created. Only honored from `Idle`.
    Start,
    /// Manual refresh. Clears the failure count and re-probes from any state.
    Refresh,
    /// A probe sequence finished.
    ProbeCompleted {
        attempt: u64,
        results: Vec<ProbeResult>,
    },
    /// The bound resource failed or ended.
    PlaybackFailed { binding: u64, kind: ErrorKind },
    /// The bound resource has stayed healthy for the stability window.
    PlaybackStable { binding: u64 },
    /// The reconnect backoff has elapsed.
    BackoffElapsed,
    /// The snapshot poller passed its offline threshold without an image.
    SnapshotStale { poller: u64 },
    /// The snapshot poller produced an image after going stale.
    SnapshotRecovered { poller: u64 },
    /// Camera or quality changed: tear everything down and go `Idle`
    /// with a fresh candidate list.
    Reset { candidates: Vec<StreamCandidate> },
}

/// Side effects requested by the selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Probe {
        attempt: u64,
        candidates: Vec<StreamCandidate>,
    },
    CancelProbe,
    /// Release whatever is bound, then bind `candidate`.
    Bind {
        binding: u64,
        candidate: StreamCandidate,
    },
    Unbind,
    ScheduleRetry { delay: Duration },
    CancelRetry,
    StartPoller { poller: u64 },
    StopPoller,
}

/// Acquisition state machine for one feed session.
#[derive(Debug, Clone)]
pub struct StreamSelector {
    state: AcquisitionState,
    candidates: Vec<StreamCandidate>,
    active: Option<StreamCandidate>,
    consecutive_failures: u32,
    last_error: ErrorKind,
    policy: RetryPolicy,
    attempt: u64,
    binding: u64,
    poller: u64,
}

impl StreamSelector {
    pub fn new(candidates: Vec<StreamCandidate>, policy: RetryPolicy) -> Self {
        Self {
            state: AcquisitionState::Idle,
            candidates,
            active: None,
            consecutive_failures: 0,
            last_error: ErrorKind::Unreachable,
            policy,
            attempt: 0,
            binding: 0,
            poller: 0,
        }
    }

    pub fn state(&self) -> &AcquisitionState {
        &self.state
    }

    pub fn active(&self) -> Option<&StreamCandidate> {
        self.active.as_ref()
    }

    pub fn candidates(&self) -> &[StreamCandidate] {
        &self.candidates
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Current probe attempt id.
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    /// Current playback binding generation.
    pub fn binding(&self) -> u64 {
        self.binding
    }

    /// Current snapshot poller generation.
    pub fn poller(&self) -> u64 {
        self.poller
    }

    /// Feed one input through the state machine.
    pub fn apply(&mut self, input: SelectorInput) -> Vec<Directive> {
        match input {
            SelectorInput::Start => {
                if self.state == AcquisitionState::Idle {
                    self.consecutive_failures = 0;
                    self.begin_probe()
                } else {
                    debug!(state = %self.state, "start ignored, session already running");
                    Vec::new()
                }
            }
            SelectorInput::Refresh => {
                let mut out = self.release();
                self.consecutive_failures = 0;
                out.extend(self.begin_probe());
                out
            }
            SelectorInput::ProbeCompleted { attempt, results } => {
                self.on_probe_completed(attempt, &results)
            }
            SelectorInput::PlaybackFailed { binding, kind } => self.on_playback_failed(binding, kind),
            SelectorInput::PlaybackStable { binding } => {
                if self.state.is_live() && binding == self.binding && self.consecutive_failures > 0 {
                    debug!(binding, "live binding stable, clearing failure count");
                    self.consecutive_failures = 0;
                }
                Vec::new()
            }
            SelectorInput::BackoffElapsed => {
                if matches!(self.state, AcquisitionState::Reconnecting { .. }) {
                    self.begin_probe()
                } else {
                    Vec::new()
                }
            }
            SelectorInput::SnapshotStale { poller } => {
                if poller == self.poller && matches!(self.state, AcquisitionState::Degraded(_)) {
                    warn!("no snapshot received within the offline window");
                    self.state = AcquisitionState::Offline;
                }
                Vec::new()
            }
            SelectorInput::SnapshotRecovered { poller } => {
                if poller == self.poller && self.state == AcquisitionState::Offline {
                    info!("snapshot fallback recovered");
                    self.state = AcquisitionState::Degraded(self.last_error);
                }
                Vec::new()
            }
            SelectorInput::Reset { candidates } => {
                let out = self.teardown();
                self.candidates = candidates;
                self.consecutive_failures = 0;
                out
            }
        }
    }

    /// Release every live resource and return to `Idle`.
    pub fn teardown(&mut self) -> Vec<Directive> {
        let out = self.release();
        self.state = AcquisitionState::Idle;
        out
    }

    // ── Transitions ──────────────────────────────────────────────────

    fn begin_probe(&mut self) -> Vec<Directive> {
        self.attempt += 1;
        self.active = None;
        self.state = AcquisitionState::Probing;
        debug!(attempt = self.attempt, candidates = self.candidates.len(), "probing");
        vec![Directive::Probe {
            attempt: self.attempt,
            candidates: self.candidates.clone(),
        }]
    }

    fn on_probe_completed(&mut self, attempt: u64, results: &[ProbeResult]) -> Vec<Directive> {
        if attempt != self.attempt || self.state != AcquisitionState::Probing {
            debug!(attempt, current = self.attempt, "stale probe report ignored");
            return Vec::new();
        }

        if let Some(candidate) = winner(results) {
            self.binding += 1;
            self.active = Some(candidate.clone());
            self.state = AcquisitionState::Live(candidate.clone());
            info!(candidate = %candidate.label(), "stream acquired");
            return vec![Directive::Bind {
                binding: self.binding,
                candidate: candidate.clone(),
            }];
        }

        self.last_error = results
            .iter()
            .rev()
            .filter(|r| r.candidate.is_stream())
            .find_map(|r| r.error)
            .unwrap_or(ErrorKind::Unreachable);
        warn!(error = %self.last_error, "no stream candidate reachable, degrading");
        self.degrade()
    }

    fn on_playback_failed(&mut self, binding: u64, kind: ErrorKind) -> Vec<Directive> {
        if !self.state.is_live() || binding != self.binding {
            debug!(binding, current = self.binding, "stale playback signal ignored");
            return Vec::new();
        }

        self.consecutive_failures += 1;
        self.active = None;
        let mut out = vec![Directive::Unbind];

        if self.consecutive_failures > self.policy.max_reconnect_attempts {
            warn!(
                failures = self.consecutive_failures,
                "reconnect limit reached, degrading until refresh"
            );
            self.last_error = kind;
            out.extend(self.degrade());
        } else {
            info!(
                attempt = self.consecutive_failures,
                error = %kind,
                "playback failed, reconnecting"
            );
            self.state = AcquisitionState::Reconnecting {
                attempt: self.consecutive_failures,
            };
            out.push(Directive::ScheduleRetry {
                delay: self.policy.backoff,
            });
        }
        out
    }

    fn degrade(&mut self) -> Vec<Directive> {
        self.poller += 1;
        self.state = AcquisitionState::Degraded(self.last_error);
        vec![Directive::StartPoller {
            poller: self.poller,
        }]
    }

    /// Directives releasing the resource the current state holds.
    fn release(&mut self) -> Vec<Directive> {
        self.active = None;
        match self.state {
            AcquisitionState::Idle => Vec::new(),
            AcquisitionState::Probing => vec![Directive::CancelProbe],
            AcquisitionState::Live(_) => vec![Directive::Unbind],
            AcquisitionState::Reconnecting { .. } => vec![Directive::CancelRetry],
            AcquisitionState::Degraded(_) | AcquisitionState::Offline => {
                vec![Directive::StopPoller]
            }
        }
    }
}
