// ── Probe engine ──
//
// Bounded-timeout reachability checks over an ordered candidate list.
// A probe never fails: every failure mode is folded into
// `ProbeResult { reachable: false, error: Some(..) }`.

use std::sync::Arc;
use std::time::Duration;

use camfeed_api::{MediaClient, ProbeResponse, TransportKind};
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, StreamExt, stream};
use tracing::debug;

use crate::config::{ProbeConfig, ProbeMode};
use crate::error::{CoreError, ErrorKind};
use crate::model::{ProbeResult, StreamCandidate};

/// Something that can check one candidate.
///
/// Implementations must honor `timeout` and must not panic; the engine
/// relies on every call resolving to a `ProbeResult`.
pub trait Prober: Send + Sync + 'static {
    fn probe<'a>(
        &'a self,
        candidate: &'a StreamCandidate,
        timeout: Duration,
    ) -> BoxFuture<'a, ProbeResult>;
}

// ── HTTP prober ──────────────────────────────────────────────────────

/// Probes candidates over HTTP with `HEAD` (ranged `GET` fallback).
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: MediaClient,
}

impl HttpProber {
    pub fn new(client: MediaClient) -> Self {
        Self { client }
    }
}

impl Prober for HttpProber {
    fn probe<'a>(
        &'a self,
        candidate: &'a StreamCandidate,
        timeout: Duration,
    ) -> BoxFuture<'a, ProbeResult> {
        async move {
            let response = self.client.probe(&candidate.url, timeout).await;
            classify(candidate.clone(), response)
        }
        .boxed()
    }
}

/// Turn a raw HTTP answer into a `ProbeResult`.
pub fn classify(
    candidate: StreamCandidate,
    response: Result<ProbeResponse, camfeed_api::Error>,
) -> ProbeResult {
    let resp = match response {
        Ok(resp) => resp,
        Err(err) => {
            let core = CoreError::from(err);
            let kind = core.kind().unwrap_or(ErrorKind::Unreachable);
            debug!(candidate = %candidate.label(), error = %core, "probe failed");
            return ProbeResult::failed(candidate, kind, core.to_string());
        }
    };

    let latency_ms = resp.latency.as_secs_f64() * 1000.0;
    let mut result = ProbeResult {
        candidate,
        reachable: false,
        http_status: Some(resp.status),
        content_type: resp.content_type.clone(),
        latency_ms: Some(latency_ms),
        error: None,
        detail: None,
    };

    if !resp.is_success() {
        result.error = Some(ErrorKind::InvalidResponse);
        result.detail = Some(format!("HTTP {}", resp.status));
    } else if !content_type_matches(result.candidate.transport, resp.content_type.as_deref()) {
        result.error = Some(ErrorKind::InvalidResponse);
        result.detail = Some(format!(
            "unexpected content type {}",
            resp.content_type.as_deref().unwrap_or_default()
        ));
    } else {
        result.reachable = true;
    }

    debug!(
        candidate = %result.candidate.label(),
        status = resp.status,
        reachable = result.reachable,
        latency_ms,
        "probe finished"
    );
    result
}

/// Whether a content type is plausible for a transport. A missing type or
/// `application/octet-stream` is given the benefit of the doubt.
pub fn content_type_matches(transport: TransportKind, content_type: Option<&str>) -> bool {
    let Some(ct) = content_type else {
        return true;
    };
    if ct == "application/octet-stream" {
        return true;
    }
    match transport {
        TransportKind::Hls => ct.contains("mpegurl"),
        TransportKind::Mjpeg => ct == "multipart/x-mixed-replace" || ct == "image/jpeg",
        TransportKind::RawSnapshot => ct.starts_with("image/"),
    }
}

// ── Engine ───────────────────────────────────────────────────────────

/// Runs a `Prober` over candidate lists.
#[derive(Clone)]
pub struct ProbeEngine {
    prober: Arc<dyn Prober>,
    config: ProbeConfig,
}

impl std::fmt::Debug for ProbeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ProbeEngine {
    pub fn new(prober: Arc<dyn Prober>, config: ProbeConfig) -> Self {
        Self { prober, config }
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Probe in priority order until a stream candidate is reachable.
    ///
    /// Returns the results gathered so far, in candidate order; the last
    /// one is the winner if any. With `ProbeMode::Concurrent` later probes
    /// may already be in flight; they are dropped once an earlier winner is
    /// known, and a faster later success never overtakes an earlier one.
    pub async fn run(&self, candidates: &[StreamCandidate]) -> Vec<ProbeResult> {
        let timeout = self.config.timeout;
        let mut results = Vec::with_capacity(candidates.len());

        match self.config.mode {
            ProbeMode::Sequential => {
                for candidate in candidates {
                    let result = self.prober.probe(candidate, timeout).await;
                    let done = result.is_usable_stream();
                    results.push(result);
                    if done {
                        break;
                    }
                }
            }
            ProbeMode::Concurrent { .. } => {
                let mut ordered =
                    stream::iter(self.probes(candidates)).buffered(self.config.mode.fan_out());

                while let Some(result) = ordered.next().await {
                    let done = result.is_usable_stream();
                    results.push(result);
                    if done {
                        break;
                    }
                }
            }
        }

        results
    }

    /// Probe every candidate, for diagnostics. Results are in candidate order.
    pub async fn probe_all(&self, candidates: &[StreamCandidate]) -> Vec<ProbeResult> {
        stream::iter(self.probes(candidates))
            .buffered(self.config.mode.fan_out())
            .collect()
            .await
    }

    /// One pending probe per candidate, collected eagerly so the enclosing
    /// future stays `Send` inside spawned tasks.
    fn probes<'a>(
        &'a self,
        candidates: &'a [StreamCandidate],
    ) -> Vec<BoxFuture<'a, ProbeResult>> {
        let timeout = self.config.timeout;
        candidates
            .iter()
            .map(|candidate| self.prober.probe(candidate, timeout))
            .collect()
    }
}

/// The first reachable stream candidate in a result list.
pub fn winner(results: &[ProbeResult]) -> Option<&StreamCandidate> {
    results
        .iter()
        .find(|r| r.is_usable_stream())
        .map(|r| &r.candidate)
}
