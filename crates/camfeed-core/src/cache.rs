// ── Clip cache ──
//
// Bounded store of downloaded event clips under a scratch directory the
// cache owns. A single mutex-guarded registry is the only place that
// decides whether a download starts, so concurrent fetches for one key
// always share one download. Downloads stream into a per-task `.part`
// file that is renamed under the registry lock once complete; partial
// files are never served.
//
// Entries are keyed by the event id as given. File names are derived
// from it separately and carry the download sequence number, so ids that
// sanitize to the same stem never share a file.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use camfeed_api::MediaClient;
use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::CacheConfig;
use crate::error::CoreError;
use crate::model::{CacheEntry, CacheEntryState, DownloadOrigin};

const EVENT_CHANNEL_SIZE: usize = 64;
const CLIP_EXTENSION: &str = "mp4";
const PART_EXTENSION: &str = "part";

type Outcome = Option<Result<PathBuf, CoreError>>;

// ── Handle ───────────────────────────────────────────────────────────

/// Resolves to the local path of a clip once it is ready.
///
/// A handle from an on-demand fetch keeps its download alive. When the
/// last such handle for a download is dropped before it finishes, the
/// download is cancelled.
#[derive(Debug)]
pub struct ClipHandle {
    key: String,
    inner: HandleInner,
    demand: Option<Arc<Demand>>,
}

/// Shared by every on-demand consumer of one download.
#[derive(Debug)]
struct Demand {
    cancel: CancellationToken,
    armed: AtomicBool,
}

impl Demand {
    fn new(cancel: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            cancel,
            armed: AtomicBool::new(true),
        })
    }

    /// A preload took over the download; consumers leaving no longer
    /// cancel it.
    fn disarm(&self) {
        self.armed.store(false, Ordering::Release);
    }
}

impl Drop for Demand {
    fn drop(&mut self) {
        if *self.armed.get_mut() {
            self.cancel.cancel();
        }
    }
}

#[derive(Debug)]
enum HandleInner {
    Ready(PathBuf),
    Pending(watch::Receiver<Outcome>),
}

impl ClipHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether the clip was already cached when the handle was issued,
    /// or its download has since finished.
    pub fn is_done(&self) -> bool {
        match &self.inner {
            HandleInner::Ready(_) => true,
            HandleInner::Pending(rx) => rx.borrow().is_some(),
        }
    }

    /// Whether this handle counts as an on-demand consumer.
    pub fn is_on_demand(&self) -> bool {
        self.demand.is_some()
    }

    /// Wait for the download to finish.
    pub async fn ready(self) -> Result<PathBuf, CoreError> {
        let _demand = self.demand;
        match self.inner {
            HandleInner::Ready(path) => Ok(path),
            HandleInner::Pending(mut rx) => {
                let outcome = rx
                    .wait_for(Option::is_some)
                    .await
                    .map_err(|_| CoreError::Cancelled)?;
                outcome.clone().unwrap_or(Err(CoreError::Cancelled))
            }
        }
    }
}

// ── Registry ─────────────────────────────────────────────────────────

struct DownloadTask {
    id: u64,
    source_url: Url,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
    done: watch::Receiver<Outcome>,
    /// Live on-demand consumers. Empty for preloads.
    demand: Weak<Demand>,
}

impl DownloadTask {
    fn has_consumers(&self) -> bool {
        self.demand.strong_count() > 0
    }
}

enum SlotState {
    Downloading(DownloadTask),
    Ready,
}

struct Slot {
    seq: u64,
    path: PathBuf,
    size_bytes: u64,
    downloaded_at: Option<DateTime<Utc>>,
    origin: DownloadOrigin,
    state: SlotState,
}

impl Slot {
    fn entry(&self, key: &str, state: CacheEntryState) -> CacheEntry {
        CacheEntry {
            key: key.to_owned(),
            local_path: self.path.clone(),
            size_bytes: self.size_bytes,
            downloaded_at: self.downloaded_at,
            state,
            origin: self.origin,
        }
    }

    fn current_state(&self) -> CacheEntryState {
        match self.state {
            SlotState::Downloading(_) => CacheEntryState::Downloading,
            SlotState::Ready => CacheEntryState::Ready,
        }
    }

    fn is_ready(&self) -> bool {
        matches!(self.state, SlotState::Ready)
    }

    /// An on-demand download whose consumers have all gone. Its task is
    /// already cancelled and will drop the slot.
    fn is_abandoned(&self) -> bool {
        self.origin == DownloadOrigin::OnDemand
            && matches!(&self.state, SlotState::Downloading(task) if !task.has_consumers())
    }
}

#[derive(Default)]
struct Registry {
    slots: HashMap<String, Slot>,
    next_seq: u64,
    closed: bool,
}

// ── Cache ────────────────────────────────────────────────────────────

/// Process-wide clip cache. Cheaply cloneable; clones share one registry.
#[derive(Clone)]
pub struct ClipCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    client: MediaClient,
    config: CacheConfig,
    registry: Mutex<Registry>,
    cancel: CancellationToken,
    events: broadcast::Sender<CacheEntry>,
}

impl fmt::Debug for ClipCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClipCache")
            .field("scratch_dir", &self.inner.config.scratch_dir)
            .field("capacity", &self.inner.config.capacity)
            .finish_non_exhaustive()
    }
}

impl ClipCache {
    /// Open the cache, purging leftovers of a previous run from the scratch
    /// directory.
    pub async fn open(client: MediaClient, config: CacheConfig) -> Result<Self, CoreError> {
        let dir = &config.scratch_dir;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| CoreError::storage(dir, &e))?;
        let purged = purge_scratch(dir).await?;
        if purged > 0 {
            info!(dir = %dir.display(), purged, "removed stale clip files");
        }

        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Ok(Self {
            inner: Arc::new(CacheInner {
                client,
                config,
                registry: Mutex::new(Registry::default()),
                cancel: CancellationToken::new(),
                events,
            }),
        })
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.inner.config.scratch_dir
    }

    pub fn capacity(&self) -> usize {
        self.inner.config.capacity.max(1)
    }

    /// Subscribe to entry state changes (downloading, ready, failed, evicted).
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEntry> {
        self.inner.events.subscribe()
    }

    /// Return the clip for `key`, downloading it from `source_url` if needed.
    ///
    /// Returns immediately. A ready clip resolves at once; an in-flight
    /// download is joined, never duplicated.
    pub async fn fetch(
        &self,
        key: &str,
        source_url: &Url,
        origin: DownloadOrigin,
    ) -> Result<ClipHandle, CoreError> {
        let key = clip_key(key)?;
        let mut registry = self.inner.registry.lock().await;
        if registry.closed {
            return Err(CoreError::Cancelled);
        }

        if registry.slots.get(&key).is_some_and(Slot::is_abandoned) {
            debug!(%key, "replacing abandoned download");
            registry.slots.remove(&key);
        }

        if let Some(slot) = registry.slots.get_mut(&key) {
            return Ok(join_slot(key, slot, origin));
        }

        self.make_room(&mut registry).await;
        let (rx, demand) = self.start_download(&mut registry, &key, source_url, origin);
        Ok(ClipHandle {
            key,
            inner: HandleInner::Pending(rx),
            demand,
        })
    }

    /// Fire-and-forget warm-up of `key`.
    pub async fn preload(&self, key: &str, source_url: &Url) -> Result<(), CoreError> {
        self.fetch(key, source_url, DownloadOrigin::Preload)
            .await
            .map(|_| ())
    }

    /// Cancel any in-flight download for `key` and remove its partial file.
    /// Returns whether a download was cancelled.
    pub async fn cancel(&self, key: &str) -> bool {
        self.cancel_where(key, |_| true).await
    }

    /// Like [`cancel`](Self::cancel), but leaves preloads running and
    /// downloads that another on-demand handle still waits on.
    pub async fn cancel_on_demand(&self, key: &str) -> bool {
        self.cancel_where(key, Slot::is_abandoned).await
    }

    /// Snapshot of every entry, oldest first.
    pub async fn entries(&self) -> Vec<CacheEntry> {
        let registry = self.inner.registry.lock().await;
        let mut slots: Vec<(&String, &Slot)> = registry.slots.iter().collect();
        slots.sort_by_key(|(_, slot)| slot.seq);
        slots
            .into_iter()
            .map(|(key, slot)| slot.entry(key, slot.current_state()))
            .collect()
    }

    pub async fn entry(&self, key: &str) -> Option<CacheEntry> {
        let key = clip_key(key).ok()?;
        let registry = self.inner.registry.lock().await;
        registry
            .slots
            .get(&key)
            .map(|slot| slot.entry(&key, slot.current_state()))
    }

    pub async fn len(&self) -> usize {
        self.inner.registry.lock().await.slots.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Cancel every download, drop every entry and purge the scratch
    /// directory. Later fetches fail with `Cancelled`.
    pub async fn shutdown(&self) -> Result<(), CoreError> {
        let tasks: Vec<DownloadTask> = {
            let mut registry = self.inner.registry.lock().await;
            registry.closed = true;
            registry
                .slots
                .drain()
                .filter_map(|(_, slot)| match slot.state {
                    SlotState::Downloading(task) => Some(task),
                    SlotState::Ready => None,
                })
                .collect()
        };

        self.inner.cancel.cancel();
        for task in tasks {
            join_download(task).await;
        }

        let dir = self.scratch_dir();
        let purged = purge_scratch(dir).await?;
        if let Err(e) = tokio::fs::remove_dir(dir).await {
            debug!(dir = %dir.display(), error = %e, "scratch directory left in place");
        }
        info!(purged, "clip cache shut down");
        Ok(())
    }

    // ── Internals ────────────────────────────────────────────────────

    /// Evict the oldest ready clips until there is room for one more entry.
    async fn make_room(&self, registry: &mut Registry) {
        let capacity = self.capacity();
        while registry.slots.len() >= capacity {
            let victim = registry
                .slots
                .iter()
                .filter(|(_, slot)| slot.is_ready())
                .min_by_key(|(_, slot)| (slot.downloaded_at, slot.seq))
                .map(|(key, _)| key.clone());

            let Some(key) = victim else {
                warn!(
                    entries = registry.slots.len(),
                    capacity, "clip cache over capacity, every entry is downloading"
                );
                return;
            };

            if let Some(slot) = registry.slots.remove(&key) {
                remove_file_quietly(&slot.path).await;
                info!(%key, "evicted clip");
                let _ = self
                    .inner
                    .events
                    .send(slot.entry(&key, CacheEntryState::Evicted));
            }
        }
    }

    fn start_download(
        &self,
        registry: &mut Registry,
        key: &str,
        source_url: &Url,
        origin: DownloadOrigin,
    ) -> (watch::Receiver<Outcome>, Option<Arc<Demand>>) {
        registry.next_seq += 1;
        let id = registry.next_seq;
        let dir = &self.inner.config.scratch_dir;
        let stem = sanitize_key(key).unwrap_or_else(|_| String::from("clip"));
        let job = DownloadJob {
            key: key.to_owned(),
            id,
            url: source_url.clone(),
            part: dir.join(format!("{stem}.{id}.{PART_EXTENSION}")),
            target: dir.join(format!("{stem}.{id}.{CLIP_EXTENSION}")),
            cancel: self.inner.cancel.child_token(),
        };

        let (tx, rx) = watch::channel(None);
        let cancel = job.cancel.clone();
        let target = job.target.clone();
        let demand = (origin == DownloadOrigin::OnDemand).then(|| Demand::new(cancel.clone()));
        info!(%key, url = %source_url, %origin, "starting clip download");
        let handle = tokio::spawn(run_download(self.inner.clone(), job, tx));

        let slot = Slot {
            seq: id,
            path: target,
            size_bytes: 0,
            downloaded_at: None,
            origin,
            state: SlotState::Downloading(DownloadTask {
                id,
                source_url: source_url.clone(),
                cancel,
                handle: Some(handle),
                done: rx.clone(),
                demand: demand.as_ref().map_or_else(Weak::new, Arc::downgrade),
            }),
        };
        let _ = self
            .inner
            .events
            .send(slot.entry(key, CacheEntryState::Downloading));
        registry.slots.insert(key.to_owned(), slot);
        (rx, demand)
    }

    async fn cancel_where(&self, key: &str, matches: impl Fn(&Slot) -> bool) -> bool {
        let Ok(key) = clip_key(key) else {
            return false;
        };

        let task = {
            let mut registry = self.inner.registry.lock().await;
            let cancellable = registry.slots.get(&key).is_some_and(|slot| {
                matches!(slot.state, SlotState::Downloading(_)) && matches(slot)
            });
            if !cancellable {
                return false;
            }
            match registry.slots.remove(&key) {
                Some(Slot {
                    state: SlotState::Downloading(task),
                    ..
                }) => task,
                _ => return false,
            }
        };

        info!(%key, url = %task.source_url, "cancelling clip download");
        join_download(task).await;
        true
    }
}

/// Hand out a handle for an existing slot.
fn join_slot(key: String, slot: &mut Slot, origin: DownloadOrigin) -> ClipHandle {
    let (inner, demand) = match &slot.state {
        SlotState::Ready => {
            debug!(%key, "clip cache hit");
            (HandleInner::Ready(slot.path.clone()), None)
        }
        SlotState::Downloading(task) => {
            debug!(%key, %origin, "joining in-flight download");
            let demand = task.demand.upgrade();
            if origin == DownloadOrigin::Preload && slot.origin == DownloadOrigin::OnDemand {
                if let Some(demand) = &demand {
                    demand.disarm();
                }
                slot.origin = DownloadOrigin::Preload;
            }
            let demand = demand.filter(|_| origin == DownloadOrigin::OnDemand);
            (HandleInner::Pending(task.done.clone()), demand)
        }
    };
    ClipHandle { key, inner, demand }
}

// ── Download task ────────────────────────────────────────────────────

struct DownloadJob {
    key: String,
    id: u64,
    url: Url,
    part: PathBuf,
    target: PathBuf,
    cancel: CancellationToken,
}

async fn run_download(inner: Arc<CacheInner>, job: DownloadJob, tx: watch::Sender<Outcome>) {
    let outcome = tokio::select! {
        biased;
        () = job.cancel.cancelled() => Err(CoreError::Cancelled),
        result = write_part(&inner, &job.url, &job.part) => result,
    };
    let result = finish(&inner, &job, outcome).await;
    let _ = tx.send(Some(result));
}

/// Stream the body into the part file. Returns the byte count.
async fn write_part(inner: &CacheInner, url: &Url, part: &Path) -> Result<u64, CoreError> {
    let config = &inner.config;
    let mut download = inner.client.open_download(url, config.header_timeout).await?;

    let mut file = tokio::fs::File::create(part)
        .await
        .map_err(|e| CoreError::storage(part, &e))?;
    let mut written: u64 = 0;

    loop {
        let chunk = match tokio::time::timeout(config.stall_timeout, download.chunk()).await {
            Ok(chunk) => chunk?,
            Err(_) => {
                return Err(CoreError::Unreachable {
                    reason: format!(
                        "clip download stalled for {}s",
                        config.stall_timeout.as_secs()
                    ),
                });
            }
        };
        let Some(chunk) = chunk else { break };
        file.write_all(&chunk)
            .await
            .map_err(|e| CoreError::storage(part, &e))?;
        written += u64::try_from(chunk.len()).unwrap_or(u64::MAX);
    }

    file.flush().await.map_err(|e| CoreError::storage(part, &e))?;

    if written == 0 {
        return Err(CoreError::InvalidResponse {
            url: url.to_string(),
            message: "empty clip body".into(),
        });
    }
    Ok(written)
}

/// Settle a finished download under the registry lock.
async fn finish(
    inner: &CacheInner,
    job: &DownloadJob,
    outcome: Result<u64, CoreError>,
) -> Result<PathBuf, CoreError> {
    let mut registry = inner.registry.lock().await;
    let ours = registry.slots.get(&job.key).is_some_and(
        |slot| matches!(&slot.state, SlotState::Downloading(task) if task.id == job.id),
    );

    let size = match outcome {
        Ok(size) if ours => size,
        Ok(_) => {
            remove_file_quietly(&job.part).await;
            return Err(CoreError::Cancelled);
        }
        Err(err) => {
            remove_file_quietly(&job.part).await;
            if ours {
                drop_failed(inner, &mut registry, &job.key, &err);
            }
            return Err(err);
        }
    };

    if let Err(e) = tokio::fs::rename(&job.part, &job.target).await {
        remove_file_quietly(&job.part).await;
        let err = CoreError::storage(&job.target, &e);
        drop_failed(inner, &mut registry, &job.key, &err);
        return Err(err);
    }

    let Some(slot) = registry.slots.get_mut(&job.key) else {
        return Err(CoreError::Cancelled);
    };
    slot.state = SlotState::Ready;
    slot.size_bytes = size;
    slot.downloaded_at = Some(Utc::now());
    info!(key = %job.key, size, "clip ready");
    let _ = inner
        .events
        .send(slot.entry(&job.key, CacheEntryState::Ready));
    Ok(job.target.clone())
}

fn drop_failed(inner: &CacheInner, registry: &mut Registry, key: &str, err: &CoreError) {
    if let Some(slot) = registry.slots.remove(key) {
        if matches!(err, CoreError::Cancelled) {
            info!(%key, "clip download abandoned");
        } else {
            warn!(%key, error = %err, "clip download failed");
        }
        let _ = inner.events.send(slot.entry(key, CacheEntryState::Failed));
    }
}

async fn join_download(mut task: DownloadTask) {
    task.cancel.cancel();
    if let Some(handle) = task.handle.take() {
        if let Err(e) = handle.await {
            warn!(error = %e, "clip download task failed");
        }
    }
}

// ── Filesystem helpers ───────────────────────────────────────────────

/// Delete clip and part files left in the scratch directory.
async fn purge_scratch(dir: &Path) -> Result<usize, CoreError> {
    let mut read_dir = match tokio::fs::read_dir(dir).await {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(CoreError::storage(dir, &e)),
    };

    let mut purged = 0;
    while let Some(entry) = read_dir
        .next_entry()
        .await
        .map_err(|e| CoreError::storage(dir, &e))?
    {
        let path = entry.path();
        let ours = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext == CLIP_EXTENSION || ext == PART_EXTENSION);
        if ours {
            tokio::fs::remove_file(&path)
                .await
                .map_err(|e| CoreError::storage(&path, &e))?;
            purged += 1;
        }
    }
    Ok(purged)
}

async fn remove_file_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove clip file"),
    }
}

/// Validate an event id for use as a cache key. The id is kept as given
/// apart from surrounding whitespace.
pub fn clip_key(raw: &str) -> Result<String, CoreError> {
    let key = raw.trim();
    if key.is_empty() || key.chars().all(|c| c == '.') {
        return Err(CoreError::Config {
            message: format!("invalid clip key: {raw:?}"),
        });
    }
    Ok(key.to_owned())
}

/// Map an event id to a safe file stem. Distinct ids may share a stem.
pub fn sanitize_key(raw: &str) -> Result<String, CoreError> {
    let key: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if key.is_empty() || key.chars().all(|c| c == '.') {
        return Err(CoreError::Config {
            message: format!("invalid clip key: {raw:?}"),
        });
    }
    Ok(key)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use camfeed_api::{Credentials, Endpoints};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    const CLIP: &[u8] = b"\x00\x00\x00\x18ftypmp42clip-bytes";

    struct Fixture {
        server: MockServer,
        cache: ClipCache,
        endpoints: Endpoints,
        _dir: TempDir,
    }

    impl Fixture {
        fn url(&self, key: &str) -> Url {
            self.endpoints.clip(key)
        }

        async fn mount_clip(&self, key: &str, delay: Duration) {
            Mock::given(method("GET"))
                .and(path(format!("/api/events/{key}/clip.mp4")))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_raw(CLIP, "video/mp4")
                        .set_delay(delay),
                )
                .mount(&self.server)
                .await;
        }

        async fn keys(&self) -> Vec<String> {
            self.cache
                .entries()
                .await
                .into_iter()
                .map(|e| e.key)
                .collect()
        }
    }

    async fn fixture(capacity: usize) -> Fixture {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let endpoints = Endpoints::parse(&server.uri()).unwrap();
        let client =
            MediaClient::with_client(reqwest::Client::new(), endpoints.clone(), Credentials::None);
        let cache = ClipCache::open(
            client,
            CacheConfig {
                capacity,
                scratch_dir: dir.path().join("clips"),
                header_timeout: Duration::from_secs(5),
                stall_timeout: Duration::from_secs(5),
            },
        )
        .await
        .unwrap();
        Fixture {
            server,
            cache,
            endpoints,
            _dir: dir,
        }
    }

    fn part_files(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .path()
                    .extension()
                    .is_some_and(|ext| ext == PART_EXTENSION)
            })
            .count()
    }

    #[tokio::test]
    async fn concurrent_fetches_share_one_download() {
        let fx = fixture(3).await;
        Mock::given(method("GET"))
            .and(path("/api/events/e1/clip.mp4"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(CLIP, "video/mp4")
                    .set_delay(Duration::from_millis(200)),
            )
            .expect(1)
            .mount(&fx.server)
            .await;

        let url = fx.url("e1");
        let (a, b) = tokio::join!(
            fx.cache.fetch("e1", &url, DownloadOrigin::OnDemand),
            fx.cache.fetch("e1", &url, DownloadOrigin::Preload),
        );
        let (a, b) = tokio::join!(a.unwrap().ready(), b.unwrap().ready());
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a, b);
        assert_eq!(std::fs::read(&a).unwrap(), CLIP);
        assert_eq!(a.file_name().unwrap(), "e1.1.mp4");

        let entry = fx.cache.entry("e1").await.unwrap();
        assert_eq!(entry.state, CacheEntryState::Ready);
        assert_eq!(entry.size_bytes, u64::try_from(CLIP.len()).unwrap());
        assert!(entry.downloaded_at.is_some());

        // A later fetch is a hit and does not touch the backend.
        let again = fx.cache.fetch("e1", &url, DownloadOrigin::OnDemand).await.unwrap();
        assert!(again.is_done());
        assert_eq!(again.ready().await.unwrap(), a);
    }

    #[tokio::test]
    async fn oldest_ready_entry_is_evicted_at_capacity() {
        let fx = fixture(3).await;
        for key in ["e1", "e2", "e3", "e4"] {
            fx.mount_clip(key, Duration::ZERO).await;
        }

        let mut paths = Vec::new();
        for key in ["e1", "e2", "e3"] {
            let handle = fx.cache.fetch(key, &fx.url(key), DownloadOrigin::OnDemand).await.unwrap();
            paths.push(handle.ready().await.unwrap());
        }
        assert_eq!(fx.keys().await, vec!["e1", "e2", "e3"]);

        let mut events = fx.cache.subscribe();
        let e4 = fx.cache.fetch("e4", &fx.url("e4"), DownloadOrigin::OnDemand).await.unwrap();

        let evicted = events.recv().await.unwrap();
        assert_eq!(evicted.key, "e1");
        assert_eq!(evicted.state, CacheEntryState::Evicted);
        assert!(!paths[0].exists());
        assert!(paths[1].exists() && paths[2].exists());

        e4.ready().await.unwrap();
        assert_eq!(fx.keys().await, vec!["e2", "e3", "e4"]);
    }

    #[tokio::test]
    async fn in_flight_downloads_are_never_evicted() {
        let fx = fixture(1).await;
        fx.mount_clip("slow-a", Duration::from_millis(300)).await;
        fx.mount_clip("slow-b", Duration::from_millis(300)).await;

        let a = fx.cache.fetch("slow-a", &fx.url("slow-a"), DownloadOrigin::Preload).await.unwrap();
        let b = fx.cache.fetch("slow-b", &fx.url("slow-b"), DownloadOrigin::Preload).await.unwrap();
        assert_eq!(fx.cache.len().await, 2);

        a.ready().await.unwrap();
        b.ready().await.unwrap();
        assert_eq!(fx.keys().await, vec!["slow-a", "slow-b"]);
    }

    #[tokio::test]
    async fn error_page_fails_fetch_and_drops_entry() {
        let fx = fixture(3).await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(r#"{"message":"Clip not found"}"#, "application/json"),
            )
            .mount(&fx.server)
            .await;

        let mut events = fx.cache.subscribe();
        let handle = fx.cache.fetch("gone", &fx.url("gone"), DownloadOrigin::OnDemand).await.unwrap();
        let err = handle.ready().await.unwrap_err();

        assert!(matches!(err, CoreError::InvalidResponse { .. }));
        assert!(fx.cache.is_empty().await);
        assert_eq!(events.recv().await.unwrap().state, CacheEntryState::Downloading);
        assert_eq!(events.recv().await.unwrap().state, CacheEntryState::Failed);
        assert_eq!(part_files(fx.cache.scratch_dir()), 0);
    }

    #[tokio::test]
    async fn empty_body_is_invalid() {
        let fx = fixture(3).await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-type", "video/mp4"))
            .mount(&fx.server)
            .await;

        let handle = fx.cache.fetch("e0", &fx.url("e0"), DownloadOrigin::OnDemand).await.unwrap();
        assert!(matches!(
            handle.ready().await,
            Err(CoreError::InvalidResponse { .. })
        ));
        assert!(fx.cache.entry("e0").await.is_none());
    }

    #[tokio::test]
    async fn cancel_stops_download_and_removes_partial() {
        let fx = fixture(3).await;
        fx.mount_clip("e1", Duration::from_secs(10)).await;

        let handle = fx.cache.fetch("e1", &fx.url("e1"), DownloadOrigin::OnDemand).await.unwrap();
        assert!(fx.cache.cancel("e1").await);
        assert!(!fx.cache.cancel("e1").await);

        assert!(matches!(handle.ready().await, Err(CoreError::Cancelled)));
        assert!(fx.cache.is_empty().await);
        assert_eq!(part_files(fx.cache.scratch_dir()), 0);
    }

    #[tokio::test]
    async fn cancel_on_demand_spares_preloads() {
        let fx = fixture(3).await;
        fx.mount_clip("pre", Duration::from_millis(200)).await;
        fx.mount_clip("now", Duration::from_secs(10)).await;

        let pre = fx.cache.fetch("pre", &fx.url("pre"), DownloadOrigin::Preload).await.unwrap();
        let now = fx.cache.fetch("now", &fx.url("now"), DownloadOrigin::OnDemand).await.unwrap();
        assert!(!pre.is_on_demand());
        assert!(now.is_on_demand());

        assert!(!fx.cache.cancel_on_demand("pre").await);
        // Still held by `now`.
        assert!(!fx.cache.cancel_on_demand("now").await);
        assert_eq!(fx.cache.len().await, 2);

        drop(now);
        fx.cache.cancel_on_demand("now").await;

        pre.ready().await.unwrap();
        assert_eq!(fx.keys().await, vec!["pre"]);
        assert_eq!(part_files(fx.cache.scratch_dir()), 0);
    }

    #[tokio::test]
    async fn shared_on_demand_download_outlives_one_consumer() {
        let fx = fixture(3).await;
        Mock::given(method("GET"))
            .and(path("/api/events/shared/clip.mp4"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(CLIP, "video/mp4")
                    .set_delay(Duration::from_millis(300)),
            )
            .expect(1)
            .mount(&fx.server)
            .await;

        let url = fx.url("shared");
        let first = fx.cache.fetch("shared", &url, DownloadOrigin::OnDemand).await.unwrap();
        let second = fx.cache.fetch("shared", &url, DownloadOrigin::OnDemand).await.unwrap();

        drop(first);
        assert!(!fx.cache.cancel_on_demand("shared").await);

        let path = second.ready().await.unwrap();
        assert_eq!(std::fs::read(path).unwrap(), CLIP);
    }

    #[tokio::test]
    async fn dropping_last_on_demand_handle_abandons_download() {
        let fx = fixture(3).await;
        fx.mount_clip("e1", Duration::from_secs(10)).await;

        let mut events = fx.cache.subscribe();
        let handle = fx.cache.fetch("e1", &fx.url("e1"), DownloadOrigin::OnDemand).await.unwrap();
        assert_eq!(events.recv().await.unwrap().state, CacheEntryState::Downloading);
        drop(handle);

        let settled = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(settled.key, "e1");
        assert_eq!(settled.state, CacheEntryState::Failed);
        assert!(fx.cache.is_empty().await);
        assert_eq!(part_files(fx.cache.scratch_dir()), 0);
    }

    #[tokio::test]
    async fn preload_keeps_joined_on_demand_download_alive() {
        let fx = fixture(3).await;
        fx.mount_clip("e1", Duration::from_millis(300)).await;

        let url = fx.url("e1");
        let viewer = fx.cache.fetch("e1", &url, DownloadOrigin::OnDemand).await.unwrap();
        let warm = fx.cache.fetch("e1", &url, DownloadOrigin::Preload).await.unwrap();
        assert_eq!(
            fx.cache.entry("e1").await.unwrap().origin,
            DownloadOrigin::Preload
        );

        drop(viewer);
        assert!(!fx.cache.cancel_on_demand("e1").await);
        warm.ready().await.unwrap();
        assert_eq!(fx.cache.entry("e1").await.unwrap().state, CacheEntryState::Ready);
    }

    #[tokio::test]
    async fn open_purges_stale_files() {
        let dir = TempDir::new().unwrap();
        let scratch = dir.path().join("clips");
        std::fs::create_dir_all(&scratch).unwrap();
        std::fs::write(scratch.join("old.mp4"), b"stale").unwrap();
        std::fs::write(scratch.join("old.3.part"), b"half").unwrap();

        let client = MediaClient::with_client(
            reqwest::Client::new(),
            Endpoints::parse("http://127.0.0.1:9").unwrap(),
            Credentials::None,
        );
        let cache = ClipCache::open(
            client,
            CacheConfig {
                scratch_dir: scratch.clone(),
                ..CacheConfig::default()
            },
        )
        .await
        .unwrap();

        assert!(cache.is_empty().await);
        assert_eq!(std::fs::read_dir(&scratch).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn shutdown_cancels_purges_and_closes() {
        let fx = fixture(3).await;
        fx.mount_clip("ready", Duration::ZERO).await;
        fx.mount_clip("slow", Duration::from_secs(10)).await;

        let ready = fx.cache.fetch("ready", &fx.url("ready"), DownloadOrigin::Preload).await.unwrap();
        let ready_path = ready.ready().await.unwrap();
        let slow = fx.cache.fetch("slow", &fx.url("slow"), DownloadOrigin::Preload).await.unwrap();

        fx.cache.shutdown().await.unwrap();

        assert!(!ready_path.exists());
        assert!(matches!(slow.ready().await, Err(CoreError::Cancelled)));
        assert!(matches!(
            fx.cache.fetch("x", &fx.url("x"), DownloadOrigin::OnDemand).await,
            Err(CoreError::Cancelled)
        ));
    }

    #[test]
    fn clip_keys_keep_the_event_id() {
        assert_eq!(clip_key(" a:b ").unwrap(), "a:b");
        assert_eq!(clip_key("../etc/passwd").unwrap(), "../etc/passwd");
        assert!(clip_key("..").is_err());
        assert!(clip_key("  ").is_err());
    }

    #[tokio::test]
    async fn ids_with_one_stem_get_separate_files() {
        let fx = fixture(3).await;
        Mock::given(method("GET"))
            .and(path("/api/events/a%20b/clip.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(&b"spaced"[..], "video/mp4"))
            .mount(&fx.server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/events/a_b/clip.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(&b"underscored"[..], "video/mp4"))
            .mount(&fx.server)
            .await;

        let spaced = fx.cache.fetch("a b", &fx.url("a b"), DownloadOrigin::OnDemand).await.unwrap();
        let spaced = spaced.ready().await.unwrap();
        let underscored = fx.cache.fetch("a_b", &fx.url("a_b"), DownloadOrigin::OnDemand).await.unwrap();
        let underscored = underscored.ready().await.unwrap();

        assert_ne!(spaced, underscored);
        assert_eq!(std::fs::read(&spaced).unwrap(), b"spaced");
        assert_eq!(std::fs::read(&underscored).unwrap(), b"underscored");
        assert_eq!(fx.keys().await, vec!["a b", "a_b"]);
    }

    #[test]
    fn keys_are_sanitized() {
        assert_eq!(sanitize_key("1718000000.123-abc").unwrap(), "1718000000.123-abc");
        assert_eq!(sanitize_key("../etc/passwd").unwrap(), ".._etc_passwd");
        assert_eq!(sanitize_key(" a b ").unwrap(), "a_b");
        assert!(sanitize_key("..").is_err());
        assert!(sanitize_key("   ").is_err());
    }
}
