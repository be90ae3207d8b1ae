//! Clip command handlers: fetch (optionally play) and preload.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tabled::Tabled;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use camfeed_core::cache::clip_key;
use camfeed_core::{
    CacheEntry, CacheEntryState, Controller, CoreError, DownloadOrigin, PlaybackEvent,
};

use crate::cli::{ClipArgs, ClipCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

use super::util;

// ── Output types ────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct SavedClip {
    event: String,
    path: PathBuf,
    size_bytes: u64,
}

#[derive(Tabled)]
struct ClipRow {
    #[tabled(rename = "Event")]
    key: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Downloaded")]
    downloaded_at: String,
}

impl From<&CacheEntry> for ClipRow {
    fn from(entry: &CacheEntry) -> Self {
        Self {
            key: entry.key.clone(),
            state: entry.state.to_string(),
            size: util::size(entry.size_bytes),
            downloaded_at: entry.downloaded_at.map_or_else(
                || "-".into(),
                |t: DateTime<Utc>| t.with_timezone(&Local).format("%H:%M:%S").to_string(),
            ),
        }
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(
    controller: &Controller,
    args: ClipArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match args.command {
        ClipCommand::Fetch {
            event,
            output_file,
            play: true,
            ..
        } => play(controller, &event, output_file.as_deref(), global).await,
        ClipCommand::Fetch {
            event, output_file, ..
        } => fetch(controller, event, output_file, global).await,
        ClipCommand::Preload { events, dir } => {
            preload(controller, &events, dir.as_deref(), global).await
        }
    }
}

// ── Fetch ───────────────────────────────────────────────────────────

async fn fetch(
    controller: &Controller,
    event: String,
    output_file: Option<PathBuf>,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let dest = match output_file {
        Some(path) => path,
        None => util::default_file(&event, "mp4")?,
    };

    let spinner = util::spinner(global, format!("Downloading clip {event}"));
    let downloaded = tokio::select! {
        path = controller.fetch_clip(&event) => path,
        _ = tokio::signal::ctrl_c() => Err(CoreError::Cancelled),
    };
    spinner.finish_and_clear();
    let cached = downloaded?;

    let size_bytes = util::copy_file(&cached, &dest).await?;
    print_saved(
        &SavedClip {
            event,
            path: dest,
            size_bytes,
        },
        global,
    )
}

async fn play(
    controller: &Controller,
    event: &str,
    output_file: Option<&Path>,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let mut session = controller.play_clip(event).await?;

    let spinner = util::spinner(global, format!("Downloading clip {event}"));
    let bound = tokio::select! {
        path = session.play() => path,
        _ = tokio::signal::ctrl_c() => Err(CoreError::Cancelled),
    };
    spinner.finish_and_clear();
    let path = match bound {
        Ok(path) => path,
        Err(err) => {
            session.close().await;
            return Err(err.into());
        }
    };

    if let Some(dest) = output_file {
        let size_bytes = util::copy_file(&path, dest).await?;
        print_saved(
            &SavedClip {
                event: event.to_owned(),
                path: dest.to_path_buf(),
                size_bytes,
            },
            global,
        )?;
    }

    util::note(global, &format!("Playing clip {event}, Ctrl-C to stop"));
    let outcome = tokio::select! {
        signal = session.finished() => Some(signal),
        _ = tokio::signal::ctrl_c() => None,
    };
    session.close().await;

    match outcome {
        Some(PlaybackEvent::Failed(message)) => Err(CliError::Playback { message }),
        Some(PlaybackEvent::Ended) | None => Ok(()),
    }
}

fn print_saved(saved: &SavedClip, global: &GlobalOpts) -> Result<(), CliError> {
    let out = output::render_single(
        &global.output,
        saved,
        |s| {
            format!(
                "Saved clip {} ({}) to {}",
                s.event,
                util::size(s.size_bytes),
                s.path.display()
            )
        },
        |s| s.path.display().to_string(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}

// ── Preload ─────────────────────────────────────────────────────────

fn progress(global: &GlobalOpts, total: usize) -> ProgressBar {
    if global.quiet {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(u64::try_from(total).unwrap_or(u64::MAX));
    if let Ok(style) = ProgressStyle::with_template("{bar:30} {pos}/{len} clips {msg}") {
        bar.set_style(style);
    }
    bar
}

fn dropped(key: &str) -> CacheEntry {
    CacheEntry {
        key: key.to_owned(),
        local_path: PathBuf::new(),
        size_bytes: 0,
        downloaded_at: None,
        state: CacheEntryState::Failed,
        origin: DownloadOrigin::Preload,
    }
}

/// Settle pending keys from a registry scan after missed updates. A key
/// that is neither downloading nor ready was dropped by a failed download.
async fn rescan(
    controller: &Controller,
    pending: &mut BTreeSet<String>,
    finished: &mut BTreeMap<String, CacheEntry>,
) {
    let entries: BTreeMap<String, CacheEntry> = controller
        .cache()
        .entries()
        .await
        .into_iter()
        .map(|e| (e.key.clone(), e))
        .collect();
    pending.retain(|key| match entries.get(key) {
        Some(entry) if entry.state == CacheEntryState::Downloading => true,
        Some(entry) => {
            finished.insert(key.clone(), entry.clone());
            false
        }
        None => {
            finished.insert(key.clone(), dropped(key));
            false
        }
    });
}

async fn preload(
    controller: &Controller,
    events: &[String],
    dir: Option<&Path>,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let mut updates = controller.cache().subscribe();
    let mut pending = BTreeSet::new();
    for event in events {
        pending.insert(clip_key(event)?);
        controller.preload_clip(event).await?;
    }
    let total = pending.len();
    let mut finished = BTreeMap::new();
    rescan(controller, &mut pending, &mut finished).await;

    let bar = progress(global, total);
    bar.set_position(u64::try_from(finished.len()).unwrap_or(0));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    while !pending.is_empty() {
        tokio::select! {
            _ = &mut ctrl_c => {
                bar.abandon_with_message("interrupted");
                return Err(CliError::Cancelled);
            }
            update = updates.recv() => match update {
                Ok(entry) => {
                    if entry.state == CacheEntryState::Downloading || !pending.remove(&entry.key) {
                        continue;
                    }
                    if entry.state != CacheEntryState::Ready {
                        warn!(key = %entry.key, state = %entry.state, "clip preload did not complete");
                    }
                    bar.inc(1);
                    finished.insert(entry.key.clone(), entry);
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "missed cache updates, rescanning");
                    rescan(controller, &mut pending, &mut finished).await;
                    bar.set_position(u64::try_from(finished.len()).unwrap_or(0));
                }
                Err(RecvError::Closed) => {
                    rescan(controller, &mut pending, &mut finished).await;
                    break;
                }
            }
        }
    }
    bar.finish_and_clear();

    if let Some(dir) = dir {
        for entry in finished
            .values()
            .filter(|e| e.state == CacheEntryState::Ready)
        {
            let dest = dir.join(util::default_file(&entry.key, "mp4")?);
            util::copy_file(&entry.local_path, &dest).await?;
        }
    }

    let rows: Vec<CacheEntry> = finished.into_values().collect();
    let out = output::render_list(&global.output, &rows, |e| ClipRow::from(e), |e| {
        format!("{} {}", e.key, e.state)
    })?;
    output::print_output(&out, global.quiet);

    let failed = rows
        .iter()
        .filter(|e| e.state != CacheEntryState::Ready)
        .count();
    if failed == 0 {
        Ok(())
    } else {
        Err(CliError::PreloadFailed { failed, total })
    }
}
