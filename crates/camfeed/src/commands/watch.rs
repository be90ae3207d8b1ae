//! Watch command: run one feed session and report every state change.

use std::future;
use std::time::Duration;

use chrono::Local;
use tokio::time::Instant;

use camfeed_core::{Controller, FeedHandle, FeedStatus};

use crate::cli::{GlobalOpts, WatchArgs};
use crate::error::CliError;
use crate::output;

use super::util;

/// One status line for table output.
fn status_line(status: &FeedStatus, feed: &FeedHandle, color: bool) -> String {
    let time = Local::now().format("%H:%M:%S");
    let mut line = format!(
        "{time}  {}  {}",
        status.camera,
        output::state_label(&status.state, color)
    );
    if status.consecutive_failures > 0 {
        line.push_str(&format!("  failures={}", status.consecutive_failures));
    }
    if status.state.is_fallback() {
        match feed.latest_frame() {
            Some(frame) if frame.camera == status.camera => {
                let bytes = u64::try_from(frame.len()).unwrap_or(u64::MAX);
                line.push_str(&format!(
                    "  snapshot {} ({}s old)",
                    util::size(bytes),
                    frame.age().as_secs()
                ));
            }
            _ => line.push_str("  no snapshot yet"),
        }
    }
    line
}

fn emit(status: &FeedStatus, feed: &FeedHandle, global: &GlobalOpts) -> Result<(), CliError> {
    let color = output::should_color(&global.color);
    let out = output::render_single(
        &global.output,
        status,
        |s| status_line(s, feed, color),
        |s| s.state.name().to_owned(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}

async fn deadline(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => future::pending().await,
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(
    controller: &Controller,
    args: WatchArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let feed = controller.open_feed(&args.target.camera, util::quality(args.target.quality))?;
    let stop_at = args
        .duration
        .map(|d| Instant::now() + Duration::from(d));

    let mut status = feed.status();
    let current = status.borrow_and_update().clone();
    emit(&current, &feed, global)?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let until = deadline(stop_at);
    tokio::pin!(until);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                util::note(global, "interrupted, closing feed");
                break;
            }
            () = &mut until => break,
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                emit(&current, &feed, global)?;
            }
        }
    }

    let last = feed.current();
    feed.close().await?;
    tracing::info!(camera = %last.camera, state = %last.state, "feed closed");
    Ok(())
}
