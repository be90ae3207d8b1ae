//! Snapshot command handler.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use camfeed_core::Controller;

use crate::cli::{GlobalOpts, SnapshotArgs};
use crate::error::CliError;
use crate::output;

use super::util;

/// What was written, for structured output.
#[derive(Debug, Serialize)]
struct SavedSnapshot {
    camera: String,
    path: PathBuf,
    size_bytes: u64,
    content_type: Option<String>,
    fetched_at: DateTime<Utc>,
}

pub async fn handle(
    controller: &Controller,
    args: SnapshotArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let camera = args.target.camera;
    let path = match args.output_file {
        Some(path) => path,
        None => util::default_file(&camera, "jpg")?,
    };

    let frame = controller
        .fetch_snapshot(&camera, util::quality(args.target.quality))
        .await?;
    util::write_file(&path, &frame.bytes).await?;

    let saved = SavedSnapshot {
        camera,
        path,
        size_bytes: u64::try_from(frame.len()).unwrap_or(u64::MAX),
        content_type: frame.content_type.clone(),
        fetched_at: frame.fetched_at,
    };
    let out = output::render_single(
        &global.output,
        &saved,
        |s| {
            format!(
                "Saved {} from {} to {}",
                util::size(s.size_bytes),
                s.camera,
                s.path.display()
            )
        },
        |s| s.path.display().to_string(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}
