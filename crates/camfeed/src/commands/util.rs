//! Shared helpers for command handlers.

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytesize::ByteSize;
use indicatif::{ProgressBar, ProgressStyle};

use camfeed_core::QualityTier;
use camfeed_core::cache::sanitize_key;

use crate::cli::{GlobalOpts, QualityArg};
use crate::error::CliError;

/// Optional CLI quality flag as a core tier.
pub fn quality(arg: Option<QualityArg>) -> Option<QualityTier> {
    arg.map(QualityTier::from)
}

/// Human-readable size.
pub fn size(bytes: u64) -> String {
    ByteSize::b(bytes).to_string()
}

/// Default output file `<stem>.<ext>` in the working directory, with the
/// stem reduced to a safe file name.
pub fn default_file(stem: &str, ext: &str) -> Result<PathBuf, CliError> {
    Ok(PathBuf::from(format!("{}.{ext}", sanitize_key(stem)?)))
}

/// Write bytes to `path`, creating parent directories.
pub async fn write_file(path: &Path, bytes: &[u8]) -> Result<(), CliError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| storage_err(parent, &e))?;
    }
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| storage_err(path, &e))
}

/// Copy a cached clip out of the scratch directory.
pub async fn copy_file(from: &Path, to: &Path) -> Result<u64, CliError> {
    if let Some(parent) = to.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| storage_err(parent, &e))?;
    }
    tokio::fs::copy(from, to)
        .await
        .map_err(|e| storage_err(to, &e))
}

fn storage_err(path: &Path, err: &std::io::Error) -> CliError {
    CliError::Storage {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}

/// Spinner on stderr, hidden when quiet or not attached to a terminal.
pub fn spinner(global: &GlobalOpts, message: String) -> ProgressBar {
    if global.quiet || !std::io::stderr().is_terminal() {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg} ({elapsed})") {
        bar.set_style(style);
    }
    bar.set_message(message);
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

/// Status line on stderr, suppressed by --quiet.
pub fn note(global: &GlobalOpts, message: &str) {
    if !global.quiet {
        eprintln!("{message}");
    }
}
