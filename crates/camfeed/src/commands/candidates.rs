//! Candidates command handler.

use tabled::Tabled;

use camfeed_core::{Controller, StreamCandidate};

use crate::cli::{CameraArgs, GlobalOpts};
use crate::error::CliError;
use crate::output;

use super::util;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct CandidateRow {
    #[tabled(rename = "Candidate")]
    label: String,
    #[tabled(rename = "Transport")]
    transport: String,
    #[tabled(rename = "Tier")]
    tier: String,
    #[tabled(rename = "Playable")]
    playable: String,
    #[tabled(rename = "URL")]
    url: String,
}

impl CandidateRow {
    fn new(candidate: &StreamCandidate, color: bool) -> Self {
        Self {
            label: candidate.label(),
            transport: candidate.transport.to_string(),
            tier: candidate.tier.to_string(),
            playable: output::flag(candidate.is_stream(), color),
            url: candidate.url.to_string(),
        }
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(
    controller: &Controller,
    args: &CameraArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let candidates = controller.candidates(&args.camera, util::quality(args.quality));
    let color = output::should_color(&global.color);

    let out = output::render_list(
        &global.output,
        &candidates,
        |c| CandidateRow::new(c, color),
        |c| c.url.to_string(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}
