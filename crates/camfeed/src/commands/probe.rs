//! Probe command handler.

use tabled::Tabled;

use camfeed_core::{Controller, ProbeResult};

use crate::cli::{GlobalOpts, ProbeArgs};
use crate::error::CliError;
use crate::output;

use super::util;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct ProbeRow {
    #[tabled(rename = "Candidate")]
    label: String,
    #[tabled(rename = "Reachable")]
    reachable: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Content-Type")]
    content_type: String,
    #[tabled(rename = "Latency")]
    latency: String,
    #[tabled(rename = "Error")]
    error: String,
}

impl ProbeRow {
    fn new(result: &ProbeResult, color: bool) -> Self {
        Self {
            label: result.candidate.label(),
            reachable: output::flag(result.reachable, color),
            status: result
                .http_status
                .map_or_else(|| "-".into(), |s| s.to_string()),
            content_type: result.content_type.clone().unwrap_or_else(|| "-".into()),
            latency: result
                .latency_ms
                .map_or_else(|| "-".into(), |ms| format!("{ms:.0} ms")),
            error: match (&result.error, &result.detail) {
                (Some(kind), Some(detail)) => format!("{kind}: {detail}"),
                (Some(kind), None) => kind.to_string(),
                (None, _) => String::new(),
            },
        }
    }
}

fn plain_line(result: &ProbeResult) -> String {
    let outcome = match result.error {
        Some(kind) => kind.to_string(),
        None if result.reachable => "ok".into(),
        None => "unreachable".into(),
    };
    format!("{} {outcome}", result.candidate.label())
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(
    controller: &Controller,
    args: &ProbeArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let camera = &args.target.camera;
    let quality = util::quality(args.target.quality);

    let results = if args.all {
        controller.probe_all(camera, quality).await
    } else {
        controller.probe(camera, quality).await
    };

    let color = output::should_color(&global.color);
    let out = output::render_list(
        &global.output,
        &results,
        |r| ProbeRow::new(r, color),
        plain_line,
    )?;
    output::print_output(&out, global.quiet);

    if results.iter().any(ProbeResult::is_usable_stream) {
        Ok(())
    } else {
        Err(CliError::NoStream {
            camera: camera.clone(),
        })
    }
}
