use crate::runner::{RunReport, StepStatus};
use comfy_table::{presets::ASCII_FULL, Table};
use serde::{Deserialize, Serialize};

/// Per-status totals for a finished run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusCounts {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub fn count_statuses(report: &RunReport) -> StatusCounts {
    let mut counts = StatusCounts::default();
    for outcome in &report.outcomes {
        match outcome.status {
            StepStatus::Succeeded => counts.succeeded += 1,
            StepStatus::Skipped => counts.skipped += 1,
            StepStatus::Failed => counts.failed += 1,
        }
    }
    counts
}

/// Render a run report as human-readable text: one line per outcome in
/// registration order, then a summary line with per-status counts. Pure.
pub fn render(report: &RunReport) -> String {
    let mut out = String::new();

    if report.outcomes.is_empty() {
        out.push_str("No steps to run.\n");
    } else {
        out.push_str("Run results:\n");
        for outcome in &report.outcomes {
            out.push_str(&format!(
                "  - [{}] {} ({} ms)\n",
                outcome.status, outcome.id, outcome.duration_ms
            ));
            if let Some(message) = &outcome.message {
                for line in message.lines() {
                    out.push_str(&format!("      {line}\n"));
                }
            }
        }
    }

    let counts = count_statuses(report);
    out.push_str(&format!(
        "\n{} succeeded, {} skipped, {} failed\noverall: {}\n",
        counts.succeeded, counts.skipped, counts.failed, report.status
    ));
    out
}

/// Render the outcomes as an ASCII table. Messages are flattened to their
/// first line to keep rows compact.
pub fn render_table(report: &RunReport) -> String {
    let mut table = Table::new();
    table.load_preset(ASCII_FULL);
    table.set_header(vec!["step", "status", "duration (ms)", "detail"]);

    for outcome in &report.outcomes {
        let detail = outcome
            .message
            .as_deref()
            .and_then(|message| message.lines().next())
            .unwrap_or_default()
            .to_string();
        table.add_row(vec![
            outcome.id.clone(),
            outcome.status.to_string(),
            outcome.duration_ms.to_string(),
            detail,
        ]);
    }

    table.to_string()
}
