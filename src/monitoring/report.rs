//! Run Report
//!
//! Console rendering of a finished pipeline run: the summary block and a
//! per-task duration chart.

use chrono::{DateTime, Local};

use crate::execution::{PipelineSummary, TaskResult};

/// Width of the chart bars in characters.
const CHART_WIDTH: usize = 50;

/// Width of the separator lines around the summary.
const RULE_WIDTH: usize = 60;

/// Renders the summary block printed when the pipeline finishes.
pub fn render_summary(summary: &PipelineSummary, finished_at: DateTime<Local>) -> String {
    let rule = "=".repeat(RULE_WIDTH);
    let mut out = String::new();

    out.push_str(&format!("\n{}\n", rule));
    out.push_str(&format!("{}\n", summary.result_line()));
    out.push_str(&format!(
        "{} ({} cores)\n",
        summary.resource_line(),
        num_cpus::get()
    ));
    out.push_str(&format!(
        "Finished: {}\n",
        finished_at.format("%Y-%m-%d %H:%M:%S")
    ));

    for result in summary.results.iter().filter(|r| !r.succeeded()) {
        if let Some(message) = result.error_message() {
            out.push_str(&format!("  failed {}: {}\n", result.name, message));
        }
    }

    out.push_str(&format!("{}\n", rule));
    out
}

/// Generates an ASCII chart of task durations.
///
/// Tasks run back to back, so each bar starts where the previous one ended,
/// scaled to the total time of all tasks.
pub fn duration_chart(results: &[TaskResult]) -> String {
    let mut output = String::from("\nTask durations:\n\n");

    let total: f64 = results.iter().map(|r| r.elapsed.as_secs_f64()).sum();
    if total <= 0.0 {
        return output;
    }

    let scale = CHART_WIDTH as f64 / total;
    let mut offset = 0.0;

    for result in results {
        let secs = result.elapsed.as_secs_f64();
        let start_pos = (offset * scale) as usize;
        let width = ((secs * scale) as usize).max(1);
        offset += secs;

        let mut bar = " ".repeat(start_pos.min(CHART_WIDTH - 1));
        bar.push_str(&"#".repeat(width));
        let bar = format!("{:width$}", bar, width = CHART_WIDTH);

        let mark = if result.succeeded() { "ok" } else { "FAILED" };
        output.push_str(&format!(
            "{:14} |{}| {:.2}s {}\n",
            truncate(&result.name, 14),
            bar,
            secs,
            mark
        ));
    }

    output.push_str(&format!("\nTotal: {:.2}s\n", total));
    output
}

/// Truncates a string to a maximum length.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        format!("{:width$}", s, width = max_len)
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}
