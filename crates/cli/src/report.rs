use std::fmt::Write as _;

use stackcheck_core::{PhaseStatus, RunReport};

/// Plain-text summary printed at the end of a run.
pub fn render(report: &RunReport) -> String {
    let width = report
        .results()
        .iter()
        .map(|r| r.name().len())
        .max()
        .unwrap_or(0);

    let mut out = String::from("\nResults\n");
    for result in report.results() {
        let marker = match result.status() {
            PhaseStatus::Succeeded => "ok  ",
            PhaseStatus::Skipped => "skip",
            PhaseStatus::TimedOut => "time",
            _ => "FAIL",
        };
        let duration = if result.is_skipped() {
            String::new()
        } else {
            format!("{:.2}s", result.duration().as_secs_f64())
        };
        let _ = write!(
            out,
            "  [{}] {:<width$}  {:>8}",
            marker,
            result.name(),
            duration,
            width = width
        );
        if let Some(message) = result.error_message() {
            let first_line = message.lines().next().unwrap_or_default();
            let _ = write!(out, "  {}", first_line);
        }
        out.push('\n');
    }

    let _ = writeln!(
        out,
        "\n{} phases: {} passed, {} failed, {} timed out, {} skipped in {:.2}s",
        report.results().len(),
        report.passed(),
        report.count(PhaseStatus::Failed),
        report.count(PhaseStatus::TimedOut),
        report.count(PhaseStatus::Skipped),
        report.total_duration().as_secs_f64()
    );
    out.push_str(if report.is_success() {
        "All phases passed\n"
    } else {
        "Run failed\n"
    });
    out
}

/// Full output of every phase that did not succeed.
pub fn render_failures(report: &RunReport) -> String {
    let mut out = String::new();
    for result in report.unsuccessful() {
        if result.output().trim().is_empty() {
            continue;
        }
        let _ = writeln!(out, "\n--- {} output ---", result.name());
        out.push_str(result.output().trim_end());
        out.push('\n');
    }
    out
}
