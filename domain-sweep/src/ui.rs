//! Terminal output for domain-sweep.
//!
//! Human-readable header and summary for a run. Progress goes through
//! `tracing` on stderr; everything here is printed to stdout and skipped
//! entirely in `--json` mode.

use console::style;
use domain_sweep_lib::{RunReport, SweepConfig};
use std::path::Path;
use std::time::Duration;

// ── Header ───────────────────────────────────────────────────────────────────

/// Print a styled header at the start of a run.
pub fn print_header(input: &Path, count: usize, config: &SweepConfig, output_dir: &Path) {
    println!(
        "{} {} {}",
        style("domain-sweep").bold(),
        style(format!("v{}", env!("CARGO_PKG_VERSION"))).dim(),
        style(format!(
            "- {} identifier{} from {}",
            count,
            plural(count),
            input.display()
        ))
        .dim(),
    );
    println!(
        "  {}",
        style(format!(
            "Rate: {}/s  |  Concurrency: {} ({}..{})  |  Retries: {}  |  Output: {}",
            config.requests_per_second,
            config.initial_concurrency,
            config.min_concurrency,
            config.max_concurrency,
            config.max_retries,
            output_dir.display()
        ))
        .dim()
    );
    println!();
}

// ── Summary ──────────────────────────────────────────────────────────────────

/// Print the final summary bar with colored counts.
pub fn print_summary(report: &RunReport, duration: Duration) {
    println!(
        "  {}",
        style("────────────────────────────────────────────────────").dim()
    );
    println!(
        "  {} identifier{} in {:.1}s ({} pass{})  {}  {}  {}  {}  {}  {}  {}  {}",
        style(report.stats.total).bold(),
        plural(report.stats.total),
        duration.as_secs_f64(),
        report.passes,
        if report.passes == 1 { "" } else { "es" },
        style("|").dim(),
        style(format!("{} success", report.succeeded.len())).green(),
        style("|").dim(),
        style(format!("{} blocked", report.blocked.len())).red(),
        style("|").dim(),
        style(format!("{} failed", report.permanently_failed.len())).yellow(),
        style("|").dim(),
        style(format!("{} unknown", report.unknown.len() + report.stats.dropped)).dim(),
    );

    if report.cancelled {
        println!(
            "  {} {}",
            style("Interrupted:").yellow().bold(),
            format!(
                "{} identifier{} not processed: {}",
                report.unprocessed.len(),
                plural(report.unprocessed.len()),
                format_list(&report.unprocessed, 5)
            )
        );
    }
}

/// Print normalized identifiers for `--dry-run`.
pub fn print_dry_run(identifiers: &[String]) {
    for identifier in identifiers {
        println!("{}", identifier);
    }
    println!();
    println!(
        "{}",
        style(format!(
            "{} identifier{} would be probed",
            identifiers.len(),
            plural(identifiers.len())
        ))
        .dim()
    );
}

/// Join at most `max_show` items, noting how many were left out.
pub fn format_list(items: &[String], max_show: usize) -> String {
    if items.len() <= max_show {
        items.join(", ")
    } else {
        let shown = &items[..max_show];
        let remaining = items.len() - max_show;
        format!("{} (+{} more)", shown.join(", "), remaining)
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
