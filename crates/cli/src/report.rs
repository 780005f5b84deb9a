//! Human-readable and JSON rendering of step outcomes.

use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};

use gitpush_core::config::GitScm;
use gitpush_core::models::{MergeAction, Outcome, PushReport};

use crate::style;

/// Print `outcome` to stdout, as JSON when `json` is set.
pub fn print_outcome(outcome: &Outcome, json: bool) {
    if json {
        let value = outcome.to_json();
        match serde_json::to_string_pretty(&value) {
            Ok(text) => println!("{text}"),
            Err(_) => println!("{value}"),
        }
        return;
    }

    match outcome {
        Outcome::Success(report) => {
            println!(
                "{}",
                style::success(&format!(
                    "Pushed {} to {}/{}",
                    style::short_sha(&report.pushed_head),
                    report.repository,
                    report.branch
                ))
            );
            println!();
            println!("{}", report_table(report));
        }
        Outcome::Skipped(reason) => {
            println!("{}", style::skipped(&format!("Nothing pushed: {reason}")));
        }
        Outcome::Failed(err) => {
            eprintln!("{}", style::error(&format!("Push failed: {err}")));
            if err.is_retryable() {
                eprintln!("{}", style::dim("  the failure is transient; re-running may succeed"));
            }
        }
    }
}

fn report_table(report: &PushReport) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Field", "Value"]);

    let action = match report.action {
        MergeAction::MergeCommit => Cell::new(report.action).fg(Color::Yellow),
        MergeAction::BranchCreated => Cell::new(report.action).fg(Color::Cyan),
        _ => Cell::new(report.action).fg(Color::Green),
    };
    let elapsed = report.completed_at - report.started_at;

    table.add_row(vec![Cell::new("Remote"), Cell::new(&report.repository)]);
    table.add_row(vec![Cell::new("URL"), Cell::new(&report.uri)]);
    table.add_row(vec![Cell::new("Branch"), Cell::new(&report.branch)]);
    table.add_row(vec![
        Cell::new("Remote tip"),
        Cell::new(report.remote_tip.as_deref().map(style::short_sha).unwrap_or("—")),
    ]);
    table.add_row(vec![
        Cell::new("Local HEAD"),
        Cell::new(style::short_sha(&report.head_before)),
    ]);
    table.add_row(vec![Cell::new("Integration"), action]);
    table.add_row(vec![
        Cell::new("Pushed"),
        Cell::new(style::short_sha(&report.pushed_head)),
    ]);
    table.add_row(vec![
        Cell::new("New tags"),
        Cell::new(if report.tags.is_empty() {
            "—".to_string()
        } else {
            report.tags.join(", ")
        }),
    ]);
    table.add_row(vec![
        Cell::new("Duration"),
        Cell::new(format!("{} ms", elapsed.num_milliseconds())),
    ]);
    table
}

/// Table of the remotes a job configures.
pub fn remotes_table(git: &GitScm) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Remote", "URLs", "Fetch ref-specs"]);
    for remote in &git.remotes {
        table.add_row(vec![
            Cell::new(&remote.name),
            Cell::new(remote.urls.join("\n")),
            Cell::new(remote.effective_fetch_refspecs().join("\n")),
        ]);
    }
    table
}
