//! Rendering of reports and audit logs, as plain text or JSON.

use tablesync_core::runner::{AuditEntry, AuditStatus, SyncReport, TableAction};
use tablesync_core::structure::Outcome;

use crate::error::Result;

/// Renders a report, one block per table.
#[must_use]
pub fn render_report(report: &SyncReport) -> String {
    let mut lines = Vec::new();
    for table in &report.tables {
        let action = match table.action {
            TableAction::Create => "create",
            TableAction::Alter => "alter",
        };
        lines.push(format!("{} ({action})", table.table));
        if table.statements.is_empty() {
            lines.push("  up to date".to_string());
        }
        lines.extend(table.statements.iter().map(|statement| {
            let marker = match &statement.outcome {
                Outcome::Pending | Outcome::Skipped => " ",
                Outcome::Passed => "X",
                Outcome::Failed(_) => "!",
            };
            format!(" [{marker}] {};", statement.sql)
        }));
    }
    lines.push(format!(
        "{} statement(s) across {} table(s){}",
        report.statement_count(),
        report.tables.len(),
        if report.dry_run { ", dry run" } else { "" }
    ));
    lines.join("\n") + "\n"
}

/// Renders audit entries, oldest first.
#[must_use]
pub fn render_audit(entries: &[AuditEntry]) -> String {
    entries
        .iter()
        .map(|entry| {
            let status = match &entry.status {
                AuditStatus::Pass => "PASS".to_string(),
                AuditStatus::Fail(message) => format!("FAIL: {message}"),
                AuditStatus::Skipped => "SKIPPED".to_string(),
            };
            format!(
                "{} {} {status}\n    {}\n",
                entry.at.format("%Y-%m-%d %H:%M:%S"),
                entry.table,
                entry.sql
            )
        })
        .collect()
}

/// Renders a report as pretty-printed JSON.
///
/// # Errors
///
/// Returns [`CliError::Serialization`] when the report cannot be encoded.
///
/// [`CliError::Serialization`]: crate::error::CliError::Serialization
pub fn render_json(report: &SyncReport) -> Result<String> {
    Ok(serde_json::to_string_pretty(report)?)
}
