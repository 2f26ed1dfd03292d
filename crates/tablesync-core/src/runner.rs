//! Synchronization runner.
//!
//! For each desired table the runner decides between `CREATE TABLE` (the
//! table is missing) and a diff against the freshly introspected live
//! structure, then executes the resulting statements one at a time through
//! a [`Connection`]. The first rejected statement aborts the run. Every
//! executed, failed or skipped statement is appended to the audit log.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::ddl;
use crate::diff::{DiffOptions, SchemaDiffer};
use crate::error::{Result, SyncError};
use crate::prefix::PrefixRewriter;
use crate::structure::{
    ColumnSpec, DdlStatement, KeyDescriptor, Outcome, SequenceSpec, StatementKind, TableStructure,
};

// ================================================================
// Collaborators
// ================================================================

/// Executes SQL against the target database.
#[allow(async_fn_in_trait)]
pub trait Connection {
    /// Error type reported when the database rejects a statement.
    type Error: std::error::Error;

    /// Executes one statement text, which may hold several `;`-separated
    /// statements. Returns the number of affected rows.
    async fn execute(&self, sql: &str) -> std::result::Result<u64, Self::Error>;

    /// Quotes an identifier with double quotes.
    #[must_use]
    fn escape_identifier(&self, name: &str) -> String {
        ddl::quote_name(name)
    }

    /// Quotes a string literal with single quotes.
    #[must_use]
    fn escape_literal(&self, text: &str) -> String {
        format!("'{}'", text.replace('\'', "''"))
    }
}

/// Reads the live schema.
///
/// Implementations must query the catalog on every call: the runner relies
/// on fresh results after its own statements have run.
#[allow(async_fn_in_trait)]
pub trait SchemaIntrospector {
    /// Error type for introspection failures.
    type Error: std::error::Error;

    /// Names of the tables in the target schema.
    async fn list_tables(&self) -> std::result::Result<BTreeSet<String>, Self::Error>;

    /// Columns of a table in catalog order.
    async fn columns_of(
        &self,
        table: &str,
    ) -> std::result::Result<IndexMap<String, ColumnSpec>, Self::Error>;

    /// Key rows of a table, one per indexed column.
    async fn keys_of(&self, table: &str) -> std::result::Result<Vec<KeyDescriptor>, Self::Error>;

    /// Sequences owned by columns of a table.
    async fn sequences_of(
        &self,
        table: &str,
    ) -> std::result::Result<IndexMap<String, SequenceSpec>, Self::Error>;
}

fn introspection_failed(table: Option<&str>, err: &impl std::error::Error) -> SyncError {
    SyncError::IntrospectionFailed {
        table: table.map(str::to_string),
        message: err.to_string(),
    }
}

/// Rebuilds the live structure of one table.
///
/// # Errors
///
/// Returns [`SyncError::IntrospectionFailed`] naming `table` when any of the
/// catalog reads fails. The failure is not retried.
#[allow(clippy::future_not_send)]
pub async fn live_structure<I: SchemaIntrospector>(
    introspector: &I,
    table: &str,
) -> Result<TableStructure> {
    let columns = introspector
        .columns_of(table)
        .await
        .map_err(|e| introspection_failed(Some(table), &e))?;
    let sequences = introspector
        .sequences_of(table)
        .await
        .map_err(|e| introspection_failed(Some(table), &e))?;
    let keys = introspector
        .keys_of(table)
        .await
        .map_err(|e| introspection_failed(Some(table), &e))?;

    Ok(TableStructure::from_parts(table, columns, sequences, keys))
}

// ================================================================
// Options and reports
// ================================================================

/// Runner configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOptions {
    /// Placeholder and real prefix.
    pub rewriter: PrefixRewriter,
    /// Differ configuration.
    pub diff: DiffOptions,
    /// Plan and log statements without executing them.
    pub dry_run: bool,
}

impl SyncOptions {
    /// Creates options for the given prefixes.
    #[must_use]
    pub fn new(rewriter: PrefixRewriter) -> Self {
        Self {
            rewriter,
            diff: DiffOptions::default(),
            dry_run: false,
        }
    }

    /// Sets the differ configuration.
    #[must_use]
    pub const fn diff(mut self, diff: DiffOptions) -> Self {
        self.diff = diff;
        self
    }

    /// Enables dry-run mode.
    #[must_use]
    pub const fn dry_run(mut self, enabled: bool) -> Self {
        self.dry_run = enabled;
        self
    }
}

/// Whether a table is created or altered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableAction {
    /// The table was missing.
    Create,
    /// The table exists and was diffed.
    Alter,
}

/// Statements planned (and, after a run, executed) for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableReport {
    /// Real table name.
    pub table: String,
    /// Create or alter.
    pub action: TableAction,
    /// Statements in execution order.
    pub statements: Vec<DdlStatement>,
}

/// Result of a planning or synchronization pass.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncReport {
    /// Per-table results in input order.
    pub tables: Vec<TableReport>,
    /// Whether the pass ran in dry-run mode.
    pub dry_run: bool,
}

impl SyncReport {
    /// Total number of statements across all tables.
    #[must_use]
    pub fn statement_count(&self) -> usize {
        self.tables.iter().map(|t| t.statements.len()).sum()
    }

    /// Whether the live schema already matched.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.statement_count() == 0
    }
}

/// Status of one audit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditStatus {
    /// Executed successfully.
    Pass,
    /// Rejected, with the database message.
    Fail(String),
    /// Not executed (dry run).
    Skipped,
}

/// One line of the audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Real table name.
    pub table: String,
    /// Statement text.
    pub sql: String,
    /// What happened.
    pub status: AuditStatus,
    /// When it happened.
    pub at: DateTime<Utc>,
}

// ================================================================
// Runner
// ================================================================

/// Plans and applies desired table structures.
#[derive(Debug)]
pub struct MigrationRunner {
    options: SyncOptions,
    differ: SchemaDiffer,
    audit: Vec<AuditEntry>,
}

impl MigrationRunner {
    /// Creates a runner.
    #[must_use]
    pub fn new(options: SyncOptions) -> Self {
        let differ = SchemaDiffer::new(options.diff);
        Self {
            options,
            differ,
            audit: Vec::new(),
        }
    }

    /// The runner's options.
    #[must_use]
    pub const fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Every statement outcome recorded so far, oldest first.
    #[must_use]
    pub fn audit_log(&self) -> &[AuditEntry] {
        &self.audit
    }

    /// Computes the statements each table needs, without executing them.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::IntrospectionFailed`] when the live schema cannot
    /// be read and [`SyncError::StructureInvalid`] when a structure fails
    /// validation.
    #[allow(clippy::future_not_send)]
    pub async fn plan<I: SchemaIntrospector>(
        &self,
        desired: &[TableStructure],
        introspector: &I,
    ) -> Result<SyncReport> {
        let live_tables = list_tables(introspector).await?;
        let mut report = SyncReport {
            tables: Vec::with_capacity(desired.len()),
            dry_run: true,
        };
        for table in desired {
            report
                .tables
                .push(self.plan_table(table, &live_tables, introspector).await?);
        }
        Ok(report)
    }

    /// Brings the live schema in line with `desired`, table by table.
    ///
    /// Stops at the first rejected statement with
    /// [`SyncError::StatementExecutionFailed`]; statements already applied
    /// stay applied.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::StatementExecutionFailed`] for the first rejected
    /// statement, [`SyncError::IntrospectionFailed`] when the live schema
    /// cannot be read and [`SyncError::StructureInvalid`] when a structure
    /// fails validation.
    #[allow(clippy::future_not_send)]
    pub async fn synchronize<C: Connection, I: SchemaIntrospector>(
        &mut self,
        desired: &[TableStructure],
        conn: &C,
        introspector: &I,
    ) -> Result<SyncReport> {
        let live_tables = list_tables(introspector).await?;
        let mut report = SyncReport {
            tables: Vec::with_capacity(desired.len()),
            dry_run: self.options.dry_run,
        };

        for table in desired {
            let mut planned = self.plan_table(table, &live_tables, introspector).await?;
            info!(
                table = %planned.table,
                action = ?planned.action,
                statements = planned.statements.len(),
                "Synchronizing table"
            );

            for statement in &mut planned.statements {
                if self.options.dry_run {
                    debug!(table = %planned.table, sql = %statement.sql, "Dry run, not executing");
                    statement.outcome = Outcome::Skipped;
                    self.record(&planned.table, &statement.sql, AuditStatus::Skipped);
                    continue;
                }

                debug!(table = %planned.table, sql = %statement.sql, "Executing SQL");
                match conn.execute(&statement.sql).await {
                    Ok(_) => {
                        statement.outcome = Outcome::Passed;
                        self.record(&planned.table, &statement.sql, AuditStatus::Pass);
                    }
                    Err(err) => {
                        let message = err.to_string();
                        warn!(
                            table = %planned.table,
                            sql = %statement.sql,
                            error = %message,
                            "Statement failed, aborting"
                        );
                        statement.outcome = Outcome::Failed(message.clone());
                        self.record(
                            &planned.table,
                            &statement.sql,
                            AuditStatus::Fail(message.clone()),
                        );
                        return Err(SyncError::StatementExecutionFailed {
                            sql: statement.sql.clone(),
                            message,
                        });
                    }
                }
            }

            report.tables.push(planned);
        }

        info!(
            tables = report.tables.len(),
            statements = report.statement_count(),
            dry_run = report.dry_run,
            "Synchronization finished"
        );
        Ok(report)
    }

    #[allow(clippy::future_not_send)]
    async fn plan_table<I: SchemaIntrospector>(
        &self,
        table: &TableStructure,
        live_tables: &BTreeSet<String>,
        introspector: &I,
    ) -> Result<TableReport> {
        let resolved = table.resolve_prefix(&self.options.rewriter);

        if !live_tables.contains(&resolved.table_name) {
            resolved.validate()?;
            let statement =
                DdlStatement::new(StatementKind::CreateTable, ddl::create_table_ddl(&resolved));
            debug!(table = %resolved.table_name, sql = %statement.sql, "Planned statement");
            return Ok(TableReport {
                table: resolved.table_name,
                action: TableAction::Create,
                statements: vec![statement],
            });
        }

        let live = live_structure(introspector, &resolved.table_name).await?;
        let statements = self.differ.diff(&resolved, &live)?;
        Ok(TableReport {
            table: resolved.table_name,
            action: TableAction::Alter,
            statements,
        })
    }

    fn record(&mut self, table: &str, sql: &str, status: AuditStatus) {
        self.audit.push(AuditEntry {
            table: table.to_string(),
            sql: sql.to_string(),
            status,
            at: Utc::now(),
        });
    }
}

#[allow(clippy::future_not_send)]
async fn list_tables<I: SchemaIntrospector>(introspector: &I) -> Result<BTreeSet<String>> {
    introspector
        .list_tables()
        .await
        .map_err(|e| introspection_failed(None, &e))
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;

    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("{0}")]
    struct FakeError(String);

    type FakeResult<T> = std::result::Result<T, FakeError>;

    #[derive(Default)]
    struct FakeDb {
        tables: HashMap<String, TableStructure>,
        executed: RefCell<Vec<String>>,
        fail_on: Option<String>,
        list_calls: Cell<usize>,
        broken_catalog: bool,
        /// (table, call) pair whose per-table catalog read fails.
        broken_call: Option<(&'static str, &'static str)>,
    }

    impl FakeDb {
        fn with_table(mut self, table: TableStructure) -> Self {
            self.tables.insert(table.table_name.clone(), table);
            self
        }

        fn structure(&self, table: &str, call: &str) -> FakeResult<&TableStructure> {
            if self.broken_call == Some((table, call)) {
                return Err(FakeError(format!("{call} of {table}: permission denied")));
            }
            self.tables
                .get(table)
                .ok_or_else(|| FakeError(format!("relation \"{table}\" does not exist")))
        }
    }

    impl Connection for FakeDb {
        type Error = FakeError;

        async fn execute(&self, sql: &str) -> FakeResult<u64> {
            if self.fail_on.as_deref().is_some_and(|needle| sql.contains(needle)) {
                return Err(FakeError("syntax error".to_string()));
            }
            self.executed.borrow_mut().push(sql.to_string());
            Ok(0)
        }
    }

    impl SchemaIntrospector for FakeDb {
        type Error = FakeError;

        async fn list_tables(&self) -> FakeResult<BTreeSet<String>> {
            self.list_calls.set(self.list_calls.get() + 1);
            if self.broken_catalog {
                return Err(FakeError("permission denied".to_string()));
            }
            Ok(self.tables.keys().cloned().collect())
        }

        async fn columns_of(&self, table: &str) -> FakeResult<IndexMap<String, ColumnSpec>> {
            Ok(self.structure(table, "columns")?.columns.clone())
        }

        async fn keys_of(&self, table: &str) -> FakeResult<Vec<KeyDescriptor>> {
            Ok(self
                .structure(table, "keys")?
                .key_groups
                .values()
                .flat_map(|g| g.members().to_vec())
                .collect())
        }

        async fn sequences_of(
            &self,
            table: &str,
        ) -> FakeResult<IndexMap<String, SequenceSpec>> {
            Ok(self.structure(table, "sequences")?.sequences.clone())
        }
    }

    fn options() -> SyncOptions {
        SyncOptions::new(PrefixRewriter::new("#__", "jos_"))
    }

    fn desired_users() -> TableStructure {
        TableStructure::new("#__users")
            .column(ColumnSpec::new("id", "integer").not_null())
            .column(ColumnSpec::new("name", "text"))
    }

    #[tokio::test]
    async fn missing_table_is_created() {
        let db = FakeDb::default();
        let mut runner = MigrationRunner::new(options());

        let report = runner.synchronize(&[desired_users()], &db, &db).await.unwrap();
        assert_eq!(report.tables[0].table, "jos_users");
        assert_eq!(report.tables[0].action, TableAction::Create);
        assert_eq!(
            db.executed.borrow().as_slice(),
            ["CREATE TABLE \"jos_users\" (\"id\" integer NOT NULL, \"name\" text)"]
        );
        assert_eq!(runner.audit_log().len(), 1);
        assert_eq!(runner.audit_log()[0].status, AuditStatus::Pass);
    }

    #[tokio::test]
    async fn existing_table_is_diffed() {
        let live = TableStructure::new("jos_users")
            .column(ColumnSpec::new("id", "integer").not_null())
            .column(ColumnSpec::new("legacy", "text"));
        let db = FakeDb::default().with_table(live);
        let mut runner = MigrationRunner::new(options());

        let report = runner.synchronize(&[desired_users()], &db, &db).await.unwrap();
        assert_eq!(report.tables[0].action, TableAction::Alter);
        assert_eq!(
            db.executed.borrow().as_slice(),
            [
                "ALTER TABLE \"jos_users\" ADD COLUMN \"name\" text",
                "ALTER TABLE \"jos_users\" DROP COLUMN \"legacy\""
            ]
        );
        assert!(report.tables[0]
            .statements
            .iter()
            .all(|s| s.outcome == Outcome::Passed));
    }

    #[tokio::test]
    async fn first_failure_aborts_the_run() {
        let live = TableStructure::new("jos_users").column(ColumnSpec::new("legacy", "text"));
        let db = FakeDb {
            fail_on: Some("ADD COLUMN \"name\"".to_string()),
            ..FakeDb::default()
        }
        .with_table(live);
        let other = TableStructure::new("#__other").column(ColumnSpec::new("x", "text"));
        let mut runner = MigrationRunner::new(options());

        let err = runner
            .synchronize(&[desired_users(), other], &db, &db)
            .await
            .unwrap_err();
        match err {
            SyncError::StatementExecutionFailed { sql, message } => {
                assert!(sql.contains("ADD COLUMN \"name\""));
                assert_eq!(message, "syntax error");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // "id" was added, "name" failed; nothing after it ran.
        assert_eq!(db.executed.borrow().len(), 1);
        let statuses: Vec<&AuditStatus> = runner.audit_log().iter().map(|e| &e.status).collect();
        assert_eq!(
            statuses,
            vec![&AuditStatus::Pass, &AuditStatus::Fail("syntax error".to_string())]
        );
    }

    #[tokio::test]
    async fn dry_run_executes_nothing() {
        let db = FakeDb::default();
        let mut runner = MigrationRunner::new(options().dry_run(true));

        let report = runner.synchronize(&[desired_users()], &db, &db).await.unwrap();
        assert!(report.dry_run);
        assert!(db.executed.borrow().is_empty());
        assert_eq!(report.tables[0].statements[0].outcome, Outcome::Skipped);
        assert_eq!(runner.audit_log()[0].status, AuditStatus::Skipped);
    }

    #[tokio::test]
    async fn plan_lists_tables_once_and_executes_nothing() {
        let db = FakeDb::default().with_table(desired_users().resolve_prefix(&options().rewriter));
        let runner = MigrationRunner::new(options());

        let other = TableStructure::new("#__other").column(ColumnSpec::new("x", "text"));
        let report = runner.plan(&[desired_users(), other], &db).await.unwrap();
        assert_eq!(db.list_calls.get(), 1);
        assert!(db.executed.borrow().is_empty());
        assert!(report.tables[0].statements.is_empty());
        assert_eq!(report.tables[1].action, TableAction::Create);
        assert_eq!(report.statement_count(), 1);
    }

    #[tokio::test]
    async fn catalog_failure_is_introspection_error() {
        let db = FakeDb {
            broken_catalog: true,
            ..FakeDb::default()
        };
        let mut runner = MigrationRunner::new(options());
        let err = runner
            .synchronize(&[desired_users()], &db, &db)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Introspection failed: permission denied");
    }

    #[tokio::test]
    async fn per_table_catalog_failure_names_the_table() {
        for call in ["columns", "keys", "sequences"] {
            let db = FakeDb {
                broken_call: Some(("jos_users", call)),
                ..FakeDb::default()
            }
            .with_table(TableStructure::new("jos_users"));

            match live_structure(&db, "jos_users").await.unwrap_err() {
                SyncError::IntrospectionFailed { table, message } => {
                    assert_eq!(table.as_deref(), Some("jos_users"));
                    assert_eq!(message, format!("{call} of jos_users: permission denied"));
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn introspection_failure_stops_the_run() {
        let live = TableStructure::new("jos_users").column(ColumnSpec::new("legacy", "text"));
        let db = FakeDb {
            broken_call: Some(("jos_users", "keys")),
            ..FakeDb::default()
        }
        .with_table(live);
        let before = TableStructure::new("#__before").column(ColumnSpec::new("x", "text"));
        let after = TableStructure::new("#__after").column(ColumnSpec::new("y", "text"));
        let mut runner = MigrationRunner::new(options());

        let err = runner
            .synchronize(&[before, desired_users(), after], &db, &db)
            .await
            .unwrap_err();
        assert!(matches!(
            &err,
            SyncError::IntrospectionFailed { table: Some(table), .. } if table == "jos_users"
        ));
        assert_eq!(
            err.to_string(),
            "Introspection failed for table 'jos_users': keys of jos_users: permission denied"
        );

        // Only the table planned before the failure was touched.
        assert_eq!(
            db.executed.borrow().as_slice(),
            ["CREATE TABLE \"jos_before\" (\"x\" text)"]
        );
        assert_eq!(runner.audit_log().len(), 1);
        assert_eq!(db.list_calls.get(), 1);
    }

    #[test]
    fn default_escaping() {
        let db = FakeDb::default();
        assert_eq!(db.escape_identifier("public.t"), "\"public\".\"t\"");
        assert_eq!(db.escape_literal("it's"), "'it''s'");
    }
}
