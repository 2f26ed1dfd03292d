//! Integration tests for structure synchronization.
//!
//! These tests drive the public API the way the CLI does: parse a
//! definition, resolve prefixes, diff against a live structure and run the
//! result through in-memory collaborators.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};

use indexmap::IndexMap;
use tablesync_core::ddl::column_definition_ddl;
use tablesync_core::prefix::{rewrite, rewrite_legacy};
use tablesync_core::prelude::*;

// =============================================================================
// In-memory database
// =============================================================================

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct MemoryError(String);

type MemoryResult<T> = std::result::Result<T, MemoryError>;

#[derive(Default)]
struct MemoryDb {
    tables: HashMap<String, TableStructure>,
    executed: RefCell<Vec<String>>,
}

impl MemoryDb {
    fn with_table(mut self, table: TableStructure) -> Self {
        self.tables.insert(table.table_name.clone(), table);
        self
    }

    fn get(&self, table: &str) -> MemoryResult<&TableStructure> {
        self.tables
            .get(table)
            .ok_or_else(|| MemoryError(format!("no table {table}")))
    }
}

impl Connection for MemoryDb {
    type Error = MemoryError;

    async fn execute(&self, sql: &str) -> MemoryResult<u64> {
        self.executed.borrow_mut().push(sql.to_string());
        Ok(0)
    }
}

impl SchemaIntrospector for MemoryDb {
    type Error = MemoryError;

    async fn list_tables(&self) -> MemoryResult<BTreeSet<String>> {
        Ok(self.tables.keys().cloned().collect())
    }

    async fn columns_of(&self, table: &str) -> MemoryResult<IndexMap<String, ColumnSpec>> {
        Ok(self.get(table)?.columns.clone())
    }

    async fn keys_of(&self, table: &str) -> MemoryResult<Vec<KeyDescriptor>> {
        Ok(self
            .get(table)?
            .key_groups
            .values()
            .flat_map(|g| g.members().to_vec())
            .collect())
    }

    async fn sequences_of(&self, table: &str) -> MemoryResult<IndexMap<String, SequenceSpec>> {
        Ok(self.get(table)?.sequences.clone())
    }
}

// =============================================================================
// Fixtures
// =============================================================================

fn key(name: &str, primary: bool, query: &str) -> KeyDescriptor {
    KeyDescriptor {
        index_name: name.to_string(),
        is_primary: primary,
        definition_query: query.to_string(),
        member_count: 2,
    }
}

fn content_table() -> TableStructure {
    TableStructure::new("jos_content")
        .column(
            ColumnSpec::new("id", "integer")
                .not_null()
                .default_expr("nextval('jos_content_id_seq'::regclass)"),
        )
        .column(ColumnSpec::new("title", "character varying(255)").not_null().default_expr("''::character varying"))
        .column(ColumnSpec::new("introtext", "text").not_null())
        .column(ColumnSpec::new("hits", "bigint").not_null().default_expr("0"))
        .sequence(SequenceSpec::serial("jos_content_id_seq", "public", "jos_content", "id"))
        .key(key(
            "jos_content_pkey",
            true,
            "ALTER TABLE ONLY jos_content ADD CONSTRAINT jos_content_pkey PRIMARY KEY (id)",
        ))
        .key(key(
            "idx_content_title_hits",
            false,
            "CREATE INDEX idx_content_title_hits ON jos_content USING btree (title, hits)",
        ))
        .key(key(
            "idx_content_title_hits",
            false,
            "CREATE INDEX idx_content_title_hits ON jos_content USING btree (title, hits)",
        ))
}

fn options() -> SyncOptions {
    SyncOptions::new(PrefixRewriter::new("#__", "jos_"))
}

// =============================================================================
// Diff properties
// =============================================================================

#[test]
fn diff_against_itself_is_empty() {
    let table = content_table();
    for scan in [KeyScan::Exhaustive, KeyScan::StopAtFirstMismatch] {
        let differ = SchemaDiffer::new(DiffOptions::default().key_scan(scan));
        assert!(differ.diff(&table, &table).unwrap().is_empty());
    }
}

#[test]
fn column_add_drop_symmetry() {
    let desired = TableStructure::new("t")
        .column(ColumnSpec::new("a", "integer"))
        .column(ColumnSpec::new("b", "text"));
    let live = TableStructure::new("t")
        .column(ColumnSpec::new("b", "text"))
        .column(ColumnSpec::new("c", "integer"));

    let statements = SchemaDiffer::default().diff(&desired, &live).unwrap();
    let planned: Vec<(StatementKind, &str)> = statements
        .iter()
        .map(|s| (s.kind, s.sql.as_str()))
        .collect();
    assert_eq!(
        planned,
        vec![
            (StatementKind::AddColumn, "ALTER TABLE \"t\" ADD COLUMN \"a\" integer"),
            (StatementKind::DropColumn, "ALTER TABLE \"t\" DROP COLUMN \"c\""),
        ]
    );
}

#[test]
fn nextval_default_becomes_serial() {
    for (sql_type, nullable) in [("integer", false), ("bigint", true), ("text", false)] {
        let mut col = ColumnSpec::new("id", sql_type).default_expr("nextval('t_id_seq')");
        col.nullable = nullable;
        assert!(column_definition_ddl(&col).ends_with("SERIAL"));
    }
}

#[test]
fn sequence_three_way_reconciliation() {
    let desired = TableStructure::new("t").sequence(SequenceSpec::serial("s1", "public", "t", "id"));
    let mut live_s1 = SequenceSpec::serial("s1", "public", "t", "id");
    live_s1.increment = 5;
    let live = TableStructure::new("t")
        .sequence(live_s1)
        .sequence(SequenceSpec::serial("s2", "public", "t", "other"));

    let statements = SchemaDiffer::default().diff(&desired, &live).unwrap();
    assert_eq!(statements.len(), 2);
    assert_eq!(statements[0].kind, StatementKind::ChangeSequence);
    assert!(statements[0].sql.starts_with("ALTER SEQUENCE \"s1\" INCREMENT BY 1 "));
    assert_eq!(statements[1].kind, StatementKind::DropSequence);
    assert_eq!(statements[1].sql, "DROP SEQUENCE \"s2\"");
}

#[test]
fn composite_key_with_changed_definition_is_rebuilt() {
    let desired = content_table();
    let mut live = content_table();
    live.key_groups.shift_remove("idx_content_title_hits");
    let live = live.key(key(
        "idx_content_title_hits",
        false,
        "CREATE INDEX idx_content_title_hits ON jos_content USING btree (title)",
    ));

    let statements = SchemaDiffer::default().diff(&desired, &live).unwrap();
    let sql: Vec<&str> = statements.iter().map(|s| s.sql.as_str()).collect();
    assert_eq!(
        sql,
        vec![
            "DROP INDEX \"idx_content_title_hits\"",
            "CREATE INDEX idx_content_title_hits ON jos_content USING btree (title, hits)",
        ]
    );
}

// =============================================================================
// Prefix rewriting
// =============================================================================

#[test]
fn rewriter_leaves_plain_literals_alone() {
    let sql = "SELECT * FROM #__users WHERE name='#__literal'";
    let expected = "SELECT * FROM jos_users WHERE name='#__literal'";
    assert_eq!(rewrite(sql, "#__", "jos_"), expected);
    assert_eq!(rewrite_legacy(sql, "#__", "jos_"), expected);
}

#[test]
fn rewriter_prefixes_sequence_arguments() {
    let sql = "SELECT currval('#__items_id_seq')";
    let expected = "SELECT currval('jos_items_id_seq')";
    assert_eq!(rewrite(sql, "#__", "jos_"), expected);
    assert_eq!(rewrite_legacy(sql, "#__", "jos_"), expected);
}

// =============================================================================
// End to end
// =============================================================================

const ARTICLES: &str = r##"{
    "tables": [{
        "name": "#__articles",
        "columns": [
            {"name": "id", "type": "integer", "nullable": false,
             "default": "nextval('#__articles_id_seq'::regclass)"},
            {"name": "title", "type": "character varying(255)", "nullable": false}
        ]
    }]
}"##;

#[tokio::test]
async fn missing_articles_table_is_created_in_one_statement() {
    let definition: StructureDefinition = serde_json::from_str(ARTICLES).unwrap();
    let tables = definition.into_tables().unwrap();
    let db = MemoryDb::default();
    let mut runner = MigrationRunner::new(options());

    let report = runner.synchronize(&tables, &db, &db).await.unwrap();

    assert_eq!(report.tables.len(), 1);
    assert_eq!(report.tables[0].action, TableAction::Create);
    let executed = db.executed.borrow();
    assert_eq!(executed.len(), 1);
    assert_eq!(
        executed[0],
        "CREATE TABLE \"jos_articles\" (\"id\" SERIAL, \"title\" character varying(255) NOT NULL)"
    );
}

#[tokio::test]
async fn converged_table_needs_nothing() {
    let desired = TableStructure::new("#__content")
        .column(
            ColumnSpec::new("id", "integer")
                .not_null()
                .default_expr("nextval('#__content_id_seq'::regclass)"),
        )
        .sequence(SequenceSpec::serial("#__content_id_seq", "public", "#__content", "id"))
        .key(key(
            "#__content_pkey",
            true,
            "ALTER TABLE ONLY #__content ADD CONSTRAINT #__content_pkey PRIMARY KEY (id)",
        ));
    let live = desired.resolve_prefix(&options().rewriter);
    let db = MemoryDb::default().with_table(live);
    let mut runner = MigrationRunner::new(options());

    let report = runner.synchronize(&[desired], &db, &db).await.unwrap();
    assert!(report.is_noop());
    assert!(db.executed.borrow().is_empty());
    assert!(runner.audit_log().is_empty());
}

#[tokio::test]
async fn report_serializes_with_outcomes() {
    let definition: StructureDefinition = serde_json::from_str(ARTICLES).unwrap();
    let tables = definition.into_tables().unwrap();
    let db = MemoryDb::default();
    let mut runner = MigrationRunner::new(options());

    let report = runner.synchronize(&tables, &db, &db).await.unwrap();
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["tables"][0]["table"], "jos_articles");
    assert_eq!(json["tables"][0]["statements"][0]["outcome"], "Passed");
    assert_eq!(json["tables"][0]["statements"][0]["kind"], "CreateTable");
}
