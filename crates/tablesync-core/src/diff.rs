//! Structure diff engine.
//!
//! Compares a desired [`TableStructure`] against the live one and produces
//! the ordered DDL that turns the live table into the desired one:
//! sequences first, then columns, then keys. Within each section desired
//! entries are visited in their mapping order, followed by live leftovers.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ddl;
use crate::error::Result;
use crate::structure::{DdlStatement, KeyGroup, StatementKind, TableStructure};

// ================================================================
// Options
// ================================================================

/// How key groups present on both sides are scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KeyScan {
    /// Every key-group pair is compared.
    #[default]
    Exhaustive,
    /// Stop after the first mismatching pair has been dropped and
    /// recreated. Desired groups after it are not examined; their live
    /// counterparts are left unconsumed and dropped as orphans.
    StopAtFirstMismatch,
}

/// Differ configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DiffOptions {
    /// Key-group scanning policy.
    pub key_scan: KeyScan,
}

impl DiffOptions {
    /// Sets the key-group scanning policy.
    #[must_use]
    pub const fn key_scan(mut self, key_scan: KeyScan) -> Self {
        self.key_scan = key_scan;
        self
    }
}

// ================================================================
// Differ
// ================================================================

/// Computes the DDL needed to reconcile a live table with a desired one.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaDiffer {
    options: DiffOptions,
}

impl SchemaDiffer {
    /// Creates a differ.
    #[must_use]
    pub const fn new(options: DiffOptions) -> Self {
        Self { options }
    }

    /// The differ's options.
    #[must_use]
    pub const fn options(&self) -> DiffOptions {
        self.options
    }

    /// Diffs `desired` against `live`.
    ///
    /// Both structures are validated first. Identical structures produce
    /// no statements.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::StructureInvalid`] when either structure fails
    /// validation.
    ///
    /// [`SyncError::StructureInvalid`]: crate::error::SyncError::StructureInvalid
    pub fn diff(&self, desired: &TableStructure, live: &TableStructure) -> Result<Vec<DdlStatement>> {
        desired.validate()?;
        live.validate()?;

        let mut statements = diff_sequences(desired, live);
        statements.extend(diff_columns(desired, live));
        statements.extend(self.diff_keys(desired, live));

        for statement in &statements {
            debug!(
                table = %desired.table_name,
                kind = ?statement.kind,
                sql = %statement.sql,
                "Planned statement"
            );
        }

        Ok(statements)
    }

    fn diff_keys(&self, desired: &TableStructure, live: &TableStructure) -> Vec<DdlStatement> {
        let table = &desired.table_name;
        let mut remaining: IndexMap<String, KeyGroup> = live.key_groups.clone();
        let mut statements = Vec::new();

        for (name, want) in &desired.key_groups {
            let Some(want_first) = want.first() else {
                continue;
            };

            let Some(have) = remaining.shift_remove(name) else {
                statements.push(DdlStatement::new(
                    StatementKind::CreateKey,
                    want_first.definition_query.clone(),
                ));
                continue;
            };

            if groups_match(want, &have) {
                continue;
            }

            statements.push(drop_key_statement(table, name, &have));
            statements.push(DdlStatement::new(
                StatementKind::CreateKey,
                want_first.definition_query.clone(),
            ));

            if self.options.key_scan == KeyScan::StopAtFirstMismatch {
                debug!(table = %table, index = %name, "Key scan stopped at first mismatch");
                break;
            }
        }

        for (name, have) in &remaining {
            statements.push(drop_key_statement(table, name, have));
        }

        statements
    }
}

// ================================================================
// Sections
// ================================================================

fn diff_sequences(desired: &TableStructure, live: &TableStructure) -> Vec<DdlStatement> {
    let mut remaining = live.sequences.clone();
    let mut statements = Vec::new();

    for (name, want) in &desired.sequences {
        let Some(have) = remaining.shift_remove(name) else {
            statements.push(DdlStatement::new(
                StatementKind::AddSequence,
                ddl::add_sequence_ddl(want),
            ));
            continue;
        };

        let changed = want.mismatches(&have);
        if !changed.is_empty() {
            debug!(sequence = %name, fields = ?changed, "Sequence differs");
            statements.push(DdlStatement::new(
                StatementKind::ChangeSequence,
                ddl::change_sequence_ddl(name, want),
            ));
        }
    }

    statements.extend(remaining.keys().map(|name| {
        DdlStatement::new(StatementKind::DropSequence, ddl::drop_sequence_ddl(name))
    }));

    statements
}

fn diff_columns(desired: &TableStructure, live: &TableStructure) -> Vec<DdlStatement> {
    let table = &desired.table_name;
    let mut remaining = live.columns.clone();
    let mut statements = Vec::new();

    for (name, want) in &desired.columns {
        match remaining.shift_remove(name) {
            Some(have) if want.same_definition(&have) => {}
            Some(_) => statements.push(DdlStatement::new(
                StatementKind::AlterColumn,
                ddl::alter_column_ddl(table, want),
            )),
            None => statements.push(DdlStatement::new(
                StatementKind::AddColumn,
                ddl::add_column_ddl(table, want),
            )),
        }
    }

    statements.extend(remaining.keys().map(|name| {
        DdlStatement::new(StatementKind::DropColumn, ddl::drop_column_ddl(table, name))
    }));

    statements
}

// ================================================================
// Key helpers
// ================================================================

/// Groups match when they have the same number of members and their first
/// members carry the same stored query.
fn groups_match(want: &KeyGroup, have: &KeyGroup) -> bool {
    if want.len() != have.len() {
        return false;
    }
    match (want.first(), have.first()) {
        (Some(a), Some(b)) => a.definition_query == b.definition_query,
        _ => false,
    }
}

fn drop_key_statement(table: &str, name: &str, group: &KeyGroup) -> DdlStatement {
    if group.is_primary() {
        DdlStatement::new(
            StatementKind::DropPrimaryKey,
            ddl::drop_primary_key_ddl(table, name),
        )
    } else {
        DdlStatement::new(StatementKind::DropIndex, ddl::drop_index_ddl(name))
    }
}
