//! Table structure model.
//!
//! A [`TableStructure`] describes one table: its columns, the sequences
//! owned by its columns, and its keys. The same type is used for the
//! desired structure (parsed from a definition) and for the live structure
//! (rebuilt from catalog queries on every run), so the differ compares like
//! with like.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::prefix::PrefixRewriter;

/// One column, desired or observed.
///
/// Equality is plain string/boolean equality on type, nullability and
/// default: `nextval('a'::regclass)` and `nextval('a')` are different
/// defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Column name.
    pub name: String,
    /// SQL type as the catalog spells it (`integer`, `character varying`).
    #[serde(rename = "type")]
    pub sql_type: String,
    /// Whether NULL is allowed.
    pub nullable: bool,
    /// Default expression, verbatim.
    #[serde(default)]
    pub default: Option<String>,
}

impl ColumnSpec {
    /// Creates a nullable column without a default.
    #[must_use]
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            nullable: true,
            default: None,
        }
    }

    /// Marks the column NOT NULL.
    #[must_use]
    pub const fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Sets the default expression.
    #[must_use]
    pub fn default_expr(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(expr.into());
        self
    }

    /// The default expression, if one is present and non-empty.
    #[must_use]
    pub fn present_default(&self) -> Option<&str> {
        self.default.as_deref().filter(|d| !d.is_empty())
    }

    /// Whether the default draws from a sequence.
    #[must_use]
    pub fn is_serial(&self) -> bool {
        self.default.as_deref().is_some_and(|d| d.contains("nextval"))
    }

    /// Whether two specs describe the same column for diff purposes.
    #[must_use]
    pub fn same_definition(&self, other: &Self) -> bool {
        self.sql_type == other.sql_type
            && self.nullable == other.nullable
            && self.default == other.default
    }
}

/// A sequence backing an auto-increment column, bound to exactly one
/// (schema, table, column).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceSpec {
    /// Sequence name.
    pub name: String,
    /// Value type (`bigint`, `integer`).
    pub data_type: String,
    /// First value handed out.
    pub start_value: i64,
    /// Lower bound.
    pub min_value: i64,
    /// Upper bound.
    pub max_value: i64,
    /// Step.
    pub increment: i64,
    /// Whether the sequence wraps around at its bound.
    #[serde(default = "cycles_by_default")]
    pub cycles: bool,
    /// Schema of the owning table.
    #[serde(rename = "schema")]
    pub owner_schema: String,
    /// Owning table.
    #[serde(rename = "table")]
    pub owner_table: String,
    /// Owning column.
    #[serde(rename = "column")]
    pub owner_column: String,
}

const fn cycles_by_default() -> bool {
    true
}

impl SequenceSpec {
    /// Creates a sequence with PostgreSQL's defaults for a `SERIAL` column
    /// owned by `schema.table.column`.
    #[must_use]
    pub fn serial(
        name: impl Into<String>,
        schema: impl Into<String>,
        table: impl Into<String>,
        column: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            data_type: "integer".to_string(),
            start_value: 1,
            min_value: 1,
            max_value: i64::from(i32::MAX),
            increment: 1,
            cycles: false,
            owner_schema: schema.into(),
            owner_table: table.into(),
            owner_column: column.into(),
        }
    }

    /// Names of the attributes that differ from `other`, in comparison order.
    #[must_use]
    pub fn mismatches(&self, other: &Self) -> Vec<&'static str> {
        let checks = [
            ("data_type", self.data_type == other.data_type),
            ("start_value", self.start_value == other.start_value),
            ("min_value", self.min_value == other.min_value),
            ("max_value", self.max_value == other.max_value),
            ("increment", self.increment == other.increment),
            ("cycles", self.cycles == other.cycles),
            ("owner_schema", self.owner_schema == other.owner_schema),
            ("owner_table", self.owner_table == other.owner_table),
            ("owner_column", self.owner_column == other.owner_column),
        ];
        checks
            .into_iter()
            .filter_map(|(field, same)| (!same).then_some(field))
            .collect()
    }
}

/// One catalog row describing a key: an index or constraint, one row per
/// indexed column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyDescriptor {
    /// Index (or constraint) name shared by all rows of the same key.
    pub index_name: String,
    /// Whether the key is the table's primary key.
    #[serde(default)]
    pub is_primary: bool,
    /// Statement that (re)creates the key.
    #[serde(rename = "query")]
    pub definition_query: String,
    /// Number of columns the key covers, as reported by the catalog.
    #[serde(default)]
    pub member_count: i32,
}

/// All descriptors sharing one index name, in catalog order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyGroup {
    members: Vec<KeyDescriptor>,
}

impl KeyGroup {
    /// Wraps an ordered list of descriptors.
    #[must_use]
    pub const fn new(members: Vec<KeyDescriptor>) -> Self {
        Self { members }
    }

    /// Groups descriptors by index name, keeping first-seen order.
    #[must_use]
    pub fn from_descriptors(
        descriptors: impl IntoIterator<Item = KeyDescriptor>,
    ) -> IndexMap<String, Self> {
        let mut lookup: IndexMap<String, Self> = IndexMap::new();
        for key in descriptors {
            lookup
                .entry(key.index_name.clone())
                .or_default()
                .members
                .push(key);
        }
        lookup
    }

    /// The descriptors in this group.
    #[must_use]
    pub fn members(&self) -> &[KeyDescriptor] {
        &self.members
    }

    /// Number of descriptors in the group.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the group has no descriptors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// First descriptor; every comparison and recreate statement is taken
    /// from it.
    #[must_use]
    pub fn first(&self) -> Option<&KeyDescriptor> {
        self.members.first()
    }

    /// Whether the group is the primary key.
    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.first().is_some_and(|k| k.is_primary)
    }
}

/// The unit of comparison: one table with its columns, sequences and keys.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TableStructure {
    /// Table name.
    pub table_name: String,
    /// Columns keyed by name, in declaration (or catalog) order.
    pub columns: IndexMap<String, ColumnSpec>,
    /// Sequences keyed by name.
    pub sequences: IndexMap<String, SequenceSpec>,
    /// Key groups keyed by index name.
    pub key_groups: IndexMap<String, KeyGroup>,
}

impl TableStructure {
    /// Creates an empty structure.
    #[must_use]
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            ..Self::default()
        }
    }

    /// Adds a column.
    #[must_use]
    pub fn column(mut self, column: ColumnSpec) -> Self {
        self.columns.insert(column.name.clone(), column);
        self
    }

    /// Adds a sequence.
    #[must_use]
    pub fn sequence(mut self, sequence: SequenceSpec) -> Self {
        self.sequences.insert(sequence.name.clone(), sequence);
        self
    }

    /// Adds a key descriptor to the group named after it.
    #[must_use]
    pub fn key(mut self, key: KeyDescriptor) -> Self {
        self.key_groups
            .entry(key.index_name.clone())
            .or_default()
            .members
            .push(key);
        self
    }

    /// Assembles a structure from the pieces an introspector returns.
    #[must_use]
    pub fn from_parts(
        table_name: impl Into<String>,
        columns: IndexMap<String, ColumnSpec>,
        sequences: IndexMap<String, SequenceSpec>,
        keys: Vec<KeyDescriptor>,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            columns,
            sequences,
            key_groups: KeyGroup::from_descriptors(keys),
        }
    }

    /// Checks the structural invariants the differ relies on.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::StructureInvalid`] when a mapping key disagrees
    /// with the name of the entry it holds, or a key group is empty or holds
    /// a descriptor of another index.
    pub fn validate(&self) -> Result<()> {
        for (name, column) in &self.columns {
            if *name != column.name {
                return Err(SyncError::invalid(
                    &self.table_name,
                    format!("column entry '{name}' holds column '{}'", column.name),
                ));
            }
        }
        for (name, sequence) in &self.sequences {
            if *name != sequence.name {
                return Err(SyncError::invalid(
                    &self.table_name,
                    format!("sequence entry '{name}' holds sequence '{}'", sequence.name),
                ));
            }
        }
        for (name, group) in &self.key_groups {
            if group.is_empty() {
                return Err(SyncError::invalid(
                    &self.table_name,
                    format!("key group '{name}' has no members"),
                ));
            }
            if let Some(stray) = group.members.iter().find(|k| k.index_name != *name) {
                return Err(SyncError::invalid(
                    &self.table_name,
                    format!(
                        "key group '{name}' contains a descriptor for '{}'",
                        stray.index_name
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Returns a copy with the placeholder prefix replaced in every name and
    /// every piece of SQL text the structure carries.
    #[must_use]
    pub fn resolve_prefix(&self, rewriter: &PrefixRewriter) -> Self {
        let columns = self
            .columns
            .values()
            .map(|c| {
                let column = ColumnSpec {
                    default: c.default.as_deref().map(|d| rewriter.rewrite(d)),
                    ..c.clone()
                };
                (column.name.clone(), column)
            })
            .collect();

        let sequences = self
            .sequences
            .values()
            .map(|s| {
                let sequence = SequenceSpec {
                    name: rewriter.table_name(&s.name),
                    owner_table: rewriter.table_name(&s.owner_table),
                    ..s.clone()
                };
                (sequence.name.clone(), sequence)
            })
            .collect();

        let key_groups = self
            .key_groups
            .iter()
            .map(|(name, group)| {
                let members = group
                    .members
                    .iter()
                    .map(|k| KeyDescriptor {
                        index_name: rewriter.table_name(&k.index_name),
                        definition_query: rewriter.rewrite(&k.definition_query),
                        ..k.clone()
                    })
                    .collect();
                (rewriter.table_name(name), KeyGroup::new(members))
            })
            .collect();

        Self {
            table_name: rewriter.table_name(&self.table_name),
            columns,
            sequences,
            key_groups,
        }
    }
}

/// What a [`DdlStatement`] does, for logs and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatementKind {
    /// `CREATE TABLE` for a table missing from the database.
    CreateTable,
    /// `CREATE SEQUENCE`.
    AddSequence,
    /// `ALTER SEQUENCE`.
    ChangeSequence,
    /// `DROP SEQUENCE`.
    DropSequence,
    /// `ALTER TABLE ... ADD COLUMN`.
    AddColumn,
    /// `ALTER TABLE ... ALTER COLUMN`.
    AlterColumn,
    /// `ALTER TABLE ... DROP COLUMN`.
    DropColumn,
    /// Stored key definition query.
    CreateKey,
    /// `DROP INDEX`.
    DropIndex,
    /// `ALTER TABLE ONLY ... DROP CONSTRAINT`.
    DropPrimaryKey,
}

/// Result slot of a statement.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Outcome {
    /// Not executed yet.
    #[default]
    Pending,
    /// Accepted by the database.
    Passed,
    /// Rejected by the database, with its message.
    Failed(String),
    /// Planned only (dry run).
    Skipped,
}

/// One DDL statement produced by the differ.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DdlStatement {
    /// What the statement does.
    pub kind: StatementKind,
    /// Statement text.
    pub sql: String,
    /// Filled in after execution.
    pub outcome: Outcome,
}

impl DdlStatement {
    /// Creates a pending statement.
    #[must_use]
    pub fn new(kind: StatementKind, sql: impl Into<String>) -> Self {
        Self {
            kind,
            sql: sql.into(),
            outcome: Outcome::Pending,
        }
    }
}
