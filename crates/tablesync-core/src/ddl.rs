//! PostgreSQL DDL builders.
//!
//! Pure string builders, one per desired-state element. Names are quoted
//! with [`quote_name`]; types, defaults and stored key queries are
//! interpolated verbatim.

use crate::structure::{ColumnSpec, KeyGroup, SequenceSpec, TableStructure};

/// Types that cannot carry a `DEFAULT` when declared NOT NULL.
const LARGE_TEXT_TYPES: [&str; 4] = ["text", "smalltext", "mediumtext", "largetext"];

/// Quotes an object name, quoting each dotted part separately.
///
/// ```
/// use tablesync_core::ddl::quote_name;
///
/// assert_eq!(quote_name("users"), "\"users\"");
/// assert_eq!(quote_name("public.users.id"), "\"public\".\"users\".\"id\"");
/// ```
#[must_use]
pub fn quote_name(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}

/// Whether a type is one of the large-text kinds.
#[must_use]
pub fn is_large_text(sql_type: &str) -> bool {
    LARGE_TEXT_TYPES
        .iter()
        .any(|t| t.eq_ignore_ascii_case(sql_type.trim()))
}

/// The default a column definition may carry, following the not-null
/// matrix: a NOT NULL large-text column never gets one.
fn effective_default(col: &ColumnSpec) -> Option<&str> {
    let default = col.present_default()?;
    if !col.nullable && is_large_text(&col.sql_type) {
        return None;
    }
    Some(default)
}

/// Column definition as used in `CREATE TABLE` and `ADD COLUMN`.
///
/// A default drawing from `nextval` turns the column into `SERIAL`,
/// whatever its declared type and nullability.
#[must_use]
pub fn column_definition_ddl(col: &ColumnSpec) -> String {
    let name = quote_name(&col.name);
    if col.is_serial() {
        return format!("{name} SERIAL");
    }

    let mut sql = format!("{name} {}", col.sql_type);
    if !col.nullable {
        sql.push_str(" NOT NULL");
    }
    if let Some(default) = effective_default(col) {
        sql.push_str(" DEFAULT ");
        sql.push_str(default);
    }
    sql
}

/// `ALTER TABLE ... ADD COLUMN`.
#[must_use]
pub fn add_column_ddl(table: &str, col: &ColumnSpec) -> String {
    format!(
        "ALTER TABLE {} ADD COLUMN {}",
        quote_name(table),
        column_definition_ddl(col)
    )
}

/// `ALTER TABLE ... DROP COLUMN`.
#[must_use]
pub fn drop_column_ddl(table: &str, name: &str) -> String {
    format!(
        "ALTER TABLE {} DROP COLUMN {}",
        quote_name(table),
        quote_name(name)
    )
}

/// Multi-clause `ALTER TABLE ... ALTER COLUMN`.
///
/// Changes the type, then sets nullability and the default. When the new
/// default draws from `nextval`, a second statement hands ownership of the
/// column's `<table>_<column>_seq` sequence to the column.
#[must_use]
pub fn alter_column_ddl(table: &str, col: &ColumnSpec) -> String {
    let column = quote_name(&col.name);
    let nullability = if col.nullable {
        "DROP NOT NULL"
    } else {
        "SET NOT NULL"
    };
    let default = effective_default(col).map_or_else(
        || "DROP DEFAULT".to_string(),
        |default| format!("SET DEFAULT {default}"),
    );

    let clauses = [
        format!(
            "ALTER TABLE {} ALTER COLUMN {column} TYPE {}",
            quote_name(table),
            col.sql_type
        ),
        format!("ALTER COLUMN {column} {nullability}"),
        format!("ALTER COLUMN {column} {default}"),
    ];
    let sql = clauses.join(",\n");

    if !col.is_serial() {
        return sql;
    }
    format!(
        "{sql};\nALTER SEQUENCE {} OWNED BY {}",
        quote_name(&format!("{table}_{}_seq", col.name)),
        quote_name(&format!("{table}.{}", col.name))
    )
}

fn owner(spec: &SequenceSpec) -> String {
    quote_name(&format!(
        "{}.{}.{}",
        spec.owner_schema, spec.owner_table, spec.owner_column
    ))
}

/// `CREATE SEQUENCE` named after the owning table and column.
#[must_use]
pub fn add_sequence_ddl(spec: &SequenceSpec) -> String {
    format!(
        "CREATE SEQUENCE {} INCREMENT BY {} MINVALUE {} MAXVALUE {} START {}{} CYCLE OWNED BY {}",
        quote_name(&format!("{}_{}", spec.owner_table, spec.owner_column)),
        spec.increment,
        spec.min_value,
        spec.max_value,
        spec.start_value,
        if spec.cycles { "" } else { " NO" },
        owner(spec)
    )
}

/// `ALTER SEQUENCE`. Carries no cycle clause.
#[must_use]
pub fn change_sequence_ddl(name: &str, spec: &SequenceSpec) -> String {
    format!(
        "ALTER SEQUENCE {} INCREMENT BY {} MINVALUE {} MAXVALUE {} START {} OWNED BY {}",
        quote_name(name),
        spec.increment,
        spec.min_value,
        spec.max_value,
        spec.start_value,
        owner(spec)
    )
}

/// `DROP SEQUENCE`.
#[must_use]
pub fn drop_sequence_ddl(name: &str) -> String {
    format!("DROP SEQUENCE {}", quote_name(name))
}

/// `DROP INDEX`.
#[must_use]
pub fn drop_index_ddl(name: &str) -> String {
    format!("DROP INDEX {}", quote_name(name))
}

/// `ALTER TABLE ONLY ... DROP CONSTRAINT`.
#[must_use]
pub fn drop_primary_key_ddl(table: &str, constraint: &str) -> String {
    format!(
        "ALTER TABLE ONLY {} DROP CONSTRAINT {}",
        quote_name(table),
        quote_name(constraint)
    )
}

/// Full `CREATE TABLE` for a table missing from the database.
///
/// Columns come first in declaration order. Sequences that a `SERIAL`
/// column of this table does not already create follow, then the stored
/// query of every key group. Everything is joined into one statement text.
#[must_use]
pub fn create_table_ddl(table: &TableStructure) -> String {
    let columns: Vec<String> = table.columns.values().map(column_definition_ddl).collect();

    let mut parts = vec![format!(
        "CREATE TABLE {} ({})",
        quote_name(&table.table_name),
        columns.join(", ")
    )];

    parts.extend(
        table
            .sequences
            .values()
            .filter(|seq| !implied_by_serial(table, seq))
            .map(add_sequence_ddl),
    );

    parts.extend(
        table
            .key_groups
            .values()
            .filter_map(KeyGroup::first)
            .map(|key| key.definition_query.clone()),
    );

    parts.join(";\n")
}

fn implied_by_serial(table: &TableStructure, seq: &SequenceSpec) -> bool {
    seq.owner_table == table.table_name
        && table
            .columns
            .get(&seq.owner_column)
            .is_some_and(ColumnSpec::is_serial)
}
