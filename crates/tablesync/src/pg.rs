//! PostgreSQL collaborators.
//!
//! [`PgDatabase`] implements both [`Connection`] and
//! [`SchemaIntrospector`] over a single-connection pool, so catalog reads
//! always observe the DDL the runner has just applied. Introspection is
//! limited to one schema.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info};

use tablesync_core::runner::{Connection, SchemaIntrospector};
use tablesync_core::structure::{ColumnSpec, KeyDescriptor, SequenceSpec};

use crate::error::Result as CliResult;

const TABLES_QUERY: &str = r"
    SELECT table_name::text AS table_name
    FROM information_schema.tables
    WHERE table_type = 'BASE TABLE' AND table_schema = $1
    ORDER BY table_name
";

const COLUMNS_QUERY: &str = r"
    SELECT
        a.attname::text AS column_name,
        format_type(a.atttypid, a.atttypmod) AS data_type,
        NOT a.attnotnull AS nullable,
        pg_get_expr(d.adbin, d.adrelid) AS column_default
    FROM pg_attribute a
    JOIN pg_class c ON c.oid = a.attrelid
    JOIN pg_namespace n ON n.oid = c.relnamespace
    LEFT JOIN pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
    WHERE n.nspname = $1 AND c.relname = $2 AND a.attnum > 0 AND NOT a.attisdropped
    ORDER BY a.attnum
";

// One row per indexed column. Primary keys are recreated as constraints,
// everything else from its index definition.
const KEYS_QUERY: &str = r"
    SELECT
        i.relname::text AS index_name,
        ix.indisprimary AS is_primary,
        CASE WHEN ix.indisprimary AND con.oid IS NOT NULL
            THEN 'ALTER TABLE ONLY ' || quote_ident(t.relname) || ' ADD CONSTRAINT '
                 || quote_ident(i.relname) || ' ' || pg_get_constraintdef(con.oid)
            ELSE pg_get_indexdef(ix.indexrelid)
        END AS query,
        ix.indnatts::int4 AS member_count
    FROM pg_class t
    JOIN pg_index ix ON t.oid = ix.indrelid
    JOIN pg_class i ON i.oid = ix.indexrelid
    JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey)
    JOIN pg_namespace n ON t.relnamespace = n.oid
    LEFT JOIN pg_constraint con ON con.conindid = ix.indexrelid AND con.contype = 'p'
    WHERE n.nspname = $1 AND t.relname = $2
    ORDER BY i.relname, a.attnum
";

const SEQUENCES_QUERY: &str = r"
    SELECT
        s.relname::text AS sequence_name,
        seq.data_type::text AS data_type,
        seq.start_value::int8 AS start_value,
        seq.minimum_value::int8 AS min_value,
        seq.maximum_value::int8 AS max_value,
        seq.increment::int8 AS increment,
        seq.cycle_option::text AS cycle_option,
        n.nspname::text AS schema_name,
        t.relname::text AS table_name,
        a.attname::text AS column_name
    FROM pg_class s
    JOIN pg_namespace n ON n.oid = s.relnamespace
    JOIN pg_depend d ON d.objid = s.oid
        AND d.classid = 'pg_class'::regclass
        AND d.refclassid = 'pg_class'::regclass
        AND d.deptype IN ('a', 'i')
    JOIN pg_class t ON t.oid = d.refobjid
    JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = d.refobjsubid
    JOIN information_schema.sequences seq
        ON seq.sequence_schema = n.nspname AND seq.sequence_name = s.relname
    WHERE s.relkind = 'S' AND n.nspname = $1 AND t.relname = $2
    ORDER BY s.relname
";

/// A PostgreSQL database reached through one pooled connection.
#[derive(Debug, Clone)]
pub struct PgDatabase {
    pool: PgPool,
    schema: String,
}

impl PgDatabase {
    /// Connects to `url` and introspects `schema`.
    ///
    /// # Errors
    ///
    /// Returns [`CliError::Database`] when the connection cannot be opened.
    ///
    /// [`CliError::Database`]: crate::error::CliError::Database
    pub async fn connect(url: &str, schema: impl Into<String>) -> CliResult<Self> {
        let pool = PgPoolOptions::new().max_connections(1).connect(url).await?;
        let schema = schema.into();
        info!(schema = %schema, "Connected to database");
        Ok(Self::from_pool(pool, schema))
    }

    /// Wraps an existing pool.
    #[must_use]
    pub fn from_pool(pool: PgPool, schema: impl Into<String>) -> Self {
        Self {
            pool,
            schema: schema.into(),
        }
    }

    /// The introspected schema.
    #[must_use]
    pub fn schema(&self) -> &str {
        &self.schema
    }

    async fn fetch(&self, query: &'static str, table: &str) -> Result<Vec<PgRow>, sqlx::Error> {
        debug!(table = %table, schema = %self.schema, "Reading catalog");
        sqlx::query(query)
            .bind(&self.schema)
            .bind(table)
            .fetch_all(&self.pool)
            .await
    }
}

impl Connection for PgDatabase {
    type Error = sqlx::Error;

    async fn execute(&self, sql: &str) -> Result<u64, sqlx::Error> {
        // Simple query protocol, so one text may carry several statements.
        let result = sqlx::raw_sql(sql).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

impl SchemaIntrospector for PgDatabase {
    type Error = sqlx::Error;

    async fn list_tables(&self) -> Result<BTreeSet<String>, sqlx::Error> {
        let rows = sqlx::query(TABLES_QUERY)
            .bind(&self.schema)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("table_name"))
            .collect()
    }

    async fn columns_of(&self, table: &str) -> Result<IndexMap<String, ColumnSpec>, sqlx::Error> {
        let mut columns = IndexMap::new();
        for row in self.fetch(COLUMNS_QUERY, table).await? {
            let column = column_spec(
                row.try_get("column_name")?,
                row.try_get("data_type")?,
                row.try_get("nullable")?,
                row.try_get("column_default")?,
            );
            columns.insert(column.name.clone(), column);
        }
        Ok(columns)
    }

    async fn keys_of(&self, table: &str) -> Result<Vec<KeyDescriptor>, sqlx::Error> {
        self.fetch(KEYS_QUERY, table)
            .await?
            .iter()
            .map(|row| {
                Ok(KeyDescriptor {
                    index_name: row.try_get("index_name")?,
                    is_primary: row.try_get("is_primary")?,
                    definition_query: row.try_get("query")?,
                    member_count: row.try_get("member_count")?,
                })
            })
            .collect()
    }

    async fn sequences_of(
        &self,
        table: &str,
    ) -> Result<IndexMap<String, SequenceSpec>, sqlx::Error> {
        let mut sequences = IndexMap::new();
        for row in self.fetch(SEQUENCES_QUERY, table).await? {
            let sequence = SequenceRow {
                name: row.try_get("sequence_name")?,
                data_type: row.try_get("data_type")?,
                start_value: row.try_get("start_value")?,
                min_value: row.try_get("min_value")?,
                max_value: row.try_get("max_value")?,
                increment: row.try_get("increment")?,
                cycle_option: row.try_get("cycle_option")?,
                schema: row.try_get("schema_name")?,
                table: row.try_get("table_name")?,
                column: row.try_get("column_name")?,
            }
            .into_spec();
            sequences.insert(sequence.name.clone(), sequence);
        }
        Ok(sequences)
    }
}

// ================================================================
// Row mapping
// ================================================================

fn column_spec(
    name: String,
    data_type: String,
    nullable: bool,
    default: Option<String>,
) -> ColumnSpec {
    ColumnSpec {
        name,
        sql_type: data_type,
        nullable,
        default,
    }
}

/// A sequence row as read from the catalog.
#[derive(Debug, Clone)]
struct SequenceRow {
    name: String,
    data_type: String,
    start_value: i64,
    min_value: i64,
    max_value: i64,
    increment: i64,
    cycle_option: String,
    schema: String,
    table: String,
    column: String,
}

impl SequenceRow {
    fn into_spec(self) -> SequenceSpec {
        SequenceSpec {
            cycles: self.cycle_option.eq_ignore_ascii_case("YES"),
            name: self.name,
            data_type: self.data_type,
            start_value: self.start_value,
            min_value: self.min_value,
            max_value: self.max_value,
            increment: self.increment,
            owner_schema: self.schema,
            owner_table: self.table,
            owner_column: self.column,
        }
    }
}
