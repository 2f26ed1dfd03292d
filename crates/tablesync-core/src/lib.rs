//! # tablesync-core
//!
//! Declarative table-structure synchronization for PostgreSQL.
//!
//! Given the desired structure of a set of tables (columns, sequences and
//! keys) and access to a live database, the crate computes the ordered DDL
//! that brings each live table in line and applies it statement by
//! statement. It also provides the prefix rewriter that turns placeholder
//! table names (`#__users`) into real ones (`jos_users`) without touching
//! string literals.
//!
//! # Architecture
//!
//! - **prefix** - placeholder prefix substitution in SQL text
//! - **structure** - the table model shared by desired and live structures
//! - **definition** - the serde document desired structures are read from
//! - **ddl** - pure PostgreSQL DDL builders
//! - **diff** - desired-vs-live reconciliation
//! - **runner** - create-or-diff orchestration over the `Connection` and
//!   `SchemaIntrospector` traits
//!
//! No I/O happens here; database access is provided by the caller through
//! the two collaborator traits.
//!
//! # Example
//!
//! ```rust
//! use tablesync_core::prelude::*;
//!
//! let desired = TableStructure::new("jos_articles")
//!     .column(ColumnSpec::new("id", "integer").not_null().default_expr("nextval('jos_articles_id_seq'::regclass)"))
//!     .column(ColumnSpec::new("title", "character varying(255)").not_null());
//! let live = TableStructure::new("jos_articles")
//!     .column(ColumnSpec::new("id", "integer").not_null().default_expr("nextval('jos_articles_id_seq'::regclass)"));
//!
//! let statements = SchemaDiffer::default().diff(&desired, &live).unwrap();
//! assert_eq!(
//!     statements[0].sql,
//!     "ALTER TABLE \"jos_articles\" ADD COLUMN \"title\" character varying(255) NOT NULL"
//! );
//! ```

pub mod ddl;
pub mod definition;
pub mod diff;
pub mod error;
pub mod prefix;
pub mod runner;
pub mod structure;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::definition::{StructureDefinition, TableDefinition};
    pub use crate::diff::{DiffOptions, KeyScan, SchemaDiffer};
    pub use crate::error::{Result, SyncError};
    pub use crate::prefix::{PrefixRewriter, RewriteMode};
    pub use crate::runner::{
        AuditEntry, AuditStatus, Connection, MigrationRunner, SchemaIntrospector, SyncOptions,
        SyncReport, TableAction, TableReport,
    };
    pub use crate::structure::{
        ColumnSpec, DdlStatement, KeyDescriptor, KeyGroup, Outcome, SequenceSpec, StatementKind,
        TableStructure,
    };
}
