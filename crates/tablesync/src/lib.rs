//! PostgreSQL shell around `tablesync-core`.
//!
//! Provides the sqlx-backed [`pg::PgDatabase`] collaborator, command-line
//! configuration and report rendering for the `tablesync` binary.
//!
//! # CLI Usage
//!
//! ```bash
//! # Show the DDL a definition needs, without touching the database
//! tablesync plan structure.json
//!
//! # Apply it
//! tablesync sync structure.json
//!
//! # Resolve placeholder prefixes in a statement
//! tablesync rewrite "SELECT * FROM #__users"
//! ```

pub mod config;
pub mod error;
pub mod output;
pub mod pg;
