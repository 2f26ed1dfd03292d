//! Command-line configuration.
//!
//! Flags shared by every subcommand, with environment fallbacks, and the
//! conversion into the options the runner understands.

use std::path::Path;

use clap::Args;
use tracing::debug;

use tablesync_core::definition::StructureDefinition;
use tablesync_core::diff::{DiffOptions, KeyScan};
use tablesync_core::prefix::{PrefixRewriter, RewriteMode};
use tablesync_core::runner::SyncOptions;
use tablesync_core::structure::TableStructure;

use crate::error::{CliError, Result};

/// Prefix and scanning settings.
#[derive(Debug, Clone, Args)]
pub struct PrefixArgs {
    /// Real table prefix of the deployment.
    #[arg(long, env = "TABLESYNC_PREFIX", default_value = "jos_")]
    pub prefix: String,

    /// Placeholder prefix used in definitions and SQL.
    #[arg(long, env = "TABLESYNC_PLACEHOLDER", default_value = "#__")]
    pub placeholder: String,

    /// Use the split-on-quote rewriting instead of the literal scanner.
    #[arg(long)]
    pub legacy_rewrite: bool,

    /// Stop comparing keys after the first mismatching key.
    #[arg(long)]
    pub legacy_key_scan: bool,
}

impl PrefixArgs {
    /// The prefix rewriter these settings describe.
    #[must_use]
    pub fn rewriter(&self) -> PrefixRewriter {
        let mode = if self.legacy_rewrite {
            RewriteMode::LegacySplit
        } else {
            RewriteMode::Scanner
        };
        PrefixRewriter::new(&self.placeholder, &self.prefix).with_mode(mode)
    }

    /// Runner options for these settings.
    #[must_use]
    pub fn sync_options(&self, dry_run: bool) -> SyncOptions {
        let key_scan = if self.legacy_key_scan {
            KeyScan::StopAtFirstMismatch
        } else {
            KeyScan::Exhaustive
        };
        SyncOptions::new(self.rewriter())
            .diff(DiffOptions::default().key_scan(key_scan))
            .dry_run(dry_run)
    }
}

/// Reads and validates a JSON definition file.
///
/// # Errors
///
/// Returns [`CliError::Io`] when the file cannot be read,
/// [`CliError::Definition`] when it is not a valid definition document and
/// [`CliError::Sync`] when a table in it fails validation.
pub fn load_definition(path: &Path) -> Result<Vec<TableStructure>> {
    let text = std::fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let definition: StructureDefinition =
        serde_json::from_str(&text).map_err(|source| CliError::Definition {
            path: path.to_path_buf(),
            source,
        })?;
    let tables = definition.into_tables()?;
    debug!(path = %path.display(), tables = tables.len(), "Loaded definition");
    Ok(tables)
}
