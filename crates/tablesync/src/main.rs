//! tablesync CLI
//!
//! Command-line tool for synchronizing PostgreSQL tables with a structure
//! definition.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use tablesync::config::{PrefixArgs, load_definition};
use tablesync::output::{render_audit, render_json, render_report};
use tablesync::pg::PgDatabase;
use tablesync_core::prelude::*;

/// Synchronize PostgreSQL tables with a declarative structure definition.
#[derive(Parser)]
#[command(name = "tablesync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// PostgreSQL connection string.
    #[arg(short, long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Schema to introspect.
    #[arg(long, env = "TABLESYNC_SCHEMA", default_value = "public")]
    schema: String,

    #[command(flatten)]
    prefix: PrefixArgs,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a structure definition to the database.
    Sync {
        /// JSON structure definition.
        definition: PathBuf,

        /// Show SQL without executing (dry run).
        #[arg(long)]
        dry_run: bool,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show the statements a structure definition needs.
    Plan {
        /// JSON structure definition.
        definition: PathBuf,

        /// Print the plan as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Replace the placeholder prefix in a SQL statement.
    Rewrite {
        /// SQL text.
        sql: String,
    },

    /// List the tables of the schema.
    Tables,
}

impl Cli {
    async fn connect(&self) -> anyhow::Result<PgDatabase> {
        let url = self
            .database_url
            .as_deref()
            .context("no database given, use --database-url or DATABASE_URL")?;
        Ok(PgDatabase::connect(url, &self.schema).await?)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match &cli.command {
        Commands::Rewrite { sql } => {
            println!("{}", cli.prefix.rewriter().rewrite(sql));
        }

        Commands::Tables => {
            let db = cli.connect().await?;
            for table in db.list_tables().await? {
                println!("{table}");
            }
        }

        Commands::Plan { definition, json } => {
            let tables = load_definition(definition)?;
            let db = cli.connect().await?;
            let runner = MigrationRunner::new(cli.prefix.sync_options(true));

            let report = runner.plan(&tables, &db).await?;
            if *json {
                println!("{}", render_json(&report)?);
            } else {
                print!("{}", render_report(&report));
            }
        }

        Commands::Sync {
            definition,
            dry_run,
            json,
        } => {
            let tables = load_definition(definition)?;
            let db = cli.connect().await?;
            let mut runner = MigrationRunner::new(cli.prefix.sync_options(*dry_run));

            if *dry_run {
                info!("Dry run mode - SQL will be printed but not executed.");
            }

            match runner.synchronize(&tables, &db, &db).await {
                Ok(report) => {
                    if *json {
                        println!("{}", render_json(&report)?);
                    } else {
                        print!("{}", render_report(&report));
                    }
                }
                Err(err) => {
                    eprint!("{}", render_audit(runner.audit_log()));
                    return Err(err.into());
                }
            }
        }
    }

    Ok(())
}
