//! `pgstore` — maintenance CLI for the passwordless token table.
//!
//! Reads the same `PGSTORE_*` environment variables as the library; flags
//! override them. Raw tokens never pass through this tool.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use tracing::info;

use passwordless_pgstore::record::now_millis;
use passwordless_pgstore::{PostgresStore, StoreConfig, TokenStore};

/// Maintain a passwordless token table in PostgreSQL.
#[derive(Parser)]
#[command(
    name = "pgstore",
    version,
    about = "pgstore — maintain the passwordless token table in PostgreSQL",
    long_about = None,
    after_help = "Environment variables:\n  \
         PGSTORE_DATABASE_URL  Connection string (falls back to DATABASE_URL)\n  \
         PGSTORE_TABLE         Table name (default: passwordless)\n  \
         PGSTORE_WORK_FACTOR   bcrypt cost (default: 10)\n\n\
         Examples:\n  \
         pgstore migrate\n  \
         pgstore --table magic_links count\n  \
         pgstore purge-expired\n  \
         pgstore invalidate alice@example.com",
)]
struct Cli {
    /// PostgreSQL connection string.
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Token table name.
    #[arg(long, global = true)]
    table: Option<String>,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Emit logs as JSON.
    #[arg(long, global = true, default_value = "false")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the token table and its indexes if they do not exist.
    Migrate,
    /// Print the number of stored records, expired ones included.
    Count,
    /// Show the stored record for a user (never the token hash).
    Inspect {
        /// User identifier.
        uid: String,
    },
    /// Delete the record for a user.
    Invalidate {
        /// User identifier.
        uid: String,
    },
    /// Delete every expired record.
    #[command(name = "purge-expired")]
    PurgeExpired,
    /// Delete every record.
    Clear {
        /// Confirm deleting all records.
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_json);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn build_config(cli: &Cli) -> StoreConfig {
    let mut config = StoreConfig::from_env();
    if let Some(url) = &cli.database_url {
        config.database_url.clone_from(url);
    }
    if let Some(table) = &cli.table {
        config.table_name.clone_from(table);
    }
    config
}

async fn run(cli: Cli) -> Result<()> {
    if let Commands::Clear { yes: false } = cli.command {
        bail!("refusing to delete every record without --yes");
    }

    let config = build_config(&cli);
    let store = PostgresStore::new(config).context("invalid store configuration")?;
    info!(config = ?store.config(), "pgstore starting");

    let result = execute(&store, cli.command).await;
    store.disconnect().await;
    result
}

async fn execute(store: &PostgresStore, command: Commands) -> Result<()> {
    let table = &store.config().table_name;
    match command {
        Commands::Migrate => {
            store.connect().await.context("failed to prepare token table")?;
            println!("table '{table}' is ready");
        }
        Commands::Count => {
            let count = store.length().await.context("failed to count records")?;
            println!("{count}");
        }
        Commands::Inspect { uid } => {
            let record = store.record(&uid).await.context("failed to read record")?;
            match record {
                Some(record) => {
                    let expires = match record.ttl {
                        Some(ms) => describe_expiry(ms),
                        None => "never valid (no expiry set)".to_owned(),
                    };
                    println!("uid:     {}", record.uid);
                    println!("origin:  {}", record.origin.as_deref().unwrap_or("-"));
                    println!("expires: {expires}");
                }
                None => println!("no record for '{uid}'"),
            }
        }
        Commands::Invalidate { uid } => {
            store
                .invalidate_user(&uid)
                .await
                .context("failed to invalidate user")?;
            println!("invalidated '{uid}'");
        }
        Commands::PurgeExpired => {
            let removed = store
                .purge_expired()
                .await
                .context("failed to purge expired records")?;
            println!("removed {removed} expired record(s) from '{table}'");
        }
        Commands::Clear { .. } => {
            store.clear().await.context("failed to clear table")?;
            println!("cleared '{table}'");
        }
    }
    Ok(())
}

fn describe_expiry(expires_at_ms: i64) -> String {
    let when = Utc
        .timestamp_millis_opt(expires_at_ms)
        .single()
        .map_or_else(|| expires_at_ms.to_string(), |t| t.to_rfc3339());
    if now_millis() > expires_at_ms {
        format!("{when} (expired)")
    } else {
        when
    }
}
