//! Data ingestion orchestrator - schema init, full import, monthly update, ad-hoc queries

use anyhow::Result;
use clap::{Parser, Subcommand};
use land_registry::ingestion::fetch::SourceFetcher;
use land_registry::ingestion::import::{init_schema, run_import, ImportOptions, ImportSource};
use land_registry::ingestion::parse::ParseOptions;
use land_registry::ingestion::update::UpdateCoordinator;
use land_registry::ingestion::{ConflictPolicy, RunOutcome};
use land_registry::{init_tracing, open_store, query, Config, SaleStore};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "data-ingestion")]
#[command(about = "Load and query UK Land Registry price paid data")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the sales table and indexes
    Init,

    /// Bulk load a complete file (defaults to PPD_COMPLETE_URL)
    Import {
        /// Local CSV file, optionally gzipped
        #[arg(long, conflicts_with = "url")]
        file: Option<PathBuf>,

        #[arg(long)]
        url: Option<String>,

        /// replace or ignore
        #[arg(long, default_value = "replace")]
        policy: ConflictPolicy,

        /// Drop and recreate the table first
        #[arg(long)]
        reset: bool,

        /// The file starts with a header row
        #[arg(long)]
        headers: bool,
    },

    /// Apply the latest monthly update file
    Update,

    /// Search by postcode prefix or town/district
    Search {
        query: String,

        #[arg(long)]
        limit: Option<u32>,
    },

    /// Yearly average prices for a postcode prefix or area
    Trend { query: String },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let store = open_store(&config).await?;
    info!("Database connected ({} store)", store.backend_name());

    let result = run(cli.command, &store, &config).await;
    store.close().await;
    result
}

async fn run(command: Command, store: &SaleStore, config: &Config) -> Result<ExitCode> {
    match command {
        Command::Init => {
            init_schema(store).await?;
            info!("Schema ready");
            Ok(ExitCode::SUCCESS)
        }
        Command::Import {
            file,
            url,
            policy,
            reset,
            headers,
        } => {
            if policy == ConflictPolicy::Upsert {
                warn!("Full imports normally use replace or ignore");
            }
            let source = match (file, url) {
                (Some(path), _) => ImportSource::File(path),
                (None, Some(url)) => ImportSource::Url(url),
                (None, None) => ImportSource::Url(config.complete_url.clone()),
            };

            let options = ImportOptions {
                source,
                policy,
                reset,
                parse: ParseOptions {
                    has_headers: headers,
                    ..ParseOptions::default()
                },
            };
            let fetcher = SourceFetcher::new(config.fetch.clone())?;
            report(run_import(store, &fetcher, config, options).await)
        }
        Command::Update => {
            let fetcher = SourceFetcher::new(config.fetch.clone())?;
            let outcome = UpdateCoordinator::new(store, &fetcher, config)
                .run_update()
                .await;
            report(outcome)
        }
        Command::Search { query: q, limit } => {
            let sales = query::search(store, &q, limit).await?;
            info!("{} sale(s) found", sales.len());
            print_json(&sales)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Trend { query: q } => {
            let points = query::trend(store, &q).await?;
            print_json(&points)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Print the outcome as the last stdout line; an unpublished file is not an error
fn report(outcome: RunOutcome) -> Result<ExitCode> {
    if outcome.success {
        info!("✓ {}", outcome.message);
    } else if outcome.is_soft_failure() {
        warn!("{}", outcome.message);
    } else {
        error!("✗ {}", outcome.message);
    }

    print_json(&outcome)?;

    if outcome.success || outcome.is_soft_failure() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}
