//! Full import - bulk load a complete price paid file

use crate::config::Config;
use crate::error::{IngestError, StoreError};
use crate::ingestion::fetch::SourceFetcher;
use crate::ingestion::parse::{open_records, validate_file, ParseOptions};
use crate::ingestion::types::{ConflictPolicy, IngestionRun, RunOutcome, WriteStats};
use crate::ingestion::utils::ScratchFile;
use crate::ingestion::write::BatchUpserter;
use crate::store::SaleStore;
use std::path::PathBuf;
use tracing::{error, info, info_span, Instrument};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportSource {
    File(PathBuf),
    Url(String),
}

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub source: ImportSource,
    pub policy: ConflictPolicy,
    /// Drop and recreate the table first
    pub reset: bool,
    pub parse: ParseOptions,
}

impl ImportOptions {
    pub fn new(source: ImportSource) -> Self {
        Self {
            source,
            policy: ConflictPolicy::Replace,
            reset: false,
            parse: ParseOptions::default(),
        }
    }
}

/// Create the table and its indexes if missing
pub async fn init_schema(store: &SaleStore) -> Result<(), StoreError> {
    info!(
        "Initialising {} schema on {} store",
        store.layout().table(),
        store.backend_name()
    );
    store.ensure_schema().await
}

pub async fn run_import(
    store: &SaleStore,
    fetcher: &SourceFetcher,
    config: &Config,
    options: ImportOptions,
) -> RunOutcome {
    let run = IngestionRun::new();
    let span = info_span!("ingestion_run", run_id = %run.id);

    async {
        match import(store, fetcher, config, &options, &run).await {
            Ok(stats) => RunOutcome::completed(
                format!("Import completed: {} records processed", stats.total_processed),
                stats,
            ),
            Err(e) => {
                error!("Import failed: {}", e);
                RunOutcome::failed(&e)
            }
        }
    }
    .instrument(span)
    .await
}

async fn import(
    store: &SaleStore,
    fetcher: &SourceFetcher,
    config: &Config,
    options: &ImportOptions,
    run: &IngestionRun,
) -> Result<WriteStats, IngestError> {
    if options.reset {
        store.reset_schema().await?;
    } else {
        init_schema(store).await?;
    }

    // keeps the download alive until ingestion finishes
    let mut _scratch = None;
    let path = match &options.source {
        ImportSource::File(path) => path.clone(),
        ImportSource::Url(url) => {
            let extension = if url.ends_with(".gz") { "csv.gz" } else { "csv" };
            let scratch = ScratchFile::new(
                config
                    .temp_dir
                    .join(format!("ppd-import-{}.{}", run.id, extension)),
            );
            fetcher.download(url, scratch.path()).await?;
            let path = scratch.path().to_path_buf();
            _scratch = Some(scratch);
            path
        }
    };

    let rows = validate_file(&path, options.parse.clone())?;
    info!("Importing {} rows from {:?} ({:?})", rows, path, options.policy);

    let records = open_records(&path, options.parse.clone())?;
    BatchUpserter::new(store, options.policy)
        .with_batch_size(config.batch_size)
        .write_all(records)
        .await
}
