//! Monthly update - bring the store up to the latest published delta file

use crate::config::Config;
use crate::error::IngestError;
use crate::ingestion::fetch::SourceFetcher;
use crate::ingestion::parse::{open_records, validate_file, ParseOptions};
use crate::ingestion::types::{ConflictPolicy, IngestionRun, RunOutcome, WriteStats};
use crate::ingestion::utils::{DeltaPeriod, ScratchFile};
use crate::ingestion::write::BatchUpserter;
use crate::store::SaleStore;
use chrono::{NaiveDate, Utc};
use tracing::{error, info, info_span, warn, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateState {
    Idle,
    CheckingFreshness,
    CheckingAvailability,
    Downloading,
    Processing,
    Done,
    Failed,
}

/// Drives one incremental update: freshness, availability, download, ingest
pub struct UpdateCoordinator<'a> {
    store: &'a SaleStore,
    fetcher: &'a SourceFetcher,
    config: &'a Config,
    state: UpdateState,
}

impl<'a> UpdateCoordinator<'a> {
    pub fn new(store: &'a SaleStore, fetcher: &'a SourceFetcher, config: &'a Config) -> Self {
        Self {
            store,
            fetcher,
            config,
            state: UpdateState::Idle,
        }
    }

    pub fn state(&self) -> UpdateState {
        self.state
    }

    pub async fn run_update(&mut self) -> RunOutcome {
        self.run_update_on(Utc::now().date_naive()).await
    }

    /// Run as if today were `today`; every exit is a [`RunOutcome`]
    pub async fn run_update_on(&mut self, today: NaiveDate) -> RunOutcome {
        let mut run = IngestionRun::new();
        let span = info_span!("ingestion_run", run_id = %run.id);

        async {
            let period = DeltaPeriod::for_date(today, self.config.publication_lag_months);
            info!("Starting update for period {}", period);

            match self.execute(period, &run).await {
                Ok(None) => {
                    self.transition(UpdateState::Done);
                    RunOutcome::up_to_date()
                }
                Ok(Some(stats)) => {
                    self.transition(UpdateState::Done);
                    run.stats = stats;
                    RunOutcome::completed(
                        format!(
                            "Update completed for {}: {} new/updated records",
                            period,
                            stats.succeeded()
                        ),
                        stats,
                    )
                }
                Err(e) => {
                    self.transition(UpdateState::Failed);
                    if e.is_soft() {
                        warn!("Update skipped: {}", e);
                    } else {
                        error!("Update failed: {}", e);
                    }
                    RunOutcome::failed(&e)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// `Ok(None)` when the store already covers the period
    async fn execute(
        &mut self,
        period: DeltaPeriod,
        run: &IngestionRun,
    ) -> Result<Option<WriteStats>, IngestError> {
        self.transition(UpdateState::CheckingFreshness);
        let latest = self.store.latest_transfer_date().await?;
        info!("Latest stored transfer date: {:?}", latest);
        if latest.map_or(false, |date| date >= period.start_date()) {
            info!("Store already covers {}", period);
            return Ok(None);
        }

        self.transition(UpdateState::CheckingAvailability);
        let url = period.url(&self.config.update_base_url);
        if !self.fetcher.exists(&url).await? {
            return Err(IngestError::NotAvailableYet { url });
        }

        self.transition(UpdateState::Downloading);
        let scratch = ScratchFile::new(
            self.config
                .temp_dir
                .join(format!("ppd-update-{}.csv", run.id)),
        );
        self.fetcher.download(&url, scratch.path()).await?;

        self.transition(UpdateState::Processing);
        let rows = validate_file(scratch.path(), ParseOptions::default())?;
        info!("Ingesting {} rows", rows);

        let records = open_records(scratch.path(), ParseOptions::default())?;
        let stats = BatchUpserter::new(self.store, ConflictPolicy::Upsert)
            .with_batch_size(self.config.batch_size)
            .write_all(records)
            .await?;

        Ok(Some(stats))
    }

    fn transition(&mut self, next: UpdateState) {
        info!("Update state {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}
