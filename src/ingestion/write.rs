//! Write functions - persist records in fixed-size batches

use crate::error::{IngestError, StoreError};
use crate::ingestion::types::{ConflictPolicy, PropertySaleRecord, WriteStats};
use crate::store::SaleStore;
use std::collections::HashSet;
use tracing::{debug, info, warn};

pub const DEFAULT_BATCH_SIZE: usize = 100;

const PROGRESS_EVERY: u64 = 1000;
const LOGGED_BATCH_FAILURES: u64 = 10;

/// Groups records into batches and writes each as one statement
pub struct BatchUpserter<'a> {
    store: &'a SaleStore,
    batch_size: usize,
    policy: ConflictPolicy,
}

impl<'a> BatchUpserter<'a> {
    pub fn new(store: &'a SaleStore, policy: ConflictPolicy) -> Self {
        Self {
            store,
            batch_size: DEFAULT_BATCH_SIZE,
            policy,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Write every record; a failing batch is counted and skipped, a parse
    /// error or an unreachable store ends the run
    pub async fn write_all<I>(&self, records: I) -> Result<WriteStats, IngestError>
    where
        I: IntoIterator<Item = Result<PropertySaleRecord, IngestError>>,
    {
        info!(
            "Writing records in batches of {} ({:?})",
            self.batch_size, self.policy
        );

        let mut stats = WriteStats::default();
        let mut failed_batches = 0u64;
        let mut batch = Vec::with_capacity(self.batch_size);

        for record in records {
            batch.push(record?);
            stats.total_processed += 1;

            if batch.len() >= self.batch_size {
                self.flush(&mut batch, &mut stats, &mut failed_batches).await?;
            }

            if stats.total_processed % PROGRESS_EVERY == 0 {
                info!("Processed {} records...", stats.total_processed);
            }
        }

        self.flush(&mut batch, &mut stats, &mut failed_batches).await?;

        info!("Write complete: {}", stats);
        Ok(stats)
    }

    async fn flush(
        &self,
        batch: &mut Vec<PropertySaleRecord>,
        stats: &mut WriteStats,
        failed_batches: &mut u64,
    ) -> Result<(), IngestError> {
        if batch.is_empty() {
            return Ok(());
        }

        match self.write_batch(batch).await {
            Ok((new, updated)) => {
                stats.new_records += new;
                stats.updated_records += updated;
                debug!("Batch of {} written: {} new, {} updated", batch.len(), new, updated);
            }
            Err(StoreError::Unavailable(message)) => {
                return Err(IngestError::StorageUnavailable(message));
            }
            Err(e) => {
                *failed_batches += 1;
                stats.errors += batch.len() as u64;
                let err = IngestError::BatchWriteFailed {
                    size: batch.len(),
                    source: e,
                };
                if *failed_batches <= LOGGED_BATCH_FAILURES {
                    warn!("{}", err);
                } else {
                    debug!("{}", err);
                }
            }
        }

        batch.clear();
        Ok(())
    }

    /// Returns `(new, updated)` row counts for one batch
    async fn write_batch(&self, batch: &[PropertySaleRecord]) -> Result<(u64, u64), StoreError> {
        let ids: Vec<&str> = {
            let mut seen = HashSet::new();
            batch
                .iter()
                .map(|r| r.id.as_str())
                .filter(|id| seen.insert(*id))
                .collect()
        };

        let existing = self.store.existing_ids(&ids).await?;
        let affected = self.store.upsert_batch(batch, self.policy).await?;

        let fresh = ids.iter().filter(|id| !existing.contains(**id)).count() as u64;
        let new = fresh.min(affected);
        Ok((new, affected - new))
    }
}
