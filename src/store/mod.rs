//! Storage for property sale records
//!
//! One logical table, two interchangeable backends. The backend is picked once
//! at startup by [`open_store`] and passed explicitly to every component.

pub mod local;
pub mod remote;
pub mod sql;

pub use local::LocalStore;
pub use remote::RemoteStore;
pub use sql::{AddressKey, AreaFilter, SchemaLayout, SqlRow, SqlValue, Statement};

use crate::config::{Config, DatabaseBackend};
use crate::error::StoreError;
use crate::ingestion::types::{ConflictPolicy, PropertySaleRecord};
use chrono::NaiveDate;
use std::collections::HashSet;
use tracing::{info, warn};

#[derive(Debug, Clone)]
enum Backend {
    Local(LocalStore),
    Remote(RemoteStore),
}

/// Handle to the sales table on the selected backend
#[derive(Debug, Clone)]
pub struct SaleStore {
    backend: Backend,
    layout: SchemaLayout,
}

/// Mean price for one calendar year
#[derive(Debug, Clone, PartialEq)]
pub struct YearlyAverage {
    pub year: String,
    pub avg_price: f64,
    pub sales: i64,
}

impl SaleStore {
    pub fn local(store: LocalStore, layout: SchemaLayout) -> Self {
        Self {
            backend: Backend::Local(store),
            layout,
        }
    }

    pub fn remote(store: RemoteStore, layout: SchemaLayout) -> Self {
        Self {
            backend: Backend::Remote(store),
            layout,
        }
    }

    /// Fresh in-memory SQLite store with the schema created
    pub async fn in_memory(layout: SchemaLayout) -> Result<Self, StoreError> {
        let store = Self::local(LocalStore::in_memory().await?, layout);
        store.ensure_schema().await?;
        Ok(store)
    }

    pub fn layout(&self) -> SchemaLayout {
        self.layout
    }

    pub fn backend_name(&self) -> &'static str {
        match self.backend {
            Backend::Local(_) => "local",
            Backend::Remote(_) => "remote",
        }
    }

    async fn execute(&self, statement: &Statement) -> Result<u64, StoreError> {
        match &self.backend {
            Backend::Local(store) => store.execute(statement).await,
            Backend::Remote(store) => store.execute(statement).await,
        }
    }

    async fn fetch(&self, statement: &Statement) -> Result<Vec<SqlRow>, StoreError> {
        match &self.backend {
            Backend::Local(store) => store.fetch(statement).await,
            Backend::Remote(store) => store.fetch(statement).await,
        }
    }

    async fn fetch_scalar(&self, statement: &Statement) -> Result<SqlValue, StoreError> {
        let rows = self.fetch(statement).await?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| row.into_iter().next())
            .unwrap_or(SqlValue::Null))
    }

    async fn fetch_records(&self, statement: &Statement) -> Result<Vec<PropertySaleRecord>, StoreError> {
        self.fetch(statement)
            .await?
            .iter()
            .map(|row| sql::record_from_row(row))
            .collect()
    }

    #[cfg(test)]
    pub(crate) async fn execute_raw(&self, sql: &str) -> Result<u64, StoreError> {
        self.execute(&Statement::new(sql)).await
    }

    /// Cheap round trip used to verify connectivity
    pub async fn ping(&self) -> Result<(), StoreError> {
        self.fetch(&Statement::new("SELECT 1")).await.map(|_| ())
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in self.layout.create_statements() {
            self.execute(&statement).await?;
        }
        Ok(())
    }

    /// Drop and recreate the table
    pub async fn reset_schema(&self) -> Result<(), StoreError> {
        warn!("Dropping table {}", self.layout.table());
        self.execute(&self.layout.drop_statement()).await?;
        self.ensure_schema().await
    }

    pub async fn table_exists(&self) -> Result<bool, StoreError> {
        let value = self.fetch_scalar(&self.layout.table_exists()).await?;
        Ok(value.as_i64().unwrap_or(0) > 0)
    }

    /// One multi-row statement; returns rows affected
    pub async fn upsert_batch(
        &self,
        records: &[PropertySaleRecord],
        policy: ConflictPolicy,
    ) -> Result<u64, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }
        self.execute(&self.layout.insert_batch(records, policy)).await
    }

    pub async fn existing_ids(&self, ids: &[&str]) -> Result<HashSet<String>, StoreError> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let rows = self.fetch(&self.layout.existing_ids(ids)).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .map(|value| value.as_text())
            .collect())
    }

    pub async fn latest_transfer_date(&self) -> Result<Option<NaiveDate>, StoreError> {
        let value = self.fetch_scalar(&self.layout.latest_transfer_date()).await?;
        if value == SqlValue::Null {
            return Ok(None);
        }
        let text = value.as_text();
        let date_part = text.get(..10).unwrap_or(&text);
        Ok(NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok())
    }

    pub async fn count(&self) -> Result<i64, StoreError> {
        let value = self.fetch_scalar(&self.layout.count()).await?;
        Ok(value.as_i64().unwrap_or(0))
    }

    pub async fn search_postcode_prefix(
        &self,
        postcode_key: &str,
        limit: u32,
    ) -> Result<Vec<PropertySaleRecord>, StoreError> {
        self.fetch_records(&self.layout.search_postcode_prefix(postcode_key, limit))
            .await
    }

    pub async fn search_area(&self, area: &str, limit: u32) -> Result<Vec<PropertySaleRecord>, StoreError> {
        self.fetch_records(&self.layout.search_area(area, limit)).await
    }

    pub async fn yearly_averages(&self, filter: &AreaFilter) -> Result<Vec<YearlyAverage>, StoreError> {
        let rows = self.fetch(&self.layout.yearly_averages(filter)).await?;
        rows.into_iter()
            .map(|row| match row.as_slice() {
                [year, avg, sales] => Ok(YearlyAverage {
                    year: year.as_text(),
                    avg_price: avg.as_f64().unwrap_or(0.0),
                    sales: sales.as_i64().unwrap_or(0),
                }),
                other => Err(StoreError::Decode(format!(
                    "expected 3 columns, got {}",
                    other.len()
                ))),
            })
            .collect()
    }

    pub async fn sales_for_address(&self, key: &AddressKey) -> Result<Vec<PropertySaleRecord>, StoreError> {
        self.fetch_records(&self.layout.sales_for_address(key)).await
    }

    pub async fn comparables(
        &self,
        postcode_key: &str,
        limit: u32,
    ) -> Result<Vec<PropertySaleRecord>, StoreError> {
        self.fetch_records(&self.layout.comparables(postcode_key, limit))
            .await
    }

    pub async fn close(&self) {
        match &self.backend {
            Backend::Local(store) => store.close().await,
            Backend::Remote(store) => store.close().await,
        }
    }
}

/// Open the configured backend, falling back to the local file only in development
pub async fn open_store(config: &Config) -> Result<SaleStore, StoreError> {
    let layout = config.schema_layout;

    match config.database_backend {
        DatabaseBackend::Local => {
            let store = SaleStore::local(LocalStore::connect(&config.local_database_url).await?, layout);
            info!("Using local store");
            Ok(store)
        }
        DatabaseBackend::Remote => {
            let url = config.remote_database_url.as_deref().ok_or_else(|| {
                StoreError::Unavailable("REMOTE_DATABASE_URL is not set".to_string())
            })?;
            let store = SaleStore::remote(
                RemoteStore::new(url, config.remote_auth_token.clone())?,
                layout,
            );

            match store.ping().await {
                Ok(()) => {
                    info!("Using remote store");
                    Ok(store)
                }
                Err(StoreError::Unavailable(reason)) if config.environment.allows_fallback() => {
                    warn!(
                        "Remote store unavailable ({}), falling back to local database {}",
                        reason, config.local_database_url
                    );
                    Ok(SaleStore::local(
                        LocalStore::connect(&config.local_database_url).await?,
                        layout,
                    ))
                }
                Err(e) => Err(e),
            }
        }
    }
}
