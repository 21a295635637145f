//! Read side - search, trends and per-property history

use crate::analytics::{estimate_bmv, growth_pct, trend_points, BmvEstimate, TrendPoint};
use crate::error::StoreError;
use crate::ingestion::types::{PropertySaleRecord, PropertyType};
use crate::ingestion::utils::{format_address, normalize_postcode};
use crate::store::{AddressKey, AreaFilter, SaleStore};
use chrono::NaiveDate;
use serde::Serialize;
use tracing::debug;

pub const DEFAULT_SEARCH_LIMIT: u32 = 100;
pub const MAX_SEARCH_LIMIT: u32 = 500;

const COMPARABLES_LIMIT: u32 = 200;

/// Postcode prefix first, then town or district
pub async fn search(
    store: &SaleStore,
    query: &str,
    limit: Option<u32>,
) -> Result<Vec<PropertySaleRecord>, StoreError> {
    let limit = clamp_limit(limit);
    let query = query.trim();
    if query.is_empty() {
        return Ok(Vec::new());
    }

    let key = normalize_postcode(query);
    if !key.is_empty() {
        let found = store.search_postcode_prefix(&key, limit).await?;
        if !found.is_empty() {
            return Ok(found);
        }
    }

    debug!("No postcode match for {:?}, trying area names", query);
    store.search_area(query, limit).await
}

pub fn clamp_limit(limit: Option<u32>) -> u32 {
    limit.unwrap_or(DEFAULT_SEARCH_LIMIT).clamp(1, MAX_SEARCH_LIMIT)
}

/// Yearly average prices for whatever `query` matches
pub async fn trend(store: &SaleStore, query: &str) -> Result<Vec<TrendPoint>, StoreError> {
    let query = query.trim();
    if query.is_empty() {
        return Ok(Vec::new());
    }

    let key = normalize_postcode(query);
    if !key.is_empty() {
        let averages = store
            .yearly_averages(&AreaFilter::PostcodePrefix(key))
            .await?;
        if !averages.is_empty() {
            return Ok(trend_points(&averages));
        }
    }

    let averages = store
        .yearly_averages(&AreaFilter::Area(query.to_string()))
        .await?;
    Ok(trend_points(&averages))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyGrowth {
    pub address: String,
    pub sales: Vec<PropertySaleRecord>,
    pub growth_pct: Option<f64>,
}

pub async fn property_growth(store: &SaleStore, key: &AddressKey) -> Result<PropertyGrowth, StoreError> {
    let sales = store.sales_for_address(key).await?;
    Ok(PropertyGrowth {
        address: format_address(&key.saon, &key.paon, &key.street),
        growth_pct: growth_pct(&sales),
        sales,
    })
}

/// Outward code of a full postcode, or the whole key when it is already partial
pub fn postcode_area_key(postcode: &str) -> String {
    let key = normalize_postcode(postcode);
    if key.len() >= 5 {
        key[..key.len() - 3].to_string()
    } else {
        key
    }
}

pub async fn bmv(
    store: &SaleStore,
    postcode: &str,
    asking_price: i64,
    property_type: Option<PropertyType>,
) -> Result<BmvEstimate, StoreError> {
    let area = postcode_area_key(postcode);
    let comparables = if area.is_empty() {
        Vec::new()
    } else {
        store.comparables(&area, COMPARABLES_LIMIT).await?
    };
    debug!("{} comparables in {}", comparables.len(), area);
    Ok(estimate_bmv(asking_price, property_type, &comparables))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DbStatus {
    pub backend: &'static str,
    pub table_exists: bool,
    pub record_count: i64,
    pub latest_transfer_date: Option<NaiveDate>,
}

pub async fn db_check(store: &SaleStore) -> Result<DbStatus, StoreError> {
    let table_exists = store.table_exists().await?;
    let (record_count, latest_transfer_date) = if table_exists {
        (store.count().await?, store.latest_transfer_date().await?)
    } else {
        (0, None)
    };

    Ok(DbStatus {
        backend: store.backend_name(),
        table_exists,
        record_count,
        latest_transfer_date,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::ConflictPolicy;
    use crate::store::SchemaLayout;

    fn sale(id: &str, price: i64, date: &str, postcode: &str, town: &str) -> PropertySaleRecord {
        PropertySaleRecord {
            id: id.to_string(),
            price,
            transfer_date: date.to_string(),
            postcode: postcode.to_string(),
            property_type: "T".to_string(),
            paon: "10".to_string(),
            street: "HIGH STREET".to_string(),
            town: town.to_string(),
            district: "SOMEWHERE".to_string(),
            status: "A".to_string(),
            ..Default::default()
        }
    }

    async fn seeded() -> SaleStore {
        let store = SaleStore::in_memory(SchemaLayout::Natural).await.unwrap();
        store
            .upsert_batch(
                &[
                    sale("1", 100_000, "2020-03-01", "SW1A 1AA", "LONDON"),
                    sale("2", 110_000, "2021-03-01", "SW1A 1AA", "LONDON"),
                    sale("3", 99_000, "2022-03-01", "SW1A 2BB", "LONDON"),
                    sale("4", 250_000, "2022-05-01", "BA1 1AA", "BATH"),
                ],
                ConflictPolicy::Upsert,
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_search_normalises_postcode() {
        let store = seeded().await;
        let found = search(&store, "sw1a 1aa", None).await.unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|r| r.postcode == "SW1A 1AA"));
        assert_eq!(found[0].id, "2");
    }

    #[tokio::test]
    async fn test_search_falls_back_to_area() {
        let store = seeded().await;
        let found = search(&store, "Bath", Some(10)).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "4");
        assert!(search(&store, "   ", None).await.unwrap().is_empty());
    }

    #[test]
    fn test_limit_is_capped() {
        assert_eq!(clamp_limit(None), 100);
        assert_eq!(clamp_limit(Some(10_000)), 500);
        assert_eq!(clamp_limit(Some(0)), 1);
    }

    #[tokio::test]
    async fn test_trend_by_postcode_prefix() {
        let store = seeded().await;
        let points = trend(&store, "SW1A").await.unwrap();
        let pct: Vec<_> = points.iter().map(|p| p.pct_change).collect();
        assert_eq!(pct, vec![None, Some(10.0), Some(-10.0)]);
    }

    #[tokio::test]
    async fn test_trend_by_area_name() {
        let store = seeded().await;
        let points = trend(&store, "london").await.unwrap();
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].year, "2020");
    }

    #[tokio::test]
    async fn test_property_growth() {
        let store = seeded().await;
        let key = AddressKey {
            paon: "10".to_string(),
            saon: String::new(),
            street: "High Street".to_string(),
            postcode: "sw1a1aa".to_string(),
        };

        let growth = property_growth(&store, &key).await.unwrap();
        assert_eq!(growth.sales.len(), 2);
        assert_eq!(growth.growth_pct, Some(10.0));
        assert_eq!(growth.address, "10 High Street");
    }

    #[tokio::test]
    async fn test_bmv_from_area_comparables() {
        let store = seeded().await;
        let estimate = bmv(&store, "SW1A 9ZZ", 90_000, PropertyType::from_code("T"))
            .await
            .unwrap();
        assert_eq!(estimate.comparables, 3);
        assert_eq!(estimate.average_sold_price, 103_000);
    }

    #[test]
    fn test_postcode_area_key() {
        assert_eq!(postcode_area_key("SW1A 1AA"), "SW1A");
        assert_eq!(postcode_area_key("e1 6an"), "E1");
        assert_eq!(postcode_area_key("N1"), "N1");
    }

    #[tokio::test]
    async fn test_db_check() {
        let store = seeded().await;
        let status = db_check(&store).await.unwrap();
        assert!(status.table_exists);
        assert_eq!(status.record_count, 4);
        assert_eq!(status.latest_transfer_date, NaiveDate::from_ymd_opt(2022, 5, 1));
        assert_eq!(status.backend, "local");
    }
}
