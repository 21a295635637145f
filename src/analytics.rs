//! Price analytics over stored sales

use crate::ingestion::types::{PropertySaleRecord, PropertyType};
use crate::ingestion::utils::round_to;
use crate::store::YearlyAverage;
use serde::Serialize;

/// Gross yield assumed when no rental evidence exists
pub const DEFAULT_GROSS_YIELD: f64 = 0.045;

/// Comparables fall back to this share of the asking price
const FALLBACK_PRICE_RATIO: f64 = 0.95;

/// One year of an area price trend
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
    pub year: String,
    pub avg_price: i64,
    pub pct_change: Option<f64>,
    pub sales: i64,
}

/// Year-over-year change, computed from unrounded means
pub fn trend_points(averages: &[YearlyAverage]) -> Vec<TrendPoint> {
    let mut previous: Option<f64> = None;

    averages
        .iter()
        .map(|year| {
            let pct_change = previous
                .filter(|last| *last > 0.0)
                .map(|last| round_to((year.avg_price / last - 1.0) * 100.0, 1));
            previous = Some(year.avg_price);

            TrendPoint {
                year: year.year.clone(),
                avg_price: year.avg_price.round() as i64,
                pct_change,
                sales: year.sales,
            }
        })
        .collect()
}

/// Growth from first to last sale; `sales` must be oldest first
pub fn growth_pct(sales: &[PropertySaleRecord]) -> Option<f64> {
    if sales.len() < 2 {
        return None;
    }
    let first = sales.first()?.price;
    let last = sales.last()?.price;
    if first <= 0 {
        return None;
    }
    Some(round_to((last as f64 / first as f64 - 1.0) * 100.0, 1))
}

/// Simple annualised growth between the earliest and latest sale
pub fn area_growth_rate(sales: &[PropertySaleRecord]) -> Option<f64> {
    let mut dated: Vec<_> = sales
        .iter()
        .filter_map(|s| s.transfer_date().map(|d| (d, s.price)))
        .filter(|(_, price)| *price > 0)
        .collect();
    if dated.len() < 2 {
        return None;
    }
    dated.sort_by_key(|(date, _)| *date);

    let (first_date, first_price) = dated[0];
    let (last_date, last_price) = dated[dated.len() - 1];
    let years = (last_date - first_date).num_days() as f64 / 365.0;
    if years <= 0.0 {
        return None;
    }

    let growth = (last_price - first_price) as f64 / first_price as f64;
    Some(round_to(growth / years * 100.0, 2))
}

/// Calculate rental yield percentage
/// Formula: (monthly_rent × 12 / price) × 100
pub fn calculate_rental_yield(price: i64, monthly_rent: f64) -> Option<f64> {
    if price <= 0 {
        return None;
    }
    Some((monthly_rent * 12.0 / price as f64) * 100.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn from_comparables(count: usize) -> Self {
        match count {
            n if n >= 5 => Confidence::High,
            n if n >= 2 => Confidence::Medium,
            _ => Confidence::Low,
        }
    }
}

/// How far an asking price sits below comparable sold prices
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BmvEstimate {
    pub asking_price: i64,
    pub average_sold_price: i64,
    pub bmv_amount: i64,
    pub bmv_percentage: f64,
    pub estimated_rent: i64,
    pub rental_yield: f64,
    pub area_growth: Option<f64>,
    pub comparables: usize,
    pub confidence: Confidence,
}

/// `comparables` are recent sales in the same area; only the same property
/// type counts toward the average
pub fn estimate_bmv(
    asking_price: i64,
    property_type: Option<PropertyType>,
    comparables: &[PropertySaleRecord],
) -> BmvEstimate {
    let similar: Vec<&PropertySaleRecord> = comparables
        .iter()
        .filter(|sale| property_type.map_or(true, |t| sale.property_type() == Some(t)))
        .collect();

    let average_sold = if similar.is_empty() {
        asking_price as f64 * FALLBACK_PRICE_RATIO
    } else {
        similar.iter().map(|s| s.price as f64).sum::<f64>() / similar.len() as f64
    };

    let bmv_amount = average_sold - asking_price as f64;
    let bmv_percentage = if average_sold > 0.0 {
        bmv_amount / average_sold * 100.0
    } else {
        0.0
    };

    let estimated_rent = asking_price.max(0) as f64 * DEFAULT_GROSS_YIELD / 12.0;
    let rental_yield = calculate_rental_yield(asking_price, estimated_rent).unwrap_or(0.0);

    let owned: Vec<PropertySaleRecord> = similar.iter().map(|s| (*s).clone()).collect();

    BmvEstimate {
        asking_price,
        average_sold_price: average_sold.round() as i64,
        bmv_amount: bmv_amount.round() as i64,
        bmv_percentage: round_to(bmv_percentage, 2),
        estimated_rent: estimated_rent.round() as i64,
        rental_yield: round_to(rental_yield, 2),
        area_growth: area_growth_rate(&owned),
        comparables: similar.len(),
        confidence: Confidence::from_comparables(similar.len()),
    }
}
