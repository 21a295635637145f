//! Utility functions for common operations

use chrono::{Datelike, NaiveDate};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Month whose monthly update file is expected to be published
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeltaPeriod {
    pub year: i32,
    pub month: u32,
}

impl DeltaPeriod {
    /// Period `lag_months` before the month containing `today`
    pub fn for_date(today: NaiveDate, lag_months: u32) -> Self {
        let months = today.year() * 12 + today.month0() as i32 - lag_months as i32;
        Self {
            year: months.div_euclid(12),
            month: months.rem_euclid(12) as u32 + 1,
        }
    }

    pub fn start_date(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    /// e.g. `26-09-pp-monthly-update-new-version.csv`
    pub fn file_name(&self) -> String {
        format!(
            "{:02}-{:02}-pp-monthly-update-new-version.csv",
            self.year.rem_euclid(100),
            self.month
        )
    }

    pub fn url(&self, base_url: &str) -> String {
        format!(
            "{}/{}/{}",
            base_url.trim_end_matches('/'),
            self.year,
            self.file_name()
        )
    }
}

impl std::fmt::Display for DeltaPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}/{}", self.month, self.year)
    }
}

/// Strip whitespace and uppercase; also drops anything that is not alphanumeric
pub fn normalize_postcode(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Land Registry ids sometimes arrive wrapped in braces
pub fn strip_braces(id: &str) -> String {
    id.trim().trim_matches(|c| c == '{' || c == '}').to_string()
}

/// Price as whole pounds; anything unparseable becomes zero
pub fn parse_price(raw: &str) -> i64 {
    let trimmed = raw.trim();
    trimmed
        .parse::<i64>()
        .ok()
        .or_else(|| {
            // leading digits only, as some exports append decimals
            let digits: String = trimmed.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse::<i64>().ok()
        })
        .filter(|p| *p >= 0)
        .unwrap_or(0)
}

/// `2021-06-01 00:00` becomes `2021-06-01`; unrecognised text is kept trimmed
pub fn normalize_transfer_date(raw: &str) -> String {
    let trimmed = raw.trim();
    let date_part = trimmed.get(..10).unwrap_or(trimmed);

    match NaiveDate::parse_from_str(date_part, "%Y-%m-%d") {
        Ok(date) => date.format("%Y-%m-%d").to_string(),
        Err(_) => match NaiveDate::parse_from_str(trimmed, "%d/%m/%Y") {
            Ok(date) => date.format("%Y-%m-%d").to_string(),
            Err(_) => trimmed.to_string(),
        },
    }
}

/// Format a UK address from components
pub fn format_address(saon: &str, paon: &str, street: &str) -> String {
    [saon, paon, street]
        .iter()
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Downloaded file that is removed when the guard goes out of scope
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove scratch file {:?}: {}", self.path, e),
        }
    }
}
