//! Core data types for the ingestion pipeline
//! Pure data structures with no I/O

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Number of columns in a price paid data row
pub const COLUMN_COUNT: usize = 16;

/// One registered property transaction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertySaleRecord {
    /// Transaction unique identifier, braces stripped
    pub id: String,
    pub price: i64,
    /// ISO 8601 date of legal transfer
    pub transfer_date: String,
    pub postcode: String,
    pub property_type: String,
    pub is_new_build: String,
    pub duration: String,
    pub paon: String,
    pub saon: String,
    pub street: String,
    pub locality: String,
    pub town: String,
    pub district: String,
    pub county: String,
    pub category: String,
    pub status: String,
}

impl PropertySaleRecord {
    pub fn transfer_date(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(&self.transfer_date, "%Y-%m-%d").ok()
    }

    pub fn property_type(&self) -> Option<PropertyType> {
        PropertyType::from_code(&self.property_type)
    }

    pub fn duration(&self) -> Option<Duration> {
        Duration::from_code(&self.duration)
    }

    pub fn category(&self) -> Option<Category> {
        Category::from_code(&self.category)
    }

    pub fn status(&self) -> Option<RecordStatus> {
        RecordStatus::from_code(&self.status)
    }

    /// Retracted by the source; kept as a row, excluded from aggregates
    pub fn is_retracted(&self) -> bool {
        self.status() == Some(RecordStatus::Deletion)
    }

    pub fn is_new_build(&self) -> bool {
        self.is_new_build.eq_ignore_ascii_case("Y")
    }
}

/// Logical columns of a price paid row, in file order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    Id,
    Price,
    TransferDate,
    Postcode,
    PropertyType,
    IsNewBuild,
    Duration,
    Paon,
    Saon,
    Street,
    Locality,
    Town,
    District,
    County,
    Category,
    Status,
}

impl Column {
    pub const ALL: [Column; COLUMN_COUNT] = [
        Column::Id,
        Column::Price,
        Column::TransferDate,
        Column::Postcode,
        Column::PropertyType,
        Column::IsNewBuild,
        Column::Duration,
        Column::Paon,
        Column::Saon,
        Column::Street,
        Column::Locality,
        Column::Town,
        Column::District,
        Column::County,
        Column::Category,
        Column::Status,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        let normalized: String = name
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();

        match normalized.as_str() {
            "id" | "transactionid" | "transactionuniqueidentifier" => Some(Column::Id),
            "price" => Some(Column::Price),
            "date" | "transferdate" | "dateoftransfer" => Some(Column::TransferDate),
            "postcode" => Some(Column::Postcode),
            "propertytype" => Some(Column::PropertyType),
            "isnewbuild" | "isnew" | "oldnew" => Some(Column::IsNewBuild),
            "duration" => Some(Column::Duration),
            "paon" => Some(Column::Paon),
            "saon" => Some(Column::Saon),
            "street" => Some(Column::Street),
            "locality" => Some(Column::Locality),
            "town" | "towncity" => Some(Column::Town),
            "district" => Some(Column::District),
            "county" => Some(Column::County),
            "category" | "ppdcategorytype" => Some(Column::Category),
            "status" | "recordstatus" => Some(Column::Status),
            _ => None,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Property type codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyType {
    Detached,
    SemiDetached,
    Terraced,
    Flat,
    Other,
}

impl PropertyType {
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "D" => Some(PropertyType::Detached),
            "S" => Some(PropertyType::SemiDetached),
            "T" => Some(PropertyType::Terraced),
            "F" => Some(PropertyType::Flat),
            "O" => Some(PropertyType::Other),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            PropertyType::Detached => "D",
            PropertyType::SemiDetached => "S",
            PropertyType::Terraced => "T",
            PropertyType::Flat => "F",
            PropertyType::Other => "O",
        }
    }
}

impl std::fmt::Display for PropertyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PropertyType::Detached => write!(f, "detached"),
            PropertyType::SemiDetached => write!(f, "semi-detached"),
            PropertyType::Terraced => write!(f, "terraced"),
            PropertyType::Flat => write!(f, "flat/maisonette"),
            PropertyType::Other => write!(f, "other"),
        }
    }
}

/// Tenure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Duration {
    Freehold,
    Leasehold,
}

impl Duration {
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "F" => Some(Duration::Freehold),
            "L" => Some(Duration::Leasehold),
            _ => None,
        }
    }
}

/// PPD category type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    Standard,   // A: standard price paid entry
    Additional, // B: repossessions, buy-to-lets, transfers to non-private individuals
}

impl Category {
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "A" => Some(Category::Standard),
            "B" => Some(Category::Additional),
            _ => None,
        }
    }
}

/// Record status in monthly update files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordStatus {
    Addition,
    Change,
    Deletion,
}

impl RecordStatus {
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "A" => Some(RecordStatus::Addition),
            "C" => Some(RecordStatus::Change),
            "D" => Some(RecordStatus::Deletion),
            _ => None,
        }
    }
}

/// How an insert treats an id that is already stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Overwrite every column (full reloads)
    Replace,
    /// Keep the stored row untouched
    Ignore,
    /// Update non-key columns; blank incoming text keeps the stored value
    #[default]
    Upsert,
}

impl std::str::FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "replace" => Ok(ConflictPolicy::Replace),
            "ignore" => Ok(ConflictPolicy::Ignore),
            "upsert" => Ok(ConflictPolicy::Upsert),
            other => Err(format!("unknown conflict policy: {}", other)),
        }
    }
}

/// Write operation statistics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteStats {
    pub total_processed: u64,
    pub new_records: u64,
    pub updated_records: u64,
    pub errors: u64,
}

impl WriteStats {
    pub fn succeeded(&self) -> u64 {
        self.new_records + self.updated_records
    }
}

impl std::fmt::Display for WriteStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "processed: {}, new: {}, updated: {}, errors: {}",
            self.total_processed, self.new_records, self.updated_records, self.errors
        )
    }
}

/// One ingestion invocation; lives only for the duration of a run
#[derive(Debug, Clone)]
pub struct IngestionRun {
    pub id: Uuid,
    pub stats: WriteStats,
}

impl IngestionRun {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            stats: WriteStats::default(),
        }
    }
}

impl Default for IngestionRun {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a run ended without success
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    NotAvailableYet,
    DownloadFailed,
    ParseFailed,
    StorageUnavailable,
    Io,
}

/// Structured result of an update or import, rendered as-is by callers
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<WriteStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub failure: Option<FailureKind>,
}

impl RunOutcome {
    pub fn up_to_date() -> Self {
        Self {
            success: true,
            message: "Database is already up to date".to_string(),
            stats: Some(WriteStats::default()),
            error: None,
            failure: None,
        }
    }

    pub fn completed(message: impl Into<String>, stats: WriteStats) -> Self {
        Self {
            success: true,
            message: message.into(),
            stats: Some(stats),
            error: None,
            failure: None,
        }
    }

    pub fn failed(err: &crate::IngestError) -> Self {
        use crate::IngestError;

        let (message, failure) = match err {
            IngestError::NotAvailableYet { .. } => (
                "The data for this period may not be available yet",
                FailureKind::NotAvailableYet,
            ),
            IngestError::DownloadFailed { .. } => ("Download failed", FailureKind::DownloadFailed),
            IngestError::ParseFailed { .. } => ("Update file is corrupt", FailureKind::ParseFailed),
            IngestError::BatchWriteFailed { .. } | IngestError::StorageUnavailable(_) => {
                ("Storage unavailable", FailureKind::StorageUnavailable)
            }
            IngestError::Io(_) => ("Local I/O failure", FailureKind::Io),
        };

        Self {
            success: false,
            message: message.to_string(),
            stats: None,
            error: Some(err.to_string()),
            failure: Some(failure),
        }
    }

    pub fn is_soft_failure(&self) -> bool {
        self.failure == Some(FailureKind::NotAvailableYet)
    }
}
