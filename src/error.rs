//! Error types shared by the ingestion pipeline and the storage layer

use thiserror::Error;

/// Failures raised by a storage backend
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached at all (connection, transport, auth)
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store was reached but rejected the statement
    #[error("query failed: {0}")]
    Query(String),

    /// A row came back in a shape the caller did not expect
    #[error("unexpected row shape: {0}")]
    Decode(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Configuration(_) => StoreError::Unavailable(err.to_string()),
            sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::ColumnIndexOutOfBounds { .. }
            | sqlx::Error::Decode(_) => StoreError::Decode(err.to_string()),
            other => StoreError::Query(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            StoreError::Decode(err.to_string())
        } else {
            StoreError::Unavailable(err.to_string())
        }
    }
}

/// Ingestion failure taxonomy
#[derive(Debug, Error)]
pub enum IngestError {
    /// The upstream file for the requested period has not been published yet
    #[error("update file not available yet at {url}")]
    NotAvailableYet { url: String },

    #[error("download of {url} failed after {attempts} attempt(s): {last_error}")]
    DownloadFailed {
        url: String,
        attempts: u32,
        last_error: String,
    },

    /// Structural CSV corruption; never recovered per row
    #[error("CSV parse failed at line {line}: {message}")]
    ParseFailed { line: u64, message: String },

    #[error("batch of {size} record(s) failed: {source}")]
    BatchWriteFailed {
        size: usize,
        #[source]
        source: StoreError,
    },

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IngestError {
    /// Expected failures that callers should retry later rather than alarm on
    pub fn is_soft(&self) -> bool {
        matches!(self, IngestError::NotAvailableYet { .. })
    }

    /// Failures that abort a run instead of being counted and skipped
    pub fn is_fatal(&self) -> bool {
        !matches!(self, IngestError::BatchWriteFailed { .. })
    }
}

impl From<StoreError> for IngestError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(message) => IngestError::StorageUnavailable(message),
            other => IngestError::StorageUnavailable(other.to_string()),
        }
    }
}

impl From<csv::Error> for IngestError {
    fn from(err: csv::Error) -> Self {
        let line = err.position().map(|p| p.line()).unwrap_or(0);
        match err.into_kind() {
            csv::ErrorKind::Io(io) => IngestError::Io(io),
            kind => IngestError::ParseFailed {
                line,
                message: format!("{:?}", kind),
            },
        }
    }
}
