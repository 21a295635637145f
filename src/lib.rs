// Library module for testable functions

pub mod analytics;
pub mod api;
pub mod config;
pub mod error;
pub mod ingestion;
pub mod query;
pub mod store;

pub use config::Config;
pub use error::{IngestError, StoreError};
pub use store::{open_store, SaleStore};

/// Install the fmt subscriber, honouring `RUST_LOG` (default `info`)
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .init();
}
