//! Data ingestion module - functional pipeline for price paid files

pub mod fetch;
pub mod import;
pub mod parse;
pub mod types;
pub mod update;
pub mod utils;
pub mod write;

pub use types::*;
