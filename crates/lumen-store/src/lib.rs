//! Record store and catalog clients for Lumen.
//!
//! This crate defines the payload shapes shared by every Lumen component and
//! the two collaborators the cache engine consumes:
//!
//! ## Features
//!
//! - **RecordStore**: versioned JSON-blob records with optimistic concurrency
//!   ([`HttpRecordStore`] over REST, [`MemoryRecordStore`] in-process)
//! - **CatalogFetcher**: retrieval of the remote, read-only content catalog
//!   ([`HttpCatalogFetcher`], [`MemoryCatalogFetcher`])

pub mod catalog;
mod client;
mod error;
pub mod memory;
mod records;
mod store;
mod types;

pub use catalog::{CatalogFetcher, HttpCatalogFetcher};
pub use client::HttpRecordStore;
pub use error::StoreError;
pub use memory::{MemoryCatalogFetcher, MemoryRecordStore};
pub use records::*;
pub use store::{CreatedRecord, NewRecord, RecordPayload, RecordStore, StoredRecord};
pub use types::*;
