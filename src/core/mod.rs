//! Core persistence.
//!
//! This module contains:
//! - CallStore: SQLite record store with an atomic per-session upsert

pub mod call_store;

// Re-export commonly used types
pub use call_store::{CallFilter, CallPage, CallStore, StoreError, DEFAULT_PAGE_SIZE};
