//! callsync - Call-recording ingestion and reconciliation
//!
//! Discovers the audio and transcript files a telephony recording
//! subsystem drops under a recordings root, and folds them into one
//! persistent call record per session.
//!
//! # Architecture
//!
//! Every artifact is reconciled independently:
//! - The session id parsed from the file path is the only correlation key
//! - Facts found on disk are merged into the record with a single atomic
//!   upsert, so artifacts may arrive in any order and any number of times
//! - Fields an observation does not carry are never cleared
//!
//! # Modules
//!
//! - `domain`: Data structures (Account, CallRecord, ArtifactKind)
//! - `core`: SQLite record store
//! - `ingest`: Path parsing, artifact location, scanner and live watcher
//! - `config`: Layered configuration
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Catch up on everything already on disk
//! callsync scan
//!
//! # Reconcile new recordings as they arrive
//! callsync watch
//!
//! # Claim a caller's recordings
//! callsync register 5551234 --verified
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod ingest;

// Re-export main types at crate root for convenience
pub use core::{CallFilter, CallPage, CallStore, StoreError};
pub use domain::{Account, ArtifactKind, CallFacts, CallRecord, Playback};
pub use ingest::{
    register_account, ArtifactLocator, ConversationLayout, IngestError, LiveWatcher,
    Reconciler, ScanReport, Scanner, UnregisteredPolicy, WatcherConfig,
};
