//! Call-recording ingestion pipeline.
//!
//! This module discovers recording artifacts on disk and reconciles them
//! into the record store. The pipeline:
//!
//! 1. **Path parser**: caller id, session id and artifact kind from the path
//! 2. **Locator**: transcript and conversation recording for a primary file
//! 3. **Metadata**: transfer reasons from the transcript sidecar
//! 4. **Reconciler**: account resolution + atomic upsert by session id
//!
//! Two discovery paths feed the reconciler:
//!
//! ```text
//! Scanner (full tree) ─┐
//!                      ├→ Reconciler → CallStore
//! Watcher (live)  ─────┘
//! ```

pub mod locator;
pub mod metadata;
pub mod path_parser;
pub mod reconciler;
pub mod registration;
pub mod scanner;
pub mod watcher;

// Re-export key types
pub use locator::{ArtifactLocator, ConversationLayout};
pub use path_parser::ParsedArtifact;
pub use reconciler::{IngestError, ReconcileOutcome, Reconciler, UnregisteredPolicy};
pub use registration::{register_account, Registration};
pub use scanner::{ScanError, ScanReport, Scanner};
pub use watcher::{
    wait_for_root, IngestEvent, LiveWatcher, MissingRootPolicy, WatchHandle, WatchSummary,
    WatcherConfig, WatcherError, WatcherState,
};
