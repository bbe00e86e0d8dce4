//! Domain types for call-recording ingestion.
//!
//! This module contains the core data structures:
//! - Account: A telephony endpoint/owner
//! - CallRecord: One call session and its artifacts
//! - Artifact: Recognized artifact kinds and filename conventions

pub mod account;
pub mod artifact;
pub mod call;

// Re-export commonly used types
pub use account::Account;
pub use artifact::ArtifactKind;
pub use call::{CallFacts, CallRecord, Playback, TransferMetadata};
