//! Merge observed artifact facts into the record store.
//!
//! The pipeline for one artifact is:
//!
//! ```text
//! path → path_parser::parse → ArtifactLocator::locate → metadata::extract
//!      → resolve account (per UnregisteredPolicy) → CallStore::upsert_call_record
//! ```
//!
//! The upsert is a single atomic statement keyed by session id; no locking
//! happens here. Scanner and watcher may reconcile the same session at the
//! same time and still converge on one record carrying both artifacts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::locator::ArtifactLocator;
use super::metadata;
use super::path_parser::{self, ParsedArtifact};
use crate::core::{CallStore, StoreError};
use crate::domain::{ArtifactKind, CallFacts, CallRecord};

/// Errors that abort reconciliation of a single artifact
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Not a recognized recording artifact: {0}")]
    Unrecognized(PathBuf),

    #[error("Artifact {path} is outside recordings root {root}")]
    OutsideRoot { path: PathBuf, root: PathBuf },

    #[error("Caller not registered: {0}")]
    UnregisteredCaller(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl IngestError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// What to do with artifacts from a caller that has no account
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnregisteredPolicy {
    /// Create a default account for the caller and attach the record
    AutoCreate,

    /// Store the record with no owner; registration attaches it later
    #[default]
    Ownerless,

    /// Skip the artifact entirely
    Reject,
}

impl std::str::FromStr for UnregisteredPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "auto_create" => Ok(Self::AutoCreate),
            "ownerless" => Ok(Self::Ownerless),
            "reject" => Ok(Self::Reject),
            other => Err(format!(
                "Unknown unregistered-caller policy: {other} (expected auto-create, ownerless or reject)"
            )),
        }
    }
}

/// Result of reconciling one artifact
#[derive(Debug, Clone)]
pub enum ReconcileOutcome {
    /// First observation of this session
    Created(CallRecord),

    /// Merged into an existing record (possibly with identical values)
    Updated(CallRecord),
}

impl ReconcileOutcome {
    pub fn record(&self) -> &CallRecord {
        match self {
            Self::Created(record) | Self::Updated(record) => record,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Record reconciler shared by the scanner and the watcher
pub struct Reconciler {
    store: Arc<CallStore>,
    locator: ArtifactLocator,
    policy: UnregisteredPolicy,
}

impl Reconciler {
    pub fn new(store: Arc<CallStore>, locator: ArtifactLocator, policy: UnregisteredPolicy) -> Self {
        Self {
            store,
            locator,
            policy,
        }
    }

    pub fn store(&self) -> &Arc<CallStore> {
        &self.store
    }

    pub fn locator(&self) -> &ArtifactLocator {
        &self.locator
    }

    pub fn root(&self) -> &Path {
        self.locator.root()
    }

    pub fn policy(&self) -> UnregisteredPolicy {
        self.policy
    }

    /// Run the full pipeline for one artifact path
    pub fn reconcile_path(&self, path: &Path) -> Result<ReconcileOutcome, IngestError> {
        let parsed =
            path_parser::parse(path).ok_or_else(|| IngestError::Unrecognized(path.to_path_buf()))?;
        let facts = self.gather_facts(path, &parsed)?;
        self.reconcile(facts)
    }

    /// Resolve the owner and upsert `facts` into the store
    pub fn reconcile(&self, mut facts: CallFacts) -> Result<ReconcileOutcome, IngestError> {
        if facts.account_id.is_none() {
            facts.account_id = self.resolve_account(&facts.caller_id)?;
        }

        let (record, created) = self.store.upsert_call_record(&facts)?;

        if created {
            tracing::info!(
                "Created call {} for caller {} ({})",
                record.session_id,
                record.caller_id,
                facts.kind
            );
            Ok(ReconcileOutcome::Created(record))
        } else {
            tracing::debug!("Merged {} artifact into call {}", facts.kind, record.session_id);
            Ok(ReconcileOutcome::Updated(record))
        }
    }

    /// Owning account id for a caller under the configured policy
    pub fn resolve_account(&self, caller_id: &str) -> Result<Option<i64>, IngestError> {
        if let Some(account) = self.store.find_account(caller_id)? {
            return Ok(Some(account.id));
        }

        match self.policy {
            UnregisteredPolicy::AutoCreate => {
                let (account, created) = self.store.ensure_account(caller_id)?;
                if created {
                    tracing::info!("Auto-created account for caller {}", caller_id);
                }
                Ok(Some(account.id))
            }
            UnregisteredPolicy::Ownerless => {
                tracing::warn!("File from {}: caller not registered, saving as unassociated", caller_id);
                Ok(None)
            }
            UnregisteredPolicy::Reject => Err(IngestError::UnregisteredCaller(caller_id.to_string())),
        }
    }

    /// Stat the artifact and its related files into a fact set
    fn gather_facts(&self, path: &Path, parsed: &ParsedArtifact) -> Result<CallFacts, IngestError> {
        let stat = std::fs::metadata(path).map_err(|e| IngestError::io(path, e))?;
        let relative = self
            .locator
            .relative_path(path)
            .ok_or_else(|| IngestError::OutsideRoot {
                path: path.to_path_buf(),
                root: self.root().to_path_buf(),
            })?;

        let facts = CallFacts::new(&parsed.session_id, &parsed.caller_id, parsed.kind);

        match parsed.kind {
            ArtifactKind::ConversationRecording => Ok(facts.with_conversation(relative)),
            ArtifactKind::PrimaryRecording => {
                let modified: DateTime<Utc> = stat
                    .modified()
                    .map_err(|e| IngestError::io(path, e))?
                    .into();
                let mut facts = facts.with_primary(relative, stat.len(), modified);

                let related = self.locator.locate(path, &parsed.base_name);
                if let Some(transcript) = related.transcript {
                    let metadata = metadata::extract(&transcript.absolute);
                    facts = facts.with_transcript(transcript.relative, transcript.size, metadata);
                }
                if let Some(conversation) = related.conversation {
                    tracing::debug!("Found conversation file at {}", conversation.relative);
                    facts = facts.with_conversation(conversation.relative);
                }

                Ok(facts)
            }
        }
    }
}
