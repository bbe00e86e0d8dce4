//! Full-tree scanner.
//!
//! Walks the recordings root (or only the subdirectories of known callers)
//! and reconciles every recognized artifact in one sequential pass. Used for
//! startup catch-up and administrative re-sync. A failure on one artifact is
//! logged and counted; the walk always runs to completion.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use walkdir::WalkDir;

use super::reconciler::{IngestError, ReconcileOutcome, Reconciler};
use crate::domain::ArtifactKind;

/// Errors that prevent a scan from starting
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Recordings root does not exist: {0}")]
    RootNotFound(PathBuf),

    #[error("Recordings root is not a directory: {0}")]
    NotADirectory(PathBuf),
}

/// Aggregate counts for one scan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    /// Records created by this scan
    pub created: usize,

    /// Existing records merged (including no-op merges)
    pub updated: usize,

    /// Artifacts skipped because their caller is not registered
    pub skipped: usize,

    /// Artifacts or directory entries that failed
    pub failed: usize,
}

impl ScanReport {
    /// Every artifact the scan attempted
    pub fn total(&self) -> usize {
        self.created + self.updated + self.skipped + self.failed
    }

    pub(crate) fn record(&mut self, path: &Path, result: Result<ReconcileOutcome, IngestError>) {
        match result {
            Ok(ReconcileOutcome::Created(_)) => self.created += 1,
            Ok(ReconcileOutcome::Updated(_)) => self.updated += 1,
            Err(IngestError::UnregisteredCaller(caller)) => {
                tracing::warn!("Ignored {}: caller {} not registered", path.display(), caller);
                self.skipped += 1;
            }
            Err(e) => {
                tracing::warn!("Error processing file {}: {}", path.display(), e);
                self.failed += 1;
            }
        }
    }
}

/// Sequential full-tree scanner
pub struct Scanner {
    reconciler: Arc<Reconciler>,
}

impl Scanner {
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        Self { reconciler }
    }

    pub fn root(&self) -> &Path {
        self.reconciler.root()
    }

    /// Scan the recordings root.
    ///
    /// With `account_filter`, only `<root>/<caller>` for each listed caller
    /// is walked.
    pub fn scan(&self, account_filter: Option<&[String]>) -> Result<ScanReport, ScanError> {
        let root = self.root();
        if !root.exists() {
            return Err(ScanError::RootNotFound(root.to_path_buf()));
        }
        if !root.is_dir() {
            return Err(ScanError::NotADirectory(root.to_path_buf()));
        }

        let mut report = ScanReport::default();

        match account_filter {
            Some(callers) => {
                tracing::info!("Scanning {} caller folder(s) under {}", callers.len(), root.display());
                for caller_id in callers {
                    self.walk_caller(caller_id, &mut report);
                }
            }
            None => {
                tracing::info!("Scanning {}", root.display());
                self.walk(root, &mut report);
            }
        }

        tracing::info!(
            "Sync complete. Created: {}, Updated: {}, Skipped: {}, Failed: {}",
            report.created,
            report.updated,
            report.skipped,
            report.failed
        );

        Ok(report)
    }

    /// Scan a single caller's folder. A missing folder yields an empty report.
    pub fn scan_caller(&self, caller_id: &str) -> ScanReport {
        let mut report = ScanReport::default();
        self.walk_caller(caller_id, &mut report);
        report
    }

    fn walk_caller(&self, caller_id: &str, report: &mut ScanReport) {
        let dir = self.root().join(caller_id);
        if dir.is_dir() {
            self.walk(&dir, report);
        } else {
            tracing::debug!("No recordings folder for caller {}", caller_id);
        }
    }

    fn walk(&self, dir: &Path, report: &mut ScanReport) {
        let walker = WalkDir::new(dir).follow_links(false).sort_by_file_name();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Error accessing entry: {}", e);
                    report.failed += 1;
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }
            let is_artifact = entry
                .file_name()
                .to_str()
                .and_then(ArtifactKind::from_file_name)
                .is_some();
            if !is_artifact {
                continue;
            }

            let path = entry.path();
            report.record(path, self.reconciler.reconcile_path(path));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CallStore;
    use crate::ingest::locator::{ArtifactLocator, ConversationLayout};
    use crate::ingest::reconciler::UnregisteredPolicy;
    use tempfile::TempDir;

    fn scanner(root: &Path, policy: UnregisteredPolicy) -> Scanner {
        let store = Arc::new(CallStore::open_in_memory().unwrap());
        let locator = ArtifactLocator::new(root, ConversationLayout::defaults());
        Scanner::new(Arc::new(Reconciler::new(store, locator, policy)))
    }

    fn write(path: PathBuf, content: &[u8]) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_scan_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(root.join("100/100_a_full.wav"), b"a");
        write(root.join("100/100_b_full.wav"), b"bb");
        write(root.join("200/200_c_full.wav"), b"ccc");
        write(root.join("200/200_c_full.txt"), b"TRANSFER_REASONS: x\n");
        write(root.join("200/notes.md"), b"ignored");

        let scanner = scanner(root, UnregisteredPolicy::Ownerless);

        let first = scanner.scan(None).unwrap();
        assert_eq!(first.created, 3);
        assert_eq!(first.updated, 0);

        let second = scanner.scan(None).unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.updated, 3);
        assert_eq!(scanner.reconciler.store().count_call_records().unwrap(), 3);
    }

    #[test]
    fn test_scan_with_account_filter() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(root.join("100/100_a_full.wav"), b"a");
        write(root.join("200/200_b_full.wav"), b"b");

        let scanner = scanner(root, UnregisteredPolicy::Ownerless);
        let filter = vec!["200".to_string(), "300".to_string()];
        let report = scanner.scan(Some(&filter)).unwrap();

        assert_eq!(report.created, 1);
        let store = scanner.reconciler.store();
        assert!(store.find_call_by_session("b").unwrap().is_some());
        assert!(store.find_call_by_session("a").unwrap().is_none());
    }

    #[test]
    fn test_scan_counts_rejected_callers() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(root.join("100/100_a_full.wav"), b"a");
        write(root.join("200/200_b_full.wav"), b"b");

        let scanner = scanner(root, UnregisteredPolicy::Reject);
        scanner.reconciler.store().create_account("100", false).unwrap();

        let report = scanner.scan(None).unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.total(), 2);
    }

    #[test]
    fn test_scan_missing_root() {
        let temp = TempDir::new().unwrap();
        let scanner = scanner(&temp.path().join("nope"), UnregisteredPolicy::Ownerless);

        assert!(matches!(scanner.scan(None), Err(ScanError::RootNotFound(_))));
    }

    #[test]
    fn test_scan_caller_without_folder() {
        let temp = TempDir::new().unwrap();
        let scanner = scanner(temp.path(), UnregisteredPolicy::Ownerless);

        assert_eq!(scanner.scan_caller("999"), ScanReport::default());
    }
}
