//! Account registration.
//!
//! Registering a caller claims the records already stored for it without
//! an owner, then imports anything in its folder the store has not seen.

use std::sync::Arc;

use super::reconciler::{IngestError, Reconciler};
use super::scanner::{ScanReport, Scanner};
use crate::domain::Account;

/// Result of registering one caller
#[derive(Debug, Clone)]
pub struct Registration {
    pub account: Account,

    /// Previously ownerless records now owned by the account
    pub attached: usize,

    /// Import of the caller's folder
    pub scan: ScanReport,
}

/// Create an account, attach its orphaned records, and scan its folder
pub fn register_account(
    reconciler: &Arc<Reconciler>,
    caller_id: &str,
    is_verified: bool,
) -> Result<Registration, IngestError> {
    let store = reconciler.store();
    let account = store.create_account(caller_id, is_verified)?;
    tracing::info!("Registered account {} for caller {}", account.id, caller_id);

    let attached = store.attach_orphans(caller_id, account.id)?;
    if attached > 0 {
        tracing::info!("Attached {} unassociated call(s) to {}", attached, caller_id);
    }

    let scan = Scanner::new(Arc::clone(reconciler)).scan_caller(caller_id);

    Ok(Registration {
        account,
        attached,
        scan,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CallStore, StoreError};
    use crate::ingest::locator::{ArtifactLocator, ConversationLayout};
    use crate::ingest::reconciler::UnregisteredPolicy;
    use tempfile::TempDir;

    #[test]
    fn test_register_attaches_and_imports() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        std::fs::create_dir_all(root.join("5551234")).unwrap();
        std::fs::write(root.join("5551234/5551234_old_full.wav"), b"old").unwrap();

        let store = Arc::new(CallStore::open_in_memory().unwrap());
        let locator = ArtifactLocator::new(root, ConversationLayout::defaults());
        let reconciler = Arc::new(Reconciler::new(store, locator, UnregisteredPolicy::Ownerless));

        let old = reconciler
            .reconcile_path(&root.join("5551234/5551234_old_full.wav"))
            .unwrap();
        assert_eq!(old.record().account_id, None);

        std::fs::write(root.join("5551234/5551234_new_full.wav"), b"new").unwrap();

        let registration = register_account(&reconciler, "5551234", true).unwrap();
        assert!(registration.account.is_verified);
        assert_eq!(registration.attached, 1);
        assert_eq!(registration.scan.created, 1);
        assert_eq!(registration.scan.updated, 1);

        let store = reconciler.store();
        for session in ["old", "new"] {
            let record = store.find_call_by_session(session).unwrap().unwrap();
            assert_eq!(record.account_id, Some(registration.account.id));
        }
    }

    #[test]
    fn test_register_twice_fails() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(CallStore::open_in_memory().unwrap());
        let locator = ArtifactLocator::new(temp.path(), ConversationLayout::defaults());
        let reconciler = Arc::new(Reconciler::new(store, locator, UnregisteredPolicy::Ownerless));

        register_account(&reconciler, "5551234", false).unwrap();
        let err = register_account(&reconciler, "5551234", false).unwrap_err();
        assert!(matches!(err, IngestError::Store(StoreError::AccountExists(_))));
    }
}
