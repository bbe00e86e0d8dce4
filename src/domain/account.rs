//! Telephony accounts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A telephony endpoint/owner, keyed by its caller identifier.
///
/// Accounts are created by explicit registration or, when the reconciler
/// runs under the auto-create policy, the first time an artifact mentions an
/// unknown caller. The caller identifier never changes after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Store-assigned row id
    pub id: i64,

    /// Caller identifier (usually a phone number), unique
    pub caller_id: String,

    /// Whether the owner has verified the endpoint
    pub is_verified: bool,

    /// When the account row was created
    pub created_at: DateTime<Utc>,
}
