//! Call records and the partial facts merged into them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::artifact::ArtifactKind;

/// One telephony session and the artifacts observed for it.
///
/// Every artifact field is optional: a record may exist with only its
/// conversation recording populated when that file was seen first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRecord {
    /// Store-assigned row id (used by the playback collaborator)
    pub id: i64,

    /// Session identifier, the sole correlation key
    pub session_id: String,

    /// Caller identifier, kept even when no account owns the record
    pub caller_id: String,

    /// Owning account, if one is known
    pub account_id: Option<i64>,

    /// Primary recording path, relative to the recordings root
    pub wav_path: Option<String>,

    /// Transcript path, relative to the recordings root
    pub txt_path: Option<String>,

    /// Conversation recording path, relative to the recordings root
    pub conversation_path: Option<String>,

    /// Primary recording size in bytes
    pub wav_size: Option<u64>,

    /// Transcript size in bytes
    pub txt_size: Option<u64>,

    /// Transfer reason code(s) from the transcript
    pub transfer_reasons: Option<String>,

    /// Human-readable transfer reason description(s) from the transcript
    pub transfer_reason_descriptions: Option<String>,

    /// Modification time of the primary recording on disk
    pub created_at: Option<DateTime<Utc>>,

    /// When any reconciliation last touched this record
    pub last_reconciled_at: DateTime<Utc>,
}

impl CallRecord {
    /// Relative path for the requested playback variant, if recorded
    pub fn playback_path(&self, variant: Playback) -> Option<&str> {
        match variant {
            Playback::Filtered => self.wav_path.as_deref(),
            Playback::Conversation => self.conversation_path.as_deref(),
        }
    }
}

/// Which audio file a playback request wants
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Playback {
    /// The primary (filtered) recording
    #[default]
    Filtered,

    /// The raw conversation recording
    Conversation,
}

/// Transfer metadata read from a transcript sidecar
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferMetadata {
    pub transfer_reasons: String,
    pub transfer_reason_descriptions: String,
}

/// Facts observed for one session by one artifact event.
///
/// `None` means "not observed by this event" and never clears a stored
/// value during the merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallFacts {
    pub session_id: String,
    pub caller_id: String,
    pub kind: ArtifactKind,
    pub account_id: Option<i64>,
    pub wav_path: Option<String>,
    pub wav_size: Option<u64>,
    pub created_at: Option<DateTime<Utc>>,
    pub txt_path: Option<String>,
    pub txt_size: Option<u64>,
    pub transfer_reasons: Option<String>,
    pub transfer_reason_descriptions: Option<String>,
    pub conversation_path: Option<String>,
}

impl CallFacts {
    /// Start an empty fact set for a session
    pub fn new(session_id: impl Into<String>, caller_id: impl Into<String>, kind: ArtifactKind) -> Self {
        Self {
            session_id: session_id.into(),
            caller_id: caller_id.into(),
            kind,
            account_id: None,
            wav_path: None,
            wav_size: None,
            created_at: None,
            txt_path: None,
            txt_size: None,
            transfer_reasons: None,
            transfer_reason_descriptions: None,
            conversation_path: None,
        }
    }

    /// Attach the primary recording's path, size and on-disk mtime
    pub fn with_primary(mut self, path: impl Into<String>, size: u64, modified: DateTime<Utc>) -> Self {
        self.wav_path = Some(path.into());
        self.wav_size = Some(size);
        self.created_at = Some(modified);
        self
    }

    /// Attach a transcript and, when it could be read, its metadata.
    ///
    /// Unread metadata stays `None` so the merge keeps what is stored.
    pub fn with_transcript(
        mut self,
        path: impl Into<String>,
        size: u64,
        metadata: Option<TransferMetadata>,
    ) -> Self {
        self.txt_path = Some(path.into());
        self.txt_size = Some(size);
        if let Some(metadata) = metadata {
            self.transfer_reasons = Some(metadata.transfer_reasons);
            self.transfer_reason_descriptions = Some(metadata.transfer_reason_descriptions);
        }
        self
    }

    /// Attach a conversation recording path
    pub fn with_conversation(mut self, path: impl Into<String>) -> Self {
        self.conversation_path = Some(path.into());
        self
    }

    /// Attach the owning account
    pub fn with_account(mut self, account_id: i64) -> Self {
        self.account_id = Some(account_id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_facts_leave_primary_unset() {
        let facts = CallFacts::new("abc", "5551234", ArtifactKind::ConversationRecording)
            .with_conversation("../5551234_abc/full_conversation.wav");

        assert_eq!(facts.conversation_path.as_deref(), Some("../5551234_abc/full_conversation.wav"));
        assert!(facts.wav_path.is_none());
        assert!(facts.wav_size.is_none());
        assert!(facts.created_at.is_none());
        assert!(facts.transfer_reasons.is_none());
    }

    #[test]
    fn test_transcript_facts_carry_metadata() {
        let metadata = TransferMetadata {
            transfer_reasons: "busy".to_string(),
            transfer_reason_descriptions: "caller busy".to_string(),
        };
        let facts = CallFacts::new("abc", "5551234", ArtifactKind::PrimaryRecording)
            .with_transcript("5551234/5551234_abc_full.txt", 42, Some(metadata));

        assert_eq!(facts.txt_size, Some(42));
        assert_eq!(facts.transfer_reasons.as_deref(), Some("busy"));
        assert_eq!(facts.transfer_reason_descriptions.as_deref(), Some("caller busy"));
    }

    #[test]
    fn test_unread_transcript_leaves_metadata_unset() {
        let facts = CallFacts::new("abc", "5551234", ArtifactKind::PrimaryRecording)
            .with_transcript("5551234/5551234_abc_full.txt", 42, None);

        assert_eq!(facts.txt_path.as_deref(), Some("5551234/5551234_abc_full.txt"));
        assert!(facts.transfer_reasons.is_none());
        assert!(facts.transfer_reason_descriptions.is_none());
    }
}
