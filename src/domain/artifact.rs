//! Recording artifacts produced by the telephony backend.
//!
//! The recording subsystem writes several files per call. Only two of them
//! are ingested directly; the transcript is always read alongside its
//! primary recording.

use serde::{Deserialize, Serialize};

/// Filename suffix of a primary (filtered) call recording.
pub const PRIMARY_SUFFIX: &str = "_full.wav";

/// Filename suffix of a conversation recording stored next to the primary.
pub const CONVERSATION_SUFFIX: &str = "_full_conversation.wav";

/// Filename of a conversation recording stored in its own session directory.
pub const CONVERSATION_FILENAME: &str = "full_conversation.wav";

/// Filename suffix of a transcript sidecar.
pub const TRANSCRIPT_SUFFIX: &str = "_full.txt";

/// Kinds of artifacts that drive reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Filtered call audio (`{caller}_{session}_full.wav`)
    PrimaryRecording,

    /// Raw two-party audio, correlated by session id
    ConversationRecording,
}

impl ArtifactKind {
    /// Classify a filename by suffix. Returns `None` for anything that is not
    /// an ingestible artifact (transcripts included).
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        if file_name == CONVERSATION_FILENAME || file_name.ends_with(CONVERSATION_SUFFIX) {
            Some(Self::ConversationRecording)
        } else if file_name.ends_with(PRIMARY_SUFFIX) {
            Some(Self::PrimaryRecording)
        } else {
            None
        }
    }

    /// Short label used in logs and CLI output
    pub fn label(&self) -> &'static str {
        match self {
            Self::PrimaryRecording => "primary",
            Self::ConversationRecording => "conversation",
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_primary() {
        assert_eq!(
            ArtifactKind::from_file_name("5551234_abc123_full.wav"),
            Some(ArtifactKind::PrimaryRecording)
        );
    }

    #[test]
    fn test_classify_conversation() {
        assert_eq!(
            ArtifactKind::from_file_name("5551234_abc123_full_conversation.wav"),
            Some(ArtifactKind::ConversationRecording)
        );
        assert_eq!(
            ArtifactKind::from_file_name("full_conversation.wav"),
            Some(ArtifactKind::ConversationRecording)
        );
    }

    #[test]
    fn test_classify_ignores_other_files() {
        assert_eq!(ArtifactKind::from_file_name("5551234_abc123_full.txt"), None);
        assert_eq!(ArtifactKind::from_file_name("notes.wav"), None);
        assert_eq!(ArtifactKind::from_file_name(".DS_Store"), None);
    }

    #[test]
    fn test_kind_serialization() {
        let json = serde_json::to_string(&ArtifactKind::ConversationRecording).unwrap();
        assert_eq!(json, "\"conversation_recording\"");
    }
}
