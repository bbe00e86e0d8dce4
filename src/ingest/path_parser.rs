//! Identify recording artifacts from their path.
//!
//! Naming conventions written by the recording subsystem:
//!
//! ```text
//! <root>/<caller>/<caller>_<session>_full.wav                  primary
//! <root>/<caller>/<caller>_<session>_full_conversation.wav     conversation (sibling)
//! <dir>/<caller>_<session>/full_conversation.wav               conversation (session dir)
//! ```
//!
//! Parsing is pure and never fails for a recognized filename: a base name
//! without a second `_` segment becomes the session id as a whole. Caller
//! ids containing `_` will mis-split; the convention gives no way to tell.

use std::path::Path;

use crate::domain::artifact::{CONVERSATION_FILENAME, CONVERSATION_SUFFIX, PRIMARY_SUFFIX};
use crate::domain::ArtifactKind;

/// Identity of one artifact, derived from its path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedArtifact {
    pub caller_id: String,
    pub session_id: String,
    pub kind: ArtifactKind,

    /// `{caller}_{session}` as it appears on disk
    pub base_name: String,
}

/// Parse an artifact path. Returns `None` when the filename is not a
/// recognized artifact.
pub fn parse(path: &Path) -> Option<ParsedArtifact> {
    let file_name = path.file_name()?.to_string_lossy();
    let kind = ArtifactKind::from_file_name(&file_name)?;
    let parent_name = path
        .parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let parsed = if file_name == CONVERSATION_FILENAME {
        // Session directory layout: the directory carries both ids.
        let caller_id = parent_name.split('_').next().unwrap_or_default().to_string();
        ParsedArtifact {
            session_id: session_from_base(&parent_name),
            caller_id,
            kind,
            base_name: parent_name,
        }
    } else {
        let suffix = match kind {
            ArtifactKind::PrimaryRecording => PRIMARY_SUFFIX,
            ArtifactKind::ConversationRecording => CONVERSATION_SUFFIX,
        };
        let base_name = file_name
            .strip_suffix(suffix)
            .unwrap_or(&file_name)
            .to_string();
        ParsedArtifact {
            caller_id: parent_name,
            session_id: session_from_base(&base_name),
            kind,
            base_name,
        }
    };

    Some(parsed)
}

/// Second `_`-delimited segment (possibly empty), or the whole base name
/// when there is no second segment
pub fn session_from_base(base_name: &str) -> String {
    base_name.split('_').nth(1).unwrap_or(base_name).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_parse_primary_recording() {
        let path = PathBuf::from("/rec/5551234/5551234_a1b2c3_full.wav");
        let parsed = parse(&path).unwrap();

        assert_eq!(parsed.caller_id, "5551234");
        assert_eq!(parsed.session_id, "a1b2c3");
        assert_eq!(parsed.kind, ArtifactKind::PrimaryRecording);
        assert_eq!(parsed.base_name, "5551234_a1b2c3");
    }

    #[test]
    fn test_parse_valid_names_roundtrip_ids() {
        for (caller, session) in [("100", "x"), ("5551234", "1700000000.42"), ("+4420", "abc-def")] {
            let path = PathBuf::from(format!("/rec/{caller}/{caller}_{session}_full.wav"));
            let parsed = parse(&path).unwrap();
            assert_eq!(parsed.caller_id, caller);
            assert_eq!(parsed.session_id, session);
        }
    }

    #[test]
    fn test_parse_fallback_session_id() {
        let path = PathBuf::from("/rec/5551234/lonely_full.wav");
        let parsed = parse(&path).unwrap();
        assert_eq!(parsed.session_id, "lonely");

        let path = PathBuf::from("/rec/5551234/_full.wav");
        assert_eq!(parse(&path).unwrap().session_id, "");
    }

    #[test]
    fn test_parse_empty_second_segment() {
        let path = PathBuf::from("/rec/5551234/5551234__full.wav");
        let parsed = parse(&path).unwrap();
        assert_eq!(parsed.session_id, "");
        assert_eq!(parsed.base_name, "5551234_");
    }

    #[test]
    fn test_parse_extra_segments_take_second() {
        let path = PathBuf::from("/rec/5551234/5551234_sess_extra_full.wav");
        assert_eq!(parse(&path).unwrap().session_id, "sess");
    }

    #[test]
    fn test_parse_sibling_conversation() {
        let path = PathBuf::from("/rec/5551234/5551234_a1b2c3_full_conversation.wav");
        let parsed = parse(&path).unwrap();

        assert_eq!(parsed.kind, ArtifactKind::ConversationRecording);
        assert_eq!(parsed.caller_id, "5551234");
        assert_eq!(parsed.session_id, "a1b2c3");
    }

    #[test]
    fn test_parse_session_dir_conversation() {
        let path = PathBuf::from("/sounds/5551234_a1b2c3/full_conversation.wav");
        let parsed = parse(&path).unwrap();

        assert_eq!(parsed.kind, ArtifactKind::ConversationRecording);
        assert_eq!(parsed.caller_id, "5551234");
        assert_eq!(parsed.session_id, "a1b2c3");
        assert_eq!(parsed.base_name, "5551234_a1b2c3");
    }

    #[test]
    fn test_parse_rejects_unrecognized() {
        assert!(parse(Path::new("/rec/5551234/5551234_a1b2c3_full.txt")).is_none());
        assert!(parse(Path::new("/rec/5551234/readme.md")).is_none());
        assert!(parse(Path::new("/")).is_none());
    }
}
