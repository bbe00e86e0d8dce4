//! Transfer metadata from transcript sidecars.
//!
//! Transcripts are line-oriented text. Two labeled lines are recognized;
//! everything else is ignored. When a label repeats, the last line wins.

use std::io::ErrorKind;
use std::path::Path;

use crate::domain::TransferMetadata;

const TRANSFER_REASONS: &str = "TRANSFER_REASONS:";
const TRANSFER_REASON_DESCRIPTIONS: &str = "TRANSFER_REASON_DESCRIPTIONS:";

/// Read transfer metadata from a transcript file.
///
/// `None` when the file is missing or cannot be read, so callers can tell
/// "nothing readable" apart from a transcript without labels. Invalid UTF-8
/// is replaced rather than rejected.
pub fn extract(path: &Path) -> Option<TransferMetadata> {
    match std::fs::read(path) {
        Ok(bytes) => Some(parse_transcript(&String::from_utf8_lossy(&bytes))),
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => {
            tracing::warn!("Error reading transcript {}: {}", path.display(), e);
            None
        }
    }
}

/// Scan transcript text for the labeled lines
pub fn parse_transcript(text: &str) -> TransferMetadata {
    let mut metadata = TransferMetadata::default();

    for line in text.lines() {
        if let Some(rest) = line.strip_prefix(TRANSFER_REASONS) {
            metadata.transfer_reasons = rest.trim().to_string();
        }
        if let Some(rest) = line.strip_prefix(TRANSFER_REASON_DESCRIPTIONS) {
            metadata.transfer_reason_descriptions = rest.trim().to_string();
        }
    }

    metadata
}
