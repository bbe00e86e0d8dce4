//! Locate the files related to a primary recording.
//!
//! The transcript always sits next to its recording. The conversation
//! recording has been written in more than one layout over time, so the
//! locator probes an ordered list of [`ConversationLayout`]s and takes the
//! first candidate that exists on disk. A missing file is "absent", never an
//! error.
//!
//! All paths handed to the store are relative to the recordings root, joined
//! with `/`. Files in a sibling of the root come out as `../<dir>/<file>`.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::{CallRecord, Playback};
use crate::domain::artifact::{CONVERSATION_FILENAME, CONVERSATION_SUFFIX, PRIMARY_SUFFIX, TRANSCRIPT_SUFFIX};

/// Where a conversation recording may live relative to its primary recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationLayout {
    /// `<dir>/../../<caller>_<session>/full_conversation.wav`
    SessionDir,

    /// `<dir>/<caller>_<session>_full_conversation.wav`
    Sibling,
}

impl ConversationLayout {
    /// Default probe order
    pub fn defaults() -> Vec<Self> {
        vec![Self::SessionDir, Self::Sibling]
    }

    /// Candidate path for a primary recording in `dir` with base name `base`
    pub fn candidate(&self, dir: &Path, base_name: &str) -> Option<PathBuf> {
        match self {
            Self::SessionDir => dir
                .parent()
                .and_then(Path::parent)
                .map(|up| up.join(base_name).join(CONVERSATION_FILENAME)),
            Self::Sibling => Some(dir.join(format!("{base_name}{CONVERSATION_SUFFIX}"))),
        }
    }
}

/// A related file that exists on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    pub absolute: PathBuf,
    pub relative: String,
    pub size: u64,
}

/// Related files found for one primary recording
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelatedArtifacts {
    pub transcript: Option<Located>,
    pub conversation: Option<Located>,
}

/// Computes and probes artifact paths under one recordings root
#[derive(Debug, Clone)]
pub struct ArtifactLocator {
    root: PathBuf,
    layouts: Vec<ConversationLayout>,
}

impl ArtifactLocator {
    /// A relative root is anchored at the current directory, so `.` still
    /// has a parent for the session-dir layout.
    pub fn new(root: impl Into<PathBuf>, layouts: Vec<ConversationLayout>) -> Self {
        let root = root.into();
        let root = std::path::absolute(&root).unwrap_or(root);
        Self {
            root: normalize(&root),
            layouts,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn layouts(&self) -> &[ConversationLayout] {
        &self.layouts
    }

    /// Transcript path for a primary recording (same directory, `_full.txt`)
    pub fn transcript_path(&self, primary: &Path) -> Option<PathBuf> {
        let file_name = primary.file_name()?.to_str()?;
        let base = file_name.strip_suffix(PRIMARY_SUFFIX)?;
        Some(primary.with_file_name(format!("{base}{TRANSCRIPT_SUFFIX}")))
    }

    /// Conversation candidates in probe order
    pub fn conversation_candidates(&self, primary: &Path, base_name: &str) -> Vec<PathBuf> {
        let Some(dir) = primary.parent() else {
            return Vec::new();
        };
        self.layouts
            .iter()
            .filter_map(|layout| layout.candidate(dir, base_name))
            .collect()
    }

    /// Probe the transcript and conversation recording for a primary file
    pub fn locate(&self, primary: &Path, base_name: &str) -> RelatedArtifacts {
        let transcript = self
            .transcript_path(primary)
            .and_then(|p| self.probe(&p));

        let conversation = self
            .conversation_candidates(primary, base_name)
            .into_iter()
            .find_map(|p| self.probe(&p));

        RelatedArtifacts {
            transcript,
            conversation,
        }
    }

    /// Stat a path; `None` if it is missing, unreadable, or outside the root
    pub fn probe(&self, path: &Path) -> Option<Located> {
        let metadata = std::fs::metadata(path).ok()?;
        if !metadata.is_file() {
            return None;
        }
        Some(Located {
            relative: self.relative_path(path)?,
            absolute: path.to_path_buf(),
            size: metadata.len(),
        })
    }

    /// Path relative to the root, or `../`-prefixed when it sits in a
    /// sibling of the root. `None` for anything further away.
    pub fn relative_path(&self, path: &Path) -> Option<String> {
        let path = normalize(path);
        let root = normalize(&self.root);

        if let Ok(rest) = path.strip_prefix(&root) {
            return Some(join_components(rest));
        }

        let parent = root.parent()?;
        let rest = path.strip_prefix(parent).ok()?;
        Some(format!("../{}", join_components(rest)))
    }

    /// Resolve a stored relative path back against the root
    pub fn resolve(&self, relative: &str) -> PathBuf {
        normalize(&self.root.join(relative))
    }

    /// Absolute file to play for a record, if recorded and still on disk
    pub fn playback(&self, record: &CallRecord, variant: Playback) -> Option<PathBuf> {
        let path = self.resolve(record.playback_path(variant)?);
        path.is_file().then_some(path)
    }
}

/// Lexically fold `.` and `..` components without touching the filesystem
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn join_components(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
