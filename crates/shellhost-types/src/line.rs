//! Classified output lines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which standard stream a line was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamRole {
    Stdout,
    Stderr,
}

/// Semantic kind of a classified output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineKind {
    /// A shell prompt whose path component resolved to an existing directory.
    Prompt,
    /// A line carrying a reference to an existing file.
    File,
    /// A line carrying a reference to an existing directory.
    Directory,
    /// A line matched as an error reference (file plus line number).
    Error,
    /// Plain output on stdout.
    Stdout,
    /// Plain output on stderr.
    Stderr,
}

/// A decoded output line tagged with a semantic kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedLine {
    /// The decoded line text, whitespace-collapsed chunks included.
    pub text: String,
    pub kind: LineKind,
    /// Resolved absolute path for Prompt/File/Directory/Error kinds.
    pub path: Option<PathBuf>,
    /// Line number for Error kinds that carry one.
    pub line: Option<u32>,
    /// When the line was classified.
    pub timestamp: DateTime<Utc>,
}

impl ClassifiedLine {
    /// Plain output line for the given stream.
    pub fn plain(text: impl Into<String>, role: StreamRole) -> Self {
        let kind = match role {
            StreamRole::Stdout => LineKind::Stdout,
            StreamRole::Stderr => LineKind::Stderr,
        };
        Self {
            text: text.into(),
            kind,
            path: None,
            line: None,
            timestamp: Utc::now(),
        }
    }

    /// Line tagged with a kind and a verified path.
    pub fn with_path(
        text: impl Into<String>,
        kind: LineKind,
        path: PathBuf,
        line: Option<u32>,
    ) -> Self {
        Self {
            text: text.into(),
            kind,
            path: Some(path),
            line,
            timestamp: Utc::now(),
        }
    }
}
