//! Pluggable line-pattern matching.
//!
//! Classification delegates raw pattern matching to a trait so hosts
//! can bring their own rule tables. The default implementation covers
//! prompts and compiler-style `file:line:` error references.

use once_cell::sync::Lazy;
use regex::Regex;

/// What a pattern said about a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    Prompt,
    File,
    Error,
}

/// A successful pattern match, before path verification.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedOutput {
    pub kind: PatternKind,
    /// The path-like text the pattern extracted.
    pub file: String,
    pub line: Option<u32>,
}

/// Line-pattern rule table.
pub trait LinePatterns: Send + Sync {
    /// Reload rules before a session starts. Default is a no-op.
    fn refresh(&self, _cwd: &str) {}

    /// Observe a command about to run, for context-sensitive tables.
    fn update(&self, _command: &str) {}

    /// Match a single collapsed line.
    fn match_line(&self, line: &str) -> Option<ParsedOutput>;
}

static PROMPT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<path>(/|~)[^>]*)>\s*$").unwrap());

static ERROR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<file>[^\s:]+):(?P<line>\d+):").unwrap());

/// Built-in rules: `$PWD/>` style prompts and `file:line:` errors.
#[derive(Debug, Default)]
pub struct DefaultPatterns;

impl LinePatterns for DefaultPatterns {
    fn match_line(&self, line: &str) -> Option<ParsedOutput> {
        if let Some(caps) = PROMPT_RE.captures(line) {
            let mut path = caps["path"].to_string();
            // The prompt format renders as "$PWD/>", so the captured
            // path carries a trailing slash except at the root.
            if path.len() > 1 && path.ends_with('/') {
                path.pop();
            }
            return Some(ParsedOutput {
                kind: PatternKind::Prompt,
                file: path,
                line: None,
            });
        }
        if let Some(caps) = ERROR_RE.captures(line) {
            return Some(ParsedOutput {
                kind: PatternKind::Error,
                file: caps["file"].to_string(),
                line: caps["line"].parse().ok(),
            });
        }
        None
    }
}
