//! Line classification and working-directory tracking.
//!
//! Interactive shells give no direct way to observe their working
//! directory, so the session injects probe commands and the classifier
//! intercepts their output before it can reach the sink:
//!
//! - [`CWD_MARKER_PROBE`] prints a `<PWD=` marker line that is consumed
//!   here and never surfaced.
//! - [`CWD_PROMPT_PROBE`] prints a prompt-shaped line that goes through
//!   normal prompt classification, keeping the tracked cwd fresh after
//!   every command.
//!
//! Echoed copies of the probe commands themselves are swallowed too.

use crate::patterns::{LinePatterns, PatternKind};
use crate::sink::RecordSink;
use shellhost_types::{ClassifiedLine, LineKind, StreamRole};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Prefix of the marker line produced by [`CWD_MARKER_PROBE`].
pub const CWD_MARKER_PREFIX: &str = "<PWD";

/// Probe printing a marker line the classifier consumes silently. The
/// quoting keeps the shell from treating `<` as a redirection and keeps
/// the echoed command itself from matching the marker prefix.
pub const CWD_MARKER_PROBE: &str = "echo '<'PWD=$PWD";

/// Probe printing a prompt-shaped line, surfaced through normal prompt
/// classification.
pub const CWD_PROMPT_PROBE: &str = "echo $PWD'>'";

/// The last prompt the classifier emitted.
#[derive(Debug, Clone)]
pub struct PromptRecord {
    pub text: String,
    pub path: PathBuf,
}

/// State shared between the session, its reader threads and the
/// classifier.
pub struct SessionShared {
    /// Set exactly once when the session reaches its terminal state.
    pub done: AtomicBool,
    cwd: Mutex<PathBuf>,
    last_prompt: Mutex<Option<PromptRecord>>,
    last_was_prompt: AtomicBool,
    home: PathBuf,
}

impl SessionShared {
    pub fn new(cwd: PathBuf, home: PathBuf) -> Arc<Self> {
        Arc::new(Self {
            done: AtomicBool::new(false),
            cwd: Mutex::new(cwd),
            last_prompt: Mutex::new(None),
            last_was_prompt: AtomicBool::new(false),
            home,
        })
    }

    pub fn cwd(&self) -> PathBuf {
        self.cwd.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn set_cwd(&self, cwd: PathBuf) {
        if let Ok(mut guard) = self.cwd.lock() {
            *guard = cwd;
        }
    }

    pub fn last_prompt(&self) -> Option<PromptRecord> {
        self.last_prompt.lock().ok().and_then(|p| p.clone())
    }

    /// Append command text to the last prompt record. Bookkeeping only;
    /// nothing is re-emitted.
    pub fn append_to_last_prompt(&self, text: &str) {
        if let Ok(mut guard) = self.last_prompt.lock() {
            if let Some(prompt) = guard.as_mut() {
                if prompt.text.ends_with('>') {
                    prompt.text.push_str(text);
                }
            }
        }
    }

    fn record_prompt(&self, record: PromptRecord) {
        if let Ok(mut guard) = self.last_prompt.lock() {
            *guard = Some(record);
        }
    }
}

/// Classifies decoded lines and routes them to the sink.
pub struct LineClassifier {
    shared: Arc<SessionShared>,
    sink: Arc<dyn RecordSink>,
    patterns: Arc<dyn LinePatterns>,
}

impl LineClassifier {
    pub fn new(
        shared: Arc<SessionShared>,
        sink: Arc<dyn RecordSink>,
        patterns: Arc<dyn LinePatterns>,
    ) -> Self {
        Self {
            shared,
            sink,
            patterns,
        }
    }

    /// Classify one decoded line and push the result, or swallow it.
    pub fn interpret(&self, line: &str, role: StreamRole) {
        if let Some(rest) = line.strip_prefix(CWD_MARKER_PREFIX) {
            // Marker lines update the tracked cwd and never surface.
            if let Some(path) = rest.strip_prefix('=') {
                let path = path.trim();
                if !path.is_empty() {
                    tracing::trace!(target: "shellhost::classify", "cwd marker: {path}");
                    self.shared.set_cwd(PathBuf::from(path));
                }
            }
            return;
        }

        // Echoed copies of the probe commands are noise.
        if line.contains(CWD_MARKER_PROBE) || line.contains(CWD_PROMPT_PROBE) {
            return;
        }

        let collapsed = collapse_whitespace(line);
        if collapsed.is_empty() {
            self.shared.last_was_prompt.store(false, Ordering::SeqCst);
            self.sink.push(ClassifiedLine::plain(collapsed, role));
            return;
        }

        let Some(parsed) = self.patterns.match_line(&collapsed) else {
            self.shared.last_was_prompt.store(false, Ordering::SeqCst);
            self.sink.push(ClassifiedLine::plain(collapsed, role));
            return;
        };

        match parsed.kind {
            PatternKind::Prompt => self.handle_prompt(&collapsed, &parsed.file, role),
            PatternKind::File | PatternKind::Error => {
                self.handle_path_line(&collapsed, &parsed.file, parsed.line, role)
            }
        }
    }

    fn handle_prompt(&self, text: &str, raw_path: &str, role: StreamRole) {
        let expanded = expand_tilde(raw_path, &self.shared.home);
        let path = collapse_slashes(&expanded);
        if !path.is_dir() {
            // A prompt whose path does not exist is just output.
            self.shared.last_was_prompt.store(false, Ordering::SeqCst);
            self.sink.push(ClassifiedLine::plain(text, role));
            return;
        }

        // Suppress the immediate duplicate the prompt probe produces
        // after a real prompt.
        let duplicate = self.shared.last_was_prompt.load(Ordering::SeqCst)
            && self
                .shared
                .last_prompt()
                .is_some_and(|p| p.path == path);
        self.shared.last_was_prompt.store(true, Ordering::SeqCst);
        self.shared.record_prompt(PromptRecord {
            text: text.to_string(),
            path: path.clone(),
        });
        self.shared.set_cwd(path.clone());
        if duplicate {
            return;
        }

        self.sink.push(ClassifiedLine::with_path(
            text,
            LineKind::Prompt,
            path,
            None,
        ));
    }

    fn handle_path_line(
        &self,
        text: &str,
        raw_path: &str,
        line: Option<u32>,
        role: StreamRole,
    ) {
        self.shared.last_was_prompt.store(false, Ordering::SeqCst);
        let Some(path) = self.resolve_path(raw_path) else {
            // No candidate exists on disk; demote to plain output.
            self.sink.push(ClassifiedLine::plain(text, role));
            return;
        };

        let kind = if path.is_dir() {
            LineKind::Directory
        } else if line.is_some() {
            LineKind::Error
        } else {
            LineKind::File
        };
        self.sink
            .push(ClassifiedLine::with_path(text, kind, path, line));
    }

    /// Resolve a pattern-extracted path against the tracked cwd, then
    /// its parent.
    fn resolve_path(&self, raw: &str) -> Option<PathBuf> {
        let expanded = expand_tilde(raw, &self.shared.home);
        if expanded.is_absolute() {
            return expanded.exists().then(|| collapse_slashes(&expanded));
        }
        let cwd = self.shared.cwd();
        let joined = cwd.join(&expanded);
        if joined.exists() {
            return Some(joined);
        }
        let from_parent = cwd.parent().map(|p| p.join(&expanded));
        from_parent.filter(|p| p.exists())
    }

    /// Push a prompt for shells that never print one of their own.
    pub fn synthetic_prompt(&self, cwd: &Path) {
        let text = format!("{}>", cwd.display());
        self.shared.last_was_prompt.store(true, Ordering::SeqCst);
        self.shared.record_prompt(PromptRecord {
            text: text.clone(),
            path: cwd.to_path_buf(),
        });
        self.sink.push(ClassifiedLine::with_path(
            text,
            LineKind::Prompt,
            cwd.to_path_buf(),
            None,
        ));
    }
}

/// Collapse runs of spaces and tabs to a single space and drop leading
/// whitespace. Interior structure is sacrificed so patterns see stable
/// text.
pub fn collapse_whitespace(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut in_run = true;
    for c in line.chars() {
        if c == ' ' || c == '\t' {
            if !in_run {
                out.push(' ');
                in_run = true;
            }
        } else {
            out.push(c);
            in_run = false;
        }
    }
    out
}

fn expand_tilde(path: &str, home: &Path) -> PathBuf {
    if path == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = path.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(path)
}

/// Collapse doubled slashes a `$PWD/` prompt picks up at the root.
fn collapse_slashes(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    if !text.contains("//") {
        return path.to_path_buf();
    }
    let mut out = String::with_capacity(text.len());
    let mut prev_slash = false;
    for c in text.chars() {
        if c == '/' {
            if !prev_slash {
                out.push(c);
            }
            prev_slash = true;
        } else {
            out.push(c);
            prev_slash = false;
        }
    }
    PathBuf::from(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::DefaultPatterns;
    use crate::sink::MemorySink;
    use tempfile::TempDir;

    fn classifier(
        cwd: &Path,
        home: &Path,
    ) -> (LineClassifier, Arc<MemorySink>, Arc<SessionShared>) {
        let shared = SessionShared::new(cwd.to_path_buf(), home.to_path_buf());
        let sink = MemorySink::new();
        let classifier = LineClassifier::new(
            shared.clone(),
            sink.clone(),
            Arc::new(DefaultPatterns),
        );
        (classifier, sink, shared)
    }

    #[test]
    fn test_marker_line_updates_cwd_silently() {
        let dir = TempDir::new().unwrap();
        let (c, sink, shared) = classifier(dir.path(), dir.path());
        c.interpret("<PWD=/var/log", StreamRole::Stdout);
        assert_eq!(shared.cwd(), PathBuf::from("/var/log"));
        assert!(sink.lines().is_empty());
    }

    #[test]
    fn test_echoed_probe_commands_are_swallowed() {
        let dir = TempDir::new().unwrap();
        let (c, sink, _) = classifier(dir.path(), dir.path());
        c.interpret("echo '<'PWD=$PWD", StreamRole::Stdout);
        c.interpret("/tmp> echo $PWD'>'", StreamRole::Stdout);
        assert!(sink.lines().is_empty());
    }

    #[test]
    fn test_prompt_with_existing_dir_is_classified() {
        let dir = TempDir::new().unwrap();
        let (c, sink, shared) = classifier(dir.path(), dir.path());
        let text = format!("{}/>", dir.path().display());
        c.interpret(&text, StreamRole::Stdout);
        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].kind, LineKind::Prompt);
        assert_eq!(lines[0].path.as_deref(), Some(dir.path()));
        assert_eq!(shared.cwd(), dir.path());
    }

    #[test]
    fn test_consecutive_duplicate_prompt_suppressed() {
        let dir = TempDir::new().unwrap();
        let (c, sink, _) = classifier(dir.path(), dir.path());
        let text = format!("{}/>", dir.path().display());
        c.interpret(&text, StreamRole::Stdout);
        c.interpret(&text, StreamRole::Stdout);
        assert_eq!(sink.lines().len(), 1);
        // Intervening output resets the suppression.
        c.interpret("hello", StreamRole::Stdout);
        c.interpret(&text, StreamRole::Stdout);
        assert_eq!(sink.lines().len(), 3);
    }

    #[test]
    fn test_prompt_with_missing_dir_demoted_to_plain() {
        let dir = TempDir::new().unwrap();
        let (c, sink, _) = classifier(dir.path(), dir.path());
        c.interpret("/no/such/dir/>", StreamRole::Stdout);
        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].kind, LineKind::Stdout);
        assert!(lines[0].path.is_none());
    }

    #[test]
    fn test_tilde_prompt_expands_to_home() {
        let dir = TempDir::new().unwrap();
        let (c, sink, _) = classifier(dir.path(), dir.path());
        c.interpret("~/>", StreamRole::Stdout);
        let lines = sink.lines();
        assert_eq!(lines[0].kind, LineKind::Prompt);
        assert_eq!(lines[0].path.as_deref(), Some(dir.path()));
    }

    #[test]
    fn test_error_reference_resolved_against_cwd() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("main.c"), "int main;").unwrap();
        let (c, sink, _) = classifier(dir.path(), dir.path());
        c.interpret("main.c:3: error: oops", StreamRole::Stderr);
        let lines = sink.lines();
        assert_eq!(lines[0].kind, LineKind::Error);
        assert_eq!(lines[0].path.as_deref(), Some(dir.path().join("main.c").as_path()));
        assert_eq!(lines[0].line, Some(3));
    }

    #[test]
    fn test_error_reference_falls_back_to_parent_dir() {
        let root = TempDir::new().unwrap();
        let sub = root.path().join("build");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(root.path().join("main.c"), "int main;").unwrap();
        let (c, sink, _) = classifier(&sub, root.path());
        c.interpret("main.c:7: warning", StreamRole::Stderr);
        let lines = sink.lines();
        assert_eq!(lines[0].kind, LineKind::Error);
        assert_eq!(
            lines[0].path.as_deref(),
            Some(root.path().join("main.c").as_path())
        );
    }

    #[test]
    fn test_unresolvable_reference_demoted_to_stream_kind() {
        let dir = TempDir::new().unwrap();
        let (c, sink, _) = classifier(dir.path(), dir.path());
        c.interpret("ghost.c:1: error", StreamRole::Stderr);
        let lines = sink.lines();
        assert_eq!(lines[0].kind, LineKind::Stderr);
        assert!(lines[0].path.is_none());
    }

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(collapse_whitespace("  a \t b"), "a b");
        assert_eq!(collapse_whitespace("plain"), "plain");
        assert_eq!(collapse_whitespace("\t\t"), "");
    }

    #[test]
    fn test_root_prompt_double_slash_collapsed() {
        let dir = TempDir::new().unwrap();
        let (c, sink, _) = classifier(dir.path(), dir.path());
        c.interpret("//>", StreamRole::Stdout);
        let lines = sink.lines();
        assert_eq!(lines[0].kind, LineKind::Prompt);
        assert_eq!(lines[0].path.as_deref(), Some(Path::new("/")));
    }

    #[test]
    fn test_synthetic_prompt() {
        let dir = TempDir::new().unwrap();
        let (c, sink, shared) = classifier(dir.path(), dir.path());
        c.synthetic_prompt(dir.path());
        let lines = sink.lines();
        assert_eq!(lines[0].kind, LineKind::Prompt);
        assert!(shared.last_prompt().is_some());
    }
}
