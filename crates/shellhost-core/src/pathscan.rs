//! PATH enumeration.
//!
//! Walks a PATH-like value and lists the regular, non-hidden files in
//! each existing directory, once per distinct directory. No
//! executability check; the consumer filters candidates itself.

use shellhost_types::HostOs;
use std::collections::HashSet;
use std::path::PathBuf;

/// One file found on the search path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandCandidate {
    pub name: String,
    pub path: PathBuf,
}

/// Enumerate candidates from a PATH-like value.
pub fn enumerate_path(path_value: &str, host: HostOs) -> Vec<CommandCandidate> {
    let mut seen: HashSet<PathBuf> = HashSet::new();
    let mut candidates = Vec::new();

    for segment in path_value.split(host.path_separator()) {
        if segment.is_empty() {
            continue;
        }
        let dir = PathBuf::from(segment);
        if !dir.is_dir() {
            tracing::trace!(target: "shellhost::pathscan", "Skipping missing segment {segment}");
            continue;
        }
        // Segments spelled differently can name the same directory.
        let canonical = dir.canonicalize().unwrap_or_else(|_| dir.clone());
        let key = if host.is_windows() {
            PathBuf::from(canonical.to_string_lossy().to_lowercase())
        } else {
            canonical.clone()
        };
        if !seen.insert(key) {
            continue;
        }

        let Ok(entries) = std::fs::read_dir(&canonical) else {
            continue;
        };
        for entry in entries.flatten() {
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if !file_type.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            candidates.push(CommandCandidate {
                path: canonical.join(&name),
                name,
            });
        }
    }

    candidates
}
