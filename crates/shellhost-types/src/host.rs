//! Host OS classification and caller identity.

use serde::{Deserialize, Serialize};

/// Closed classification of the host operating system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostOs {
    /// Mainstream POSIX (Linux, macOS, AIX, ...).
    Posix,
    /// Constrained-charset POSIX host (EBCDIC default encoding,
    /// restricted shells).
    RestrictedPosix,
    /// NT-family Windows.
    WindowsModern,
    /// Windows 95/98/ME.
    WindowsLegacy,
}

impl HostOs {
    /// Classify from an `os.name`-style string.
    pub fn from_os_name(name: &str) -> Self {
        let lower = name.to_lowercase();
        if lower.starts_with("win") {
            if name.contains("95") || name.contains("98") || name.contains("ME") {
                Self::WindowsLegacy
            } else {
                Self::WindowsModern
            }
        } else if lower.starts_with('z') || lower.starts_with("os") {
            Self::RestrictedPosix
        } else {
            Self::Posix
        }
    }

    pub fn is_windows(self) -> bool {
        matches!(self, Self::WindowsModern | Self::WindowsLegacy)
    }

    /// Separator used in PATH-like variables.
    pub fn path_separator(self) -> char {
        if self.is_windows() { ';' } else { ':' }
    }

    /// Whether this host defaults to a constrained character set.
    pub fn is_constrained_charset(self) -> bool {
        matches!(self, Self::RestrictedPosix)
    }
}

/// Who is asking for the session versus who owns the server process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    /// The user the caller authenticated as.
    pub caller_user: String,
    /// The user the engine process runs as.
    pub process_user: String,
}

impl CallerIdentity {
    pub fn same_user(user: impl Into<String>) -> Self {
        let user = user.into();
        Self {
            caller_user: user.clone(),
            process_user: user,
        }
    }

    /// True when running a command requires a privilege switch.
    pub fn needs_switch(&self) -> bool {
        self.caller_user != self.process_user
    }
}
