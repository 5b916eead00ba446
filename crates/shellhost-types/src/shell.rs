//! Shell classification.

use serde::{Deserialize, Serialize};

/// Closed classification of the shell driving a session.
///
/// "Restricted host" covers constrained-charset platforms (EBCDIC-era
/// hosts) whose shells take different login flags than their mainstream
/// counterparts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShellKind {
    /// Not a shell session (one-shot command).
    None,
    /// A POSIX shell with no special handling.
    Generic,
    Bash,
    BashRestrictedHost,
    ShRestrictedHost,
    /// csh or tcsh; environment assignments use `setenv`.
    Csh,
    /// Windows command interpreter.
    CmdWindows,
}

impl ShellKind {
    /// Shells launched as login shells for interactive sessions.
    pub fn is_login_capable(self) -> bool {
        matches!(
            self,
            Self::Bash | Self::BashRestrictedHost | Self::ShRestrictedHost
        )
    }

    /// Shells hosted on constrained-charset platforms.
    pub fn is_restricted_host(self) -> bool {
        matches!(self, Self::BashRestrictedHost | Self::ShRestrictedHost)
    }

    /// The login flag appended for interactive sessions.
    pub fn login_flag(self) -> Option<&'static str> {
        match self {
            Self::Bash => Some("-l"),
            Self::BashRestrictedHost => Some("--login"),
            Self::ShRestrictedHost => Some("-L"),
            _ => None,
        }
    }
}
