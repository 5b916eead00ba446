//! Core command-session engine for Shellhost.

mod channel;
mod classify;
mod config;
mod environment;
mod error;
mod launch;
mod pathscan;
mod patterns;
mod session;
mod sink;

pub use channel::{LineAssembler, OutputChannel, encoding_candidates};
pub use classify::{
    CWD_MARKER_PREFIX, CWD_MARKER_PROBE, CWD_PROMPT_PROBE, LineClassifier, PromptRecord,
    SessionShared, collapse_whitespace,
};
pub use config::SessionConfig;
pub use environment::{EnvEntry, apply_session_vars, get_var, merge, substitute};
pub use error::ShellHostError;
pub use launch::{LaunchPlan, LaunchRequest, SHELL_SENTINEL, classify_shell, resolve};
pub use pathscan::{CommandCandidate, enumerate_path};
pub use patterns::{DefaultPatterns, LinePatterns, ParsedOutput, PatternKind};
pub use session::{CommandSession, HostContext, StaticContext};
pub use sink::{ChannelSink, MemorySink, RecordSink, SessionRecord};

/// Result type for Shellhost operations.
pub type Result<T> = std::result::Result<T, ShellHostError>;
