//! Shared types for the shellhost session engine.

mod host;
mod line;
mod session;
mod shell;

pub use host::*;
pub use line::*;
pub use session::*;
pub use shell::*;
