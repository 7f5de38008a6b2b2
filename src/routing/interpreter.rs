//! Interpreter selection by file extension.
//!
//! # Design Decisions
//! - Ordered table, first entry listing the extension wins
//! - Exact string match on the extension, case as configured
//! - No match means the script runs directly (shebang or native binary)

use crate::config::InterpreterConfig;
use crate::routing::resolver::extension_of;

/// Extension → interpreter lookup table.
#[derive(Debug, Clone, Default)]
pub struct InterpreterSelector {
    entries: Vec<InterpreterConfig>,
}

impl InterpreterSelector {
    pub fn new(entries: Vec<InterpreterConfig>) -> Self {
        Self { entries }
    }

    /// Interpreter command for `path`, or `None` to execute the file itself.
    pub fn select(&self, path: &str) -> Option<&str> {
        let ext = extension_of(path)?;
        self.entries
            .iter()
            .find(|entry| entry.extensions.iter().any(|e| e == ext))
            .map(|entry| entry.command.as_str())
    }
}

/// True when a command line names its program by absolute path.
///
/// Covers POSIX roots, drive-letter paths and UNC shares so the same
/// configuration behaves identically on every platform.
pub fn is_absolute_command(command: &str) -> bool {
    let program = command.split_whitespace().next().unwrap_or("");
    let bytes = program.as_bytes();
    program.starts_with('/')
        || program.starts_with("\\\\")
        || (bytes.len() >= 3
            && bytes[0].is_ascii_alphabetic()
            && bytes[1] == b':'
            && (bytes[2] == b'\\' || bytes[2] == b'/'))
}
