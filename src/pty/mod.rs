//! Pseudo-terminal sessions
//!
//! [`PtyRegistry`] owns one shell process per session id and streams its
//! output to a [`SessionListener`]. Working-directory tracking lives in
//! [`cwd`], shell startup wrapping in [`shell`].

pub mod cwd;
mod registry;
pub mod shell;

pub use cwd::{CWD_CACHE_TTL, CwdResolver, platform_resolver};
pub use registry::{PtyRegistry, SessionInfo};
pub use shell::ShellIntegrationProvisioner;

use std::path::{Path, PathBuf};

/// Initial geometry of every new session.
pub const DEFAULT_COLS: u16 = 80;
pub const DEFAULT_ROWS: u16 = 24;

/// Receives process output and lifecycle events for one session.
///
/// Called from the session's reader thread, in the order the process
/// produced the bytes.
pub trait SessionListener: Send + Sync {
    fn on_data(&self, data: &[u8]);

    /// `Some(code)` when the process exited on its own, `None` when the
    /// registry killed it.
    fn on_exit(&self, exit_code: Option<u32>);

    fn on_cwd_changed(&self, _cwd: &Path) {}
}

/// Error type for session operations
#[derive(Debug, thiserror::Error)]
pub enum PtyError {
    #[error("Directory does not exist: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("Failed to spawn {shell}: {source}")]
    Spawn {
        shell: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("PTY write failed for session {id}: {source}")]
    Write {
        id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to resize session {id}: {source}")]
    Resize {
        id: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}
