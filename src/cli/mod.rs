//! CLI command implementations

use std::path::Path;

use cdw::config::{AutomationPaths, default_shell_integration_dir};

pub mod api;
pub mod serve;
pub mod spawn;

fn automation_paths(state_dir: Option<&Path>) -> AutomationPaths {
    match state_dir {
        Some(dir) => AutomationPaths::in_dir(dir),
        None => AutomationPaths::default_locations(),
    }
}

fn shell_integration_dir(state_dir: Option<&Path>) -> std::path::PathBuf {
    match state_dir {
        Some(dir) => dir.join("shell-integration"),
        None => default_shell_integration_dir(),
    }
}
