//! Shell selection and shell-integration provisioning
//!
//! Every supported shell family gets a small generated startup script that
//! wraps the user's own configuration and reports the working directory on
//! each prompt. The scripts live in a private directory and are written at
//! most once per run, on the first spawn that needs them.

mod scripts;

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing::{debug, warn};

use crate::config::{ConfigError, create_private_dir, write_atomic};

/// Env var carrying the user's own ZDOTDIR through the zsh wrapper.
pub const USER_ZDOTDIR_ENV: &str = "CDW_USER_ZDOTDIR";

/// Shell families with distinct integration strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellFamily {
    Bash,
    Zsh,
    Fish,
    Other,
}

impl ShellFamily {
    /// Classify a shell by its executable name (`/usr/bin/zsh`, `bash.exe`, ...).
    pub fn detect(shell: &str) -> Self {
        let name = Path::new(shell)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(shell)
            .to_ascii_lowercase();
        match name.as_str() {
            "bash" => Self::Bash,
            "zsh" => Self::Zsh,
            "fish" => Self::Fish,
            _ => Self::Other,
        }
    }
}

/// The shell to launch: the explicit override, else the platform default.
pub fn resolve_shell(shell_override: Option<&str>) -> String {
    if let Some(shell) = shell_override.map(str::trim).filter(|s| !s.is_empty()) {
        return shell.to_string();
    }
    default_shell()
}

#[cfg(unix)]
fn default_shell() -> String {
    std::env::var("SHELL")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| {
            if cfg!(target_os = "macos") {
                "/bin/zsh".to_string()
            } else {
                "/bin/bash".to_string()
            }
        })
}

#[cfg(windows)]
fn default_shell() -> String {
    std::env::var("COMSPEC").unwrap_or_else(|_| "powershell.exe".to_string())
}

/// Extra arguments and environment needed to activate integration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchParams {
    pub args: Vec<OsString>,
    pub env: Vec<(String, OsString)>,
}

/// Paths of the generated scripts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrationScripts {
    pub dir: PathBuf,
    pub bash_rc: PathBuf,
    /// Directory used as ZDOTDIR; holds `.zshenv` and `.zshrc`
    pub zsh_dir: PathBuf,
    pub fish_init: PathBuf,
}

impl IntegrationScripts {
    fn in_dir(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            bash_rc: dir.join("cdw-integration.bash"),
            zsh_dir: dir.join("zsh"),
            fish_init: dir.join("cdw-integration.fish"),
        }
    }
}

/// Per-family activation strategy.
pub trait ShellIntegration: Send + Sync {
    fn launch_params(&self, scripts: &IntegrationScripts) -> LaunchParams;
}

/// bash: `--rcfile <wrapper>`; the wrapper sources `~/.bashrc` itself.
pub struct BashIntegration;

impl ShellIntegration for BashIntegration {
    fn launch_params(&self, scripts: &IntegrationScripts) -> LaunchParams {
        LaunchParams {
            args: vec!["--rcfile".into(), scripts.bash_rc.clone().into_os_string()],
            env: Vec::new(),
        }
    }
}

/// zsh: environment only. ZDOTDIR points at the wrapper directory and the
/// user's own value travels in [`USER_ZDOTDIR_ENV`].
pub struct ZshIntegration {
    user_zdotdir: Option<OsString>,
}

impl ZshIntegration {
    pub fn new(user_zdotdir: Option<OsString>) -> Self {
        Self { user_zdotdir }
    }

    /// Capture ZDOTDIR (or HOME) from the current environment.
    pub fn from_env() -> Self {
        Self::new(std::env::var_os("ZDOTDIR").or_else(|| std::env::var_os("HOME")))
    }
}

impl ShellIntegration for ZshIntegration {
    fn launch_params(&self, scripts: &IntegrationScripts) -> LaunchParams {
        let mut env = vec![(
            "ZDOTDIR".to_string(),
            scripts.zsh_dir.clone().into_os_string(),
        )];
        if let Some(user) = &self.user_zdotdir {
            env.push((USER_ZDOTDIR_ENV.to_string(), user.clone()));
        }
        LaunchParams {
            args: Vec::new(),
            env,
        }
    }
}

/// fish: an inline `--init-command` that sources the hook script.
pub struct FishIntegration;

impl ShellIntegration for FishIntegration {
    fn launch_params(&self, scripts: &IntegrationScripts) -> LaunchParams {
        let command = format!("source {}", fish_quote(&scripts.fish_init.to_string_lossy()));
        LaunchParams {
            args: vec!["--init-command".into(), command.into()],
            env: Vec::new(),
        }
    }
}

/// Anything else runs untouched.
pub struct NoIntegration;

impl ShellIntegration for NoIntegration {
    fn launch_params(&self, _scripts: &IntegrationScripts) -> LaunchParams {
        LaunchParams::default()
    }
}

/// Select the strategy for a shell family.
pub fn integration_for(family: ShellFamily) -> Box<dyn ShellIntegration> {
    match family {
        ShellFamily::Bash => Box::new(BashIntegration),
        ShellFamily::Zsh => Box::new(ZshIntegration::from_env()),
        ShellFamily::Fish => Box::new(FishIntegration),
        ShellFamily::Other => Box::new(NoIntegration),
    }
}

fn fish_quote(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Writes the integration scripts on first use and hands out launch params.
///
/// Provisioning failures are logged once and the session runs without
/// integration; they never fail a spawn.
pub struct ShellIntegrationProvisioner {
    dir: PathBuf,
    scripts: OnceCell<Option<IntegrationScripts>>,
}

impl ShellIntegrationProvisioner {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            scripts: OnceCell::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The provisioned scripts, writing them on the first call.
    pub fn scripts(&self) -> Option<&IntegrationScripts> {
        self.scripts
            .get_or_init(|| match provision(&self.dir) {
                Ok(scripts) => {
                    debug!(
                        "[cdw:shell] Integration scripts ready in {}",
                        scripts.dir.display()
                    );
                    Some(scripts)
                }
                Err(e) => {
                    warn!("[cdw:shell] Shell integration disabled: {}", e);
                    None
                }
            })
            .as_ref()
    }

    /// Launch params for `shell`, or none if provisioning failed.
    pub fn launch_params(&self, shell: &str) -> LaunchParams {
        let family = ShellFamily::detect(shell);
        if family == ShellFamily::Other {
            return LaunchParams::default();
        }
        match self.scripts() {
            Some(scripts) => integration_for(family).launch_params(scripts),
            None => LaunchParams::default(),
        }
    }
}

/// Create the private directory and write any script whose content differs.
fn provision(dir: &Path) -> Result<IntegrationScripts, ConfigError> {
    let scripts = IntegrationScripts::in_dir(dir);
    create_private_dir(&scripts.dir)?;
    create_private_dir(&scripts.zsh_dir)?;

    write_if_changed(&scripts.bash_rc, scripts::BASH_RC)?;
    write_if_changed(&scripts.zsh_dir.join(".zshenv"), scripts::ZSH_ENV)?;
    write_if_changed(&scripts.zsh_dir.join(".zshrc"), scripts::ZSH_RC)?;
    write_if_changed(&scripts.fish_init, scripts::FISH_INIT)?;

    Ok(scripts)
}

fn write_if_changed(path: &Path, content: &str) -> Result<(), ConfigError> {
    if let Ok(existing) = std::fs::read(path) {
        if existing == content.as_bytes() {
            return Ok(());
        }
    }
    write_atomic(path, content.as_bytes())
}
