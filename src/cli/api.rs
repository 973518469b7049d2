//! Api command implementations

use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};

use cdw::automation::AutomationApiCredentials;
use cdw::config::AutomationApiConfig;

use super::automation_paths;

/// Enable the API with the given allowed roots
pub fn enable_command(state_dir: Option<&Path>, roots: &[PathBuf]) -> Result<()> {
    let paths = automation_paths(state_dir);
    let mut config = AutomationApiConfig::load(&paths.config_file)?;

    let mut allowed = Vec::with_capacity(roots.len());
    for root in roots {
        let resolved = std::fs::canonicalize(root)
            .with_context(|| format!("Allowed root does not exist: {}", root.display()))?;
        if !resolved.is_dir() {
            bail!("Allowed root is not a directory: {}", root.display());
        }
        allowed.push(resolved);
    }

    config.enabled = true;
    config.allowed_roots = allowed;
    config.save(&paths.config_file)?;

    println!("Automation API enabled for:");
    for root in &config.allowed_roots {
        println!("  {}", root.display());
    }
    println!("Restart `cdw serve` to apply.");
    Ok(())
}

/// Disable the API, keeping the allowed roots
pub fn disable_command(state_dir: Option<&Path>) -> Result<()> {
    let paths = automation_paths(state_dir);
    let mut config = AutomationApiConfig::load(&paths.config_file)?;
    config.enabled = false;
    config.save(&paths.config_file)?;
    println!("Automation API disabled.");
    Ok(())
}

/// Print the persisted config and the running server's address, if any
pub fn status_command(state_dir: Option<&Path>) -> Result<()> {
    let paths = automation_paths(state_dir);
    let config = AutomationApiConfig::load(&paths.config_file)?;

    println!("Config: {}", paths.config_file.display());
    println!("  enabled: {}", config.enabled);
    if config.allowed_roots.is_empty() {
        println!("  allowedRoots: (none)");
    } else {
        println!("  allowedRoots:");
        for root in &config.allowed_roots {
            println!("    {}", root.display());
        }
    }
    println!("  maxCommands: {}", config.max_commands);
    println!("  maxCommandLength: {}", config.max_command_length);
    println!("  maxRequestBytes: {}", config.max_request_bytes);
    println!("  requestTimeoutMs: {}", config.request_timeout_ms);
    println!("  rateLimitPerMinute: {}", config.rate_limit_per_minute);

    match AutomationApiCredentials::load(&paths.credentials_file)? {
        Some(creds) => println!(
            "Server: listening on {} since {}",
            creds.base_url(),
            creds.created_at.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        None => println!("Server: not running"),
    }
    Ok(())
}
