//! Automation API configuration
//!
//! The config is a small JSON document that controls whether the local
//! automation endpoint runs and what it may do. Loading fails closed: an
//! unknown key, an out-of-range number, or `enabled` without any allowed
//! root is an error, never a silently corrected value.

mod io;
mod paths;
mod token;

pub use io::{remove_if_exists, write_private_file};
pub(crate) use io::{create_private_dir, write_atomic};
pub use paths::{AutomationPaths, default_shell_integration_dir, default_state_dir};
pub use token::{constant_time_eq, generate_token};

use std::ops::RangeInclusive;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const MAX_COMMANDS_RANGE: RangeInclusive<u64> = 1..=100;
pub const MAX_COMMAND_LENGTH_RANGE: RangeInclusive<u64> = 1..=65_536;
pub const MAX_REQUEST_BYTES_RANGE: RangeInclusive<u64> = 256..=1_048_576;
pub const REQUEST_TIMEOUT_MS_RANGE: RangeInclusive<u64> = 100..=120_000;
pub const RATE_LIMIT_PER_MINUTE_RANGE: RangeInclusive<u64> = 1..=1_000;

/// Error type for config loading and persistence
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{field} must be within {min}..={max} (got {value})")]
    OutOfRange {
        field: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },

    #[error("allowedRoots entry is not an absolute path: {}", .0.display())]
    RelativeRoot(PathBuf),

    #[error("enabled=true requires at least one entry in allowedRoots")]
    EnabledWithoutRoots,

    #[error("Refusing to write through symlink: {}", .0.display())]
    Symlink(PathBuf),
}

impl ConfigError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Persisted settings of the automation control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct AutomationApiConfig {
    pub enabled: bool,
    /// Absolute path prefixes a bootstrap `cwd` must fall under
    pub allowed_roots: Vec<PathBuf>,
    pub max_commands: u64,
    pub max_command_length: u64,
    pub max_request_bytes: u64,
    pub request_timeout_ms: u64,
    pub rate_limit_per_minute: u64,
}

impl Default for AutomationApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allowed_roots: Vec::new(),
            max_commands: 10,
            max_command_length: 4096,
            max_request_bytes: 64 * 1024,
            request_timeout_ms: 10_000,
            rate_limit_per_minute: 30,
        }
    }
}

impl AutomationApiConfig {
    /// Load the config from `path`.
    ///
    /// A missing file yields the default (disabled) config. Anything else
    /// that is not a valid config is returned as an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::io(path, e)),
        };
        Self::parse(&content, path)
    }

    fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let mut config: Self =
            serde_json::from_str(content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.allowed_roots = config
            .allowed_roots
            .iter()
            .map(|root| normalize_path(root))
            .collect();
        config.validate()?;
        Ok(config)
    }

    /// Check every field against its allowed range and the roots invariant.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("maxCommands", self.max_commands, MAX_COMMANDS_RANGE)?;
        check_range(
            "maxCommandLength",
            self.max_command_length,
            MAX_COMMAND_LENGTH_RANGE,
        )?;
        check_range(
            "maxRequestBytes",
            self.max_request_bytes,
            MAX_REQUEST_BYTES_RANGE,
        )?;
        check_range(
            "requestTimeoutMs",
            self.request_timeout_ms,
            REQUEST_TIMEOUT_MS_RANGE,
        )?;
        check_range(
            "rateLimitPerMinute",
            self.rate_limit_per_minute,
            RATE_LIMIT_PER_MINUTE_RANGE,
        )?;

        if let Some(root) = self.allowed_roots.iter().find(|r| !r.is_absolute()) {
            return Err(ConfigError::RelativeRoot(root.clone()));
        }
        if self.enabled && self.allowed_roots.is_empty() {
            return Err(ConfigError::EnabledWithoutRoots);
        }
        Ok(())
    }

    /// Validate and atomically persist the config with owner-only permissions.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        self.validate()?;
        let content = serde_json::to_vec_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        write_private_file(path, &content)
    }

    /// Whether `candidate` (already normalized) falls under an allowed root.
    pub fn is_path_allowed(&self, candidate: &Path) -> bool {
        self.allowed_roots
            .iter()
            .any(|root| candidate.starts_with(root))
    }
}

fn check_range(
    field: &'static str,
    value: u64,
    range: RangeInclusive<u64>,
) -> Result<(), ConfigError> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            min: *range.start(),
            max: *range.end(),
        })
    }
}

/// Lexically normalize a path: drop `.` components and fold `..` into the
/// preceding component. Does not touch the filesystem.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<AutomationApiConfig, ConfigError> {
        AutomationApiConfig::parse(json, Path::new("test.json"))
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let config = parse("{}").unwrap();
        assert_eq!(config, AutomationApiConfig::default());
        assert!(!config.enabled);
    }

    #[test]
    fn test_enabled_without_roots_is_rejected() {
        let err = parse(r#"{"enabled": true}"#).unwrap_err();
        assert!(matches!(err, ConfigError::EnabledWithoutRoots));

        let err = parse(r#"{"enabled": true, "allowedRoots": []}"#).unwrap_err();
        assert!(matches!(err, ConfigError::EnabledWithoutRoots));
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let err = parse(r#"{"enabled": false, "allowAll": true}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_out_of_range_fields_are_rejected() {
        let err = parse(r#"{"maxCommands": 0}"#).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::OutOfRange {
                field: "maxCommands",
                ..
            }
        ));

        let err = parse(r#"{"requestTimeoutMs": 999999999}"#).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::OutOfRange {
                field: "requestTimeoutMs",
                ..
            }
        ));

        // Negative numbers do not fit u64 and fail to parse at all
        assert!(parse(r#"{"rateLimitPerMinute": -1}"#).is_err());
    }

    #[test]
    fn test_relative_root_is_rejected() {
        let err = parse(r#"{"allowedRoots": ["work/projects"]}"#).unwrap_err();
        assert!(matches!(err, ConfigError::RelativeRoot(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_roots_are_normalized_on_load() {
        let config =
            parse(r#"{"enabled": true, "allowedRoots": ["/home/u/./work/../work/"]}"#).unwrap();
        assert_eq!(config.allowed_roots, vec![PathBuf::from("/home/u/work")]);
    }

    #[cfg(unix)]
    #[test]
    fn test_is_path_allowed_uses_component_prefixes() {
        let config = AutomationApiConfig {
            enabled: true,
            allowed_roots: vec![PathBuf::from("/home/u/work")],
            ..Default::default()
        };
        assert!(config.is_path_allowed(Path::new("/home/u/work")));
        assert!(config.is_path_allowed(Path::new("/home/u/work/proj")));
        assert!(!config.is_path_allowed(Path::new("/home/u/workshop")));
        assert!(!config.is_path_allowed(Path::new("/home/u")));
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = AutomationApiConfig::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config, AutomationApiConfig::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("automation-api.json");
        let config = AutomationApiConfig {
            enabled: true,
            allowed_roots: vec![dir.path().to_path_buf()],
            max_commands: 5,
            ..Default::default()
        };

        config.save(&path).unwrap();
        assert_eq!(AutomationApiConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_save_refuses_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("automation-api.json");
        let config = AutomationApiConfig {
            enabled: true,
            ..Default::default()
        };

        assert!(config.save(&path).is_err());
        assert!(!path.exists());
    }
}
