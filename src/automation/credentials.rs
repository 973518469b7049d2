//! Ephemeral credentials for the automation API
//!
//! Minted on every start and written next to the config so local tools can
//! discover the port and token. The file exists only while the server
//! listens.

use std::fmt;
use std::net::SocketAddr;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, generate_token, remove_if_exists, write_private_file};

pub const CREDENTIALS_VERSION: u32 = 1;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationApiCredentials {
    pub version: u32,
    pub host: String,
    pub port: u16,
    pub token: String,
    pub created_at: DateTime<Utc>,
}

impl AutomationApiCredentials {
    /// Fresh credentials for a listener bound to `addr`.
    pub fn mint(addr: SocketAddr) -> Result<Self, getrandom::Error> {
        Ok(Self {
            version: CREDENTIALS_VERSION,
            host: addr.ip().to_string(),
            port: addr.port(),
            token: generate_token()?,
            created_at: Utc::now(),
        })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_vec_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        write_private_file(path, &content)
    }

    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        let content = match std::fs::read(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ConfigError::io(path, e)),
        };
        serde_json::from_slice(&content)
            .map(Some)
            .map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })
    }

    pub fn remove(path: &Path) -> Result<(), ConfigError> {
        remove_if_exists(path)
    }
}

// Keeps the token out of logs
impl fmt::Debug for AutomationApiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutomationApiCredentials")
            .field("version", &self.version)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("token", &"<redacted>")
            .field("created_at", &self.created_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_mint_uses_bound_address() {
        let creds = AutomationApiCredentials::mint(loopback(48123)).unwrap();
        assert_eq!(creds.version, 1);
        assert_eq!(creds.host, "127.0.0.1");
        assert_eq!(creds.port, 48123);
        assert_eq!(creds.token.len(), 64);
        assert_eq!(creds.base_url(), "http://127.0.0.1:48123");
    }

    #[test]
    fn test_every_mint_has_a_new_token() {
        let a = AutomationApiCredentials::mint(loopback(1)).unwrap();
        let b = AutomationApiCredentials::mint(loopback(1)).unwrap();
        assert_ne!(a.token, b.token);
    }

    #[test]
    fn test_save_load_remove() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("automation-api-credentials.json");
        let creds = AutomationApiCredentials::mint(loopback(9)).unwrap();

        creds.save(&path).unwrap();
        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert!(json.get("createdAt").is_some());
        assert_eq!(AutomationApiCredentials::load(&path).unwrap(), Some(creds));

        AutomationApiCredentials::remove(&path).unwrap();
        assert_eq!(AutomationApiCredentials::load(&path).unwrap(), None);
    }

    #[test]
    fn test_debug_redacts_token() {
        let creds = AutomationApiCredentials::mint(loopback(9)).unwrap();
        let debug = format!("{:?}", creds);
        assert!(!debug.contains(&creds.token));
        assert!(debug.contains("<redacted>"));
    }
}
