//! Automation control plane
//!
//! A loopback-only HTTP endpoint that lets local tools open a terminal
//! session pre-loaded with a working directory and commands:
//! - `POST /v1/terminal/bootstrap` (bearer token + `X-CDW-Client` required)
//!
//! Lifecycle: Disabled -> Starting -> Listening -> Stopping -> Disabled.
//! Credentials are minted on every start and deleted on every stop.

mod credentials;
mod handlers;
mod rate_limit;
mod types;

pub use credentials::{AutomationApiCredentials, CREDENTIALS_VERSION};
pub use handlers::{BOOTSTRAP_PATH, CLIENT_HEADER, MAX_CLIENT_ID_LEN};
pub use rate_limit::{RATE_WINDOW, RateLimiter};
pub use types::{ApiError, BootstrapHandler, BootstrapRequest, BootstrapResponse};

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::thread::{self, JoinHandle};

use tiny_http::Server;
use tokio::runtime::Handle;
use tracing::{error, info, warn};

use crate::config::{AutomationApiConfig, AutomationPaths, ConfigError, normalize_path};
use handlers::{RequestContext, handle_request};

const BIND_ADDR: &str = "127.0.0.1:0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Disabled,
    Starting,
    Listening,
    Stopping,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disabled => "disabled",
            Self::Starting => "starting",
            Self::Listening => "listening",
            Self::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// Error type for server lifecycle operations
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Listener did not report a TCP address")]
    NoTcpAddress,

    #[error("Failed to generate token: {0}")]
    Token(getrandom::Error),
}

struct Running {
    server: Arc<Server>,
    accept_loop: JoinHandle<()>,
    credentials: AutomationApiCredentials,
}

struct Lifecycle {
    state: ServerState,
    running: Option<Running>,
}

struct Inner {
    paths: AutomationPaths,
    bootstrap: Arc<dyn BootstrapHandler>,
    runtime: Handle,
    config: Arc<RwLock<AutomationApiConfig>>,
    lifecycle: Mutex<Lifecycle>,
}

/// The automation HTTP server and its persisted config.
///
/// Request handling blocks on `runtime` from worker threads, so the
/// handle must belong to a multi-threaded Tokio runtime.
#[derive(Clone)]
pub struct AutomationServer {
    inner: Arc<Inner>,
}

impl AutomationServer {
    pub fn new(
        paths: AutomationPaths,
        bootstrap: Arc<dyn BootstrapHandler>,
        runtime: Handle,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                paths,
                bootstrap,
                runtime,
                config: Arc::new(RwLock::new(AutomationApiConfig::default())),
                lifecycle: Mutex::new(Lifecycle {
                    state: ServerState::Disabled,
                    running: None,
                }),
            }),
        }
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.inner
            .lifecycle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn set_config(&self, config: AutomationApiConfig) {
        *self.inner.config.write().unwrap_or_else(|e| e.into_inner()) = config;
    }

    /// Load the persisted config and start listening if it is enabled.
    ///
    /// Returns immediately when disabled or already listening.
    pub fn start(&self) -> Result<(), ServerError> {
        let config = AutomationApiConfig::load(&self.inner.paths.config_file)?;
        let enabled = config.enabled;
        self.set_config(config);
        if !enabled {
            return Ok(());
        }

        let mut lifecycle = self.lifecycle();
        if lifecycle.running.is_some() {
            return Ok(());
        }
        lifecycle.state = ServerState::Starting;

        match self.launch() {
            Ok(running) => {
                info!(
                    "[cdw:api] Listening on {} (credentials: {})",
                    running.credentials.base_url(),
                    self.inner.paths.credentials_file.display()
                );
                lifecycle.running = Some(running);
                lifecycle.state = ServerState::Listening;
                Ok(())
            }
            Err(e) => {
                error!("[cdw:api] Failed to start: {}", e);
                lifecycle.state = ServerState::Disabled;
                drop(lifecycle);
                self.revert_to_disabled();
                Err(e)
            }
        }
    }

    fn launch(&self) -> Result<Running, ServerError> {
        let server = Server::http(BIND_ADDR).map_err(|source| ServerError::Bind {
            addr: BIND_ADDR,
            source,
        })?;
        let addr: SocketAddr = server
            .server_addr()
            .to_ip()
            .ok_or(ServerError::NoTcpAddress)?;

        let credentials = AutomationApiCredentials::mint(addr).map_err(ServerError::Token)?;
        credentials.save(&self.inner.paths.credentials_file)?;

        let context = Arc::new(RequestContext {
            config: self.inner.config.clone(),
            token: credentials.token.clone(),
            rate_limiter: RateLimiter::new(),
            bootstrap: self.inner.bootstrap.clone(),
            runtime: self.inner.runtime.clone(),
        });

        let server = Arc::new(server);
        let accept_server = server.clone();
        let accept_loop = thread::spawn(move || {
            for request in accept_server.incoming_requests() {
                let context = context.clone();
                thread::spawn(move || handle_request(&context, request));
            }
        });

        Ok(Running {
            server,
            accept_loop,
            credentials,
        })
    }

    fn revert_to_disabled(&self) {
        let mut config = self.config();
        config.enabled = false;
        if let Err(e) = config.save(&self.inner.paths.config_file) {
            warn!("[cdw:api] Failed to persist disabled config: {}", e);
        }
        self.set_config(config);
    }

    /// Persist `enabled` and start or stop the listener to match.
    pub fn set_enabled(&self, enabled: bool) -> Result<(), ServerError> {
        let mut config = self.config();
        config.enabled = enabled;

        if enabled {
            config.save(&self.inner.paths.config_file)?;
            self.start()
        } else {
            self.stop();
            config.save(&self.inner.paths.config_file)?;
            self.set_config(config);
            Ok(())
        }
    }

    /// Replace and persist the allowed roots; takes effect on the next request.
    pub fn set_allowed_roots(&self, roots: Vec<PathBuf>) -> Result<(), ServerError> {
        let mut config = self.config();
        config.allowed_roots = roots.iter().map(|r| normalize_path(r)).collect();
        config.save(&self.inner.paths.config_file)?;
        self.set_config(config);
        Ok(())
    }

    /// Close the listener and delete the credentials file.
    ///
    /// Requests already being handled run to completion.
    pub fn stop(&self) {
        let mut lifecycle = self.lifecycle();
        let Some(running) = lifecycle.running.take() else {
            return;
        };
        lifecycle.state = ServerState::Stopping;

        running.server.unblock();
        if running.accept_loop.join().is_err() {
            warn!("[cdw:api] Accept loop panicked");
        }
        drop(running.server);

        if let Err(e) = AutomationApiCredentials::remove(&self.inner.paths.credentials_file) {
            warn!("[cdw:api] Failed to remove credentials: {}", e);
        }
        lifecycle.state = ServerState::Disabled;
        info!("[cdw:api] Stopped");
    }

    /// Stop the listener without touching the persisted config.
    pub fn shutdown(&self) {
        self.stop();
    }

    pub fn status(&self) -> ServerState {
        self.lifecycle().state
    }

    pub fn credentials(&self) -> Option<AutomationApiCredentials> {
        self.lifecycle()
            .running
            .as_ref()
            .map(|r| r.credentials.clone())
    }

    pub fn config(&self) -> AutomationApiConfig {
        self.inner
            .config
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn paths(&self) -> &AutomationPaths {
        &self.inner.paths
    }
}
