//! Composition root
//!
//! Builds the session registry and the automation server as owned
//! instances, wires the default bootstrap handler between them, and owns
//! the shutdown order.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::runtime::Handle;
use tracing::{debug, info};

use crate::automation::{
    AutomationServer, BootstrapHandler, BootstrapRequest, BootstrapResponse,
};
use crate::config::{AutomationPaths, default_shell_integration_dir};
use crate::pty::{PtyRegistry, SessionListener, ShellIntegrationProvisioner};

/// Builds the listener for a session created through the automation API.
pub type ListenerFactory = Arc<dyn Fn(&str) -> Arc<dyn SessionListener> + Send + Sync>;

pub struct AppOptions {
    pub paths: AutomationPaths,
    pub shell_integration_dir: PathBuf,
    /// Shell for bootstrapped sessions; platform default when unset
    pub shell: Option<String>,
    pub listener_factory: ListenerFactory,
    pub runtime: Handle,
}

impl AppOptions {
    /// Default on-disk locations; bootstrapped sessions only log.
    pub fn new(runtime: Handle) -> Self {
        Self {
            paths: AutomationPaths::default_locations(),
            shell_integration_dir: default_shell_integration_dir(),
            shell: None,
            listener_factory: Arc::new(|id: &str| -> Arc<dyn SessionListener> {
                Arc::new(LoggingListener::new(id))
            }),
            runtime,
        }
    }

    /// Keep config, credentials and integration scripts under `dir`.
    pub fn with_state_dir(mut self, dir: &Path) -> Self {
        self.paths = AutomationPaths::in_dir(dir);
        self.shell_integration_dir = dir.join("shell-integration");
        self
    }
}

pub struct App {
    registry: Arc<PtyRegistry>,
    server: AutomationServer,
}

impl App {
    pub fn new(options: AppOptions) -> Self {
        let registry = Arc::new(PtyRegistry::new().with_provisioner(
            ShellIntegrationProvisioner::new(options.shell_integration_dir),
        ));
        let bootstrap = Arc::new(RegistryBootstrap {
            registry: registry.clone(),
            shell: options.shell,
            listener_factory: options.listener_factory,
        });
        let server = AutomationServer::new(options.paths, bootstrap, options.runtime);
        Self { registry, server }
    }

    /// Start the automation server if its persisted config enables it.
    pub fn start(&self) -> Result<()> {
        self.server
            .start()
            .context("Failed to start automation API")
    }

    pub fn registry(&self) -> &Arc<PtyRegistry> {
        &self.registry
    }

    pub fn server(&self) -> &AutomationServer {
        &self.server
    }

    /// Stop accepting requests, then kill every session.
    pub fn shutdown(&self) {
        self.server.shutdown();
        self.registry.kill_all();
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Spawns a session in the requested directory and types the commands.
struct RegistryBootstrap {
    registry: Arc<PtyRegistry>,
    shell: Option<String>,
    listener_factory: ListenerFactory,
}

#[async_trait]
impl BootstrapHandler for RegistryBootstrap {
    async fn bootstrap(&self, request: BootstrapRequest) -> Result<BootstrapResponse> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let listener = (self.listener_factory)(&session_id);

        self.registry
            .spawn(&session_id, &request.cwd, self.shell.as_deref(), listener)?;

        for command in &request.commands {
            let mut line = command.clone().into_bytes();
            line.push(b'\r');
            if let Err(e) = self.registry.write(&session_id, &line) {
                self.registry.kill(&session_id);
                return Err(e.into());
            }
        }

        Ok(BootstrapResponse { session_id })
    }

    async fn discard(&self, session_id: &str) {
        self.registry.kill(session_id);
    }
}

/// Listener for sessions nobody is attached to.
pub struct LoggingListener {
    id: String,
}

impl LoggingListener {
    pub fn new(id: &str) -> Self {
        Self { id: id.to_string() }
    }
}

impl SessionListener for LoggingListener {
    fn on_data(&self, data: &[u8]) {
        debug!("[cdw:pty] Session {}: {} bytes of output", self.id, data.len());
    }

    fn on_exit(&self, exit_code: Option<u32>) {
        info!("[cdw:pty] Session {} exited (code={:?})", self.id, exit_code);
    }

    fn on_cwd_changed(&self, cwd: &Path) {
        debug!("[cdw:pty] Session {} cwd -> {}", self.id, cwd.display());
    }
}
