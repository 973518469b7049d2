//! Shared test utilities for automation API integration tests

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tempfile::TempDir;

use cdw::automation::{
    AutomationApiCredentials, AutomationServer, BOOTSTRAP_PATH, BootstrapHandler,
    BootstrapRequest, BootstrapResponse,
};
use cdw::config::{AutomationApiConfig, AutomationPaths};

/// Records every bootstrap call and hands out sequential session ids
#[derive(Default)]
pub struct FakeBootstrap {
    pub delay: Option<Duration>,
    pub fail_with: Option<String>,
    pub calls: Mutex<Vec<BootstrapRequest>>,
    pub discarded: Mutex<Vec<String>>,
    pub next_id: AtomicUsize,
}

impl FakeBootstrap {
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl BootstrapHandler for FakeBootstrap {
    async fn bootstrap(&self, request: BootstrapRequest) -> anyhow::Result<BootstrapResponse> {
        self.calls.lock().unwrap().push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = &self.fail_with {
            anyhow::bail!("{}", message);
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(BootstrapResponse {
            session_id: format!("session-{}", n),
        })
    }

    async fn discard(&self, session_id: &str) {
        self.discarded.lock().unwrap().push(session_id.to_string());
    }
}

pub fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("Failed to build runtime")
}

/// A listening server over a temp state dir with a `work/proj` tree under
/// the single allowed root `work`.
pub struct TestServer {
    pub state: TempDir,
    pub root: PathBuf,
    pub project: PathBuf,
    pub handler: Arc<FakeBootstrap>,
    pub server: AutomationServer,
    pub runtime: tokio::runtime::Runtime,
}

impl TestServer {
    pub fn start(handler: FakeBootstrap, configure: impl FnOnce(&mut AutomationApiConfig)) -> Self {
        let state = TempDir::new().expect("Failed to create temp dir");
        let root = state.path().join("work");
        let project = root.join("proj");
        std::fs::create_dir_all(&project).expect("Failed to create project dir");

        let mut config = AutomationApiConfig {
            enabled: true,
            allowed_roots: vec![root.clone()],
            ..Default::default()
        };
        configure(&mut config);
        let paths = AutomationPaths::in_dir(state.path());
        config.save(&paths.config_file).expect("Failed to save config");

        let runtime = runtime();
        let handler = Arc::new(handler);
        let server = AutomationServer::new(paths, handler.clone(), runtime.handle().clone());
        server.start().expect("Failed to start server");

        Self {
            state,
            root,
            project,
            handler,
            server,
            runtime,
        }
    }

    pub fn credentials(&self) -> AutomationApiCredentials {
        self.server.credentials().expect("Server is not listening")
    }

    pub fn url(&self) -> String {
        format!("{}{}", self.credentials().base_url(), BOOTSTRAP_PATH)
    }

    pub fn auth(&self) -> String {
        format!("Bearer {}", self.credentials().token)
    }

    /// A request carrying every header the API requires
    pub fn request(&self) -> ureq::Request {
        self.request_with_client("integration-test")
    }

    /// ureq appends rather than replaces `X-` headers, so the client id
    /// has to be chosen up front
    pub fn request_with_client(&self, client: &str) -> ureq::Request {
        ureq::AgentBuilder::new()
            .build()
            .post(&self.url())
            .set("Authorization", &self.auth())
            .set("X-CDW-Client", client)
            .set("Content-Type", "application/json")
    }

    pub fn bootstrap_body(cwd: &Path, commands: &[&str]) -> String {
        serde_json::json!({ "cwd": cwd, "commands": commands }).to_string()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.shutdown();
    }
}

/// Send `body` and return the status and parsed JSON body
pub fn send(request: ureq::Request, body: &str) -> (u16, serde_json::Value) {
    match request.send_string(body) {
        Ok(response) => {
            let status = response.status();
            (status, response.into_json().unwrap_or(serde_json::Value::Null))
        }
        Err(ureq::Error::Status(status, response)) => {
            (status, response.into_json().unwrap_or(serde_json::Value::Null))
        }
        Err(e) => panic!("Request failed: {}", e),
    }
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    condition()
}
