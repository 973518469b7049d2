//! Composition root tests: automation API through to a real shell session

#![cfg(unix)]

mod common;

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cdw::app::{App, AppOptions};
use cdw::config::AutomationApiConfig;
use cdw::pty::SessionListener;
use common::{runtime, wait_until};

#[derive(Default)]
struct Captured {
    output: Mutex<Vec<u8>>,
    exits: Mutex<Vec<Option<u32>>>,
}

struct CapturingListener(Arc<Captured>);

impl SessionListener for CapturingListener {
    fn on_data(&self, data: &[u8]) {
        self.0.output.lock().unwrap().extend_from_slice(data);
    }

    fn on_exit(&self, exit_code: Option<u32>) {
        self.0.exits.lock().unwrap().push(exit_code);
    }
}

fn app(state: &Path, captured: Arc<Captured>, rt: &tokio::runtime::Runtime) -> App {
    let mut options = AppOptions::new(rt.handle().clone()).with_state_dir(state);
    options.shell = Some("/bin/sh".to_string());
    options.listener_factory = Arc::new(move |_id: &str| -> Arc<dyn SessionListener> {
        Arc::new(CapturingListener(captured.clone()))
    });
    App::new(options)
}

#[test]
fn test_bootstrap_runs_commands_in_new_session() {
    let state = tempfile::tempdir().unwrap();
    let work = state.path().join("work");
    std::fs::create_dir_all(&work).unwrap();
    AutomationApiConfig {
        enabled: true,
        allowed_roots: vec![work.clone()],
        ..Default::default()
    }
    .save(&state.path().join("automation-api.json"))
    .unwrap();

    let rt = runtime();
    let captured = Arc::new(Captured::default());
    let app = app(state.path(), captured.clone(), &rt);
    app.start().unwrap();

    let creds = app.server().credentials().expect("server should be listening");
    let body = serde_json::json!({
        "cwd": work,
        "commands": ["echo cdw-$((6*7))", "pwd"],
    });
    let response = ureq::post(&format!("{}/v1/terminal/bootstrap", creds.base_url()))
        .set("Authorization", &format!("Bearer {}", creds.token))
        .set("X-CDW-Client", "app-test")
        .send_json(body)
        .expect("bootstrap request failed");
    assert_eq!(response.status(), 201);
    let json: serde_json::Value = response.into_json().unwrap();
    let session_id = json["sessionId"].as_str().unwrap().to_string();

    assert!(app.registry().contains(&session_id));
    let canonical_work = std::fs::canonicalize(&work).unwrap();
    assert!(wait_until(Duration::from_secs(10), || {
        let output = String::from_utf8_lossy(&captured.output.lock().unwrap()).to_string();
        output.contains("cdw-42") && output.contains(&*canonical_work.to_string_lossy())
    }));

    app.shutdown();
    assert!(app.registry().is_empty());
    assert!(!state.path().join("automation-api-credentials.json").exists());
    assert!(wait_until(Duration::from_secs(5), || {
        captured.exits.lock().unwrap().as_slice() == [None]
    }));
}

#[test]
fn test_start_with_disabled_config_does_not_listen() {
    let state = tempfile::tempdir().unwrap();
    let rt = runtime();
    let app = app(state.path(), Arc::new(Captured::default()), &rt);

    app.start().unwrap();
    assert!(app.server().credentials().is_none());
    assert!(app.registry().is_empty());
}
