//! Spawn command implementation
//!
//! Line-buffered: stdin is forwarded a line at a time, so full-screen
//! programs will not behave. Meant for poking at the registry by hand.

use anyhow::Result;
use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

use cdw::pty::{PtyRegistry, SessionListener, ShellIntegrationProvisioner};

use super::shell_integration_dir;

const SESSION_ID: &str = "cli";

struct StdoutListener {
    exit_tx: mpsc::UnboundedSender<Option<u32>>,
}

impl SessionListener for StdoutListener {
    fn on_data(&self, data: &[u8]) {
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(data);
        let _ = stdout.flush();
    }

    fn on_exit(&self, exit_code: Option<u32>) {
        let _ = self.exit_tx.send(exit_code);
    }

    fn on_cwd_changed(&self, cwd: &Path) {
        tracing::debug!("[cdw:pty] cwd -> {}", cwd.display());
    }
}

/// Run one session attached to this terminal until its shell exits
pub async fn spawn_command(
    state_dir: Option<&Path>,
    cwd: &Path,
    shell: Option<String>,
) -> Result<()> {
    let registry = Arc::new(PtyRegistry::new().with_provisioner(
        ShellIntegrationProvisioner::new(shell_integration_dir(state_dir)),
    ));

    let (exit_tx, mut exit_rx) = mpsc::unbounded_channel();
    let info = registry.spawn(
        SESSION_ID,
        cwd,
        shell.as_deref(),
        Arc::new(StdoutListener { exit_tx }),
    )?;
    eprintln!(
        "Spawned {} (pid {:?}) in {}; Ctrl-D to end input",
        info.shell,
        info.pid,
        info.cwd.display()
    );

    let input_registry = registry.clone();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let mut bytes = line.into_bytes();
            bytes.push(b'\r');
            if let Err(e) = input_registry.write(SESSION_ID, &bytes) {
                eprintln!("{}", e);
                break;
            }
        }
        // EOF on stdin ends the shell the same way
        let _ = input_registry.write(SESSION_ID, &[0x04]);
    });

    let exit_code = exit_rx.recv().await.flatten();
    eprintln!("Session exited (code={:?})", exit_code);
    registry.kill_all();
    Ok(())
}
