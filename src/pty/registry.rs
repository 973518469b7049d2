//! Session registry: spawn, write, resize, kill
//!
//! Each session owns a PTY master, a writer, and a killer handle for its
//! shell. Two background threads per session do the blocking work: one
//! reads output (and scans it for OSC 7 reports), one waits for the child
//! and reports its exit.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use portable_pty::{Child, ChildKiller, CommandBuilder, MasterPty, PtySize, native_pty_system};
use tracing::{debug, info};

use super::cwd::{CWD_CACHE_TTL, CachedCwd, CwdResolver, OscCwdScanner, platform_resolver};
use super::shell::{ShellIntegrationProvisioner, resolve_shell};
use super::{DEFAULT_COLS, DEFAULT_ROWS, PtyError, SessionListener};
use crate::config::default_shell_integration_dir;

const READ_BUFFER_BYTES: usize = 8192;

/// How long an exited session waits for trailing output before `on_exit`
const READER_DRAIN_TIMEOUT: Duration = Duration::from_millis(200);

/// What [`PtyRegistry::spawn`] started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: String,
    pub pid: Option<u32>,
    pub shell: String,
    pub cwd: PathBuf,
}

struct Session {
    /// Distinguishes a re-spawned session from the one it replaced
    generation: u64,
    pid: Option<u32>,
    start_cwd: PathBuf,
    cwd_cache: Option<CachedCwd>,
    master: Box<dyn MasterPty + Send>,
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    killer: Box<dyn ChildKiller + Send + Sync>,
}

#[derive(Default)]
struct Shared {
    sessions: Mutex<HashMap<String, Session>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store a new cwd for the given session generation.
    ///
    /// Returns true when the value differs from the previously known one.
    fn store_cwd(&self, id: &str, generation: u64, cwd: &Path) -> bool {
        let mut sessions = self.lock();
        let Some(session) = sessions.get_mut(id).filter(|s| s.generation == generation) else {
            return false;
        };
        let previous = session
            .cwd_cache
            .as_ref()
            .map(|c| c.cwd.as_path())
            .unwrap_or(session.start_cwd.as_path());
        let changed = previous != cwd;
        session.cwd_cache = Some(CachedCwd::new(cwd.to_path_buf()));
        changed
    }

    /// Register a session, terminating whatever held the id before.
    fn insert(&self, id: &str, session: Session) {
        let displaced = self.lock().insert(id.to_string(), session);
        if let Some(old) = displaced {
            debug!("[cdw:pty] Replacing session {} (generation {})", id, old.generation);
            terminate(old);
        }
    }

    fn remove_generation(&self, id: &str, generation: u64) -> Option<Session> {
        let mut sessions = self.lock();
        if sessions.get(id).is_some_and(|s| s.generation == generation) {
            sessions.remove(id)
        } else {
            None
        }
    }
}

/// Owns every live PTY session, keyed by caller-supplied id.
pub struct PtyRegistry {
    shared: Arc<Shared>,
    next_generation: AtomicU64,
    resolver: Arc<dyn CwdResolver>,
    provisioner: Arc<ShellIntegrationProvisioner>,
    cwd_ttl: Duration,
}

impl PtyRegistry {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            next_generation: AtomicU64::new(1),
            resolver: platform_resolver(),
            provisioner: Arc::new(ShellIntegrationProvisioner::new(
                default_shell_integration_dir(),
            )),
            cwd_ttl: CWD_CACHE_TTL,
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn CwdResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_provisioner(mut self, provisioner: ShellIntegrationProvisioner) -> Self {
        self.provisioner = Arc::new(provisioner);
        self
    }

    pub fn with_cwd_ttl(mut self, ttl: Duration) -> Self {
        self.cwd_ttl = ttl;
        self
    }

    /// Start a shell for `id` in `cwd`, replacing any session with that id.
    pub fn spawn(
        &self,
        id: &str,
        cwd: &Path,
        shell_override: Option<&str>,
        listener: Arc<dyn SessionListener>,
    ) -> Result<SessionInfo, PtyError> {
        if !cwd.is_dir() {
            return Err(PtyError::DirectoryNotFound(cwd.to_path_buf()));
        }

        self.kill(id);

        let shell = resolve_shell(shell_override);
        let integration = self.provisioner.launch_params(&shell);
        let spawn_err = |source: anyhow::Error| PtyError::Spawn {
            shell: shell.clone(),
            source: source.into(),
        };

        let pair = native_pty_system()
            .openpty(PtySize {
                rows: DEFAULT_ROWS,
                cols: DEFAULT_COLS,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(spawn_err)?;

        let mut cmd = CommandBuilder::new(&shell);
        cmd.args(&integration.args);
        cmd.cwd(cwd);
        cmd.env("TERM", "xterm-256color");
        cmd.env("COLORTERM", "truecolor");
        for (key, value) in &integration.env {
            cmd.env(key, value);
        }

        let child = pair.slave.spawn_command(cmd).map_err(spawn_err)?;
        // Our copy of the slave must go, or the reader never sees EOF
        drop(pair.slave);

        let reader = pair.master.try_clone_reader().map_err(spawn_err)?;
        let writer = pair.master.take_writer().map_err(spawn_err)?;
        let pid = child.process_id();
        let killer = child.clone_killer();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        // A concurrent spawn under the same id may have got in since kill()
        self.shared.insert(
            id,
            Session {
                generation,
                pid,
                start_cwd: cwd.to_path_buf(),
                cwd_cache: None,
                master: pair.master,
                writer: Arc::new(Mutex::new(writer)),
                killer,
            },
        );

        let exited = Arc::new(AtomicBool::new(false));
        let (reader_done_tx, reader_done_rx) = mpsc::channel();
        spawn_reader(
            self.shared.clone(),
            id.to_string(),
            generation,
            reader,
            exited.clone(),
            reader_done_tx,
            listener.clone(),
        );
        spawn_waiter(
            self.shared.clone(),
            id.to_string(),
            generation,
            child,
            exited,
            reader_done_rx,
            listener,
        );

        info!(
            "[cdw:pty] Spawned session {} ({} pid={:?}) in {}",
            id,
            shell,
            pid,
            cwd.display()
        );

        Ok(SessionInfo {
            id: id.to_string(),
            pid,
            shell,
            cwd: cwd.to_path_buf(),
        })
    }

    /// Send raw bytes to the session's input. Unknown ids are ignored.
    pub fn write(&self, id: &str, data: &[u8]) -> Result<(), PtyError> {
        let Some(writer) = self.shared.lock().get(id).map(|s| s.writer.clone()) else {
            return Ok(());
        };

        let mut writer = writer.lock().unwrap_or_else(|e| e.into_inner());
        writer
            .write_all(data)
            .and_then(|_| writer.flush())
            .map_err(|source| PtyError::Write {
                id: id.to_string(),
                source,
            })
    }

    /// Change the terminal geometry. Unknown ids are ignored.
    pub fn resize(&self, id: &str, cols: u16, rows: u16) -> Result<(), PtyError> {
        let sessions = self.shared.lock();
        let Some(session) = sessions.get(id) else {
            return Ok(());
        };

        session
            .master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|source| PtyError::Resize {
                id: id.to_string(),
                source: source.into(),
            })
    }

    /// Terminate the session's process and forget it. Unknown ids are ignored.
    pub fn kill(&self, id: &str) {
        let Some(session) = self.shared.lock().remove(id) else {
            return;
        };
        debug!("[cdw:pty] Killing session {}", id);
        terminate(session);
    }

    /// Kill every live session. Used at application shutdown.
    pub fn kill_all(&self) {
        let sessions: Vec<(String, Session)> = self.shared.lock().drain().collect();
        if !sessions.is_empty() {
            info!("[cdw:pty] Killing {} session(s)", sessions.len());
        }
        for (_, session) in sessions {
            terminate(session);
        }
    }

    /// Best-known working directory of the session.
    ///
    /// A fresh cached value (OSC 7 report or recent lookup) is returned as
    /// is. Otherwise the platform resolver is asked; when it has nothing,
    /// the last known value or the start directory is returned.
    pub async fn get_cwd(&self, id: &str) -> Option<PathBuf> {
        let (pid, generation, fallback) = {
            let sessions = self.shared.lock();
            let session = sessions.get(id)?;
            if let Some(cached) = &session.cwd_cache {
                if cached.is_fresh(Instant::now(), self.cwd_ttl) {
                    return Some(cached.cwd.clone());
                }
            }
            let fallback = session
                .cwd_cache
                .as_ref()
                .map(|c| c.cwd.clone())
                .unwrap_or_else(|| session.start_cwd.clone());
            (session.pid, session.generation, fallback)
        };

        if let Some(pid) = pid {
            if let Some(cwd) = self.resolver.resolve(pid).await {
                self.shared.store_cwd(id, generation, &cwd);
                return Some(cwd);
            }
        }
        Some(fallback)
    }

    /// Record a working-directory report for a live session.
    ///
    /// Returns true when the session exists and the directory changed.
    pub fn report_cwd(&self, id: &str, cwd: &Path) -> bool {
        let generation = match self.shared.lock().get(id) {
            Some(session) => session.generation,
            None => return false,
        };
        self.shared.store_cwd(id, generation, cwd)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.shared.lock().contains_key(id)
    }

    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.shared.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.shared.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PtyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PtyRegistry {
    fn drop(&mut self) {
        self.kill_all();
    }
}

/// Signal the process (group) and drop the PTY handles.
///
/// Does not wait: the session's waiter thread reaps the child.
fn terminate(mut session: Session) {
    #[cfg(unix)]
    if let Some(pid) = session.pid {
        // The shell leads its own session; take its jobs down with it
        unsafe {
            libc::kill(-(pid as i32), libc::SIGHUP);
        }
    }

    if let Err(e) = session.killer.kill() {
        debug!("[cdw:pty] kill failed (pid={:?}): {}", session.pid, e);
    }
}

/// Forward output and OSC 7 reports until EOF or until the shell exited.
fn spawn_reader(
    shared: Arc<Shared>,
    id: String,
    generation: u64,
    mut reader: Box<dyn Read + Send>,
    exited: Arc<AtomicBool>,
    done: mpsc::Sender<()>,
    listener: Arc<dyn SessionListener>,
) {
    thread::spawn(move || {
        let mut scanner = OscCwdScanner::new();
        let mut buf = [0u8; READ_BUFFER_BYTES];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    // Background jobs can keep the PTY open past the shell
                    if exited.load(Ordering::Acquire) {
                        break;
                    }
                    let chunk = &buf[..n];
                    listener.on_data(chunk);
                    if let Some(cwd) = scanner.feed(chunk) {
                        if shared.store_cwd(&id, generation, &cwd) {
                            listener.on_cwd_changed(&cwd);
                        }
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                // EIO is how Linux reports a hung-up PTY
                Err(_) => break,
            }
        }
        let _ = done.send(());
    });
}

/// Wait for the shell, drop its session, and fire `on_exit` exactly once.
///
/// `on_exit` follows the process, not the PTY: it fires even while
/// background jobs still hold the terminal open.
fn spawn_waiter(
    shared: Arc<Shared>,
    id: String,
    generation: u64,
    mut child: Box<dyn Child + Send + Sync>,
    exited: Arc<AtomicBool>,
    reader_done: mpsc::Receiver<()>,
    listener: Arc<dyn SessionListener>,
) {
    thread::spawn(move || {
        let status = match child.wait() {
            Ok(status) => Some(status.exit_code()),
            Err(e) => {
                debug!("[cdw:pty] wait failed for session {}: {}", id, e);
                None
            }
        };

        // None: killed (or replaced) by the registry
        let removed = shared.remove_generation(&id, generation);
        let exit_code = removed.as_ref().and(status);

        // Let the reader deliver the shell's final output first
        let _ = reader_done.recv_timeout(READER_DRAIN_TIMEOUT);
        exited.store(true, Ordering::Release);
        drop(removed);

        debug!("[cdw:pty] Session {} exited (code={:?})", id, exit_code);
        listener.on_exit(exit_code);
    });
}
