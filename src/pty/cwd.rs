//! Working-directory discovery for PTY sessions
//!
//! Two signals, most precise first:
//! 1. **OSC 7 reports** from the shell integration hooks, scanned out of
//!    the process output as it streams by ([`OscCwdScanner`]).
//! 2. **Platform lookup** by process id ([`CwdResolver`]): the `/proc`
//!    link on Linux, an `lsof` query on macOS, nothing on Windows.
//!
//! Resolved values are cached for [`CWD_CACHE_TTL`] so that polling callers
//! do not issue a new external query on every tick.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::debug;

/// How long a resolved working directory is served from cache.
pub const CWD_CACHE_TTL: Duration = Duration::from_millis(1500);

/// Upper bound for the external `lsof` query.
pub const LSOF_TIMEOUT: Duration = Duration::from_millis(1000);

const OSC7_PREFIX: &[u8] = b"\x1b]7;";

/// Longest unterminated OSC 7 tail carried over to the next chunk.
const MAX_PENDING_OSC: usize = 4096;

/// Platform strategy for looking up a process's current directory.
#[async_trait]
pub trait CwdResolver: Send + Sync {
    async fn resolve(&self, pid: u32) -> Option<PathBuf>;
}

/// Pick the resolver for the platform we are running on.
pub fn platform_resolver() -> Arc<dyn CwdResolver> {
    if cfg!(target_os = "linux") {
        Arc::new(ProcfsResolver::new())
    } else if cfg!(target_os = "macos") {
        Arc::new(LsofResolver::new(LSOF_TIMEOUT))
    } else {
        Arc::new(NoopResolver)
    }
}

/// Linux: read the kernel-exposed `/proc/<pid>/cwd` link.
///
/// The read is synchronous; it is a single fast kernel call.
#[derive(Debug, Clone)]
pub struct ProcfsResolver {
    root: PathBuf,
}

impl ProcfsResolver {
    pub fn new() -> Self {
        Self::with_root("/proc")
    }

    /// Use an alternative procfs mount point.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for ProcfsResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CwdResolver for ProcfsResolver {
    async fn resolve(&self, pid: u32) -> Option<PathBuf> {
        std::fs::read_link(self.root.join(pid.to_string()).join("cwd")).ok()
    }
}

/// macOS: ask `lsof` for the process's `cwd` file descriptor.
#[derive(Debug, Clone)]
pub struct LsofResolver {
    timeout: Duration,
}

impl LsofResolver {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CwdResolver for LsofResolver {
    async fn resolve(&self, pid: u32) -> Option<PathBuf> {
        let query = tokio::process::Command::new("lsof")
            .args(["-a", "-p", &pid.to_string(), "-d", "cwd", "-Fn"])
            .stdin(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(self.timeout, query).await {
            Ok(Ok(output)) if output.status.success() => {
                parse_lsof_output(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(Ok(_)) => None,
            Ok(Err(e)) => {
                debug!("[cdw:pty] lsof failed for pid {}: {}", pid, e);
                None
            }
            Err(_) => {
                debug!("[cdw:pty] lsof timed out for pid {}", pid);
                None
            }
        }
    }
}

/// Windows (and anything else): no reliable lookup exists.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopResolver;

#[async_trait]
impl CwdResolver for NoopResolver {
    async fn resolve(&self, _pid: u32) -> Option<PathBuf> {
        None
    }
}

/// `lsof -Fn` prints one field per line; the path is the `n`-prefixed one.
fn parse_lsof_output(output: &str) -> Option<PathBuf> {
    output
        .lines()
        .find_map(|line| line.strip_prefix('n'))
        .filter(|path| path.starts_with('/'))
        .map(PathBuf::from)
}

/// A working directory and when it was captured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedCwd {
    pub cwd: PathBuf,
    pub captured_at: Instant,
}

impl CachedCwd {
    pub fn new(cwd: PathBuf) -> Self {
        Self {
            cwd,
            captured_at: Instant::now(),
        }
    }

    pub fn is_fresh(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.captured_at) < ttl
    }
}

/// Incremental scanner for `ESC ] 7 ; file://host/path (BEL | ESC \)`.
///
/// Output arrives in arbitrary chunks, so a report cut in half by a read
/// boundary is carried over and completed by the next chunk.
#[derive(Debug, Default)]
pub struct OscCwdScanner {
    pending: Vec<u8>,
}

impl OscCwdScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one output chunk; returns the last complete report in it, if any.
    pub fn feed(&mut self, chunk: &[u8]) -> Option<PathBuf> {
        let mut data = std::mem::take(&mut self.pending);
        data.extend_from_slice(chunk);

        let mut last = None;
        let mut i = 0;
        while i < data.len() {
            if data[i] != 0x1b {
                i += 1;
                continue;
            }

            let rest = &data[i..];
            if !rest.starts_with(OSC7_PREFIX) {
                if OSC7_PREFIX.starts_with(rest) {
                    // Chunk ends in the middle of the introducer
                    self.keep_tail(rest);
                    break;
                }
                i += 1;
                continue;
            }

            let body_start = i + OSC7_PREFIX.len();
            match find_terminator(&data[body_start..]) {
                Some((len, terminator_len)) => {
                    if let Some(path) = parse_file_uri(&data[body_start..body_start + len]) {
                        last = Some(path);
                    }
                    i = body_start + len + terminator_len;
                }
                None => {
                    self.keep_tail(rest);
                    break;
                }
            }
        }

        last
    }

    fn keep_tail(&mut self, tail: &[u8]) {
        // An unterminated report this long is garbage, not a split sequence
        if tail.len() <= MAX_PENDING_OSC {
            self.pending = tail.to_vec();
        }
    }
}

/// Locate BEL or ST; returns (content length, terminator length).
fn find_terminator(body: &[u8]) -> Option<(usize, usize)> {
    body.iter().enumerate().find_map(|(j, &b)| match b {
        0x07 => Some((j, 1)),
        0x1b if body.get(j + 1) == Some(&b'\\') => Some((j, 2)),
        _ => None,
    })
}

/// Extract the percent-decoded absolute path from `file://host/path`.
fn parse_file_uri(uri: &[u8]) -> Option<PathBuf> {
    let rest = uri.strip_prefix(b"file://")?;
    let path_start = rest.iter().position(|&b| b == b'/')?;
    let decoded = urlencoding::decode_binary(&rest[path_start..]);
    let path = bytes_to_path(&decoded);
    path.is_absolute().then_some(path)
}

#[cfg(unix)]
fn bytes_to_path(bytes: &[u8]) -> PathBuf {
    use std::os::unix::ffi::OsStrExt;
    PathBuf::from(std::ffi::OsStr::from_bytes(bytes))
}

#[cfg(not(unix))]
fn bytes_to_path(bytes: &[u8]) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    /// Percent-encode an absolute path for an OSC 7 report.
    fn encode_osc7(host: &str, path: &Path) -> String {
        let path = path.to_string_lossy();
        let encoded: Vec<String> = path
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        format!("\x1b]7;file://{}{}\x07", host, encoded.join("/"))
    }

    #[test]
    fn test_scan_bel_terminated_report() {
        let mut scanner = OscCwdScanner::new();
        let cwd = scanner.feed(b"prompt$ \x1b]7;file://myhost/home/user/projects\x07");
        assert_eq!(cwd, Some(PathBuf::from("/home/user/projects")));
    }

    #[test]
    fn test_scan_st_terminated_report() {
        let mut scanner = OscCwdScanner::new();
        let cwd = scanner.feed(b"\x1b]7;file:///var/www\x1b\\more output");
        assert_eq!(cwd, Some(PathBuf::from("/var/www")));
    }

    #[test]
    fn test_scan_returns_last_report_in_chunk() {
        let mut scanner = OscCwdScanner::new();
        let cwd = scanner.feed(b"\x1b]7;file://h/a\x07text\x1b]7;file://h/b\x07");
        assert_eq!(cwd, Some(PathBuf::from("/b")));
    }

    #[test]
    fn test_scan_decodes_percent_encoding() {
        let mut scanner = OscCwdScanner::new();
        let cwd = scanner.feed(b"\x1b]7;file://h/home/u/My%20Projects/caf%C3%A9\x07");
        assert_eq!(cwd, Some(PathBuf::from("/home/u/My Projects/café")));
    }

    #[test]
    fn test_scan_report_split_across_chunks() {
        let mut scanner = OscCwdScanner::new();
        assert_eq!(scanner.feed(b"output\x1b]7;file://h/home/"), None);
        assert_eq!(
            scanner.feed(b"user\x07$ "),
            Some(PathBuf::from("/home/user"))
        );

        // Split inside the introducer itself
        assert_eq!(scanner.feed(b"ls\r\n\x1b]"), None);
        assert_eq!(scanner.feed(b"7;file://h/tmp\x07"), Some(PathBuf::from("/tmp")));

        // Split between ESC and backslash of the string terminator
        assert_eq!(scanner.feed(b"\x1b]7;file://h/srv\x1b"), None);
        assert_eq!(scanner.feed(b"\\"), Some(PathBuf::from("/srv")));
    }

    #[test]
    fn test_scan_ignores_other_sequences() {
        let mut scanner = OscCwdScanner::new();
        assert_eq!(scanner.feed(b"\x1b[1;32mgreen\x1b[0m \x1b]0;title\x07"), None);
        assert_eq!(scanner.feed(b"\x1b]7;http://h/not-a-file\x07"), None);
        assert_eq!(scanner.feed(b"\x1b]7;file://hostonly\x07"), None);
    }

    #[test]
    fn test_scan_drops_oversized_unterminated_report() {
        let mut scanner = OscCwdScanner::new();
        let mut chunk = b"\x1b]7;file://h/".to_vec();
        chunk.extend(std::iter::repeat_n(b'a', MAX_PENDING_OSC * 2));
        assert_eq!(scanner.feed(&chunk), None);
        assert!(scanner.pending.is_empty());

        assert_eq!(scanner.feed(b"\x1b]7;file://h/ok\x07"), Some(PathBuf::from("/ok")));
    }

    #[test]
    fn test_encode_osc7_roundtrips_through_scanner() {
        let path = Path::new("/home/u/with space/100%");
        let encoded = encode_osc7("host", path);
        assert!(encoded.contains("with%20space"));

        let mut scanner = OscCwdScanner::new();
        assert_eq!(scanner.feed(encoded.as_bytes()), Some(path.to_path_buf()));
    }

    #[test]
    fn test_parse_lsof_output() {
        let output = "p4242\nfcwd\nn/Users/u/proj\n";
        assert_eq!(parse_lsof_output(output), Some(PathBuf::from("/Users/u/proj")));
        assert_eq!(parse_lsof_output("p4242\n"), None);
    }

    #[test]
    fn test_cached_cwd_freshness() {
        let entry = CachedCwd::new(PathBuf::from("/tmp"));
        let now = entry.captured_at;
        assert!(entry.is_fresh(now, CWD_CACHE_TTL));
        assert!(entry.is_fresh(now + Duration::from_millis(1499), CWD_CACHE_TTL));
        assert!(!entry.is_fresh(now + CWD_CACHE_TTL, CWD_CACHE_TTL));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_procfs_resolver_reads_own_cwd() {
        let resolver = ProcfsResolver::new();
        let cwd = resolver.resolve(std::process::id()).await;
        assert_eq!(cwd, std::env::current_dir().ok());
    }

    #[tokio::test]
    async fn test_procfs_resolver_missing_pid() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = ProcfsResolver::with_root(dir.path());
        assert_eq!(resolver.resolve(1).await, None);
    }

    #[tokio::test]
    async fn test_noop_resolver() {
        assert_eq!(NoopResolver.resolve(1).await, None);
    }
}
