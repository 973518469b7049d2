//! Private file I/O: atomic, owner-only writes that never follow symlinks

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;

use super::ConfigError;

/// Write `content` to `path` with atomic write and file locking.
///
/// 1. A target that is a symlink is rejected before anything is written
/// 2. Exclusive lock prevents concurrent writes from two app instances
/// 3. Temp file (mode 0600) + rename keeps readers from seeing partial content
/// 4. Parent directory is created (mode 0700) if needed
pub fn write_private_file(path: &Path, content: &[u8]) -> Result<(), ConfigError> {
    reject_symlink(path)?;

    if let Some(parent) = path.parent() {
        create_private_dir(parent)?;
    }

    let lock_path = sibling(path, "lock");
    reject_symlink(&lock_path)?;
    let lock_file = private_options()
        .open(&lock_path)
        .map_err(|e| ConfigError::io(&lock_path, e))?;
    lock_file
        .lock_exclusive()
        .map_err(|e| ConfigError::io(&lock_path, e))?;

    write_atomic(path, content)
    // Lock is released when lock_file is dropped
}

/// Temp file (mode 0600) + fsync + rename, without taking the lock file.
///
/// The parent directory must already exist.
pub(crate) fn write_atomic(path: &Path, content: &[u8]) -> Result<(), ConfigError> {
    reject_symlink(path)?;

    let temp_path = sibling(path, "tmp");
    reject_symlink(&temp_path)?;
    let mut temp_file = private_options()
        .open(&temp_path)
        .map_err(|e| ConfigError::io(&temp_path, e))?;
    set_owner_only(&temp_path, 0o600)?;

    temp_file
        .write_all(content)
        .and_then(|_| temp_file.sync_all())
        .map_err(|e| ConfigError::io(&temp_path, e))?;

    // Re-check: the target may have been swapped for a symlink meanwhile
    reject_symlink(path)?;
    std::fs::rename(&temp_path, path).map_err(|e| ConfigError::io(path, e))
}

/// Remove a file written by [`write_private_file`], ignoring a missing file.
pub fn remove_if_exists(path: &Path) -> Result<(), ConfigError> {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(ConfigError::io(path, e)),
    }
    let _ = std::fs::remove_file(sibling(path, "lock"));
    Ok(())
}

/// Create `dir` (and parents) and restrict it to the owner.
///
/// An existing `dir` that is a symlink is rejected.
pub(crate) fn create_private_dir(dir: &Path) -> Result<(), ConfigError> {
    reject_symlink(dir)?;
    if !dir.exists() {
        std::fs::create_dir_all(dir).map_err(|e| ConfigError::io(dir, e))?;
    }
    set_owner_only(dir, 0o700)
}

pub(crate) fn reject_symlink(path: &Path) -> Result<(), ConfigError> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => {
            Err(ConfigError::Symlink(path.to_path_buf()))
        }
        _ => Ok(()),
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

fn private_options() -> OpenOptions {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options
}

#[cfg(unix)]
fn set_owner_only(path: &Path, mode: u32) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(|e| ConfigError::io(path, e))
}

#[cfg(not(unix))]
fn set_owner_only(_path: &Path, _mode: u32) -> Result<(), ConfigError> {
    Ok(())
}
