//! Single-run guard and crash cleanup.
//!
//! A scheduler may fire the next cycle while the previous one is still
//! running. [`RunLock`] makes the second invocation back off: the lock file
//! holds the owner's PID, and a file whose PID is no longer alive is
//! reclaimed.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{info, warn};
use sysinfo::{Pid, ProcessesToUpdate, System};

use crate::error::LockError;

/// How long a lock file without a readable PID still counts as held.
const UNREADABLE_GRACE: Duration = Duration::from_secs(30);

/// Held for the lifetime of one cycle; the lock file is removed on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> LockError + '_ {
    move |source| LockError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn process_alive(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]));
    system.process(pid).is_some()
}

fn recently_modified(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map(|modified| match modified.elapsed() {
            Ok(age) => age < UNREADABLE_GRACE,
            // Modified "in the future": clock skew, assume fresh.
            Err(_) => true,
        })
        .unwrap_or(false)
}

enum Holder {
    Live,
    /// Contents of a lock nobody holds any more.
    Stale(String),
    Gone,
}

fn inspect(path: &Path) -> Result<Holder, LockError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Holder::Gone),
        Err(e) => return Err(io_error(path)(e)),
    };

    match content.trim().parse::<u32>() {
        Ok(pid) if pid != std::process::id() && process_alive(pid) => {
            info!("Lock {} held by running process {pid}", path.display());
            Ok(Holder::Live)
        }
        Ok(_) => Ok(Holder::Stale(content)),
        Err(_) if recently_modified(path) => {
            info!("Lock {} has no readable owner yet; treating it as held", path.display());
            Ok(Holder::Live)
        }
        Err(_) => Ok(Holder::Stale(content)),
    }
}

impl RunLock {
    /// Take the lock, or `Ok(None)` when a live process already holds it.
    ///
    /// The lock file is linked into place already holding our PID, so no
    /// other process ever sees it empty.
    pub fn acquire(path: &Path) -> Result<Option<Self>, LockError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(io_error(parent))?;
            }
        }

        let pid = std::process::id();
        let staging = PathBuf::from(format!("{}.{pid}.tmp", path.display()));
        fs::write(&staging, pid.to_string()).map_err(io_error(&staging))?;
        let result = Self::link(&staging, path);
        if let Err(e) = fs::remove_file(&staging) {
            warn!("Could not remove {}: {e}", staging.display());
        }
        result
    }

    fn link(staging: &Path, path: &Path) -> Result<Option<Self>, LockError> {
        // Second attempt only after the previous holder went away.
        for _ in 0..2 {
            match fs::hard_link(staging, path) {
                Ok(()) => {
                    return Ok(Some(Self {
                        path: path.to_path_buf(),
                    }));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => match inspect(path)? {
                    Holder::Live => return Ok(None),
                    Holder::Gone => {}
                    Holder::Stale(content) => {
                        // Someone else may have reclaimed it and linked a fresh
                        // lock in the meantime; only remove what we inspected.
                        if fs::read_to_string(path).ok().as_deref() != Some(content.as_str()) {
                            return Ok(None);
                        }
                        warn!(
                            "Reclaiming stale lock {} (holder {:?} not running)",
                            path.display(),
                            content.trim()
                        );
                        match fs::remove_file(path) {
                            Ok(()) => {}
                            Err(e) if e.kind() == ErrorKind::NotFound => {}
                            Err(e) => return Err(io_error(path)(e)),
                        }
                    }
                },
                Err(e) => return Err(io_error(path)(e)),
            }
        }

        // Another process won the race for the reclaimed file.
        Ok(None)
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to release lock {}: {e}", self.path.display());
        }
    }
}

/// Kill a browser left behind by a run that crashed, as recorded in `pid_file`.
///
/// Only processes whose name looks like Chrome/Chromium are touched, so a
/// recycled PID does not take an unrelated process down. Returns whether a
/// process was killed.
pub fn reap_stray_browser(pid_file: &Path) -> bool {
    let Ok(content) = fs::read_to_string(pid_file) else {
        return false;
    };
    let _ = fs::remove_file(pid_file);
    let Ok(pid) = content.trim().parse::<u32>() else {
        warn!("Ignoring unreadable pid file {}", pid_file.display());
        return false;
    };

    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]));
    let Some(process) = system.process(pid) else {
        return false;
    };

    let name = process.name().to_string_lossy().to_lowercase();
    if !name.contains("chrom") {
        warn!("Pid {pid} from {} is now {name:?}; leaving it alone", pid_file.display());
        return false;
    }

    warn!("Killing stray browser process {pid} left by a previous run");
    process.kill()
}
