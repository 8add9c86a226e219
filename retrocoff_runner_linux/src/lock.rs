// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Cross-invocation lock
//!
//! Every run maps memory at the same fixed addresses, so concurrent runs are
//! serialized through a lock file holding the owner's pid. Waiting is a poll
//! for the owner's exit. A file without a pid belongs to an owner that has
//! not written it yet, unless it is older than [`UNKNOWN_OWNER_GRACE`]. Any
//! I/O failure gives up on the lock and lets the run go ahead unserialized.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

/// Name of the lock file inside the system temp directory
pub const LOCK_FILE_NAME: &str = "retrocoff.lock";

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long a lock file may go without a pid before it counts as abandoned
pub const UNKNOWN_OWNER_GRACE: Duration = Duration::from_secs(2);

/// A held lock. Dropping it deletes the lock file.
#[derive(Debug)]
pub struct InvocationLock {
    path: PathBuf,
}

impl InvocationLock {
    /// Take the lock in the system temp directory, waiting for any other
    /// holder to exit. `None` means locking is disabled for this run.
    pub fn acquire() -> Option<Self> {
        Self::acquire_at(std::env::temp_dir().join(LOCK_FILE_NAME))
    }

    /// Take the lock at `path`.
    pub fn acquire_at(path: PathBuf) -> Option<Self> {
        let own_pid = std::process::id();
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    if write!(file, "{own_pid}").is_err() {
                        let _ = fs::remove_file(&path);
                        return None;
                    }
                    return Some(Self { path });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(_) => return None,
            }

            let owner = match read_owner(&path) {
                Ok(Owner::Pid(owner)) => owner,
                // released between our attempt and the read
                Ok(Owner::Released) => continue,
                Ok(Owner::Unknown) => {
                    if is_abandoned(&path) {
                        let _ = fs::remove_file(&path);
                    } else {
                        thread::sleep(POLL_INTERVAL);
                    }
                    continue;
                }
                Err(_) => return None,
            };
            if owner != own_pid {
                while process_exists(owner) {
                    thread::sleep(POLL_INTERVAL);
                }
            }
            // The owner is gone; a file still naming it is stale.
            if matches!(read_owner(&path), Ok(Owner::Pid(current)) if current == owner) {
                let _ = fs::remove_file(&path);
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InvocationLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// What the lock file says about its holder
#[derive(Debug, PartialEq, Eq)]
enum Owner {
    Released,
    Pid(u32),
    /// The file exists but holds no pid yet
    Unknown,
}

fn read_owner(path: &Path) -> io::Result<Owner> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Owner::Released),
        Err(e) => return Err(e),
    };
    Ok(contents.trim().parse().map_or(Owner::Unknown, Owner::Pid))
}

/// Whether a pid-less lock file was last written longer than the grace
/// period ago
fn is_abandoned(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|metadata| metadata.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .is_some_and(|age| age >= UNKNOWN_OWNER_GRACE)
}

fn process_exists(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: signal 0 only checks for the process; nothing is delivered.
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}
