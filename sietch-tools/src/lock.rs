//! Single-writer vault lock.
//!
//! Uses a non-blocking fcntl write lock (F_SETLK) on a dedicated lock
//! file, retried until a timeout. Readers do not take the lock; they
//! only ever observe published (post-rename) state.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use sietch_api_types::{Error, Result};

/// Guard for the exclusive writer lock; released on drop.
pub struct VaultLock {
    _file: File,
    path: PathBuf,
}

impl VaultLock {
    /// Acquire the exclusive writer lock, waiting up to `timeout`.
    pub fn acquire<P: AsRef<Path>>(path: P, timeout: Duration) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .mode(0o600)
            .open(path)
            .map_err(|err| Error::io(path, err))?;

        let start = Instant::now();
        loop {
            match Self::try_lock(&file) {
                Ok(()) => {
                    return Ok(Self {
                        _file: file,
                        path: path.to_owned(),
                    })
                }
                Err(nix::errno::Errno::EACCES) | Err(nix::errno::Errno::EAGAIN) => {
                    if start.elapsed() >= timeout {
                        return Err(Error::io(
                            path,
                            std::io::Error::new(
                                std::io::ErrorKind::WouldBlock,
                                "vault is locked by another process",
                            ),
                        ));
                    }
                    std::thread::sleep(Duration::from_millis(100));
                }
                Err(err) => {
                    return Err(Error::io(
                        path,
                        std::io::Error::from_raw_os_error(err as i32),
                    ))
                }
            }
        }
    }

    fn try_lock(file: &File) -> std::result::Result<(), nix::errno::Errno> {
        let op = libc::flock {
            l_type: libc::F_WRLCK as i16,
            l_whence: libc::SEEK_SET as i16,
            l_start: 0,
            l_len: 0,
            l_pid: 0,
        };

        nix::fcntl::fcntl(file.as_raw_fd(), nix::fcntl::FcntlArg::F_SETLK(&op))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// The fcntl lock is released when the file descriptor closes on drop.
