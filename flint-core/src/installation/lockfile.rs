// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::{
    fmt,
    io::{self},
    os::fd::AsRawFd,
    path::PathBuf,
    sync::Arc,
};

use fs_err::{self as fs, File};
use log::warn;
use nix::fcntl::{flock, FlockArg};
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::alarm;
use thiserror::Error;

/// An acquired file lock guaranteeing exclusive access
/// to the underlying directory.
///
/// The lock is automatically released once all instances
/// of this ref counted lock are dropped.
#[derive(Debug, Clone)]
#[allow(unused)]
pub struct Lock(Arc<File>);

/// Acquires a file lock at the provided path, blocking indefinitely if
/// contended. If the file is currently locked, `block_msg` is displayed
/// before blocking.
///
/// Returns the acquired [`Lock`] that will be held until dropped.
pub fn acquire(path: impl Into<PathBuf>, block_msg: impl fmt::Display) -> Result<Lock, Error> {
    acquire_inner(path, block_msg, None)
}

/// Acquires a file lock at the provided path, as [`acquire`], but bounds the
/// wait to `lock_wait` seconds via `SIGALRM` (§4.12, §9) rather than blocking
/// forever. `lock_wait == 0` behaves like [`acquire`].
pub fn acquire_with_timeout(
    path: impl Into<PathBuf>,
    block_msg: impl fmt::Display,
    lock_wait: u32,
) -> Result<Lock, Error> {
    acquire_inner(path, block_msg, Some(lock_wait).filter(|secs| *secs > 0))
}

fn acquire_inner(path: impl Into<PathBuf>, block_msg: impl fmt::Display, lock_wait: Option<u32>) -> Result<Lock, Error> {
    let path = path.into();

    let file = fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)?;

    match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
        Ok(_) => {}
        Err(nix::errno::Errno::EWOULDBLOCK) => {
            warn!("{block_msg}");

            match lock_wait {
                None => flock(file.as_raw_fd(), FlockArg::LockExclusive)?,
                Some(secs) => {
                    // SA_RESETHAND: a second contended lock attempt re-arms
                    // rather than reusing a handler that already fired once.
                    let action = SigAction::new(SigHandler::Handler(handle_alarm), SaFlags::SA_RESETHAND, SigSet::empty());
                    let previous = unsafe { sigaction(Signal::SIGALRM, &action)? };
                    alarm::set(secs);

                    let result = flock(file.as_raw_fd(), FlockArg::LockExclusive);

                    alarm::cancel();
                    unsafe {
                        let _ = sigaction(Signal::SIGALRM, &previous);
                    }

                    match result {
                        Ok(_) => {}
                        Err(nix::errno::Errno::EINTR) => return Err(Error::Timeout),
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }
        Err(e) => Err(e)?,
    }

    Ok(Lock(Arc::new(file)))
}

extern "C" fn handle_alarm(_: i32) {}

#[derive(Debug, Error)]
pub enum Error {
    #[error("io")]
    Io(#[from] io::Error),
    #[error("obtaining exclusive file lock")]
    Flock(#[from] nix::Error),
    #[error("timed out waiting for exclusive file lock")]
    Timeout,
}
