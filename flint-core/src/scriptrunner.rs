// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Script runner (§4.10): executes one lifecycle or trigger script chrooted
//! into the installation root.
//!
//! This is deliberately a plain `fork`/`chroot`/`execve`, not
//! `crates::container`'s full namespace sandbox (mount/pid/ipc/uts
//! isolation, `pivot_root`, networking setup) — that builder exists to
//! isolate untrusted *build* recipes, a materially heavier guarantee than a
//! trusted package's own postinstall script needs here.

use std::ffi::{CString, NulError};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use log::{debug, warn};
use nix::sys::stat::{umask, Mode};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{chdir, chroot, execve, fork, ForkResult};
use thiserror::Error;
use tempfile::NamedTempFile;

use crate::flags::InstallFlags;
use crate::package::ScriptKind;

/// The sanitized `PATH` a chrooted script runs with unless `PRESERVE_ENV` is set.
const DEFAULT_PATH: &str = "PATH=/usr/sbin:/usr/bin:/sbin:/bin";

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("script path/argument contains a NUL byte: {0}")]
    Nul(#[from] NulError),
    #[error("fork failed: {0}")]
    Fork(nix::Error),
    #[error("waitpid failed: {0}")]
    Wait(nix::Error),
}

/// Outcome of running a script to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Exited zero.
    Success,
    /// Exited non-zero; installation continues with a warning (spec.md §4.10,
    /// "a failing postinstall never aborts the transaction").
    Failed(i32),
    /// Killed by a signal.
    Signaled(i32),
}

/// Run `blob` as `kind` for `pkg_name`, chrooted into `root` unless
/// `NO_CHROOT` is set. Writes the script to a private temp file first since
/// `execve` needs a path, not a byte blob.
pub fn run_script(root: &Path, pkg_name: &str, kind: ScriptKind, blob: &[u8], args: &[String], flags: InstallFlags) -> Result<Outcome, Error> {
    let tmp = write_executable(root, blob)?;
    let result = run_executable(root, tmp.path(), args, flags);
    debug!("ran {kind:?} script for {pkg_name}: {result:?}");
    result
}

/// Write `blob` to a private executable temp file under `root`'s staging
/// area so it's reachable both before and after `chroot`.
fn write_executable(root: &Path, blob: &[u8]) -> Result<NamedTempFile, Error> {
    use std::io::Write;

    let staging = root.join("lib/apk/tmp");
    fs_err::create_dir_all(&staging)?;

    let mut tmp = tempfile::Builder::new().prefix(".flint-script-").tempfile_in(&staging)?;
    tmp.write_all(blob)?;
    tmp.flush()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = tmp.as_file().metadata()?.permissions();
        perms.set_mode(0o755);
        tmp.as_file().set_permissions(perms)?;
    }

    Ok(tmp)
}

/// Fork, optionally chroot into `root`, execve `script_path` with `args`, and
/// wait for it to finish. `script_path` is the script's real path on the
/// caller's filesystem; when chrooting, it's rewritten to the equivalent
/// path relative to `root` (what it resolves to once `root` becomes `/`).
fn run_executable(root: &Path, script_path: &Path, args: &[String], flags: InstallFlags) -> Result<Outcome, Error> {
    let exec_path = if flags.contains(InstallFlags::NO_CHROOT) {
        script_path.to_path_buf()
    } else {
        Path::new("/").join(script_path.strip_prefix(root).unwrap_or(script_path))
    };

    let program = to_cstring(exec_path.as_os_str().as_bytes())?;
    let mut argv = vec![program.clone()];
    for arg in args {
        argv.push(to_cstring(arg.as_bytes())?);
    }

    let envp = build_envp(flags)?;

    // SAFETY: the child calls only async-signal-safe operations
    // (umask/chroot/chdir/execve) before either replacing itself or exiting;
    // no allocator use or panic-unwinding happens after fork in the child.
    match unsafe { fork() }.map_err(Error::Fork)? {
        ForkResult::Child => {
            let outcome = run_in_child(root, &program, &argv, &envp, flags);
            let code = match outcome {
                Ok(()) => 0,
                Err(_) => 127,
            };
            std::process::exit(code);
        }
        ForkResult::Parent { child } => wait_for(child),
    }
}

fn run_in_child(root: &Path, program: &CString, argv: &[CString], envp: &[CString], flags: InstallFlags) -> Result<(), ()> {
    umask(Mode::from_bits_truncate(0o022));

    if !flags.contains(InstallFlags::NO_CHROOT) {
        if chroot(root).is_err() {
            return Err(());
        }
        if chdir("/").is_err() {
            return Err(());
        }
    }

    // execve never returns on success.
    let _ = execve(program, argv, envp);
    Err(())
}

fn wait_for(child: nix::unistd::Pid) -> Result<Outcome, Error> {
    loop {
        match waitpid(child, None) {
            Ok(WaitStatus::Exited(_, 0)) => return Ok(Outcome::Success),
            Ok(WaitStatus::Exited(_, code)) => return Ok(Outcome::Failed(code)),
            Ok(WaitStatus::Signaled(_, signal, _)) => return Ok(Outcome::Signaled(signal as i32)),
            Ok(_other) => continue,
            Err(nix::Error::EINTR) => continue,
            Err(e) => return Err(Error::Wait(e)),
        }
    }
}

fn build_envp(flags: InstallFlags) -> Result<Vec<CString>, Error> {
    let mut env = Vec::new();

    if flags.contains(InstallFlags::PRESERVE_ENV) {
        for (key, value) in std::env::vars() {
            env.push(to_cstring(format!("{key}={value}").as_bytes())?);
        }
    } else {
        env.push(to_cstring(DEFAULT_PATH.as_bytes())?);
    }

    Ok(env)
}

fn to_cstring(bytes: &[u8]) -> Result<CString, Error> {
    Ok(CString::new(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_env_carries_only_sanitized_path() {
        let env = build_envp(InstallFlags::NONE).unwrap();
        assert_eq!(env.len(), 1);
        assert_eq!(env[0].to_str().unwrap(), DEFAULT_PATH);
    }

    #[test]
    fn preserve_env_carries_caller_environment() {
        std::env::set_var("FLINT_SCRIPTRUNNER_TEST_VAR", "1");
        let env = build_envp(InstallFlags::PRESERVE_ENV).unwrap();
        assert!(env.iter().any(|e| e.to_str().unwrap().starts_with("FLINT_SCRIPTRUNNER_TEST_VAR=")));
        std::env::remove_var("FLINT_SCRIPTRUNNER_TEST_VAR");
    }

    #[test]
    fn write_executable_sets_exec_bit() {
        let dir = tempfile::tempdir().unwrap();
        let tmp = write_executable(dir.path(), b"#!/bin/sh\nexit 0\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = tmp.as_file().metadata().unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[test]
    fn run_simple_script_without_chroot_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = run_script(
            dir.path(),
            "pkg",
            ScriptKind::PostInstall,
            b"#!/bin/sh\nexit 0\n",
            &[],
            InstallFlags::NO_CHROOT,
        )
        .unwrap();
        assert_eq!(outcome, Outcome::Success);
    }

    #[test]
    fn run_failing_script_reports_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = run_script(
            dir.path(),
            "pkg",
            ScriptKind::PostInstall,
            b"#!/bin/sh\nexit 7\n",
            &[],
            InstallFlags::NO_CHROOT,
        )
        .unwrap();
        assert_eq!(outcome, Outcome::Failed(7));
    }
}
