// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Synchronous child processes

use std::ffi::OsStr;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use retrocoff_shim::syscalls::dos::SIGNALED_EXIT_STATUS;

/// Base name of the legacy launcher; its first argument is a program path
/// and gets translated as well.
pub const LAUNCHER_NAME: &[u8] = b"exew32.exe";

/// Split a stored command tail into arguments.
///
/// The tail starts with a one-byte prefix, or two bytes when the second one
/// is a space, and ends with one trailing byte (the legacy terminator). Both
/// are dropped before the rest is split on blanks.
pub fn command_tail_arguments(tail: &[u8]) -> Vec<Vec<u8>> {
    let skip = if tail.get(1) == Some(&b' ') { 2 } else { 1 };
    let body = tail.get(skip..).unwrap_or_default();
    let body = match body.split_last() {
        Some((_, rest)) => rest,
        None => body,
    };

    body.split(|b| matches!(b, b' ' | b'\t' | b'\n'))
        .filter(|token| !token.is_empty())
        .map(<[u8]>::to_vec)
        .collect()
}

/// Run `program` with `arguments` and wait for it.
///
/// `environment` holds `KEY=VALUE` strings; an empty list inherits the
/// host environment and entries without `=` are skipped. Returns the
/// child's exit status, or [`SIGNALED_EXIT_STATUS`] if a signal ended it.
pub fn spawn_and_wait(
    program: &Path,
    arguments: &[Vec<u8>],
    environment: &[Vec<u8>],
) -> io::Result<i32> {
    let mut command = Command::new(executable_path(program));
    command.args(arguments.iter().map(|a| OsStr::from_bytes(a)));

    if !environment.is_empty() {
        command.env_clear();
        for entry in environment {
            let Some(split) = entry.iter().position(|&b| b == b'=') else {
                continue;
            };
            command.env(
                OsStr::from_bytes(&entry[..split]),
                OsStr::from_bytes(&entry[split + 1..]),
            );
        }
    }

    let status = command.status()?;
    Ok(match status.code() {
        Some(code) => code,
        None if status.signal().is_some() => SIGNALED_EXIT_STATUS,
        None => -1,
    })
}

/// A bare name refers to the working directory, never to a `PATH` lookup.
fn executable_path(program: &Path) -> PathBuf {
    if program.as_os_str().as_bytes().contains(&b'/') {
        program.to_path_buf()
    } else {
        Path::new(".").join(program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<Vec<u8>> {
        list.iter().map(|s| s.as_bytes().to_vec()).collect()
    }

    #[test]
    fn test_tail_with_space_prefix() {
        assert_eq!(
            command_tail_arguments(b"\x0b foo.c -o x\r"),
            args(&["foo.c", "-o", "x"])
        );
    }

    #[test]
    fn test_tail_with_single_byte_prefix() {
        assert_eq!(
            command_tail_arguments(b"\x07a\tb\nc\r"),
            args(&["a", "b", "c"])
        );
    }

    #[test]
    fn test_degenerate_tails() {
        assert!(command_tail_arguments(b"").is_empty());
        assert!(command_tail_arguments(b"x").is_empty());
        assert!(command_tail_arguments(b"x \r").is_empty());
        assert!(command_tail_arguments(b"\x01   \r").is_empty());
    }

    #[test]
    fn test_exit_status_is_recorded() {
        let status = spawn_and_wait(Path::new("/bin/sh"), &args(&["-c", "exit 7"]), &[]).unwrap();
        assert_eq!(status, 7);
    }

    #[test]
    fn test_signal_maps_to_sentinel() {
        let status =
            spawn_and_wait(Path::new("/bin/sh"), &args(&["-c", "kill -9 $$"]), &[]).unwrap();
        assert_eq!(status, SIGNALED_EXIT_STATUS);
    }

    #[test]
    fn test_explicit_environment_replaces_host() {
        let status = spawn_and_wait(
            Path::new("/bin/sh"),
            &args(&["-c", "test \"$ONLY\" = yes && test -z \"$HOME\""]),
            &args(&["ONLY=yes", "BROKEN"]),
        )
        .unwrap();
        assert_eq!(status, 0);
    }

    #[test]
    fn test_missing_program() {
        assert!(spawn_and_wait(Path::new("/nonexistent/prog"), &[], &[]).is_err());
    }
}
