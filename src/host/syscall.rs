// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! External process invocation.
//!
//! Everything dotstrap cannot do itself is delegated to an external program:
//! package managers, the symlink farm tool, installer scripts, `chsh`. These
//! helpers spawn such programs and turn a non-zero exit into an error naming
//! the program. There are no timeouts. A hung program blocks the run until
//! the operator interrupts it.

use std::{
    ffi::{OsStr, OsString},
    fs,
    io::Write,
    path::PathBuf,
    process::{Command, Stdio},
};
use tracing::{debug, instrument};

/// Run program attached to the current terminal.
///
/// Blocks until program exits. Output goes straight to the user, which keeps
/// interactive prompts like `sudo` password requests working.
///
/// # Errors
///
/// - Return [`SyscallError::Spawn`] if program cannot be started.
/// - Return [`SyscallError::Failed`] if program exits unsuccessfully.
pub fn syscall_interactive(
    cmd: impl AsRef<OsStr>,
    args: impl IntoIterator<Item = impl AsRef<OsStr>>,
) -> Result<()> {
    syscall_interactive_with_env(cmd, args, std::iter::empty::<(String, String)>())
}

/// Run program attached to the current terminal with extra environment.
///
/// # Errors
///
/// - Return [`SyscallError::Spawn`] if program cannot be started.
/// - Return [`SyscallError::Failed`] if program exits unsuccessfully.
pub fn syscall_interactive_with_env(
    cmd: impl AsRef<OsStr>,
    args: impl IntoIterator<Item = impl AsRef<OsStr>>,
    envs: impl IntoIterator<Item = (impl AsRef<OsStr>, impl AsRef<OsStr>)>,
) -> Result<()> {
    let program = display_program(cmd.as_ref());
    debug!("run {program}");
    let status = Command::new(cmd.as_ref())
        .args(args)
        .envs(envs)
        .spawn()
        .map_err(|source| SyscallError::Spawn {
            program: program.clone(),
            source,
        })?
        .wait()
        .map_err(|source| SyscallError::Spawn {
            program: program.clone(),
            source,
        })?;

    if !status.success() {
        return Err(SyscallError::Failed {
            program,
            message: status.to_string(),
        });
    }

    Ok(())
}

/// Run program and capture its output.
///
/// Output of stdout and stderr is returned together as a [`String`].
///
/// # Errors
///
/// - Return [`SyscallError::Spawn`] if program cannot be started.
/// - Return [`SyscallError::Failed`] if program exits unsuccessfully. The
///   captured output becomes the error message.
pub fn syscall_non_interactive(
    cmd: impl AsRef<OsStr>,
    args: impl IntoIterator<Item = impl AsRef<OsStr>>,
) -> Result<String> {
    let program = display_program(cmd.as_ref());
    let output = Command::new(cmd.as_ref())
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|source| SyscallError::Spawn {
            program: program.clone(),
            source,
        })?;
    let stdout = String::from_utf8_lossy(output.stdout.as_slice()).into_owned();
    let stderr = String::from_utf8_lossy(output.stderr.as_slice()).into_owned();
    let mut message = String::new();

    if !stdout.is_empty() {
        message.push_str(stdout.as_str());
    }

    if !stderr.is_empty() {
        message.push_str(stderr.as_str());
    }

    // INVARIANT: Chomp trailing newlines.
    let message = message.trim_end_matches(['\r', '\n']).to_string();

    if !output.status.success() {
        return Err(SyscallError::Failed { program, message });
    }

    Ok(message)
}

/// Run program feeding `input` through its stdin.
///
/// # Errors
///
/// - Return [`SyscallError::Spawn`] if program cannot be started, or its
///   stdin cannot be written to.
/// - Return [`SyscallError::Failed`] if program exits unsuccessfully.
pub fn syscall_with_input(
    cmd: impl AsRef<OsStr>,
    args: impl IntoIterator<Item = impl AsRef<OsStr>>,
    input: &str,
) -> Result<()> {
    let program = display_program(cmd.as_ref());
    let spawn_error = |source| SyscallError::Spawn {
        program: program.clone(),
        source,
    };

    let mut child = Command::new(cmd.as_ref())
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .spawn()
        .map_err(spawn_error)?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(input.as_bytes()).map_err(spawn_error)?;
    }

    let status = child.wait().map_err(spawn_error)?;
    if !status.success() {
        return Err(SyscallError::Failed {
            program,
            message: status.to_string(),
        });
    }

    Ok(())
}

/// Check if a read-only query program exits successfully.
///
/// Spawn failures count as "no".
pub fn syscall_succeeds(
    cmd: impl AsRef<OsStr>,
    args: impl IntoIterator<Item = impl AsRef<OsStr>>,
) -> bool {
    Command::new(cmd.as_ref())
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Download installer script and run it with an interpreter.
///
/// The script is fetched with `curl` into a temporary file first, so a failed
/// download is reported as such instead of feeding a truncated script into
/// the interpreter.
///
/// # Errors
///
/// - Return [`SyscallError::Spawn`] if `curl` or the interpreter cannot be
///   started.
/// - Return [`SyscallError::Failed`] if download or script fails.
#[instrument(skip(args, envs), level = "debug")]
pub fn run_remote_script(
    interpreter: &str,
    url: &str,
    args: &[String],
    envs: impl IntoIterator<Item = (impl AsRef<OsStr>, impl AsRef<OsStr>)>,
) -> Result<()> {
    let script = script_path(url);
    syscall_non_interactive(
        "curl",
        [
            OsString::from("-fsSL"),
            OsString::from(url),
            OsString::from("-o"),
            script.clone().into_os_string(),
        ],
    )?;

    let mut script_args = vec![script.clone().into_os_string()];
    script_args.extend(args.iter().map(OsString::from));
    let result = syscall_interactive_with_env(interpreter, script_args, envs);

    if let Err(error) = fs::remove_file(&script) {
        debug!("cannot remove {}: {error}", script.display());
    }

    result
}

fn script_path(url: &str) -> PathBuf {
    let name: String = url
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or("installer")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' { c } else { '-' })
        .collect();
    std::env::temp_dir().join(format!("dotstrap-{}-{name}", std::process::id()))
}

fn display_program(cmd: &OsStr) -> String {
    cmd.to_string_lossy().into_owned()
}

/// External process error types.
#[derive(Debug, thiserror::Error)]
pub enum SyscallError {
    /// Program could not be started or waited on.
    #[error("failed to run {program:?}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Program exited unsuccessfully.
    #[error("command {program:?} failed: {message}")]
    Failed { program: String, message: String },
}

/// Friendly result alias :3
pub type Result<T, E = SyscallError> = std::result::Result<T, E>;
