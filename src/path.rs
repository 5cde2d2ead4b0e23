// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine where dotstrap looks for its own files, and where the user's
//! home directory lives.

use std::path::{Path, PathBuf};

/// Determine absolute path to user's home directory.
///
/// Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or(NoWayHome)
}

/// Determine default absolute path to the target declaration file.
///
/// Uses XDG Base Directory path `$XDG_CONFIG_HOME/dotstrap/target.toml` as
/// the default. Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_declaration_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|path| path.join("dotstrap").join("target.toml"))
        .ok_or(NoWayHome)
}

/// Determine staging path for content that must appear at `dest` atomically.
///
/// The staging path is a hidden sibling of `dest`, so a rename from one to the
/// other never crosses a file system boundary.
pub fn staging_path(dest: impl AsRef<Path>) -> PathBuf {
    let dest = dest.as_ref();
    let name = dest
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "dotstrap".into());
    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    parent.join(format!(".{}.partial", name.trim_start_matches('.')))
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::home_dir`](https://docs.rs/dirs/latest/dirs/fn.home_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;
