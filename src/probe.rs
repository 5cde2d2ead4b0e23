// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Capability probing.
//!
//! A __probe__ answers one question about the host: "is this resource already
//! present and correct?" Probes never mutate anything, and are safe to call as
//! often as needed. Nothing here caches results. Whoever needs a fresh answer
//! simply asks again.
//!
//! Probes never read the ambient process environment. The facts they need,
//! e.g., the search path or the home directory, are captured once at the
//! process boundary into a [`HostEnv`] value.

use crate::config::ManagerRole;

use ignore::WalkBuilder;
use std::{
    collections::BTreeSet,
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
};
use tracing::debug;

/// Kind of file system entry found at a path.
///
/// Symbolic links are never followed, so a link to a directory is a
/// [`PathKind::Symlink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    Missing,
    RegularFile,
    Symlink,
    Directory,
}

/// Resource probing.
pub trait Probe {
    /// Check if executable exists on search path.
    fn tool_present(&self, name: &str) -> bool;

    /// Check if package manager in role has been bootstrapped.
    fn manager_present(&self, role: ManagerRole) -> bool;

    /// Check if package manager in role reports package as installed.
    fn package_installed(&self, role: ManagerRole, name: &str) -> bool;

    /// Determine what kind of entry exists at a path.
    fn path_exists(&self, path: &Path) -> PathKind;

    /// Check if `link` resolves to the same file as `source`.
    fn links_to(&self, link: &Path, source: &Path) -> bool;

    /// Check if `shell` is the login shell of the current account.
    fn is_login_shell(&self, shell: &str) -> bool;

    /// Check if shell plugin has been fetched into `dir`.
    fn plugin_present(&self, dir: &Path) -> bool {
        self.path_exists(dir) == PathKind::Directory
    }

    /// Resolve managed file listing of a symlink farm package.
    ///
    /// Returns file paths relative to `package_dir`. Patterns may be literal
    /// paths or globs. No patterns at all means every file in the package.
    fn managed_files(&self, package_dir: &Path, patterns: &[String]) -> Vec<PathBuf>;
}

/// Snapshot of host environment facts.
///
/// Captured once at the process boundary, never refreshed. Anything that
/// changes these facts in the middle of a run, e.g., a package manager that
/// edits shell profiles to extend `PATH`, will not be seen until the next run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HostEnv {
    /// Directories searched for executables.
    pub search_path: Vec<PathBuf>,

    /// Home directory of current account.
    pub home: PathBuf,

    /// Name of current account.
    pub user: Option<String>,

    /// Value of `$SHELL` at start up.
    pub shell: Option<PathBuf>,
}

impl HostEnv {
    /// Capture environment of current process.
    ///
    /// # Errors
    ///
    /// - Return [`NoWayHome`](crate::path::NoWayHome) if the home directory
    ///   cannot be determined.
    pub fn capture() -> crate::path::Result<Self> {
        let search_path = std::env::var_os("PATH")
            .map(|path| std::env::split_paths(&path).collect())
            .unwrap_or_default();

        Ok(Self {
            search_path,
            home: crate::path::home_dir()?,
            user: std::env::var("USER").ok(),
            shell: std::env::var_os("SHELL").map(PathBuf::from),
        })
    }

    /// Search path joined back into a `PATH` value.
    pub fn joined_search_path(&self) -> Option<OsString> {
        std::env::join_paths(&self.search_path).ok()
    }
}

/// Inspect entry at path without following a final symbolic link.
pub fn path_kind(path: &Path) -> PathKind {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => PathKind::Symlink,
        Ok(meta) if meta.is_dir() => PathKind::Directory,
        Ok(_) => PathKind::RegularFile,
        Err(_) => PathKind::Missing,
    }
}

/// Locate executable by name across directories.
///
/// Names containing a path separator are checked directly instead.
pub fn find_executable<'a>(
    name: &str,
    dirs: impl IntoIterator<Item = &'a PathBuf>,
) -> Option<PathBuf> {
    if name.contains(std::path::MAIN_SEPARATOR) {
        let path = PathBuf::from(name);
        return is_executable(&path).then_some(path);
    }

    dirs.into_iter()
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Check if two paths resolve to the same file.
///
/// Both sides are canonicalized, so a link reached through a linked parent
/// directory counts too.
pub fn resolves_to(link: &Path, source: &Path) -> bool {
    match (fs::canonicalize(link), fs::canonicalize(source)) {
        (Ok(link), Ok(source)) => link == source,
        _ => false,
    }
}

/// Expand managed file patterns of a package directory.
///
/// Literal patterns are taken as is, even if nothing exists at them yet, so
/// callers know which targets the package claims before it gets cloned. Glob
/// patterns only yield existing files. An empty pattern listing walks the
/// whole package directory, honouring any ignore files inside it.
pub fn expand_managed_files(package_dir: &Path, patterns: &[String]) -> Vec<PathBuf> {
    let mut files = BTreeSet::new();

    if patterns.is_empty() {
        let walker = WalkBuilder::new(package_dir)
            .hidden(false)
            .require_git(false)
            .build();
        for entry in walker.flatten() {
            if entry.file_type().is_some_and(|kind| !kind.is_dir()) {
                if let Ok(relative) = entry.path().strip_prefix(package_dir) {
                    files.insert(relative.to_path_buf());
                }
            }
        }

        return files.into_iter().collect();
    }

    for pattern in patterns {
        if !is_glob(pattern) {
            files.insert(PathBuf::from(pattern));
            continue;
        }

        let full = package_dir.join(pattern);
        let Ok(paths) = glob::glob(full.to_string_lossy().as_ref()) else {
            debug!("skip malformed pattern {pattern:?}");
            continue;
        };
        for path in paths.flatten() {
            if path.is_dir() {
                continue;
            }
            if let Ok(relative) = path.strip_prefix(package_dir) {
                files.insert(relative.to_path_buf());
            }
        }
    }

    files.into_iter().collect()
}

fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use std::{fs::write, os::unix::fs::symlink};

    #[sealed_test]
    fn path_kind_never_follows_links() -> anyhow::Result<()> {
        fs::create_dir("dir")?;
        write("file", "blah")?;
        symlink("file", "link")?;

        assert_eq!(path_kind(Path::new("dir")), PathKind::Directory);
        assert_eq!(path_kind(Path::new("file")), PathKind::RegularFile);
        assert_eq!(path_kind(Path::new("link")), PathKind::Symlink);
        assert_eq!(path_kind(Path::new("nope")), PathKind::Missing);

        Ok(())
    }

    #[sealed_test]
    fn find_executable_requires_exec_bit() -> anyhow::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let bin = std::env::current_dir()?.join("bin");
        fs::create_dir(&bin)?;
        write(bin.join("stow"), "#!/bin/sh\n")?;
        fs::set_permissions(bin.join("stow"), fs::Permissions::from_mode(0o755))?;
        write(bin.join("notes"), "blah")?;

        let dirs = vec![PathBuf::from("/nonexistent"), bin.clone()];
        assert_eq!(find_executable("stow", &dirs), Some(bin.join("stow")));
        assert_eq!(find_executable("notes", &dirs), None);
        assert_eq!(find_executable("zsh", &dirs), None);

        let absolute = bin.join("stow").to_string_lossy().into_owned();
        let nowhere: Vec<PathBuf> = Vec::new();
        assert_eq!(find_executable(&absolute, &nowhere), Some(bin.join("stow")));

        Ok(())
    }

    #[sealed_test]
    fn resolves_through_folded_parent() -> anyhow::Result<()> {
        fs::create_dir_all("repo/nvim/.config/nvim")?;
        write("repo/nvim/.config/nvim/init.lua", "-- blah")?;
        fs::create_dir("home")?;
        let cwd = std::env::current_dir()?;
        symlink(cwd.join("repo/nvim/.config"), "home/.config")?;

        assert!(resolves_to(
            Path::new("home/.config/nvim/init.lua"),
            Path::new("repo/nvim/.config/nvim/init.lua"),
        ));
        assert!(!resolves_to(
            Path::new("home/.zshrc"),
            Path::new("repo/zsh/.zshrc"),
        ));

        Ok(())
    }

    #[sealed_test]
    fn expand_managed_file_patterns() -> anyhow::Result<()> {
        fs::create_dir_all("zsh/.config/zsh")?;
        write("zsh/.zshrc", "blah")?;
        write("zsh/.config/zsh/aliases.zsh", "blah")?;
        write("zsh/.config/zsh/path.zsh", "blah")?;
        write("zsh/.gitignore", "*.zwc\n")?;
        write("zsh/.zshrc.zwc", "compiled")?;

        let package = std::env::current_dir()?.join("zsh");

        let result = expand_managed_files(&package, &[]);
        let expect: Vec<PathBuf> = vec![
            ".config/zsh/aliases.zsh".into(),
            ".config/zsh/path.zsh".into(),
            ".gitignore".into(),
            ".zshrc".into(),
        ];
        assert_eq!(result, expect);

        let result = expand_managed_files(
            &package,
            &[".zshrc".into(), ".config/zsh/*.zsh".into(), ".zprofile".into()],
        );
        let expect: Vec<PathBuf> = vec![
            ".config/zsh/aliases.zsh".into(),
            ".config/zsh/path.zsh".into(),
            ".zprofile".into(),
            ".zshrc".into(),
        ];
        assert_eq!(result, expect);

        Ok(())
    }
}
