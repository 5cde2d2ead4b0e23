// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Real host backend.
//!
//! [`Host`] answers probes by looking at the live file system and asking the
//! package managers, and carries out effects by spawning external programs or
//! talking to libgit2. Everything above this module only ever sees the
//! [`Probe`] and [`Effects`] traits, so the planner and executor can be
//! exercised against fakes.

pub mod syscall;

mod git;

use crate::{
    config::{ManagerRole, ManagerSettings},
    exec::{EffectError, EffectResult, Effects},
    install::Managers,
    platform::{OsFamily, Platform},
    probe::{
        expand_managed_files, find_executable, path_kind, resolves_to, HostEnv, PathKind, Probe,
    },
};

use std::{
    collections::BTreeMap,
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
};
use syscall::{run_remote_script, syscall_interactive, syscall_non_interactive, syscall_with_input};
use tracing::{debug, info, instrument};

const SHELLS_FILE: &str = "/etc/shells";

/// Live host.
#[derive(Debug)]
pub struct Host {
    env: HostEnv,
    platform: Platform,
    managers: Managers,
}

impl Host {
    /// Construct new host over captured environment.
    pub fn new(env: HostEnv, platform: Platform, settings: &ManagerSettings) -> Self {
        let managers = Managers::new(settings, &platform, &env);
        Self {
            env,
            platform,
            managers,
        }
    }

    pub fn env(&self) -> &HostEnv {
        &self.env
    }

    /// Locate executable by name.
    ///
    /// Searches the captured search path, then the directories the package
    /// managers install into, so tools installed earlier in the same run are
    /// found without a new login session.
    pub fn locate_tool(&self, name: &str) -> Option<PathBuf> {
        let mut dirs = self.env.search_path.clone();
        dirs.extend(self.managers.bin_dirs());
        find_executable(name, &dirs)
    }

    /// Determine login shell of current account.
    ///
    /// Asks the account database first, because `$SHELL` only reflects the
    /// login shell of the session dotstrap was started from.
    fn login_shell(&self) -> Option<PathBuf> {
        let Some(user) = self.env.user.as_deref() else {
            return self.env.shell.clone();
        };

        let recorded = match self.platform.os {
            OsFamily::Linux => syscall_non_interactive("getent", ["passwd", user])
                .ok()
                .and_then(|entry| entry.split(':').nth(6).map(str::to_string)),
            OsFamily::MacOs => {
                let record = format!("/Users/{user}");
                syscall_non_interactive("dscl", [".", "-read", record.as_str(), "UserShell"])
                    .ok()
                    .and_then(|entry| {
                        entry
                            .strip_prefix("UserShell:")
                            .map(|shell| shell.trim().to_string())
                    })
            }
            OsFamily::Unsupported => None,
        };

        recorded
            .filter(|shell| !shell.is_empty())
            .map(PathBuf::from)
            .or_else(|| self.env.shell.clone())
    }
}

impl Probe for Host {
    fn tool_present(&self, name: &str) -> bool {
        self.locate_tool(name).is_some()
    }

    fn manager_present(&self, role: ManagerRole) -> bool {
        self.managers.get(role).locate().is_some()
    }

    fn package_installed(&self, role: ManagerRole, name: &str) -> bool {
        self.managers.get(role).is_installed(name)
    }

    fn path_exists(&self, path: &Path) -> PathKind {
        path_kind(path)
    }

    fn links_to(&self, link: &Path, source: &Path) -> bool {
        resolves_to(link, source)
    }

    fn is_login_shell(&self, shell: &str) -> bool {
        let (Some(wanted), Some(current)) = (self.locate_tool(shell), self.login_shell()) else {
            return false;
        };

        match (fs::canonicalize(&wanted), fs::canonicalize(&current)) {
            (Ok(wanted), Ok(current)) => wanted == current,
            _ => wanted == current,
        }
    }

    fn managed_files(&self, package_dir: &Path, patterns: &[String]) -> Vec<PathBuf> {
        expand_managed_files(package_dir, patterns)
    }
}

impl Effects for Host {
    fn clone_repository(&self, url: &str, dest: &Path, branch: Option<&str>) -> EffectResult {
        git::clone_atomic(url, dest, branch)
    }

    fn update_repository(&self, dest: &Path, branch: Option<&str>) -> EffectResult {
        git::fast_forward(dest, branch)
    }

    fn bootstrap_manager(&self, role: ManagerRole) -> EffectResult {
        self.managers.get(role).bootstrap()?;
        Ok(())
    }

    fn install_package(&self, role: ManagerRole, name: &str) -> EffectResult {
        self.managers.get(role).install(name)?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn relocate(&self, from: &Path, to: &Path) -> EffectResult {
        // INVARIANT: Never overwrite anything, not even an earlier backup.
        if path_kind(to) != PathKind::Missing {
            return Err(EffectError::Occupied {
                from: from.into(),
                to: to.into(),
            });
        }

        fs::rename(from, to).map_err(|source| EffectError::Relocate {
            from: from.into(),
            to: to.into(),
            source,
        })
    }

    #[instrument(skip(self), level = "debug")]
    fn restow(&self, stow_dir: &Path, target: &Path, packages: &[String]) -> EffectResult {
        let stow = self
            .locate_tool(crate::link::STOW)
            .ok_or_else(|| EffectError::ToolMissing(crate::link::STOW.into()))?;

        let mut args: Vec<OsString> = vec![
            "--restow".into(),
            "--no-folding".into(),
            "--dir".into(),
            stow_dir.into(),
            "--target".into(),
            target.into(),
        ];
        args.extend(packages.iter().map(OsString::from));

        let output = syscall_non_interactive(stow, args)?;
        if !output.is_empty() {
            debug!("stow: {output}");
        }

        Ok(())
    }

    fn run_installer_script(
        &self,
        url: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
    ) -> EffectResult {
        run_remote_script("sh", url, args, env)?;
        Ok(())
    }

    fn fetch_plugin(&self, url: &str, dir: &Path) -> EffectResult {
        git::clone_atomic(url, dir, None)
    }

    #[instrument(skip(self), level = "debug")]
    fn change_login_shell(&self, shell: &str) -> EffectResult {
        let path = self
            .locate_tool(shell)
            .ok_or_else(|| EffectError::ToolMissing(shell.into()))?;
        let path_str = path.to_string_lossy().into_owned();

        // INVARIANT: chsh only accepts shells listed as valid login shells.
        let listed = fs::read_to_string(SHELLS_FILE)
            .map(|shells| shells.lines().any(|line| line.trim() == path_str))
            .unwrap_or(false);
        if !listed {
            info!("register {path_str} in {SHELLS_FILE}");
            syscall_with_input("sudo", ["tee", "-a", SHELLS_FILE], &format!("{path_str}\n"))?;
        }

        syscall_interactive("chsh", ["-s", path_str.as_str()])?;

        Ok(())
    }
}
