// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Package manager integration.
//!
//! Package managers are opaque collaborators. Dotstrap only ever asks them
//! three things: bootstrap yourself, install this package, and is this
//! package installed? The [`Installer`] trait captures exactly that, with one
//! implementation per supported manager.
//!
//! Managers fill one of two roles. The __primary__ manager is the operating
//! system's own, e.g., apt on Debian-like Linux or Homebrew on macOS. The
//! __secondary__ manager is cross-platform, e.g., Nix.

use crate::{
    config::{ManagerKind, ManagerRole, ManagerSettings},
    host::syscall::{
        run_remote_script, syscall_interactive, syscall_non_interactive, syscall_succeeds,
    },
    platform::Platform,
    probe::{find_executable, HostEnv},
};

use std::{ffi::OsString, path::PathBuf};
use tracing::{info, instrument};

const HOMEBREW_INSTALLER: &str =
    "https://raw.githubusercontent.com/Homebrew/install/HEAD/install.sh";
const NIX_INSTALLER: &str = "https://nixos.org/nix/install";

/// Package manager capability.
pub trait Installer {
    /// Which manager this is.
    fn kind(&self) -> ManagerKind;

    /// Locate manager executable.
    ///
    /// Looks beyond the search path into the manager's well-known install
    /// prefixes, because a freshly bootstrapped manager is rarely on the
    /// search path of the process that bootstrapped it.
    fn locate(&self) -> Option<PathBuf>;

    /// Directories the manager installs executables into.
    fn bin_dirs(&self) -> Vec<PathBuf>;

    /// Install manager itself.
    ///
    /// # Errors
    ///
    /// - Return [`InstallError`] if bootstrapping fails.
    fn bootstrap(&self) -> Result<()>;

    /// Install package by name.
    ///
    /// # Errors
    ///
    /// - Return [`InstallError`] if manager is missing or installation fails.
    fn install(&self, name: &str) -> Result<()>;

    /// Ask manager if package is installed.
    fn is_installed(&self, name: &str) -> bool;
}

/// Homebrew on macOS or Linux.
#[derive(Debug, Clone)]
pub struct Homebrew {
    env: HostEnv,
}

impl Homebrew {
    /// Well-known installation prefixes, in order of preference.
    pub const PREFIXES: [&'static str; 3] =
        ["/opt/homebrew", "/usr/local", "/home/linuxbrew/.linuxbrew"];

    pub fn new(env: HostEnv) -> Self {
        Self { env }
    }

    fn program(&self) -> Result<PathBuf> {
        self.locate().ok_or(InstallError::NotBootstrapped(ManagerKind::Homebrew))
    }

    /// Arguments used to install a package.
    pub fn install_args(name: &str) -> Vec<OsString> {
        vec!["install".into(), name.into()]
    }
}

impl Installer for Homebrew {
    fn kind(&self) -> ManagerKind {
        ManagerKind::Homebrew
    }

    fn locate(&self) -> Option<PathBuf> {
        find_executable("brew", &self.env.search_path)
            .or_else(|| find_executable("brew", &self.bin_dirs()))
    }

    fn bin_dirs(&self) -> Vec<PathBuf> {
        Self::PREFIXES
            .iter()
            .map(|prefix| PathBuf::from(prefix).join("bin"))
            .collect()
    }

    #[instrument(skip(self), level = "debug")]
    fn bootstrap(&self) -> Result<()> {
        info!("bootstrap homebrew");
        run_remote_script("bash", HOMEBREW_INSTALLER, &[], [("NONINTERACTIVE", "1")])?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn install(&self, name: &str) -> Result<()> {
        syscall_interactive(self.program()?, Self::install_args(name))?;
        Ok(())
    }

    fn is_installed(&self, name: &str) -> bool {
        let Some(brew) = self.locate() else {
            return false;
        };

        syscall_non_interactive(brew, ["list", "--versions", name])
            .map(|output| !output.is_empty())
            .unwrap_or(false)
    }
}

/// Advanced Package Tool of Debian-like Linux.
#[derive(Debug, Clone)]
pub struct Apt {
    env: HostEnv,
}

impl Apt {
    pub fn new(env: HostEnv) -> Self {
        Self { env }
    }

    /// Arguments given to `sudo` to install a package.
    pub fn install_args(name: &str) -> Vec<OsString> {
        vec![
            "apt-get".into(),
            "install".into(),
            "--yes".into(),
            "--no-install-recommends".into(),
            name.into(),
        ]
    }
}

impl Installer for Apt {
    fn kind(&self) -> ManagerKind {
        ManagerKind::Apt
    }

    fn locate(&self) -> Option<PathBuf> {
        find_executable("apt-get", &self.env.search_path)
    }

    fn bin_dirs(&self) -> Vec<PathBuf> {
        vec![PathBuf::from("/usr/bin"), PathBuf::from("/usr/local/bin")]
    }

    /// Apt ships with the system, so bootstrapping only refreshes the package
    /// index. A host without apt cannot be bootstrapped at all.
    #[instrument(skip(self), level = "debug")]
    fn bootstrap(&self) -> Result<()> {
        if self.locate().is_none() {
            return Err(InstallError::Unavailable(ManagerKind::Apt));
        }

        info!("refresh apt package index");
        syscall_interactive("sudo", ["apt-get", "update"])?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn install(&self, name: &str) -> Result<()> {
        if self.locate().is_none() {
            return Err(InstallError::Unavailable(ManagerKind::Apt));
        }

        syscall_interactive("sudo", Self::install_args(name))?;
        Ok(())
    }

    fn is_installed(&self, name: &str) -> bool {
        syscall_non_interactive("dpkg-query", ["--show", "--showformat=${Status}", name])
            .map(|status| status.ends_with("install ok installed"))
            .unwrap_or(false)
    }
}

/// Single-user Nix installation.
#[derive(Debug, Clone)]
pub struct Nix {
    env: HostEnv,
}

impl Nix {
    pub fn new(env: HostEnv) -> Self {
        Self { env }
    }

    fn program(&self) -> Result<PathBuf> {
        self.locate().ok_or(InstallError::NotBootstrapped(ManagerKind::Nix))
    }

    /// Arguments used to install a package.
    pub fn install_args(name: &str) -> Vec<OsString> {
        vec!["--install".into(), "--attr".into(), format!("nixpkgs.{name}").into()]
    }
}

impl Installer for Nix {
    fn kind(&self) -> ManagerKind {
        ManagerKind::Nix
    }

    fn locate(&self) -> Option<PathBuf> {
        find_executable("nix-env", &self.env.search_path)
            .or_else(|| find_executable("nix-env", &self.bin_dirs()))
    }

    fn bin_dirs(&self) -> Vec<PathBuf> {
        vec![
            self.env.home.join(".nix-profile").join("bin"),
            PathBuf::from("/nix/var/nix/profiles/default/bin"),
        ]
    }

    #[instrument(skip(self), level = "debug")]
    fn bootstrap(&self) -> Result<()> {
        info!("bootstrap nix");
        run_remote_script(
            "sh",
            NIX_INSTALLER,
            &["--no-daemon".into()],
            std::iter::empty::<(String, String)>(),
        )?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn install(&self, name: &str) -> Result<()> {
        syscall_interactive(self.program()?, Self::install_args(name))?;
        Ok(())
    }

    fn is_installed(&self, name: &str) -> bool {
        let Some(nix_env) = self.locate() else {
            return false;
        };

        syscall_succeeds(nix_env, ["--query", "--installed", name])
    }
}

/// Installers for both manager roles.
pub struct Managers {
    primary: Box<dyn Installer>,
    secondary: Box<dyn Installer>,
}

impl Managers {
    /// Construct managers for target platform honouring any overrides.
    pub fn new(settings: &ManagerSettings, platform: &Platform, env: &HostEnv) -> Self {
        Self {
            primary: installer_for(settings.resolve(ManagerRole::Primary, platform), env),
            secondary: installer_for(settings.resolve(ManagerRole::Secondary, platform), env),
        }
    }

    /// Installer filling role.
    pub fn get(&self, role: ManagerRole) -> &dyn Installer {
        match role {
            ManagerRole::Primary => self.primary.as_ref(),
            ManagerRole::Secondary => self.secondary.as_ref(),
        }
    }

    /// Every directory either manager installs executables into.
    pub fn bin_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = self.primary.bin_dirs();
        dirs.extend(self.secondary.bin_dirs());
        dirs
    }
}

impl std::fmt::Debug for Managers {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("Managers")
            .field("primary", &self.primary.kind())
            .field("secondary", &self.secondary.kind())
            .finish()
    }
}

fn installer_for(kind: ManagerKind, env: &HostEnv) -> Box<dyn Installer> {
    match kind {
        ManagerKind::Homebrew => Box::new(Homebrew::new(env.clone())),
        ManagerKind::Apt => Box::new(Apt::new(env.clone())),
        ManagerKind::Nix => Box::new(Nix::new(env.clone())),
    }
}

/// Package manager error types.
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    /// Manager has not been bootstrapped yet.
    #[error("package manager {0} is not installed")]
    NotBootstrapped(ManagerKind),

    /// Manager cannot exist on this host.
    #[error("package manager {0} is not available on this host")]
    Unavailable(ManagerKind),

    /// Manager program failed.
    #[error(transparent)]
    Syscall(#[from] crate::host::syscall::SyscallError),
}

/// Friendly result alias :3
pub type Result<T, E = InstallError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{Arch, OsFamily};
    use pretty_assertions::assert_eq;

    fn env() -> HostEnv {
        HostEnv {
            search_path: vec![],
            home: PathBuf::from("/home/blah"),
            user: Some("blah".into()),
            shell: None,
        }
    }

    #[test]
    fn managers_fill_roles_per_platform() {
        let settings = ManagerSettings::default();

        let linux = Managers::new(&settings, &Platform::new(OsFamily::Linux, Arch::X86_64), &env());
        assert_eq!(linux.get(ManagerRole::Primary).kind(), ManagerKind::Apt);
        assert_eq!(linux.get(ManagerRole::Secondary).kind(), ManagerKind::Nix);

        let mac = Managers::new(&settings, &Platform::new(OsFamily::MacOs, Arch::Arm64), &env());
        assert_eq!(mac.get(ManagerRole::Primary).kind(), ManagerKind::Homebrew);
    }

    #[test]
    fn install_arguments() {
        assert_eq!(
            Homebrew::install_args("stow"),
            vec![OsString::from("install"), OsString::from("stow")]
        );
        assert_eq!(
            Apt::install_args("zsh"),
            vec![
                OsString::from("apt-get"),
                OsString::from("install"),
                OsString::from("--yes"),
                OsString::from("--no-install-recommends"),
                OsString::from("zsh"),
            ]
        );
        assert_eq!(
            Nix::install_args("ripgrep"),
            vec![
                OsString::from("--install"),
                OsString::from("--attr"),
                OsString::from("nixpkgs.ripgrep"),
            ]
        );
    }

    #[test]
    fn nix_looks_into_user_profile() {
        let nix = Nix::new(env());
        assert_eq!(
            nix.bin_dirs()[0],
            PathBuf::from("/home/blah/.nix-profile/bin")
        );
    }

    #[test]
    fn unbootstrapped_manager_refuses_install() {
        let mut env = env();
        env.home = PathBuf::from("/nonexistent");
        let nix = Nix::new(env);

        // Only meaningful on hosts without a system-wide Nix profile.
        if nix.locate().is_none() {
            assert!(matches!(
                nix.install("ripgrep"),
                Err(InstallError::NotBootstrapped(ManagerKind::Nix))
            ));
            assert!(!nix.is_installed("ripgrep"));
        }
    }
}
