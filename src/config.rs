// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the __target declaration__, the TOML file describing
//! the state a machine should converge to. File I/O is left to the caller to
//! figure out.
//!
//! # General Layout
//!
//! ```toml
//! required_tools = ["curl"]
//!
//! [repository]
//! url = "https://example.org/dotfiles.git"
//! path = "~/.dotfiles"
//! target = "~"
//!
//! [[package]]
//! name = "stow"
//!
//! [[package]]
//! name = "ripgrep"
//! binary = "rg"
//! manager = "secondary"
//!
//! [[link]]
//! package = "zsh"
//! files = [".zshrc"]
//!
//! [shell]
//! default = "zsh"
//!
//! [[shell.plugin]]
//! name = "zsh-autosuggestions"
//! url = "https://github.com/zsh-users/zsh-autosuggestions"
//! ```
//!
//! A declaration is immutable input for one convergence run. Nothing in the
//! engine takes it by mutable reference.

use crate::platform::{OsFamily, Platform};

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    str::FromStr,
};

/// Desired end state of a machine.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TargetDeclaration {
    /// Baseline tools that must exist before anything is mutated.
    #[serde(default = "default_required_tools")]
    pub required_tools: Vec<String>,

    /// Dotfiles repository to clone and link from.
    pub repository: RepositorySettings,

    /// Concrete package managers filling each manager role.
    #[serde(default)]
    pub managers: ManagerSettings,

    /// Ordered package listing.
    #[serde(default, rename = "package")]
    pub packages: Vec<PackageSpec>,

    /// Ordered listing of symlink farm packages.
    #[serde(default, rename = "link")]
    pub links: Vec<LinkSpec>,

    /// Shell configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<ShellSettings>,
}

impl TargetDeclaration {
    /// Packages that apply to target platform, in declaration order.
    pub fn packages_for<'a>(
        &'a self,
        platform: &'a Platform,
    ) -> impl Iterator<Item = &'a PackageSpec> + 'a {
        self.packages
            .iter()
            .filter(move |package| package.applies_to(platform))
    }
}

impl FromStr for TargetDeclaration {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut declaration: TargetDeclaration =
            toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on every path field.
        let repository = &mut declaration.repository;
        repository.path = expand_path(&repository.path)?;
        repository.target = expand_path(&repository.target)?;
        if let Some(shell) = declaration.shell.as_mut() {
            if let Some(framework) = shell.framework.as_mut() {
                framework.dir = expand_path(&framework.dir)?;
            }
            if let Some(plugin_dir) = shell.plugin_dir.as_mut() {
                *plugin_dir = expand_path(plugin_dir)?;
            }

            // INVARIANT: Plugins always have somewhere to go.
            if !shell.plugins.is_empty() && shell.plugin_dir().is_none() {
                return Err(ConfigError::NoPluginDir);
            }
        }

        Ok(declaration)
    }
}

impl Display for TargetDeclaration {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Dotfiles repository settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RepositorySettings {
    /// Remote URL to clone repository from.
    pub url: String,

    /// Local destination of clone.
    pub path: PathBuf,

    /// Branch to checkout instead of the remote's default branch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    /// Root directory that managed files get linked into.
    #[serde(default = "default_target")]
    pub target: PathBuf,

    /// Fast-forward existing clone on every run.
    #[serde(default)]
    pub update: bool,
}

/// Role a package manager plays.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ManagerRole {
    /// Operating system package manager.
    #[default]
    Primary,

    /// Cross-platform package manager.
    Secondary,
}

impl Display for ManagerRole {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Primary => fmt.write_str("primary"),
            Self::Secondary => fmt.write_str("secondary"),
        }
    }
}

/// Concrete package manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ManagerKind {
    Homebrew,
    Apt,
    Nix,
}

impl ManagerKind {
    /// Default manager for a role on target platform.
    pub fn default_for(role: ManagerRole, platform: &Platform) -> Self {
        match (role, platform.os) {
            (ManagerRole::Primary, OsFamily::Linux) => Self::Apt,
            (ManagerRole::Primary, _) => Self::Homebrew,
            (ManagerRole::Secondary, _) => Self::Nix,
        }
    }
}

impl Display for ManagerKind {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Homebrew => fmt.write_str("homebrew"),
            Self::Apt => fmt.write_str("apt"),
            Self::Nix => fmt.write_str("nix"),
        }
    }
}

/// Package manager overrides.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ManagerSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary: Option<ManagerKind>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<ManagerKind>,
}

impl ManagerSettings {
    /// Resolve concrete manager for role on target platform.
    pub fn resolve(&self, role: ManagerRole, platform: &Platform) -> ManagerKind {
        let chosen = match role {
            ManagerRole::Primary => self.primary,
            ManagerRole::Secondary => self.secondary,
        };

        chosen.unwrap_or_else(|| ManagerKind::default_for(role, platform))
    }
}

/// Package to install.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PackageSpec {
    /// Name the package manager knows the package by.
    pub name: String,

    /// Manager role responsible for the package.
    #[serde(default)]
    pub manager: ManagerRole,

    /// Only install on this operating system family.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<OsFamily>,

    /// Executable the package provides, if it differs from the package name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary: Option<String>,
}

impl PackageSpec {
    /// Construct package managed by the primary manager on every platform.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            manager: ManagerRole::Primary,
            platform: None,
            binary: None,
        }
    }

    /// Executable used to probe for the package.
    pub fn binary(&self) -> &str {
        self.binary.as_deref().unwrap_or(&self.name)
    }

    /// Check if package should be installed on target platform.
    pub fn applies_to(&self, platform: &Platform) -> bool {
        self.platform.is_none_or(|os| os == platform.os)
    }
}

/// Symlink farm package.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LinkSpec {
    /// Directory name of package inside the repository.
    pub package: String,

    /// Relative file paths or glob patterns that must end up linked.
    ///
    /// Empty means every file of the package.
    #[serde(default)]
    pub files: Vec<String>,
}

/// Shell configuration.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ShellSettings {
    /// Program that must become the login shell.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,

    /// Directory to fetch plugins into.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_dir: Option<PathBuf>,

    /// Shell framework to install.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework: Option<ScriptInstall>,

    /// Ordered plugin listing.
    #[serde(default, rename = "plugin")]
    pub plugins: Vec<PluginSpec>,

    /// Prompt tool to install.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<PromptSpec>,
}

impl ShellSettings {
    /// Directory plugins get fetched into.
    ///
    /// Falls back to the framework's custom plugin directory.
    pub fn plugin_dir(&self) -> Option<PathBuf> {
        self.plugin_dir.clone().or_else(|| {
            self.framework
                .as_ref()
                .map(|framework| framework.dir.join("custom").join("plugins"))
        })
    }
}

/// Self-installing shell framework.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ScriptInstall {
    /// Name used in logs.
    pub name: String,

    /// URL of installer script.
    pub url: String,

    /// Directory the framework installs itself into.
    pub dir: PathBuf,

    /// File inside `dir` that only a finished install has, e.g., the entry
    /// script. Without it, any directory at `dir` counts as installed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker: Option<PathBuf>,

    /// Arguments passed to installer script.
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variables set for installer script.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

/// Shell plugin fetched from a Git remote.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PluginSpec {
    pub name: String,
    pub url: String,
}

/// Self-installing prompt tool.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PromptSpec {
    /// Executable the installer provides.
    pub binary: String,

    /// URL of installer script.
    pub url: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

fn default_required_tools() -> Vec<String> {
    vec!["curl".into()]
}

fn default_target() -> PathBuf {
    PathBuf::from("~")
}

fn expand_path(path: &Path) -> Result<PathBuf> {
    shellexpand::full(path.to_string_lossy().as_ref())
        .map(|expanded| PathBuf::from(expanded.into_owned()))
        .map_err(ConfigError::ShellExpansion)
}

/// Configuration error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// Plugins are listed, but neither a plugin directory nor a framework is.
    #[error("shell plugins need either `shell.plugin_dir` or `shell.framework`")]
    NoPluginDir,
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Arch;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[sealed_test(env = [("HOME", "/home/blah"), ("DOTS", "/srv/dots")])]
    fn deserialize_target_declaration() -> anyhow::Result<()> {
        let result: TargetDeclaration = r#"
            [repository]
            url = "https://blah.org/dotfiles.git"
            path = "$DOTS"
            branch = "main"

            [managers]
            secondary = "homebrew"

            [[package]]
            name = "stow"

            [[package]]
            name = "ripgrep"
            binary = "rg"
            manager = "secondary"

            [[package]]
            name = "gnu-sed"
            platform = "macos"

            [[link]]
            package = "zsh"
            files = [".zshrc", ".zprofile"]

            [[link]]
            package = "nvim"

            [shell]
            default = "zsh"

            [shell.framework]
            name = "oh-my-zsh"
            url = "https://blah.org/install.sh"
            dir = "~/.oh-my-zsh"
            marker = "oh-my-zsh.sh"
            args = ["--unattended"]
            env = { RUNZSH = "no" }

            [[shell.plugin]]
            name = "zsh-autosuggestions"
            url = "https://blah.org/zsh-autosuggestions.git"

            [shell.prompt]
            binary = "starship"
            url = "https://blah.org/starship.sh"
            args = ["-y"]
        "#
        .parse()?;

        let expect = TargetDeclaration {
            required_tools: vec!["curl".into()],
            repository: RepositorySettings {
                url: "https://blah.org/dotfiles.git".into(),
                path: "/srv/dots".into(),
                branch: Some("main".into()),
                target: "/home/blah".into(),
                update: false,
            },
            managers: ManagerSettings {
                primary: None,
                secondary: Some(ManagerKind::Homebrew),
            },
            packages: vec![
                PackageSpec::new("stow"),
                PackageSpec {
                    name: "ripgrep".into(),
                    manager: ManagerRole::Secondary,
                    platform: None,
                    binary: Some("rg".into()),
                },
                PackageSpec {
                    name: "gnu-sed".into(),
                    manager: ManagerRole::Primary,
                    platform: Some(OsFamily::MacOs),
                    binary: None,
                },
            ],
            links: vec![
                LinkSpec {
                    package: "zsh".into(),
                    files: vec![".zshrc".into(), ".zprofile".into()],
                },
                LinkSpec {
                    package: "nvim".into(),
                    files: vec![],
                },
            ],
            shell: Some(ShellSettings {
                default: Some("zsh".into()),
                plugin_dir: None,
                framework: Some(ScriptInstall {
                    name: "oh-my-zsh".into(),
                    url: "https://blah.org/install.sh".into(),
                    dir: "/home/blah/.oh-my-zsh".into(),
                    marker: Some("oh-my-zsh.sh".into()),
                    args: vec!["--unattended".into()],
                    env: BTreeMap::from([("RUNZSH".into(), "no".into())]),
                }),
                plugins: vec![PluginSpec {
                    name: "zsh-autosuggestions".into(),
                    url: "https://blah.org/zsh-autosuggestions.git".into(),
                }],
                prompt: Some(PromptSpec {
                    binary: "starship".into(),
                    url: "https://blah.org/starship.sh".into(),
                    args: vec!["-y".into()],
                    env: BTreeMap::new(),
                }),
            }),
        };

        assert_eq!(result, expect);
        assert_eq!(
            result.shell.as_ref().and_then(ShellSettings::plugin_dir),
            Some(PathBuf::from("/home/blah/.oh-my-zsh/custom/plugins"))
        );

        Ok(())
    }

    #[test]
    fn reject_plugins_without_destination() {
        let result = r#"
            [repository]
            url = "https://blah.org/dotfiles.git"
            path = "/srv/dots"

            [[shell.plugin]]
            name = "zsh-autosuggestions"
            url = "https://blah.org/zsh-autosuggestions.git"
        "#
        .parse::<TargetDeclaration>();

        assert!(matches!(result, Err(ConfigError::NoPluginDir)));
    }

    #[test]
    fn reject_unknown_fields() {
        let result = r#"
            [repository]
            url = "https://blah.org/dotfiles.git"
            path = "/srv/dots"
            flavour = "vanilla"
        "#
        .parse::<TargetDeclaration>();

        assert!(matches!(result, Err(ConfigError::Deserialize(_))));
    }

    #[sealed_test(env = [("HOME", "/home/blah")])]
    fn serialized_declaration_parses_back() -> anyhow::Result<()> {
        let declaration: TargetDeclaration = r#"
            [repository]
            url = "https://blah.org/dotfiles.git"
            path = "/srv/dots"

            [[package]]
            name = "zsh"

            [[link]]
            package = "zsh"
            files = [".zshrc"]
        "#
        .parse()?;

        let result: TargetDeclaration = declaration.to_string().parse()?;
        assert_eq!(result, declaration);

        Ok(())
    }

    #[test]
    fn manager_roles_resolve_per_platform() {
        let mac = Platform::new(OsFamily::MacOs, Arch::Arm64);
        let linux = Platform::new(OsFamily::Linux, Arch::X86_64);
        let settings = ManagerSettings::default();

        assert_eq!(
            settings.resolve(ManagerRole::Primary, &mac),
            ManagerKind::Homebrew
        );
        assert_eq!(
            settings.resolve(ManagerRole::Primary, &linux),
            ManagerKind::Apt
        );
        assert_eq!(
            settings.resolve(ManagerRole::Secondary, &linux),
            ManagerKind::Nix
        );

        let settings = ManagerSettings {
            primary: None,
            secondary: Some(ManagerKind::Homebrew),
        };
        assert_eq!(
            settings.resolve(ManagerRole::Secondary, &linux),
            ManagerKind::Homebrew
        );
    }

    #[test]
    fn platform_conditional_packages() {
        let mac = Platform::new(OsFamily::MacOs, Arch::Arm64);
        let linux = Platform::new(OsFamily::Linux, Arch::X86_64);
        let mut package = PackageSpec::new("gnu-sed");
        package.platform = Some(OsFamily::MacOs);

        assert!(package.applies_to(&mac));
        assert!(!package.applies_to(&linux));
        assert!(PackageSpec::new("git").applies_to(&linux));
    }
}
