// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Action planning.
//!
//! The planner compares a [`TargetDeclaration`] against what the host already
//! has, and produces the shortest ordered list of [`Action`]s that closes the
//! gap. Anything already satisfied is left out entirely instead of being
//! planned as a no-op, so a second run over a converged machine plans nothing.
//!
//! # Ordering
//!
//! Actions of different kinds depend on each other, e.g., packages cannot be
//! installed before their manager exists. These dependencies live in the
//! [`ORDERING`] table rather than in the order of some function calls, and the
//! planner sorts whatever subset of actions is active against that table.
//! Actions with no constraint between them keep the order they were
//! declared in, so identical input always yields an identical plan.

use crate::{
    config::{LinkSpec, ManagerRole, PromptSpec, ScriptInstall, TargetDeclaration},
    link::link_pairs,
    platform::Platform,
    probe::{PathKind, Probe},
};

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::PathBuf,
};
use tracing::{debug, instrument};

/// Kind of action, used for ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    CloneRepository,
    UpdateRepository,
    BootstrapManager,
    InstallPackage,
    LinkPackages,
    InstallFramework,
    InstallPlugin,
    InstallPrompt,
    ChangeShell,
}

/// Must-precede relation between action kinds.
///
/// Each `(before, after)` pair means every active action of kind `before`
/// runs ahead of every active action of kind `after`. Login shell change and
/// plugin installation are deliberately unrelated.
pub const ORDERING: &[(ActionKind, ActionKind)] = &[
    (ActionKind::BootstrapManager, ActionKind::InstallPackage),
    (ActionKind::InstallPackage, ActionKind::LinkPackages),
    (ActionKind::CloneRepository, ActionKind::UpdateRepository),
    (ActionKind::CloneRepository, ActionKind::LinkPackages),
    (ActionKind::UpdateRepository, ActionKind::LinkPackages),
    (ActionKind::LinkPackages, ActionKind::InstallPlugin),
    (ActionKind::InstallFramework, ActionKind::InstallPlugin),
    (ActionKind::InstallPackage, ActionKind::InstallFramework),
    (ActionKind::InstallPackage, ActionKind::InstallPrompt),
    (ActionKind::InstallPackage, ActionKind::ChangeShell),
];

/// Check if actions of kind `before` must run ahead of kind `after`.
pub fn must_precede(before: ActionKind, after: ActionKind) -> bool {
    ORDERING.contains(&(before, after))
}

/// Single idempotent unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Clone dotfiles repository.
    CloneRepository {
        url: String,
        dest: PathBuf,
        branch: Option<String>,
    },

    /// Fast-forward existing dotfiles repository.
    UpdateRepository {
        dest: PathBuf,
        branch: Option<String>,
    },

    /// Install package manager itself.
    BootstrapManager { role: ManagerRole },

    /// Install one package.
    InstallPackage {
        role: ManagerRole,
        name: String,
        binary: String,
    },

    /// Link symlink farm packages into target directory.
    LinkPackages {
        stow_dir: PathBuf,
        target: PathBuf,
        packages: Vec<LinkSpec>,
    },

    /// Run shell framework installer.
    InstallFramework { install: ScriptInstall },

    /// Fetch shell plugin.
    InstallPlugin {
        name: String,
        url: String,
        dir: PathBuf,
    },

    /// Run prompt tool installer.
    InstallPrompt { prompt: PromptSpec },

    /// Make shell the login shell.
    ChangeShell { shell: String },
}

impl Action {
    /// Kind of action.
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::CloneRepository { .. } => ActionKind::CloneRepository,
            Self::UpdateRepository { .. } => ActionKind::UpdateRepository,
            Self::BootstrapManager { .. } => ActionKind::BootstrapManager,
            Self::InstallPackage { .. } => ActionKind::InstallPackage,
            Self::LinkPackages { .. } => ActionKind::LinkPackages,
            Self::InstallFramework { .. } => ActionKind::InstallFramework,
            Self::InstallPlugin { .. } => ActionKind::InstallPlugin,
            Self::InstallPrompt { .. } => ActionKind::InstallPrompt,
            Self::ChangeShell { .. } => ActionKind::ChangeShell,
        }
    }

    /// Check if host already is in the state this action produces.
    ///
    /// Repository updates are never satisfied, because only the remote knows
    /// whether there is anything new.
    pub fn is_satisfied<P>(&self, probe: &P) -> bool
    where
        P: Probe + ?Sized,
    {
        match self {
            Self::CloneRepository { dest, .. } => probe.path_exists(dest) == PathKind::Directory,
            Self::UpdateRepository { .. } => false,
            Self::BootstrapManager { role } => probe.manager_present(*role),
            Self::InstallPackage { role, name, binary } => {
                probe.tool_present(binary) || probe.package_installed(*role, name)
            }
            Self::LinkPackages {
                stow_dir,
                target,
                packages,
            } => {
                probe.path_exists(stow_dir) == PathKind::Directory
                    && link_pairs(probe, stow_dir, target, packages)
                        .iter()
                        .all(|pair| probe.links_to(&pair.target, &pair.source))
            }
            Self::InstallFramework { install } => {
                probe.path_exists(&install.dir) == PathKind::Directory
                    && install.marker.as_ref().is_none_or(|marker| {
                        probe.path_exists(&install.dir.join(marker)) != PathKind::Missing
                    })
            }
            Self::InstallPlugin { dir, .. } => probe.plugin_present(dir),
            Self::InstallPrompt { prompt } => probe.tool_present(&prompt.binary),
            Self::ChangeShell { shell } => probe.is_login_shell(shell),
        }
    }

    /// Check if action visibly took effect.
    ///
    /// Same as [`Action::is_satisfied`], except repository updates only need
    /// the repository to still be there.
    pub fn verify<P>(&self, probe: &P) -> bool
    where
        P: Probe + ?Sized,
    {
        match self {
            Self::UpdateRepository { dest, .. } => probe.path_exists(dest) == PathKind::Directory,
            _ => self.is_satisfied(probe),
        }
    }
}

impl Display for Action {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::CloneRepository { url, dest, .. } => {
                write!(fmt, "clone {url} into {}", dest.display())
            }
            Self::UpdateRepository { dest, .. } => write!(fmt, "update {}", dest.display()),
            Self::BootstrapManager { role } => write!(fmt, "bootstrap {role} package manager"),
            Self::InstallPackage { role, name, .. } => {
                write!(fmt, "install {name} with {role} package manager")
            }
            Self::LinkPackages {
                target, packages, ..
            } => {
                let names: Vec<&str> = packages.iter().map(|spec| spec.package.as_str()).collect();
                write!(fmt, "link {} into {}", names.join(", "), target.display())
            }
            Self::InstallFramework { install } => write!(fmt, "install {}", install.name),
            Self::InstallPlugin { name, .. } => write!(fmt, "install shell plugin {name}"),
            Self::InstallPrompt { prompt } => write!(fmt, "install prompt {}", prompt.binary),
            Self::ChangeShell { shell } => write!(fmt, "make {shell} the login shell"),
        }
    }
}

/// Knobs that change what gets planned.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PlanOptions {
    /// Fast-forward an existing repository clone.
    pub update: bool,
}

/// Ordered listing of actions to execute.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Plan {
    actions: Vec<Action>,
}

impl Plan {
    /// Construct plan out of arbitrary actions, sorting them into a valid order.
    ///
    /// # Errors
    ///
    /// - Return [`PlanError::OrderingCycle`] if actions cannot be ordered.
    pub fn new(actions: Vec<Action>) -> Result<Self> {
        Ok(Self {
            actions: order(actions)?,
        })
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Action> {
        self.actions.iter()
    }
}

impl Display for Plan {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        if self.actions.is_empty() {
            return writeln!(fmt, "nothing to do");
        }

        for (index, action) in self.actions.iter().enumerate() {
            writeln!(fmt, "{:>3}. {action}", index + 1)?;
        }

        Ok(())
    }
}

/// Plan actions for target declaration.
#[derive(Debug, Clone, Copy)]
pub struct Planner<'a> {
    declaration: &'a TargetDeclaration,
    platform: Platform,
    options: PlanOptions,
}

impl<'a> Planner<'a> {
    /// Construct new planner.
    pub fn new(
        declaration: &'a TargetDeclaration,
        platform: Platform,
        options: PlanOptions,
    ) -> Self {
        Self {
            declaration,
            platform,
            options,
        }
    }

    /// List every action the declaration could call for, in declaration order.
    ///
    /// Nothing is probed. Packages restricted to other platforms are dropped,
    /// and bootstraps are only listed for manager roles some package uses.
    pub fn candidates(&self) -> Vec<Action> {
        let declaration = self.declaration;
        let repository = &declaration.repository;
        let mut actions = vec![Action::CloneRepository {
            url: repository.url.clone(),
            dest: repository.path.clone(),
            branch: repository.branch.clone(),
        }];

        if self.options.update || repository.update {
            actions.push(Action::UpdateRepository {
                dest: repository.path.clone(),
                branch: repository.branch.clone(),
            });
        }

        let packages: Vec<_> = declaration.packages_for(&self.platform).collect();
        for role in [ManagerRole::Primary, ManagerRole::Secondary] {
            if packages.iter().any(|package| package.manager == role) {
                actions.push(Action::BootstrapManager { role });
            }
        }

        actions.extend(packages.iter().map(|package| Action::InstallPackage {
            role: package.manager,
            name: package.name.clone(),
            binary: package.binary().to_string(),
        }));

        if !declaration.links.is_empty() {
            actions.push(Action::LinkPackages {
                stow_dir: repository.path.clone(),
                target: repository.target.clone(),
                packages: declaration.links.clone(),
            });
        }

        if let Some(shell) = &declaration.shell {
            if let Some(install) = &shell.framework {
                actions.push(Action::InstallFramework {
                    install: install.clone(),
                });
            }

            if let Some(plugin_dir) = shell.plugin_dir() {
                actions.extend(shell.plugins.iter().map(|plugin| Action::InstallPlugin {
                    name: plugin.name.clone(),
                    url: plugin.url.clone(),
                    dir: plugin_dir.join(&plugin.name),
                }));
            }

            if let Some(prompt) = &shell.prompt {
                actions.push(Action::InstallPrompt {
                    prompt: prompt.clone(),
                });
            }

            if let Some(default) = &shell.default {
                actions.push(Action::ChangeShell {
                    shell: default.clone(),
                });
            }
        }

        actions
    }

    /// Plan minimal ordered action listing for current host state.
    ///
    /// # Errors
    ///
    /// - Return [`PlanError::OrderingCycle`] if the ordering table cannot be
    ///   satisfied.
    #[instrument(skip(self, probe), level = "debug")]
    pub fn plan<P>(&self, probe: &P) -> Result<Plan>
    where
        P: Probe + ?Sized,
    {
        let pending = self
            .candidates()
            .into_iter()
            .filter(|action| {
                let satisfied = action.is_satisfied(probe);
                if satisfied {
                    debug!("already satisfied: {action}");
                }
                !satisfied
            })
            .collect();

        Plan::new(pending)
    }
}

/// Stably sort actions against the [`ORDERING`] table.
///
/// Repeatedly takes the earliest listed action that no remaining action must
/// precede.
///
/// # Errors
///
/// - Return [`PlanError::OrderingCycle`] if no action can go next.
pub fn order(mut remaining: Vec<Action>) -> Result<Vec<Action>> {
    let mut ordered = Vec::with_capacity(remaining.len());

    while !remaining.is_empty() {
        let next = remaining.iter().position(|action| {
            !remaining
                .iter()
                .any(|other| must_precede(other.kind(), action.kind()))
        });

        match next {
            Some(index) => ordered.push(remaining.remove(index)),
            None => {
                return Err(PlanError::OrderingCycle(
                    remaining.iter().map(Action::kind).collect(),
                ))
            }
        }
    }

    Ok(ordered)
}

/// Planning error types.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// Ordering table contradicts itself over these kinds.
    #[error("cannot order actions of kinds {0:?}")]
    OrderingCycle(Vec<ActionKind>),
}

/// Friendly result alias :3
pub type Result<T, E = PlanError> = std::result::Result<T, E>;
