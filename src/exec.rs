// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Plan execution.
//!
//! Actions run strictly one after another in plan order. Execution is
//! fail-fast: the first action that fails stops the run, and nothing after it
//! is attempted. Rerunning picks up where things left off, because whatever
//! already succeeded probes as satisfied and drops out of the next plan.
//!
//! Each action walks through the states of [`ActionState`]. After an action's
//! effect reports success, its postcondition is probed once more. A
//! postcondition that still does not hold is not fatal, e.g., a freshly
//! installed tool may only show up on the search path of a new login session.
//! Such actions end up [`ActionState::Unverified`] and get reported.

use crate::{
    config::ManagerRole,
    host::syscall::SyscallError,
    install::InstallError,
    link::{link_packages, BackupRecord},
    plan::{Action, Plan},
    probe::Probe,
};

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};
use tracing::{debug, error, info, instrument, warn};

/// Host mutations.
///
/// Every method blocks until its effect completes. Nothing here decides
/// whether an effect is needed. That is the planner's job.
pub trait Effects {
    /// Clone repository into `dest`.
    ///
    /// A half-finished clone must never be left at `dest`.
    fn clone_repository(&self, url: &str, dest: &Path, branch: Option<&str>) -> EffectResult;

    /// Fast-forward existing repository at `dest`.
    fn update_repository(&self, dest: &Path, branch: Option<&str>) -> EffectResult;

    /// Install package manager in role.
    fn bootstrap_manager(&self, role: ManagerRole) -> EffectResult;

    /// Install package through package manager in role.
    fn install_package(&self, role: ManagerRole, name: &str) -> EffectResult;

    /// Rename file system entry, never overwriting anything at `to`.
    fn relocate(&self, from: &Path, to: &Path) -> EffectResult;

    /// Restow symlink farm packages of `stow_dir` into `target`.
    fn restow(&self, stow_dir: &Path, target: &Path, packages: &[String]) -> EffectResult;

    /// Download and run installer script.
    fn run_installer_script(
        &self,
        url: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
    ) -> EffectResult;

    /// Fetch shell plugin repository into `dir`.
    fn fetch_plugin(&self, url: &str, dir: &Path) -> EffectResult;

    /// Make `shell` the login shell of the current account.
    fn change_login_shell(&self, shell: &str) -> EffectResult;
}

/// Lifecycle of a single action during execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionState {
    Pending,
    Running,
    Succeeded,
    Unverified,
    Failed,
}

/// State of a planned action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub action: Action,
    pub state: ActionState,
}

/// Summary of an execution run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Report {
    /// State of every planned action, in plan order.
    pub outcomes: Vec<Outcome>,

    /// Every pre-existing file moved out of the way during linking.
    pub backups: Vec<BackupRecord>,
}

impl Report {
    fn pending(plan: &Plan) -> Self {
        Self {
            outcomes: plan
                .iter()
                .map(|action| Outcome {
                    action: action.clone(),
                    state: ActionState::Pending,
                })
                .collect(),
            backups: Vec::new(),
        }
    }

    /// Actions whose postcondition did not hold after success.
    pub fn unverified(&self) -> impl Iterator<Item = &Action> {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.state == ActionState::Unverified)
            .map(|outcome| &outcome.action)
    }

    /// Check if every planned action succeeded and verified.
    pub fn is_clean(&self) -> bool {
        self.outcomes
            .iter()
            .all(|outcome| outcome.state == ActionState::Succeeded)
    }

    /// State of every planned action, in plan order.
    pub fn states(&self) -> Vec<ActionState> {
        self.outcomes.iter().map(|outcome| outcome.state).collect()
    }
}

/// Sequential fail-fast plan executor.
#[derive(Debug)]
pub struct Executor<'host, H: ?Sized> {
    host: &'host H,
    current: usize,
}

impl<'host, H> Executor<'host, H>
where
    H: Probe + Effects + ?Sized,
{
    /// Construct new executor over host.
    pub fn new(host: &'host H) -> Self {
        Self { host, current: 0 }
    }

    /// Index of action being run, or last run.
    pub fn current(&self) -> usize {
        self.current
    }

    /// Execute every action of plan in order.
    ///
    /// # Errors
    ///
    /// - Return [`ExecError`] for the first action that fails. It carries the
    ///   report of the whole run, including backups made before the failure.
    #[instrument(skip(self, plan), level = "debug")]
    pub fn run(&mut self, plan: &Plan) -> Result<Report, ExecError> {
        let mut report = Report::pending(plan);
        let total = plan.len();

        for (index, action) in plan.iter().enumerate() {
            self.current = index;
            report.outcomes[index].state = ActionState::Running;
            info!("[{}/{total}] {action}", index + 1);

            if let Err(source) = self.apply(action, &mut report.backups) {
                report.outcomes[index].state = ActionState::Failed;
                error!("[{}/{total}] {action} failed", index + 1);
                return Err(ExecError {
                    number: index + 1,
                    action: action.clone(),
                    report,
                    source,
                });
            }

            report.outcomes[index].state = if action.verify(self.host) {
                debug!("{action} verified");
                ActionState::Succeeded
            } else {
                warn!("{action} reported success, but its result is not visible yet");
                ActionState::Unverified
            };
        }

        Ok(report)
    }

    fn apply(&self, action: &Action, backups: &mut Vec<BackupRecord>) -> EffectResult {
        let host = self.host;
        match action {
            Action::CloneRepository { url, dest, branch } => {
                host.clone_repository(url, dest, branch.as_deref())?
            }
            Action::UpdateRepository { dest, branch } => {
                host.update_repository(dest, branch.as_deref())?
            }
            Action::BootstrapManager { role } => host.bootstrap_manager(*role)?,
            Action::InstallPackage { role, name, .. } => host.install_package(*role, name)?,
            Action::LinkPackages {
                stow_dir,
                target,
                packages,
            } => link_packages(host, stow_dir, target, packages, backups)?,
            Action::InstallFramework { install } => {
                host.run_installer_script(&install.url, &install.args, &install.env)?
            }
            Action::InstallPlugin { url, dir, .. } => host.fetch_plugin(url, dir)?,
            Action::InstallPrompt { prompt } => {
                host.run_installer_script(&prompt.url, &prompt.args, &prompt.env)?
            }
            Action::ChangeShell { shell } => host.change_login_shell(shell)?,
        }

        Ok(())
    }
}

/// Failure of one action, aborting the run.
#[derive(Debug, thiserror::Error)]
#[error("action {number} ({action}) failed")]
pub struct ExecError {
    /// One-based position of failed action in plan.
    pub number: usize,

    pub action: Action,

    /// Everything done before the failure.
    pub report: Report,

    #[source]
    pub source: EffectError,
}

/// Effect error types.
#[derive(Debug, thiserror::Error)]
pub enum EffectError {
    #[error(transparent)]
    Syscall(#[from] SyscallError),

    #[error(transparent)]
    Install(#[from] InstallError),

    #[error(transparent)]
    Git2(#[from] git2::Error),

    #[error(transparent)]
    ProgressStyle(#[from] indicatif::style::TemplateError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("cannot move {from:?} to {to:?}")]
    Relocate {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("refusing to move {from:?} onto existing {to:?}")]
    Occupied { from: PathBuf, to: PathBuf },

    #[error("required tool {0:?} is not installed")]
    ToolMissing(String),

    #[error("cannot fast-forward {dest:?} to {branch}")]
    NotFastForward { dest: PathBuf, branch: String },

    #[error("repository at {0:?} has uncommitted changes, commit or stash them first")]
    DirtyWorkTree(PathBuf),

    #[error("repository at {0:?} has no branch to follow")]
    DetachedHead(PathBuf),
}

/// Friendly result alias :3
pub type EffectResult<T = (), E = EffectError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{LinkSpec, ScriptInstall},
        plan::ActionKind,
        probe::PathKind,
    };
    use pretty_assertions::assert_eq;
    use std::{cell::RefCell, collections::BTreeSet};

    /// Host that records effects, and claims success for them.
    #[derive(Default)]
    struct Recorder {
        calls: RefCell<Vec<String>>,
        fail_on: Option<&'static str>,
        present: RefCell<BTreeSet<String>>,
        stale: BTreeSet<String>,
    }

    impl Recorder {
        fn record(&self, call: String) -> EffectResult {
            let failing = self.fail_on.is_some_and(|fail| call.starts_with(fail));
            self.calls.borrow_mut().push(call.clone());
            if failing {
                return Err(EffectError::ToolMissing(call));
            }
            self.present.borrow_mut().insert(call);
            Ok(())
        }

        fn has(&self, call: &str) -> bool {
            !self.stale.contains(call) && self.present.borrow().contains(call)
        }
    }

    impl Probe for Recorder {
        fn tool_present(&self, name: &str) -> bool {
            name == "stow" || self.has(&format!("install {name}"))
        }

        fn manager_present(&self, role: ManagerRole) -> bool {
            self.has(&format!("bootstrap {role}"))
        }

        fn package_installed(&self, _role: ManagerRole, name: &str) -> bool {
            self.has(&format!("install {name}"))
        }

        fn path_exists(&self, path: &Path) -> PathKind {
            if self.has(&format!("clone {}", path.display())) {
                PathKind::Directory
            } else {
                PathKind::Missing
            }
        }

        fn links_to(&self, _link: &Path, _source: &Path) -> bool {
            self.has("restow")
        }

        fn is_login_shell(&self, shell: &str) -> bool {
            self.has(&format!("chsh {shell}"))
        }

        fn managed_files(&self, _package_dir: &Path, patterns: &[String]) -> Vec<PathBuf> {
            patterns.iter().map(PathBuf::from).collect()
        }
    }

    impl Effects for Recorder {
        fn clone_repository(&self, _url: &str, dest: &Path, _branch: Option<&str>) -> EffectResult {
            self.record(format!("clone {}", dest.display()))
        }

        fn update_repository(&self, dest: &Path, _branch: Option<&str>) -> EffectResult {
            self.record(format!("update {}", dest.display()))
        }

        fn bootstrap_manager(&self, role: ManagerRole) -> EffectResult {
            self.record(format!("bootstrap {role}"))
        }

        fn install_package(&self, _role: ManagerRole, name: &str) -> EffectResult {
            self.record(format!("install {name}"))
        }

        fn relocate(&self, from: &Path, _to: &Path) -> EffectResult {
            self.record(format!("relocate {}", from.display()))
        }

        fn restow(&self, _stow_dir: &Path, _target: &Path, _packages: &[String]) -> EffectResult {
            self.record("restow".into())
        }

        fn run_installer_script(
            &self,
            url: &str,
            _args: &[String],
            _env: &BTreeMap<String, String>,
        ) -> EffectResult {
            self.record(format!("script {url}"))
        }

        fn fetch_plugin(&self, url: &str, _dir: &Path) -> EffectResult {
            self.record(format!("plugin {url}"))
        }

        fn change_login_shell(&self, shell: &str) -> EffectResult {
            self.record(format!("chsh {shell}"))
        }
    }

    fn plan_of(actions: Vec<Action>) -> Plan {
        Plan::new(actions).expect("actions are orderable")
    }

    fn sample_actions() -> Vec<Action> {
        vec![
            Action::CloneRepository {
                url: "https://blah.org/dotfiles.git".into(),
                dest: "/home/blah/.dotfiles".into(),
                branch: None,
            },
            Action::BootstrapManager {
                role: ManagerRole::Primary,
            },
            Action::InstallPackage {
                role: ManagerRole::Primary,
                name: "zsh".into(),
                binary: "zsh".into(),
            },
            Action::LinkPackages {
                stow_dir: "/home/blah/.dotfiles".into(),
                target: "/home/blah".into(),
                packages: vec![LinkSpec {
                    package: "zsh".into(),
                    files: vec![".zshrc".into()],
                }],
            },
            Action::ChangeShell {
                shell: "zsh".into(),
            },
        ]
    }

    #[test]
    fn run_every_action_in_order() -> anyhow::Result<()> {
        let host = Recorder::default();
        let mut executor = Executor::new(&host);
        let report = executor.run(&plan_of(sample_actions()))?;

        assert_eq!(
            *host.calls.borrow(),
            vec![
                "clone /home/blah/.dotfiles",
                "bootstrap primary",
                "install zsh",
                "restow",
                "chsh zsh",
            ]
        );
        assert!(report.is_clean());
        assert!(report.backups.is_empty());
        assert_eq!(report.states(), vec![ActionState::Succeeded; 5]);
        assert_eq!(executor.current(), 4);

        Ok(())
    }

    #[test]
    fn first_failure_stops_the_run() {
        let host = Recorder {
            fail_on: Some("install zsh"),
            ..Default::default()
        };
        let mut executor = Executor::new(&host);
        let error = match executor.run(&plan_of(sample_actions())) {
            Err(error) => error,
            Ok(report) => panic!("expected failure, got {report:?}"),
        };

        assert_eq!(error.number, 3);
        assert_eq!(error.action.kind(), ActionKind::InstallPackage);
        assert_eq!(executor.current(), 2);
        assert_eq!(
            *host.calls.borrow(),
            vec!["clone /home/blah/.dotfiles", "bootstrap primary", "install zsh"]
        );
        assert_eq!(
            error.report.states(),
            vec![
                ActionState::Succeeded,
                ActionState::Succeeded,
                ActionState::Failed,
                ActionState::Pending,
                ActionState::Pending,
            ]
        );
    }

    #[test]
    fn invisible_result_is_unverified_not_fatal() -> anyhow::Result<()> {
        let mut stale = BTreeSet::new();
        stale.insert("install starship".to_string());
        let host = Recorder {
            stale,
            ..Default::default()
        };
        let actions = vec![
            Action::InstallPackage {
                role: ManagerRole::Primary,
                name: "starship".into(),
                binary: "starship".into(),
            },
            Action::InstallFramework {
                install: ScriptInstall {
                    name: "oh-my-zsh".into(),
                    url: "https://blah.org/install.sh".into(),
                    dir: "/home/blah/.oh-my-zsh".into(),
                    marker: None,
                    args: vec![],
                    env: BTreeMap::new(),
                },
            },
        ];
        let mut executor = Executor::new(&host);
        let report = executor.run(&plan_of(actions))?;

        assert!(!report.is_clean());
        let unverified: Vec<String> = report
            .unverified()
            .map(|action| action.to_string())
            .collect();
        assert_eq!(
            unverified,
            vec![
                "install starship with primary package manager",
                "install oh-my-zsh",
            ]
        );
        assert_eq!(host.calls.borrow().len(), 2);

        Ok(())
    }

    #[test]
    fn empty_plan_does_nothing() -> anyhow::Result<()> {
        let host = Recorder::default();
        let report = Executor::new(&host).run(&Plan::default())?;
        assert!(report.outcomes.is_empty());
        assert!(host.calls.borrow().is_empty());

        Ok(())
    }
}
