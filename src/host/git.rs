// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Git repository plumbing through libgit2.

use crate::{
    exec::{EffectError, EffectResult},
    path::staging_path,
    probe::{path_kind, PathKind},
};

use auth_git2::{GitAuthenticator, Prompter};
use git2::{
    build::{CheckoutBuilder, RepoBuilder},
    AutotagOption, Config, FetchOptions, RemoteCallbacks, Repository, StatusOptions,
};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Password, Text};
use std::{fs, path::Path, time};
use tracing::{debug, info, instrument};

/// Clone repository so that `dest` either holds a complete clone or nothing.
///
/// Clones into a hidden staging sibling of `dest` first, then renames it into
/// place. Leftovers of an earlier interrupted clone at the staging path are
/// discarded before starting over.
///
/// # Errors
///
/// - Return [`EffectError::Occupied`] if something appeared at `dest`.
/// - Return [`EffectError::Git2`] if cloning fails.
/// - Return [`EffectError::Io`] if staging or renaming fails.
#[instrument(level = "debug")]
pub(crate) fn clone_atomic(url: &str, dest: &Path, branch: Option<&str>) -> EffectResult {
    let staging = staging_path(dest);
    if path_kind(&staging) != PathKind::Missing {
        debug!("discard stale staging clone {}", staging.display());
        fs::remove_dir_all(&staging)?;
    }

    if let Some(parent) = dest.parent() {
        mkdirp::mkdirp(parent)?;
    }

    let bar = progress_bar(url)?;
    let prompter = IndicatifPrompter::new(bar.clone());
    let authenticator = GitAuthenticator::default().set_prompter(prompter);
    let config = Config::open_default()?;
    let fo = fetch_options(&bar, &authenticator, &config);

    let mut builder = RepoBuilder::new();
    builder.fetch_options(fo);
    if let Some(branch) = branch {
        builder.branch(branch);
    }
    let result = builder.clone(url, &staging);
    bar.finish_and_clear();
    drop(result?);

    if path_kind(dest) != PathKind::Missing {
        fs::remove_dir_all(&staging)?;
        return Err(EffectError::Occupied {
            from: staging,
            to: dest.into(),
        });
    }

    fs::rename(&staging, dest)?;
    info!("cloned {url} into {}", dest.display());

    Ok(())
}

/// Fast-forward repository at `dest` to its remote branch.
///
/// Follows `branch` if given, otherwise whatever branch is checked out. Never
/// merges or rebases. Diverged history is an error for the user to resolve.
///
/// Managed files are linked into the home directory, so editing a dotfile
/// edits the working tree of this repository. Uncommitted changes to tracked
/// files are therefore never touched. The branch only moves after its new
/// tree was checked out safely.
///
/// # Errors
///
/// - Return [`EffectError::DetachedHead`] if no branch is checked out and
///   none was given.
/// - Return [`EffectError::NotFastForward`] if local history diverged.
/// - Return [`EffectError::DirtyWorkTree`] if tracked files have uncommitted
///   changes.
/// - Return [`EffectError::Git2`] if fetching or checkout fails.
#[instrument(level = "debug")]
pub(crate) fn fast_forward(dest: &Path, branch: Option<&str>) -> EffectResult {
    let repository = Repository::open(dest)?;
    let branch = match branch {
        Some(branch) => branch.to_string(),
        None => current_branch(&repository, dest)?,
    };

    let url = repository
        .find_remote("origin")?
        .url()
        .unwrap_or("origin")
        .to_string();
    let bar = progress_bar(&url)?;
    let prompter = IndicatifPrompter::new(bar.clone());
    let authenticator = GitAuthenticator::default().set_prompter(prompter);
    let config = Config::open_default()?;
    let mut fo = fetch_options(&bar, &authenticator, &config);
    fo.download_tags(AutotagOption::Auto);

    let result = repository
        .find_remote("origin")
        .and_then(|mut remote| remote.fetch(&[branch.as_str()], Some(&mut fo), None));
    bar.finish_and_clear();
    result?;

    let fetch_head = repository.find_reference("FETCH_HEAD")?;
    let incoming = repository.reference_to_annotated_commit(&fetch_head)?;
    let (analysis, _) = repository.merge_analysis(&[&incoming])?;

    if analysis.is_up_to_date() {
        info!("{} already up to date", dest.display());
        return Ok(());
    }

    if !analysis.is_fast_forward() {
        return Err(EffectError::NotFastForward {
            dest: dest.into(),
            branch,
        });
    }

    if has_uncommitted_changes(&repository)? {
        return Err(EffectError::DirtyWorkTree(dest.into()));
    }

    // INVARIANT: Check out before moving the branch, so a refused checkout
    // leaves the repository exactly where it was.
    let target = repository.find_object(incoming.id(), None)?;
    repository.checkout_tree(&target, Some(CheckoutBuilder::default().safe()))?;

    let refname = format!("refs/heads/{branch}");
    let message = format!("dotstrap: fast-forward {branch}");
    match repository.find_reference(&refname) {
        Ok(mut reference) => {
            reference.set_target(incoming.id(), &message)?;
        }
        Err(_) => {
            repository.reference(&refname, incoming.id(), false, &message)?;
        }
    }
    repository.set_head(&refname)?;
    info!("fast-forwarded {} to {}", dest.display(), incoming.id());

    Ok(())
}

fn has_uncommitted_changes(repository: &Repository) -> EffectResult<bool> {
    let mut opts = StatusOptions::new();
    opts.include_untracked(false)
        .include_ignored(false)
        .exclude_submodules(true);
    let statuses = repository.statuses(Some(&mut opts))?;
    for entry in statuses.iter() {
        debug!("uncommitted change {:?}: {:?}", entry.path(), entry.status());
    }

    Ok(!statuses.is_empty())
}

fn current_branch(repository: &Repository, dest: &Path) -> EffectResult<String> {
    if repository.head_detached()? {
        return Err(EffectError::DetachedHead(dest.into()));
    }

    let head = repository.head()?;
    head.shorthand()
        .map(ToString::to_string)
        .ok_or_else(|| EffectError::DetachedHead(dest.into()))
}

fn progress_bar(url: &str) -> EffectResult<ProgressBar> {
    let style = ProgressStyle::with_template(
        "{elapsed_precise:.green}  {msg:<50}  [{wide_bar:.yellow/blue}]",
    )?
    .progress_chars("-Cco.");
    let bar = ProgressBar::new(0);
    bar.set_style(style);
    bar.set_message(url.to_string());
    bar.enable_steady_tick(time::Duration::from_millis(100));

    Ok(bar)
}

fn fetch_options<'a>(
    bar: &'a ProgressBar,
    authenticator: &'a GitAuthenticator,
    config: &'a Config,
) -> FetchOptions<'a> {
    let mut throttle = time::Instant::now();
    let mut rc = RemoteCallbacks::new();
    rc.credentials(authenticator.credentials(config));
    rc.transfer_progress(move |progress| {
        if throttle.elapsed() > time::Duration::from_millis(10) {
            throttle = time::Instant::now();
            bar.set_length(progress.total_objects() as u64);
            bar.set_position(progress.received_objects() as u64);
        }
        true
    });

    let mut fo = FetchOptions::new();
    fo.remote_callbacks(rc);
    fo
}

/// Git2 authentication prompter for progress bar.
#[derive(Debug, Clone)]
pub(crate) struct IndicatifPrompter {
    bar: ProgressBar,
}

impl IndicatifPrompter {
    /// Construct new progress bar authenticator.
    pub(crate) fn new(bar: ProgressBar) -> Self {
        Self { bar }
    }
}

impl Prompter for IndicatifPrompter {
    #[instrument(skip(self, url, _config), level = "debug")]
    fn prompt_username_password(
        &mut self,
        url: &str,
        _config: &git2::Config,
    ) -> Option<(String, String)> {
        info!("authentication required at {url}");
        self.bar.suspend(|| -> Option<(String, String)> {
            let username = Text::new("username").prompt().ok()?;
            let password = Password::new("password")
                .without_confirmation()
                .prompt()
                .ok()?;
            Some((username, password))
        })
    }

    #[instrument(skip(self, username, url, _config), level = "debug")]
    fn prompt_password(
        &mut self,
        username: &str,
        url: &str,
        _config: &git2::Config,
    ) -> Option<String> {
        info!("authentication required at {url} for user {username}");
        self.bar.suspend(|| {
            Password::new("password")
                .without_confirmation()
                .prompt()
                .ok()
        })
    }

    #[instrument(skip(self, ssh_key_path, _config), level = "debug")]
    fn prompt_ssh_key_passphrase(
        &mut self,
        ssh_key_path: &Path,
        _config: &git2::Config,
    ) -> Option<String> {
        info!(
            "authentication required with ssh key at {}",
            ssh_key_path.display()
        );
        self.bar.suspend(|| {
            Password::new("passphrase")
                .without_confirmation()
                .prompt()
                .ok()
        })
    }
}
