// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Conflict-safe linking.
//!
//! Managed files are linked from the dotfiles repository into the target
//! directory by a symlink farm tool (GNU Stow). Stow refuses to replace real
//! files, and a naive workaround that deletes them destroys whatever the user
//! had there. So, before stow ever runs, every managed target path holding a
//! real file or directory gets renamed out of the way.
//!
//! # Backups
//!
//! A relocated file keeps its content under `<target>.bak`. If that name is
//! already taken, e.g., by a backup from an earlier run, the relocated file
//! goes to `<target>.bak.<unix-seconds>` instead. Backups are never
//! overwritten, never read back, and never deleted. They are for the user to
//! inspect and clean up.
//!
//! # Folding
//!
//! Stow normally "folds" a directory that only one package populates into a
//! single link to that directory. Files under a folded directory look like
//! regular files to anyone that does not follow links, which would get the
//! repository's own files relocated on the next run. Thus, stow always runs
//! with folding disabled, and targets that already resolve into the repository
//! are skipped regardless of how they got there.

use crate::{
    config::LinkSpec,
    exec::{EffectError, EffectResult, Effects},
    probe::{PathKind, Probe},
};

use std::{
    ffi::OsString,
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::{debug, info, instrument, warn};

/// Name of symlink farm tool executable.
pub const STOW: &str = "stow";

/// Managed file paired with the target path that must link to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkPair {
    /// File inside the repository.
    pub source: PathBuf,

    /// Path inside the target directory.
    pub target: PathBuf,
}

/// Record of a relocated pre-existing file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRecord {
    pub original: PathBuf,
    pub backup: PathBuf,
}

impl Display for BackupRecord {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(
            fmt,
            "{} -> {}",
            self.original.display(),
            self.backup.display()
        )
    }
}

/// Pair every managed file of every package with its target path.
///
/// Probes the package directories, so this must run after the repository is
/// in place to see files discovered through glob patterns or directory walks.
pub fn link_pairs<P>(
    probe: &P,
    stow_dir: &Path,
    target_root: &Path,
    packages: &[LinkSpec],
) -> Vec<LinkPair>
where
    P: Probe + ?Sized,
{
    packages
        .iter()
        .flat_map(|spec| {
            let package_dir = stow_dir.join(&spec.package);
            probe
                .managed_files(&package_dir, &spec.files)
                .into_iter()
                .map(move |relative| LinkPair {
                    source: package_dir.join(&relative),
                    target: target_root.join(&relative),
                })
        })
        .collect()
}

/// Determine an unused backup path for target.
pub fn backup_path<P>(probe: &P, target: &Path) -> PathBuf
where
    P: Probe + ?Sized,
{
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    backup_path_at(probe, target, now)
}

/// Determine an unused backup path for target at a given point in time.
///
/// Prefers `<target>.bak`. Otherwise, uses `<target>.bak.<now>`, bumping the
/// numeric suffix until the name is free.
pub fn backup_path_at<P>(probe: &P, target: &Path, now: u64) -> PathBuf
where
    P: Probe + ?Sized,
{
    let plain = with_suffix(target, ".bak");
    if probe.path_exists(&plain) == PathKind::Missing {
        return plain;
    }

    let mut stamp = now;
    loop {
        let candidate = with_suffix(target, &format!(".bak.{stamp}"));
        if probe.path_exists(&candidate) == PathKind::Missing {
            return candidate;
        }
        stamp = stamp.saturating_add(1);
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Pair every file stow links for packages with its target path.
///
/// Stow links the whole package directory, no matter which subset of it a
/// package declares as managed.
pub fn stowed_pairs<P>(
    probe: &P,
    stow_dir: &Path,
    target_root: &Path,
    packages: &[LinkSpec],
) -> Vec<LinkPair>
where
    P: Probe + ?Sized,
{
    let whole: Vec<LinkSpec> = packages
        .iter()
        .map(|spec| LinkSpec {
            package: spec.package.clone(),
            files: Vec::new(),
        })
        .collect();
    link_pairs(probe, stow_dir, target_root, &whole)
}

/// Move pre-existing real files out of the way of managed links.
///
/// Pushes one record per relocated file into `backups`. Targets that are
/// missing, already symbolic links, or already resolve into the repository
/// are left alone.
///
/// # Errors
///
/// - Return [`EffectError`] if a relocation fails. Files relocated before the
///   failure stay relocated, and their records stay in `backups`.
#[instrument(skip(host, pairs, backups), level = "debug")]
pub fn relocate_conflicts<H>(
    host: &H,
    pairs: &[LinkPair],
    backups: &mut Vec<BackupRecord>,
) -> EffectResult
where
    H: Probe + Effects + ?Sized,
{
    for pair in pairs {
        if host.links_to(&pair.target, &pair.source) {
            debug!("{} already managed", pair.target.display());
            continue;
        }

        match host.path_exists(&pair.target) {
            PathKind::RegularFile | PathKind::Directory => {
                let backup = backup_path(host, &pair.target);
                host.relocate(&pair.target, &backup)?;
                let record = BackupRecord {
                    original: pair.target.clone(),
                    backup,
                };
                warn!("moved existing file out of the way: {record}");
                backups.push(record);
            }
            PathKind::Symlink | PathKind::Missing => {}
        }
    }

    Ok(())
}

/// Link symlink farm packages into target directory without clobbering.
///
/// Relocates every real file in the way of whatever stow is about to link,
/// then restows every package in one go, which also repairs links that
/// drifted to stale locations. Relocations are pushed into `backups` as they
/// happen, so they are accounted for even if stow fails afterwards.
///
/// # Errors
///
/// - Return [`EffectError::ToolMissing`] if stow is not installed. Nothing is
///   relocated in that case.
/// - Return [`EffectError`] if relocation or stow fails.
#[instrument(skip(host, packages, backups), level = "debug")]
pub fn link_packages<H>(
    host: &H,
    stow_dir: &Path,
    target_root: &Path,
    packages: &[LinkSpec],
    backups: &mut Vec<BackupRecord>,
) -> EffectResult
where
    H: Probe + Effects + ?Sized,
{
    if !host.tool_present(STOW) {
        return Err(EffectError::ToolMissing(STOW.into()));
    }

    // INVARIANT: Probe package contents only now, after the repository exists.
    let pairs = stowed_pairs(host, stow_dir, target_root, packages);
    relocate_conflicts(host, &pairs, backups)?;

    let names: Vec<String> = packages.iter().map(|spec| spec.package.clone()).collect();
    info!("restow {}", names.join(", "));
    host.restow(stow_dir, target_root, &names)
}
