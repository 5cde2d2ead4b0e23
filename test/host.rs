// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::fixture::RepoFixture;

use dotstrap::{
    config::ManagerSettings,
    exec::{EffectError, Effects},
    host::Host,
    path::staging_path,
    platform::{Arch, OsFamily, Platform},
    probe::{HostEnv, PathKind, Probe},
};

use anyhow::Result;
use git2::Repository;
use pretty_assertions::assert_eq;
use sealed_test::prelude::*;
use std::{
    fs::{self, read_to_string, write},
    path::{Path, PathBuf},
};

fn host(home: &Path) -> Host {
    let env = HostEnv {
        search_path: vec![],
        home: home.to_path_buf(),
        user: None,
        shell: None,
    };
    let platform = Platform::new(OsFamily::Linux, Arch::X86_64);
    Host::new(env, platform, &ManagerSettings::default())
}

fn upstream() -> Result<(RepoFixture, PathBuf)> {
    let cwd = std::env::current_dir()?;
    let fixture = RepoFixture::new(cwd.join("upstream"))?;
    fixture.stage_and_commit(".zshrc", "managed zshrc")?;
    Ok((fixture, cwd))
}

#[sealed_test]
fn clone_lands_complete_or_not_at_all() -> Result<()> {
    let (fixture, cwd) = upstream()?;
    let host = host(&cwd);
    let dest = cwd.join("home/.dotfiles");

    // Leftovers of an interrupted clone.
    fs::create_dir_all(staging_path(&dest))?;
    write(staging_path(&dest).join("junk"), "stale")?;

    host.clone_repository(&fixture.url(), &dest, Some("main"))?;

    assert_eq!(host.path_exists(&dest), PathKind::Directory);
    assert_eq!(read_to_string(dest.join(".zshrc"))?, "managed zshrc");
    assert_eq!(host.path_exists(&staging_path(&dest)), PathKind::Missing);

    Ok(())
}

#[sealed_test]
fn plugin_fetch_is_a_plain_clone() -> Result<()> {
    let (fixture, cwd) = upstream()?;
    let host = host(&cwd);
    let dir = cwd.join(".oh-my-zsh/custom/plugins/zsh-autosuggestions");

    host.fetch_plugin(&fixture.url(), &dir)?;

    assert!(host.plugin_present(&dir));
    assert_eq!(read_to_string(dir.join(".zshrc"))?, "managed zshrc");

    Ok(())
}

#[sealed_test]
fn update_fast_forwards_checked_out_branch() -> Result<()> {
    let (fixture, cwd) = upstream()?;
    let host = host(&cwd);
    let dest = cwd.join(".dotfiles");
    host.clone_repository(&fixture.url(), &dest, None)?;

    fixture.stage_and_commit(".zprofile", "managed zprofile")?;
    host.update_repository(&dest, None)?;
    assert_eq!(read_to_string(dest.join(".zprofile"))?, "managed zprofile");

    // Nothing new upstream is not an error.
    host.update_repository(&dest, Some("main"))?;

    Ok(())
}

#[sealed_test]
fn diverged_clone_is_not_touched() -> Result<()> {
    let (fixture, cwd) = upstream()?;
    let host = host(&cwd);
    let dest = cwd.join(".dotfiles");
    host.clone_repository(&fixture.url(), &dest, None)?;

    fixture.stage_and_commit(".zprofile", "upstream change")?;
    let local = RepoFixture::open(&dest)?;
    local.stage_and_commit(".zlogin", "local change")?;

    let result = host.update_repository(&dest, None);
    assert!(matches!(result, Err(EffectError::NotFastForward { .. })));
    assert_eq!(
        Repository::open(&dest)?
            .head()?
            .peel_to_commit()?
            .message(),
        Some("chore: add \".zlogin\"")
    );

    Ok(())
}

#[sealed_test]
fn update_refuses_to_discard_uncommitted_edits() -> Result<()> {
    let (fixture, cwd) = upstream()?;
    let host = host(&cwd);
    let dest = cwd.join(".dotfiles");
    host.clone_repository(&fixture.url(), &dest, None)?;
    let before = Repository::open(&dest)?.head()?.peel_to_commit()?.id();

    // Editing ~/.zshrc through its link edits the clone.
    write(dest.join(".zshrc"), "user edit not yet committed")?;
    fixture.stage_and_commit(".zprofile", "managed zprofile")?;

    let result = host.update_repository(&dest, None);
    assert!(matches!(result, Err(EffectError::DirtyWorkTree(path)) if path == dest));
    assert_eq!(
        read_to_string(dest.join(".zshrc"))?,
        "user edit not yet committed"
    );
    assert_eq!(host.path_exists(&dest.join(".zprofile")), PathKind::Missing);
    assert_eq!(
        Repository::open(&dest)?.head()?.peel_to_commit()?.id(),
        before
    );

    Ok(())
}
