// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use dotstrap::{
    config::TargetDeclaration,
    engine::{ConvergeError, Engine},
    host::Host,
    path::default_declaration_path,
    plan::PlanOptions,
    platform::Platform,
    probe::HostEnv,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::{fs, path::PathBuf, process::exit};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const EXIT_SUCCESS: i32 = 0;
const EXIT_FAILURE: i32 = 1;
const EXIT_UNVERIFIED: i32 = 2;
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "dotstrap [options] <command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Path to target declaration file.
    #[arg(short, long, global = true, value_name = "path")]
    pub config: Option<PathBuf>,

    /// Show debug output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<i32> {
        match self.command {
            Command::Plan(opts) => run_plan(self.config, opts),
            Command::Apply(opts) => run_apply(self.config, opts),
            Command::Platform => run_platform(),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Show actions needed to converge this machine without performing them.
    #[command(override_usage = "dotstrap plan [options]")]
    Plan(PlanCmdOptions),

    /// Converge this machine to its target declaration.
    #[command(override_usage = "dotstrap apply [options]")]
    Apply(ApplyOptions),

    /// Show detected platform.
    #[command(override_usage = "dotstrap platform")]
    Platform,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct PlanCmdOptions {
    /// Include fast-forward of an existing dotfiles repository.
    #[arg(short, long)]
    pub update: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ApplyOptions {
    /// Fast-forward an existing dotfiles repository.
    #[arg(short, long)]
    pub update: bool,

    /// Fail if any action could not be verified afterwards.
    #[arg(short, long)]
    pub strict: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    // INVARIANT: Converging blocks on child processes, so keep it off the
    // runtime thread that watches for interruption.
    let status = tokio::select! {
        result = tokio::task::spawn_blocking(move || cli.run()) => match result {
            Ok(Ok(status)) => status,
            Ok(Err(error)) => {
                error!("{error:?}");
                EXIT_FAILURE
            }
            Err(error) => {
                error!("{error}");
                EXIT_FAILURE
            }
        },
        Ok(()) = tokio::signal::ctrl_c() => {
            error!("interrupted, rerun to pick up where this run stopped");
            EXIT_INTERRUPTED
        }
    };

    exit(status)
}

fn load_declaration(path: Option<PathBuf>) -> Result<TargetDeclaration> {
    let path = match path {
        Some(path) => path,
        None => default_declaration_path()?,
    };

    let data = fs::read_to_string(&path)
        .with_context(|| format!("cannot read target declaration {}", path.display()))?;
    let declaration = data
        .parse::<TargetDeclaration>()
        .with_context(|| format!("malformed target declaration {}", path.display()))?;

    Ok(declaration)
}

fn run_plan(config: Option<PathBuf>, opts: PlanCmdOptions) -> Result<i32> {
    let declaration = load_declaration(config)?;
    let platform = Platform::detect();
    let host = Host::new(HostEnv::capture()?, platform, &declaration.managers);
    let options = PlanOptions { update: opts.update };

    let plan = Engine::new(&declaration, platform, &host, options).plan()?;
    print!("{plan}");

    Ok(EXIT_SUCCESS)
}

fn run_apply(config: Option<PathBuf>, opts: ApplyOptions) -> Result<i32> {
    let declaration = load_declaration(config)?;
    let platform = Platform::detect();
    let host = Host::new(HostEnv::capture()?, platform, &declaration.managers);
    let options = PlanOptions {
        update: opts.update,
    };

    let report = match Engine::new(&declaration, platform, &host, options).apply() {
        Ok(report) => report,
        Err(ConvergeError::Action(error)) => {
            for backup in &error.report.backups {
                info!("backup: {backup}");
            }
            return Err(error.into());
        }
        Err(error) => return Err(error.into()),
    };

    let unverified: Vec<String> = report.unverified().map(ToString::to_string).collect();
    for action in &unverified {
        warn!("unverified: {action}");
    }

    if opts.strict && !unverified.is_empty() {
        error!("{} action(s) could not be verified", unverified.len());
        return Ok(EXIT_UNVERIFIED);
    }

    Ok(EXIT_SUCCESS)
}

fn run_platform() -> Result<i32> {
    let platform = Platform::detect();
    println!("{platform}");
    if !platform.is_supported() {
        warn!("{platform} is not supported");
    }

    Ok(EXIT_SUCCESS)
}
