// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Idempotent machine bootstrapping.
//!
//! Dotstrap takes a fresh or partially configured macOS or Linux machine to a
//! declared target state: package managers bootstrapped, packages installed,
//! a dotfiles repository cloned, its files linked into the home directory, and
//! the login shell set up with its framework, plugins, and prompt.
//!
//! Every run follows the same loop:
//!
//! 1. Detect the platform once, see [`platform`].
//! 2. Probe what already exists, see [`probe`].
//! 3. Plan the missing actions in a valid order, see [`plan`].
//! 4. Execute them one by one, halting on the first failure, see [`exec`].
//!
//! Running twice in a row performs no work the second time. Files that stand
//! in the way of managed links are moved aside, never deleted, see [`link`].

pub mod config;
pub mod engine;
pub mod exec;
pub mod host;
pub mod install;
pub mod link;
pub mod path;
pub mod plan;
pub mod platform;
pub mod probe;

pub use config::TargetDeclaration;
pub use engine::{ConvergeError, Engine};
pub use exec::{Effects, Report};
pub use host::Host;
pub use plan::{Plan, PlanOptions};
pub use platform::Platform;
pub use probe::{HostEnv, Probe};
