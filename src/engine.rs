// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Convergence engine.
//!
//! Drives one run end to end: preflight checks, planning, then execution.
//! Preflight failures abort before anything on the host is touched.

use crate::{
    config::TargetDeclaration,
    exec::{Effects, ExecError, Executor, Report},
    plan::{Plan, PlanError, PlanOptions, Planner},
    platform::Platform,
    probe::Probe,
};

use tracing::{error, info, instrument};

/// Converge host toward target declaration.
#[derive(Debug)]
pub struct Engine<'a, H: ?Sized> {
    declaration: &'a TargetDeclaration,
    platform: Platform,
    host: &'a H,
    options: PlanOptions,
}

impl<'a, H> Engine<'a, H>
where
    H: Probe + Effects + ?Sized,
{
    /// Construct new engine.
    pub fn new(
        declaration: &'a TargetDeclaration,
        platform: Platform,
        host: &'a H,
        options: PlanOptions,
    ) -> Self {
        Self {
            declaration,
            platform,
            host,
            options,
        }
    }

    /// Check that a run can even start.
    ///
    /// # Errors
    ///
    /// - Return [`ConvergeError::Unsupported`] if platform is unsupported.
    /// - Return [`ConvergeError::MissingTool`] for the first missing
    ///   required tool. Every missing tool is logged.
    pub fn preflight(&self) -> Result<()> {
        if !self.platform.is_supported() {
            return Err(ConvergeError::Unsupported(self.platform));
        }

        let missing: Vec<&String> = self
            .declaration
            .required_tools
            .iter()
            .filter(|tool| !self.host.tool_present(tool))
            .collect();
        for tool in &missing {
            error!("required tool {tool:?} is not installed");
        }

        match missing.first() {
            Some(tool) => Err(ConvergeError::MissingTool(tool.to_string())),
            None => Ok(()),
        }
    }

    /// Plan actions needed to converge host, without mutating anything.
    ///
    /// # Errors
    ///
    /// - Return [`ConvergeError`] if preflight or planning fails.
    #[instrument(skip(self), level = "debug")]
    pub fn plan(&self) -> Result<Plan> {
        self.preflight()?;
        let plan = Planner::new(self.declaration, self.platform, self.options).plan(self.host)?;
        Ok(plan)
    }

    /// Converge host.
    ///
    /// # Errors
    ///
    /// - Return [`ConvergeError`] if preflight, planning, or any action fails.
    #[instrument(skip(self), level = "debug")]
    pub fn apply(&self) -> Result<Report> {
        let plan = self.plan()?;
        if plan.is_empty() {
            info!("{} already converged", self.platform);
            return Ok(Report::default());
        }

        info!("converging {} with {} action(s)", self.platform, plan.len());
        let report = Executor::new(self.host)
            .run(&plan)
            .map_err(|error| ConvergeError::Action(Box::new(error)))?;

        for backup in &report.backups {
            info!("backup: {backup}");
        }

        Ok(report)
    }
}

/// Convergence error types.
#[derive(Debug, thiserror::Error)]
pub enum ConvergeError {
    #[error("platform {0} is not supported")]
    Unsupported(Platform),

    #[error("required tool {0:?} is not installed")]
    MissingTool(String),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Action(Box<ExecError>),
}

/// Friendly result alias :3
pub type Result<T, E = ConvergeError> = std::result::Result<T, E>;
