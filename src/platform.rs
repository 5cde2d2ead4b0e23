// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Host platform detection.
//!
//! Every branch that depends on the host operating system or CPU architecture
//! consults a single [`Platform`] value. That value is determined once per run
//! at the process boundary and handed explicitly to whatever needs it, so the
//! rest of the crate can be driven with an injected platform in tests.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};

/// Operating system family of the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    #[serde(rename = "macos")]
    MacOs,
    Linux,
    Unsupported,
}

impl Display for OsFamily {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::MacOs => fmt.write_str("macos"),
            Self::Linux => fmt.write_str("linux"),
            Self::Unsupported => fmt.write_str("unsupported"),
        }
    }
}

/// CPU architecture of the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    #[serde(rename = "x86_64")]
    X86_64,
    Arm64,
}

impl Display for Arch {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::X86_64 => fmt.write_str("x86_64"),
            Self::Arm64 => fmt.write_str("arm64"),
        }
    }
}

/// Operating system and architecture pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Platform {
    pub os: OsFamily,
    pub arch: Arch,
}

impl Platform {
    /// Construct platform from known parts.
    pub fn new(os: OsFamily, arch: Arch) -> Self {
        Self { os, arch }
    }

    /// Detect platform of running host.
    ///
    /// Never fails. Anything outside macOS or Linux on x86_64 or arm64 is
    /// reported as [`OsFamily::Unsupported`].
    pub fn detect() -> Self {
        Self::from_parts(std::env::consts::OS, std::env::consts::ARCH)
    }

    /// Map raw OS and architecture identifiers to a platform.
    ///
    /// Identifiers follow the naming of [`std::env::consts`].
    pub fn from_parts(os: &str, arch: &str) -> Self {
        let arch = match arch {
            "x86_64" => Some(Arch::X86_64),
            "aarch64" | "arm64" => Some(Arch::Arm64),
            _ => None,
        };

        let os = match (os, arch) {
            (_, None) => OsFamily::Unsupported,
            ("macos", _) => OsFamily::MacOs,
            ("linux", _) => OsFamily::Linux,
            _ => OsFamily::Unsupported,
        };

        // INVARIANT: Unknown architecture always yields an unsupported platform.
        Self {
            os,
            arch: arch.unwrap_or(Arch::X86_64),
        }
    }

    /// Check if convergence may proceed on this platform.
    pub fn is_supported(&self) -> bool {
        self.os != OsFamily::Unsupported
    }
}

impl Display for Platform {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "{}-{}", self.os, self.arch)
    }
}
