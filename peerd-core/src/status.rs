//! Server operating mode and the admission gate built on it.

use crate::{Command, PeerError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    Active,
    Readonly,
    Maintenance,
    Rep,
    DelRep,
    FinRep,
    Unknown,
}

impl ServerStatus {
    /// Numeric mode code used by the maintenance tooling.
    pub fn code(&self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Maintenance => 10,
            Self::Readonly => 20,
            Self::Rep => 23,
            Self::FinRep => 25,
            Self::DelRep => 27,
            Self::Active => 30,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            10 => Self::Maintenance,
            20 => Self::Readonly,
            23 => Self::Rep,
            25 => Self::FinRep,
            27 => Self::DelRep,
            30 => Self::Active,
            _ => Self::Unknown,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Readonly => "readonly",
            Self::Maintenance => "maintenance",
            Self::Rep => "rep",
            Self::DelRep => "del_rep",
            Self::FinRep => "fin_rep",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ServerStatus {
    type Err = PeerError;

    fn from_str(value: &str) -> Result<Self> {
        let status = match value.trim().to_ascii_lowercase().as_str() {
            "active" | "online" => Self::Active,
            "readonly" => Self::Readonly,
            "maintenance" | "offline" => Self::Maintenance,
            "rep" => Self::Rep,
            "del_rep" => Self::DelRep,
            "fin_rep" => Self::FinRep,
            "unknown" => Self::Unknown,
            other => {
                return Err(PeerError::Config(format!(
                    "unsupported server status '{}'",
                    other
                )));
            }
        };
        Ok(status)
    }
}

/// Whether `command` may run while the server is in `status`.
///
/// Reads are never gated; only the five mutating commands are.
pub fn admits(status: ServerStatus, command: Command) -> bool {
    if !command.is_mutating() {
        return true;
    }

    match status {
        ServerStatus::Active => true,
        ServerStatus::DelRep => matches!(
            command,
            Command::Delete | Command::Cancel | Command::Finalize
        ),
        ServerStatus::FinRep => matches!(command, Command::Cancel | Command::Finalize),
        ServerStatus::Rep
        | ServerStatus::Readonly
        | ServerStatus::Maintenance
        | ServerStatus::Unknown => false,
    }
}

/// Snapshot provider for the current operating mode.
pub trait StatusSource: Send + Sync {
    fn status(&self) -> ServerStatus;
}

impl StatusSource for ServerStatus {
    fn status(&self) -> ServerStatus {
        *self
    }
}

/// Process-wide mode register, written by maintenance tooling and read by
/// the admission gate.
#[derive(Debug)]
pub struct StatusRegister {
    code: AtomicU8,
}

impl StatusRegister {
    pub fn new(initial: ServerStatus) -> Self {
        Self {
            code: AtomicU8::new(initial.code()),
        }
    }

    pub fn set(&self, status: ServerStatus) {
        let previous = ServerStatus::from_code(self.code.swap(status.code(), Ordering::AcqRel));
        if previous != status {
            tracing::info!("Server status changed: {} -> {}", previous, status);
        }
    }
}

impl StatusSource for StatusRegister {
    fn status(&self) -> ServerStatus {
        ServerStatus::from_code(self.code.load(Ordering::Acquire))
    }
}
