use std::fmt;
use std::str::FromStr;

use crate::{PeerError, Result};

/// Commands understood by the command processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Get,
    Nop,
    Insert,
    Drop,
    Alive,
    Create,
    Clone,
    Delete,
    Cancel,
    Finalize,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Nop => "NOP",
            Self::Insert => "INSERT",
            Self::Drop => "DROP",
            Self::Alive => "ALIVE",
            Self::Create => "CREATE",
            Self::Clone => "CLONE",
            Self::Delete => "DELETE",
            Self::Cancel => "CANCEL",
            Self::Finalize => "FINALIZE",
        }
    }

    /// Commands that change storage state and therefore pass the admission gate.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Self::Create | Self::Clone | Self::Delete | Self::Cancel | Self::Finalize
        )
    }

    pub fn requires_basket(&self) -> bool {
        self.is_mutating() || *self == Self::Get
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = PeerError;

    fn from_str(name: &str) -> Result<Self> {
        let command = match name {
            "GET" => Self::Get,
            "NOP" => Self::Nop,
            "INSERT" => Self::Insert,
            "DROP" => Self::Drop,
            "ALIVE" => Self::Alive,
            "CREATE" => Self::Create,
            "CLONE" => Self::Clone,
            "DELETE" => Self::Delete,
            "CANCEL" => Self::Cancel,
            "FINALIZE" => Self::Finalize,
            other => {
                return Err(PeerError::BadRequest(format!(
                    "Unknown command: {}",
                    other
                )));
            }
        };
        Ok(command)
    }
}
