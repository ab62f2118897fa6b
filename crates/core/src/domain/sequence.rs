use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// A lifecycle trigger for the machine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum Sequence {
    ApplyConfiguration,
    Boot,
    Bootstrap,
    Initialize,
    Install,
    Shutdown,
    Upgrade,
    Reset,
    Reboot,
    Recover,
    Noop,
}

impl Sequence {
    /// Every sequence in declaration order.
    pub const ALL: [Sequence; 11] = [
        Self::ApplyConfiguration,
        Self::Boot,
        Self::Bootstrap,
        Self::Initialize,
        Self::Install,
        Self::Shutdown,
        Self::Upgrade,
        Self::Reset,
        Self::Reboot,
        Self::Recover,
        Self::Noop,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApplyConfiguration => "applyConfiguration",
            Self::Boot => "boot",
            Self::Bootstrap => "bootstrap",
            Self::Initialize => "initialize",
            Self::Install => "install",
            Self::Shutdown => "shutdown",
            Self::Upgrade => "upgrade",
            Self::Reset => "reset",
            Self::Reboot => "reboot",
            Self::Recover => "recover",
            Self::Noop => "noop",
        }
    }

    /// Parses the exact identifier returned by [`Sequence::as_str`].
    ///
    /// Matching is case-sensitive and does not trim whitespace.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "applyConfiguration" => Ok(Self::ApplyConfiguration),
            "boot" => Ok(Self::Boot),
            "bootstrap" => Ok(Self::Bootstrap),
            "initialize" => Ok(Self::Initialize),
            "install" => Ok(Self::Install),
            "shutdown" => Ok(Self::Shutdown),
            "upgrade" => Ok(Self::Upgrade),
            "reset" => Ok(Self::Reset),
            "reboot" => Ok(Self::Reboot),
            "recover" => Ok(Self::Recover),
            "noop" => Ok(Self::Noop),
            _ => Err(CoreError::UnknownSequence(s.to_string())),
        }
    }

    /// Whether the trigger carries a request payload.
    pub fn takes_request(&self) -> bool {
        matches!(
            self,
            Self::ApplyConfiguration | Self::Recover | Self::Reset | Self::Upgrade
        )
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sequence {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
