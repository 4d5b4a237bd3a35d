use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

/// The fixed vocabulary of lifecycle commands a managed service understands.
///
/// The command name is passed as the sole positional argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    Install,
    Remove,
    Status,
    Start,
    Stop,
    Stats,
}

impl Command {
    pub const ALL: [Command; 6] = [
        Command::Install,
        Command::Remove,
        Command::Status,
        Command::Start,
        Command::Stop,
        Command::Stats,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Command::Install => "install",
            Command::Remove => "remove",
            Command::Status => "status",
            Command::Start => "start",
            Command::Stop => "stop",
            Command::Stats => "stats",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| ServiceError::UnknownCommand(s.to_string()))
    }
}
