use std::fmt;

use serde::{Deserialize, Serialize};

/// Coarse run state reported by the `status` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Running,
    Stopped,
    Unknown,
}

impl ServiceStatus {
    /// Interpret free-form `status` output.
    ///
    /// A `status: <state>` line wins. Otherwise any mention of "running"
    /// that is not "not running" counts as running, and everything else is
    /// unknown.
    pub fn from_output(text: &str) -> Self {
        for line in text.lines() {
            if let Some(state) = line.trim().strip_prefix("status:") {
                return match state.trim() {
                    "running" => ServiceStatus::Running,
                    "stopped" => ServiceStatus::Stopped,
                    _ => ServiceStatus::Unknown,
                };
            }
        }

        let lower = text.to_lowercase();
        if lower.contains("running") && !lower.contains("not running") {
            ServiceStatus::Running
        } else {
            ServiceStatus::Unknown
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ServiceStatus::Running => "running",
            ServiceStatus::Stopped => "stopped",
            ServiceStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
