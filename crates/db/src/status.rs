//! Agent lifecycle status.

use serde::{Deserialize, Serialize};

/// Lifecycle state of an agent row. Stored as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Deploying,
    Running,
    Error,
    Stopped,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Deploying => "deploying",
            AgentStatus::Running => "running",
            AgentStatus::Error => "error",
            AgentStatus::Stopped => "stopped",
        }
    }

    /// Parse a stored status string; unknown values read as `Error` so a
    /// corrupted row degrades visibly instead of silently running.
    pub fn parse(value: &str) -> Self {
        match value {
            "deploying" => AgentStatus::Deploying,
            "running" => AgentStatus::Running,
            "stopped" => AgentStatus::Stopped,
            _ => AgentStatus::Error,
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
