use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::DomainError;
use crate::types::{DeviceId, MetricName};

/// The one command type agents execute natively. Anything else is
/// acknowledged with an "unknown command type" error.
pub const COMMAND_TYPE_COLLECT_NOW: &str = "collect.now";

pub const MAX_TTL_SECONDS: u32 = 3600;

// ── Status machine ────────────────────────────────────────────────────────────

/// Command lifecycle.
///
/// Transitions:
///   Pending → Executing (claimed by a device poll)
///   Executing → Completed | Failed (acknowledgement)
///   Pending → Expired (ttl elapsed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Pending,
    Executing,
    Completed,
    Failed,
    Expired,
}

impl CommandStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CommandStatus::Completed | CommandStatus::Failed | CommandStatus::Expired
        )
    }

    pub fn can_transition_to(self, next: CommandStatus) -> bool {
        matches!(
            (self, next),
            (CommandStatus::Pending, CommandStatus::Executing)
                | (CommandStatus::Pending, CommandStatus::Expired)
                | (CommandStatus::Executing, CommandStatus::Completed)
                | (CommandStatus::Executing, CommandStatus::Failed)
        )
    }
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CommandStatus::Pending => "pending",
            CommandStatus::Executing => "executing",
            CommandStatus::Completed => "completed",
            CommandStatus::Failed => "failed",
            CommandStatus::Expired => "expired",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for CommandStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CommandStatus::Pending),
            "executing" => Ok(CommandStatus::Executing),
            "completed" => Ok(CommandStatus::Completed),
            "failed" => Ok(CommandStatus::Failed),
            "expired" => Ok(CommandStatus::Expired),
            other => Err(DomainError::InvalidTransition {
                from: other.to_string(),
                to: String::new(),
            }),
        }
    }
}

// ── Command ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub command_id: Uuid,
    pub device_id: DeviceId,
    #[serde(rename = "type")]
    pub command_type: String,
    #[serde(default)]
    pub parameters: Value,
    pub issued_at: DateTime<Utc>,
    pub ttl_seconds: u32,
    pub status: CommandStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Command {
    /// Create a pending command, enforcing the ttl bound at the boundary.
    pub fn new(
        device_id: DeviceId,
        command_type: impl Into<String>,
        parameters: Value,
        ttl_seconds: u32,
    ) -> Result<Self, DomainError> {
        if ttl_seconds == 0 || ttl_seconds > MAX_TTL_SECONDS {
            return Err(DomainError::InvalidTtl(ttl_seconds));
        }
        Ok(Self {
            command_id: Uuid::new_v4(),
            device_id,
            command_type: command_type.into(),
            parameters,
            issued_at: Utc::now(),
            ttl_seconds,
            status: CommandStatus::Pending,
            result: None,
            completed_at: None,
        })
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.issued_at + Duration::seconds(i64::from(self.ttl_seconds))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == CommandStatus::Pending && now > self.expires_at()
    }
}

/// Parameters of a `collect.now` command. Absent `metrics` means the full
/// enabled set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectNowParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Vec<MetricName>>,
}
