use std::time::Duration;

use fleetd_domain::{
    CollectNowParams, Command, CommandAckRequest, COMMAND_TYPE_COLLECT_NOW,
};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::AgentError;
use crate::scheduler::SchedulerHandle;
use crate::state::ConfigHandle;

/// Fixed command poll cadence.
pub const POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Concurrency cap for command execution. Overflow commands are not fetched
/// this cycle; they stay pending server-side and return on the next poll.
pub const MAX_CONCURRENT: usize = 2;

/// Periodic pull of pending commands with bounded concurrent execution and
/// result acknowledgement.
pub struct CommandClient {
    client: reqwest::Client,
    config: ConfigHandle,
    scheduler: SchedulerHandle,
}

impl CommandClient {
    pub fn new(
        client: reqwest::Client,
        config: ConfigHandle,
        scheduler: SchedulerHandle,
    ) -> Self {
        Self { client, config, scheduler }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut executing: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
                _ = cancel.cancelled() => {
                    // Let in-flight commands finish within the drain window.
                    while executing.join_next().await.is_some() {}
                    return;
                }
            }

            while executing.try_join_next().is_some() {}
            let slots = MAX_CONCURRENT.saturating_sub(executing.len());
            if slots == 0 {
                debug!("command slots exhausted; skipping this cycle");
                continue;
            }

            let commands = match self.poll(slots).await {
                Ok(commands) => commands,
                Err(e) => {
                    warn!(error = %e, "command poll failed");
                    continue;
                }
            };

            for command in commands {
                let client = self.client.clone();
                let config = self.config.clone();
                let scheduler = self.scheduler.clone();
                executing.spawn(async move {
                    let command_id = command.command_id;
                    let ack = execute(&scheduler, command).await;
                    if let Err(e) = send_ack(&client, &config, command_id, &ack).await {
                        warn!(command_id = %command_id, error = %e, "ack failed");
                    }
                });
            }
        }
    }

    /// Pull at most `limit` commands; the server transitions everything it
    /// returns to `executing`.
    async fn poll(&self, limit: usize) -> Result<Vec<Command>, AgentError> {
        let config = self.config.read().await;
        let Some(token) = config.auth_token.clone() else {
            return Ok(Vec::new());
        };
        let url = format!(
            "{}/v1/agents/{}/commands?limit={}",
            config.api_endpoint.trim_end_matches('/'),
            config.device_id,
            limit
        );
        drop(config);

        let response = self.client.get(&url).bearer_auth(&token).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AgentError::Rejected { status: status.as_u16(), message });
        }

        let commands: Vec<Command> = response.json().await?;
        if !commands.is_empty() {
            info!(count = commands.len(), "commands claimed");
        }
        Ok(commands)
    }
}

/// Run one command to an acknowledgement. Never panics and never skips the
/// ack; an unknown type is acked with an error.
async fn execute(scheduler: &SchedulerHandle, command: Command) -> CommandAckRequest {
    if command.command_type != COMMAND_TYPE_COLLECT_NOW {
        return CommandAckRequest {
            result: None,
            error: Some("unknown command type".to_string()),
        };
    }

    let params: CollectNowParams =
        match serde_json::from_value(command.parameters.clone()) {
            Ok(p) => p,
            Err(e) => {
                return CommandAckRequest {
                    result: None,
                    error: Some(format!("bad parameters: {e}")),
                }
            }
        };

    match scheduler.trigger_now(params.metrics).await {
        Ok(collected) => CommandAckRequest {
            result: Some(serde_json::json!({
                "status": "completed",
                "metrics": collected,
            })),
            error: None,
        },
        Err(e) => CommandAckRequest {
            result: None,
            error: Some(e.to_string()),
        },
    }
}

async fn send_ack(
    client: &reqwest::Client,
    config: &ConfigHandle,
    command_id: uuid::Uuid,
    ack: &CommandAckRequest,
) -> Result<(), AgentError> {
    let config = config.read().await;
    let Some(token) = config.auth_token.clone() else {
        return Ok(());
    };
    let url = format!(
        "{}/v1/agents/{}/commands/{}/ack",
        config.api_endpoint.trim_end_matches('/'),
        config.device_id,
        command_id
    );
    drop(config);

    let response = client.post(&url).bearer_auth(&token).json(ack).send().await?;
    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(AgentError::Rejected { status: status.as_u16(), message });
    }
    Ok(())
}
