//! Agent management.
//!
//! Every host in the node pool runs a long-lived `taskcube-agent` container
//! whose image exports the executor binary into the shared `taskcube-agent`
//! volume. Step containers mount that volume read-only, so rolling the agent
//! image is atomic from a step's point of view: the volume is only destroyed
//! once no container mounts it anymore.

use chrono::{DateTime, Utc};

use taskcube_host::{ContainerState, HostError, RunOptions, StateSelector, VolumeMount};

use crate::{ControllerError, TaskController};

pub const AGENT_NAME: &str = "taskcube-agent";
pub const AGENT_VOLUME: &str = "taskcube-agent";
pub const EXEC_PATH: &str = "/agent/exec";

/// Per-host agent state, kept in process memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    NotReady,
    Ready,
    UpdateCheck,
    Updating,
    Updated,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct AgentStatus {
    pub state: AgentState,
    pub time: DateTime<Utc>,
    pub reason: String,
}

impl AgentStatus {
    fn unknown(host: &str) -> Self {
        Self {
            state: AgentState::Unknown,
            time: Utc::now(),
            reason: format!("unknown agent: {host}"),
        }
    }
}

impl TaskController {
    /// Current agent status for one host.
    pub async fn agent_status(&self, host: &str) -> AgentStatus {
        self.agent_states
            .read()
            .await
            .get(host)
            .cloned()
            .unwrap_or_else(|| AgentStatus::unknown(host))
    }

    async fn set_agent_status(&self, host: &str, state: AgentState, reason: impl Into<String>) {
        self.agent_states.write().await.insert(
            host.to_string(),
            AgentStatus {
                state,
                time: Utc::now(),
                reason: reason.into(),
            },
        );
    }

    /// One pass of the ensure loop over every host.
    pub async fn agent_ensure_tick(&self) {
        for host in self.node_pool.clone() {
            if let Err(e) = self.ensure_agent(&host).await {
                tracing::error!(host = %host, error = %e, "ensure agent failed");
            }
        }
    }

    /// Keep the agent volume and container alive on one host.
    pub async fn ensure_agent(&self, host: &str) -> Result<(), ControllerError> {
        let status = self.agent_status(host).await;
        if matches!(status.state, AgentState::UpdateCheck | AgentState::Updating) {
            tracing::info!(host = %host, reason = %status.reason, "wait for agent update to finish");
            return Ok(());
        }

        let cli = match self.connect(host).await {
            Ok(cli) => cli,
            Err(e) => {
                self.set_agent_status(host, AgentState::NotReady, e.to_string())
                    .await;
                return Err(e.into());
            }
        };

        if let Err(err) = cli.exist_volume(AGENT_VOLUME).await {
            match err {
                HostError::VolumeNotExist => match cli.create_volume(AGENT_VOLUME).await {
                    Ok(name) if name == AGENT_VOLUME => {
                        tracing::info!(host = %host, volume = AGENT_VOLUME, "agent volume created");
                    }
                    Ok(name) => {
                        let reason = format!(
                            "create volume failed, want {AGENT_VOLUME} but got {name}"
                        );
                        self.set_agent_status(host, AgentState::NotReady, reason.clone())
                            .await;
                        return Err(ControllerError::Host(HostError::Daemon(reason)));
                    }
                    Err(e) => {
                        self.set_agent_status(host, AgentState::NotReady, e.to_string())
                            .await;
                        return Err(e.into());
                    }
                },
                other => {
                    self.set_agent_status(host, AgentState::NotReady, other.to_string())
                        .await;
                    return Err(other.into());
                }
            }
        }

        let (container_id, state) = match cli.state(StateSelector::Name, AGENT_NAME).await {
            Ok(found) => found,
            Err(HostError::ContainerNotExist) => {
                let opts = RunOptions {
                    name: AGENT_NAME.to_string(),
                    image: self.agent_image.clone(),
                    mounts: vec![VolumeMount {
                        source: AGENT_VOLUME.to_string(),
                        target: EXEC_PATH.to_string(),
                        read_only: true,
                    }],
                    ..RunOptions::default()
                };
                if let Err(e) = cli.run(opts).await {
                    self.set_agent_status(host, AgentState::NotReady, e.to_string())
                        .await;
                    return Err(e.into());
                }
                tracing::info!(host = %host, container = AGENT_NAME, "agent container created");
                return Ok(());
            }
            Err(other) => {
                self.set_agent_status(host, AgentState::NotReady, other.to_string())
                    .await;
                return Err(other.into());
            }
        };

        match state {
            ContainerState::Created => {
                cli.start(&container_id).await?;
                tracing::info!(host = %host, container = AGENT_NAME, "created agent started");
            }
            ContainerState::Paused => {
                cli.unpause(&container_id).await?;
                tracing::info!(host = %host, container = AGENT_NAME, "paused agent unpaused");
            }
            ContainerState::Exited => {
                cli.restart(&container_id).await?;
                tracing::info!(host = %host, container = AGENT_NAME, "exited agent restarted");
            }
            ContainerState::Running => {
                self.set_agent_status(host, AgentState::Ready, "").await;
            }
            ContainerState::Creating | ContainerState::Initializing => {}
        }
        Ok(())
    }

    /// One pass of the update loop: hosts in `Unknown`, `UpdateCheck` or
    /// `Updating` go through the image check.
    pub async fn agent_update_tick(&self) {
        for host in self.node_pool.clone() {
            let status = self.agent_status(&host).await;
            if matches!(
                status.state,
                AgentState::Unknown | AgentState::UpdateCheck | AgentState::Updating
            ) {
                if let Err(e) = self.update_agent(&host).await {
                    tracing::error!(host = %host, error = %e, "update agent failed");
                }
            }
        }
    }

    /// Roll the agent on one host to the configured image.
    ///
    /// The volume is preserved while any container still mounts it; only
    /// when no consumer remains is it deleted so the ensure loop can
    /// recreate volume and container from the new image.
    pub async fn update_agent(&self, host: &str) -> Result<(), ControllerError> {
        self.set_agent_status(host, AgentState::UpdateCheck, "").await;

        let cli = match self.connect(host).await {
            Ok(cli) => cli,
            Err(e) => {
                self.set_agent_status(host, AgentState::UpdateCheck, e.to_string())
                    .await;
                return Err(e.into());
            }
        };

        match cli.state(StateSelector::Name, AGENT_NAME).await {
            Ok((container_id, _)) => {
                let details = match cli.inspect(&container_id).await {
                    Ok(details) => details,
                    Err(e) => {
                        self.set_agent_status(host, AgentState::UpdateCheck, e.to_string())
                            .await;
                        return Err(e.into());
                    }
                };
                if details.image == self.agent_image {
                    self.set_agent_status(host, AgentState::Updated, "").await;
                    return Ok(());
                }

                self.set_agent_status(host, AgentState::Updating, "").await;
                let _ = cli.delete(&container_id).await;
            }
            Err(HostError::ContainerNotExist) => {
                self.set_agent_status(host, AgentState::Updating, "").await;
            }
            Err(other) => {
                self.set_agent_status(host, AgentState::UpdateCheck, other.to_string())
                    .await;
                return Err(other.into());
            }
        }

        let containers = match cli.list_containers().await {
            Ok(containers) => containers,
            Err(e) => {
                self.set_agent_status(host, AgentState::Updating, e.to_string())
                    .await;
                return Err(e.into());
            }
        };

        let holders: Vec<String> = containers
            .iter()
            .filter(|c| c.volume_names.iter().any(|v| v == AGENT_VOLUME))
            .map(|c| c.id.clone())
            .collect();
        if !holders.is_empty() {
            let err = ControllerError::VolumeInUse {
                volume: AGENT_VOLUME.to_string(),
                holders,
            };
            self.set_agent_status(host, AgentState::Updating, err.to_string())
                .await;
            return Err(err);
        }

        match cli.delete_volume(AGENT_VOLUME, true).await {
            Ok(()) | Err(HostError::VolumeNotExist) => {}
            Err(e) => {
                self.set_agent_status(host, AgentState::Updating, e.to_string())
                    .await;
                return Err(e.into());
            }
        }

        self.set_agent_status(host, AgentState::Updated, "").await;
        tracing::info!(host = %host, image = %self.agent_image, "agent updated");
        Ok(())
    }
}
