//! TaskCube control plane.
//!
//! The [`TaskController`] owns the node pool and drives three reconcile
//! loops against the task store and the container hosts:
//! - agent management: one helper container per host exporting the executor
//!   binary through a shared volume (ensure every 10s, update every 10s)
//! - scheduling: admit freshly submitted tasks onto a host (every 3s)
//! - step lifecycle: advance each running task one container at a time
//!   (every 3s)
//!
//! All loops share one cancellation token; [`ControllerHandle::shutdown`]
//! cancels it and waits for every loop to drain.

mod agent;
mod lifecycle;
mod scheduler;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use taskcube_core::store::{RecordStore, StoreError};
use taskcube_core::types::{Script, Task};
use taskcube_host::{ContainerHost, HostEndpoint, HostError, HostFactory};

pub use agent::{AgentState, AgentStatus, AGENT_NAME, AGENT_VOLUME, EXEC_PATH};
pub use lifecycle::{OUTPUT_PATH, PARA_PREFIX, SCRIPT_CONTENT_ENV};

const AGENT_ENSURE_INTERVAL: Duration = Duration::from_secs(10);
const AGENT_UPDATE_INTERVAL: Duration = Duration::from_secs(10);
const SCHEDULE_INTERVAL: Duration = Duration::from_secs(3);
const LIFECYCLE_INTERVAL: Duration = Duration::from_secs(3);

/// Controller error types.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("host error: {0}")]
    Host(#[from] HostError),
    #[error("no nodes available")]
    NoNodesAvailable,
    #[error("{0} not exist")]
    ScriptNotExist(String),
    #[error("volume {volume} still in use by {holders:?}")]
    VolumeInUse {
        volume: String,
        holders: Vec<String>,
    },
}

/// The task controller: owns the node pool, the agent image and the daemon
/// API version, plus the per-host agent status map.
pub struct TaskController {
    node_pool: Vec<String>,
    agent_image: String,
    api_version: String,
    tasks: Arc<dyn RecordStore<Task>>,
    scripts: Arc<dyn RecordStore<Script>>,
    hosts: Arc<dyn HostFactory>,
    agent_states: RwLock<HashMap<String, AgentStatus>>,
    cancel: CancellationToken,
}

impl TaskController {
    pub fn new(
        node_pool: Vec<String>,
        agent_image: impl Into<String>,
        api_version: impl Into<String>,
        tasks: Arc<dyn RecordStore<Task>>,
        scripts: Arc<dyn RecordStore<Script>>,
        hosts: Arc<dyn HostFactory>,
    ) -> Self {
        Self {
            node_pool,
            agent_image: agent_image.into(),
            api_version: api_version.into(),
            tasks,
            scripts,
            hosts,
            agent_states: RwLock::new(HashMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Token cancelled when the controller shuts down; the HTTP server
    /// shares it for graceful shutdown.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) async fn connect(&self, host: &str) -> Result<Arc<dyn ContainerHost>, HostError> {
        self.hosts
            .connect(&HostEndpoint::new(host, &self.api_version))
            .await
    }

    /// Launch all reconcile loops.
    pub fn spawn(self: &Arc<Self>) -> ControllerHandle {
        let mut handles = Vec::with_capacity(4);
        handles.push(self.spawn_loop("agent-ensure", AGENT_ENSURE_INTERVAL, |ctl| async move {
            ctl.agent_ensure_tick().await;
        }));
        handles.push(self.spawn_loop("agent-update", AGENT_UPDATE_INTERVAL, |ctl| async move {
            ctl.agent_update_tick().await;
        }));
        handles.push(self.spawn_loop("schedule", SCHEDULE_INTERVAL, |ctl| async move {
            ctl.schedule_tick().await;
        }));
        handles.push(self.spawn_loop("lifecycle", LIFECYCLE_INTERVAL, |ctl| async move {
            ctl.lifecycle_tick().await;
        }));

        ControllerHandle {
            cancel: self.cancel.clone(),
            handles,
        }
    }

    fn spawn_loop<F, Fut>(self: &Arc<Self>, name: &'static str, period: Duration, tick: F) -> JoinHandle<()>
    where
        F: Fn(Arc<TaskController>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => tick(Arc::clone(&controller)).await,
                    _ = controller.cancel.cancelled() => {
                        tracing::info!(loop_name = name, "shutdown controller loop");
                        return;
                    }
                }
            }
        })
    }
}

/// Handle over the running loops.
pub struct ControllerHandle {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl ControllerHandle {
    /// Cancel the loops and wait for them to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            let _ = handle.await;
        }
        tracing::info!("shutdown TaskController");
    }
}

#[cfg(test)]
pub(crate) mod testutil;
