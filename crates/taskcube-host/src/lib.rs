//! Container-host client.
//!
//! [`ContainerHost`] is the uniform surface the controller uses to talk to a
//! remote container daemon; [`DockerHost`] is the Docker Engine
//! implementation. Consumers select a host through a [`HostFactory`] so the
//! reconciler stays testable against in-memory fakes.

mod docker;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub use docker::{DockerHost, DockerHostFactory};

/// Host error types. `ContainerNotExist` and `VolumeNotExist` are sentinels
/// the reconciler dispatches on.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("container not exist")]
    ContainerNotExist,
    #[error("volume not exist")]
    VolumeNotExist,
    #[error("host unavailable: {0}")]
    Unavailable(String),
    #[error("daemon error: {0}")]
    Daemon(String),
}

/// Container runtime state taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Creating,
    Created,
    Initializing,
    Running,
    Paused,
    Exited,
}

impl ContainerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerState::Creating => "creating",
            ContainerState::Created => "created",
            ContainerState::Initializing => "initializing",
            ContainerState::Running => "running",
            ContainerState::Paused => "paused",
            ContainerState::Exited => "exited",
        }
    }
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How [`ContainerHost::state`] looks a container up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateSelector {
    Id,
    Name,
}

/// A named-volume mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    pub source: String,
    pub target: String,
    pub read_only: bool,
}

/// Everything needed to create and start one container.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub name: String,
    pub image: String,
    /// `KEY=value` pairs.
    pub env: Vec<String>,
    pub entrypoint: Vec<String>,
    pub mounts: Vec<VolumeMount>,
}

/// Summary row from [`ContainerHost::list_containers`].
#[derive(Debug, Clone, Default)]
pub struct ContainerSummary {
    pub id: String,
    pub image: String,
    /// Names of volumes this container mounts.
    pub volume_names: Vec<String>,
}

/// Result of [`ContainerHost::inspect`].
#[derive(Debug, Clone, Default)]
pub struct ContainerDetails {
    pub id: String,
    pub image: String,
    pub entrypoint: Vec<String>,
    pub mounts: Vec<VolumeMount>,
}

/// Uniform operations on one container daemon.
#[async_trait]
pub trait ContainerHost: Send + Sync {
    /// Look a container up by id or name; fails `ContainerNotExist` when no
    /// container matches.
    async fn state(
        &self,
        selector: StateSelector,
        value: &str,
    ) -> Result<(String, ContainerState), HostError>;

    /// Create and start a container, returning its id.
    async fn run(&self, opts: RunOptions) -> Result<String, HostError>;

    async fn start(&self, id: &str) -> Result<(), HostError>;
    async fn pause(&self, id: &str) -> Result<(), HostError>;
    async fn unpause(&self, id: &str) -> Result<(), HostError>;
    async fn restart(&self, id: &str) -> Result<(), HostError>;
    async fn delete(&self, id: &str) -> Result<(), HostError>;

    async fn inspect(&self, id: &str) -> Result<ContainerDetails, HostError>;

    /// Exit status of an exited container.
    async fn exit_code(&self, id: &str) -> Result<i64, HostError>;

    /// Contents of every regular file directly under `path` in the
    /// container, keyed by file name.
    async fn read_files(
        &self,
        id: &str,
        path: &str,
    ) -> Result<BTreeMap<String, String>, HostError>;

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, HostError>;

    /// Fails `VolumeNotExist` when the named volume is missing.
    async fn exist_volume(&self, name: &str) -> Result<(), HostError>;
    async fn create_volume(&self, name: &str) -> Result<String, HostError>;
    async fn delete_volume(&self, name: &str, force: bool) -> Result<(), HostError>;

    /// Combined stdout/stderr of a container, last `tail` lines (0 = all).
    async fn logs(&self, id: &str, tail: usize) -> Result<String, HostError>;
}

/// Address of one node-pool member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEndpoint {
    /// Daemon URL, e.g. `tcp://10.0.0.5:2375`.
    pub server_host: String,
    /// Engine API version string, e.g. `"1.41"`.
    pub api_version: String,
}

impl HostEndpoint {
    pub fn new(server_host: impl Into<String>, api_version: impl Into<String>) -> Self {
        Self {
            server_host: server_host.into(),
            api_version: api_version.into(),
        }
    }
}

/// Builds a client per endpoint; the controller resolves hosts through this
/// seam so tests can substitute fakes.
#[async_trait]
pub trait HostFactory: Send + Sync {
    async fn connect(&self, endpoint: &HostEndpoint) -> Result<Arc<dyn ContainerHost>, HostError>;
}
