//! Docker Engine implementation of [`ContainerHost`].

use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::sync::Arc;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, DownloadFromContainerOptions, ListContainersOptions,
    LogOutput, LogsOptions, RemoveContainerOptions, RestartContainerOptions,
    StartContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::models::{HostConfig, Mount, MountTypeEnum};
use bollard::volume::{CreateVolumeOptions, RemoveVolumeOptions};
use bollard::{ClientVersion, Docker};
use futures_util::StreamExt;

use crate::{
    ContainerDetails, ContainerHost, ContainerState, ContainerSummary, HostEndpoint, HostError,
    HostFactory, RunOptions, StateSelector, VolumeMount,
};

/// Per-request deadline; a slow daemon delays only the affected tick.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Client for one Docker daemon endpoint.
pub struct DockerHost {
    docker: Docker,
}

impl DockerHost {
    /// Connect to `tcp://<host>:<port>` speaking the given API version.
    pub fn connect(endpoint: &HostEndpoint) -> Result<Self, HostError> {
        let address = endpoint.server_host.replacen("tcp://", "http://", 1);
        let version = parse_client_version(&endpoint.api_version);
        let docker = Docker::connect_with_http(&address, REQUEST_TIMEOUT_SECS, &version)
            .map_err(|e| HostError::Unavailable(e.to_string()))?;
        Ok(Self { docker })
    }
}

fn parse_client_version(api_version: &str) -> ClientVersion {
    let mut parts = api_version.splitn(2, '.');
    let major = parts.next().and_then(|p| p.parse().ok()).unwrap_or(1);
    let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(41);
    ClientVersion {
        major_version: major,
        minor_version: minor,
    }
}

fn map_runtime_state(state: &str) -> ContainerState {
    match state {
        "created" => ContainerState::Created,
        "restarting" => ContainerState::Initializing,
        "running" => ContainerState::Running,
        "paused" => ContainerState::Paused,
        "exited" | "dead" | "removing" => ContainerState::Exited,
        _ => ContainerState::Creating,
    }
}

fn container_error(err: BollardError) -> HostError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404, ..
        } => HostError::ContainerNotExist,
        BollardError::DockerResponseServerError {
            status_code,
            message,
        } => HostError::Daemon(format!("status {status_code}: {message}")),
        other => HostError::Unavailable(other.to_string()),
    }
}

fn volume_error(err: BollardError) -> HostError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404, ..
        } => HostError::VolumeNotExist,
        BollardError::DockerResponseServerError {
            status_code,
            message,
        } => HostError::Daemon(format!("status {status_code}: {message}")),
        other => HostError::Unavailable(other.to_string()),
    }
}

#[async_trait]
impl ContainerHost for DockerHost {
    async fn state(
        &self,
        selector: StateSelector,
        value: &str,
    ) -> Result<(String, ContainerState), HostError> {
        let key = match selector {
            StateSelector::Id => "id",
            StateSelector::Name => "name",
        };
        let options = ListContainersOptions::<String> {
            all: true,
            filters: HashMap::from([(key.to_string(), vec![value.to_string()])]),
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(container_error)?;

        let first = containers.first().ok_or(HostError::ContainerNotExist)?;
        let id = first.id.clone().unwrap_or_default();
        let state = first
            .state
            .as_deref()
            .map(map_runtime_state)
            .unwrap_or(ContainerState::Creating);
        Ok((id, state))
    }

    async fn run(&self, opts: RunOptions) -> Result<String, HostError> {
        let mounts: Vec<Mount> = opts
            .mounts
            .iter()
            .map(|m| Mount {
                source: Some(m.source.clone()),
                target: Some(m.target.clone()),
                typ: Some(MountTypeEnum::VOLUME),
                read_only: Some(m.read_only),
                ..Default::default()
            })
            .collect();

        let config = Config {
            image: Some(opts.image.clone()),
            env: Some(opts.env.clone()),
            entrypoint: if opts.entrypoint.is_empty() {
                None
            } else {
                Some(opts.entrypoint.clone())
            },
            host_config: Some(HostConfig {
                mounts: if mounts.is_empty() { None } else { Some(mounts) },
                ..Default::default()
            }),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: opts.name.clone(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(container_error)?;

        self.docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(container_error)?;

        Ok(created.id)
    }

    async fn start(&self, id: &str) -> Result<(), HostError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(container_error)
    }

    async fn pause(&self, id: &str) -> Result<(), HostError> {
        self.docker.pause_container(id).await.map_err(container_error)
    }

    async fn unpause(&self, id: &str) -> Result<(), HostError> {
        self.docker
            .unpause_container(id)
            .await
            .map_err(container_error)
    }

    async fn restart(&self, id: &str) -> Result<(), HostError> {
        self.docker
            .restart_container(id, None::<RestartContainerOptions>)
            .await
            .map_err(container_error)
    }

    async fn delete(&self, id: &str) -> Result<(), HostError> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(container_error)
    }

    async fn inspect(&self, id: &str) -> Result<ContainerDetails, HostError> {
        let response = self
            .docker
            .inspect_container(id, None)
            .await
            .map_err(container_error)?;

        let config = response.config.unwrap_or_default();
        let mounts = response
            .mounts
            .unwrap_or_default()
            .into_iter()
            .map(|m| VolumeMount {
                source: m.name.or(m.source).unwrap_or_default(),
                target: m.destination.unwrap_or_default(),
                read_only: !m.rw.unwrap_or(true),
            })
            .collect();

        Ok(ContainerDetails {
            id: response.id.unwrap_or_default(),
            image: config.image.unwrap_or_default(),
            entrypoint: config.entrypoint.unwrap_or_default(),
            mounts,
        })
    }

    async fn exit_code(&self, id: &str) -> Result<i64, HostError> {
        let response = self
            .docker
            .inspect_container(id, None)
            .await
            .map_err(container_error)?;
        Ok(response
            .state
            .and_then(|s| s.exit_code)
            .unwrap_or_default())
    }

    async fn read_files(
        &self,
        id: &str,
        path: &str,
    ) -> Result<BTreeMap<String, String>, HostError> {
        let mut stream = self.docker.download_from_container(
            id,
            Some(DownloadFromContainerOptions {
                path: path.to_string(),
            }),
        );

        let mut archive = Vec::new();
        while let Some(chunk) = stream.next().await {
            archive.extend_from_slice(&chunk.map_err(container_error)?);
        }

        let mut files = BTreeMap::new();
        let mut reader = tar::Archive::new(archive.as_slice());
        let entries = reader
            .entries()
            .map_err(|e| HostError::Daemon(format!("read archive: {e}")))?;
        for entry in entries {
            let mut entry = entry.map_err(|e| HostError::Daemon(format!("read archive: {e}")))?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let name = entry
                .path()
                .ok()
                .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()));
            let Some(name) = name else { continue };
            let mut content = String::new();
            entry
                .read_to_string(&mut content)
                .map_err(|e| HostError::Daemon(format!("read {name}: {e}")))?;
            files.insert(name, content.trim_end().to_string());
        }
        Ok(files)
    }

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, HostError> {
        let options = ListContainersOptions::<String> {
            all: true,
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(container_error)?;

        Ok(containers
            .into_iter()
            .map(|c| ContainerSummary {
                id: c.id.unwrap_or_default(),
                image: c.image.unwrap_or_default(),
                volume_names: c
                    .mounts
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|m| m.name)
                    .collect(),
            })
            .collect())
    }

    async fn exist_volume(&self, name: &str) -> Result<(), HostError> {
        self.docker
            .inspect_volume(name)
            .await
            .map(|_| ())
            .map_err(volume_error)
    }

    async fn create_volume(&self, name: &str) -> Result<String, HostError> {
        let volume = self
            .docker
            .create_volume(CreateVolumeOptions {
                name: name.to_string(),
                ..Default::default()
            })
            .await
            .map_err(volume_error)?;
        Ok(volume.name)
    }

    async fn delete_volume(&self, name: &str, force: bool) -> Result<(), HostError> {
        self.docker
            .remove_volume(name, Some(RemoveVolumeOptions { force }))
            .await
            .map_err(volume_error)
    }

    async fn logs(&self, id: &str, tail: usize) -> Result<String, HostError> {
        let tail = if tail == 0 {
            "all".to_string()
        } else {
            tail.to_string()
        };
        let mut stream = self.docker.logs(
            id,
            Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                tail,
                ..Default::default()
            }),
        );

        let mut output = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk.map_err(container_error)? {
                LogOutput::StdOut { message } | LogOutput::StdErr { message } => {
                    output.push_str(&String::from_utf8_lossy(&message));
                }
                _ => {}
            }
        }
        Ok(output)
    }
}

/// Builds a [`DockerHost`] per endpoint.
pub struct DockerHostFactory;

#[async_trait]
impl HostFactory for DockerHostFactory {
    async fn connect(&self, endpoint: &HostEndpoint) -> Result<Arc<dyn ContainerHost>, HostError> {
        Ok(Arc::new(DockerHost::connect(endpoint)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_client_version() {
        let v = parse_client_version("1.41");
        assert_eq!(v.major_version, 1);
        assert_eq!(v.minor_version, 41);

        let fallback = parse_client_version("bogus");
        assert_eq!(fallback.major_version, 1);
        assert_eq!(fallback.minor_version, 41);
    }

    #[test]
    fn test_map_runtime_state() {
        assert_eq!(map_runtime_state("created"), ContainerState::Created);
        assert_eq!(map_runtime_state("running"), ContainerState::Running);
        assert_eq!(map_runtime_state("paused"), ContainerState::Paused);
        assert_eq!(map_runtime_state("exited"), ContainerState::Exited);
        assert_eq!(map_runtime_state("dead"), ContainerState::Exited);
        assert_eq!(map_runtime_state("restarting"), ContainerState::Initializing);
        assert_eq!(map_runtime_state("weird"), ContainerState::Creating);
    }
}
