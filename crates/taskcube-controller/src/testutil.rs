//! In-memory fakes shared by the controller tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use taskcube_core::store::{RecordFilter, RecordStore};
use taskcube_core::types::{Script, Task, TaskSpecStep, TaskState};
use taskcube_host::{
    ContainerDetails, ContainerHost, ContainerState, ContainerSummary, HostEndpoint, HostError,
    HostFactory, RunOptions, StateSelector, VolumeMount,
};
use taskcube_stores::InMemoryRecordStore;

use crate::TaskController;

/// A controller wired to one fake host and an in-memory store.
pub(crate) struct TestBed {
    pub controller: TaskController,
    pub host: Arc<FakeHost>,
    pub tasks: Arc<InMemoryRecordStore>,
    pub scripts: Arc<InMemoryRecordStore>,
}

impl TestBed {
    pub const AGENT_IMAGE: &'static str = "taskcube/taskcube-agent:test";

    pub fn new(node_pool: Vec<String>) -> Self {
        let store = Arc::new(InMemoryRecordStore::new());
        let host = Arc::new(FakeHost::new());
        let controller = TaskController::new(
            node_pool,
            Self::AGENT_IMAGE,
            "1.41",
            store.clone() as Arc<dyn RecordStore<Task>>,
            store.clone() as Arc<dyn RecordStore<Script>>,
            Arc::new(FakeHostFactory { host: host.clone() }),
        );
        Self {
            controller,
            host,
            tasks: store.clone(),
            scripts: store,
        }
    }

    pub async fn task(&self, name: &str) -> Task {
        self.try_task(name).await.expect("task exists")
    }

    pub async fn try_task(&self, name: &str) -> Option<Task> {
        let tasks: Vec<Task> = self
            .tasks
            .get(&RecordFilter::by_name(name))
            .await
            .expect("task store read");
        tasks.into_iter().next()
    }
}

/// A task whose steps all carry inline sources, status `Created` as the
/// façade would persist it.
pub(crate) fn source_task(name: &str, steps: &[(&str, &str)]) -> Task {
    let mut task = Task::default();
    task.metadata.name = name.to_string();
    task.metadata.version = "1".to_string();
    task.status.status = TaskState::Created;
    for (step_name, source) in steps {
        task.spec.steps.push(TaskSpecStep {
            name: step_name.to_string(),
            image: "alpine".to_string(),
            source: source.to_string(),
            ..TaskSpecStep::default()
        });
    }
    task
}

#[derive(Debug, Clone)]
struct FakeContainer {
    id: String,
    name: String,
    image: String,
    env: Vec<String>,
    entrypoint: Vec<String>,
    mounts: Vec<VolumeMount>,
    state: ContainerState,
    exit_code: i64,
    files: BTreeMap<String, String>,
}

#[derive(Default)]
struct FakeHostState {
    containers: Vec<FakeContainer>,
    volumes: BTreeSet<String>,
}

/// Scriptable stand-in for one container daemon.
#[derive(Default)]
pub(crate) struct FakeHost {
    inner: Mutex<FakeHostState>,
    counter: AtomicUsize,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> String {
        format!("ctr-{}", self.counter.fetch_add(1, Ordering::SeqCst))
    }

    pub fn add_volume(&self, name: &str) {
        self.inner.lock().unwrap().volumes.insert(name.to_string());
    }

    pub fn has_volume(&self, name: &str) -> bool {
        self.inner.lock().unwrap().volumes.contains(name)
    }

    pub fn seed_container(&self, name: &str, image: &str, state: ContainerState) -> String {
        let id = self.next_id();
        self.inner.lock().unwrap().containers.push(FakeContainer {
            id: id.clone(),
            name: name.to_string(),
            image: image.to_string(),
            env: Vec::new(),
            entrypoint: Vec::new(),
            mounts: Vec::new(),
            state,
            exit_code: 0,
            files: BTreeMap::new(),
        });
        id
    }

    pub fn seed_container_with_volume(&self, name: &str, image: &str, volume: &str) -> String {
        let id = self.seed_container(name, image, ContainerState::Running);
        let mut inner = self.inner.lock().unwrap();
        let container = inner
            .containers
            .iter_mut()
            .find(|c| c.id == id)
            .expect("seeded container");
        container.mounts.push(VolumeMount {
            source: volume.to_string(),
            target: "/agent/exec".to_string(),
            read_only: true,
        });
        id
    }

    pub fn remove_container(&self, id: &str) {
        self.inner.lock().unwrap().containers.retain(|c| c.id != id);
    }

    pub fn finish_container(&self, id: &str, exit_code: i64, files: BTreeMap<String, String>) {
        let mut inner = self.inner.lock().unwrap();
        let container = inner
            .containers
            .iter_mut()
            .find(|c| c.id == id)
            .expect("container exists");
        container.state = ContainerState::Exited;
        container.exit_code = exit_code;
        container.files = files;
    }

    pub fn container_by_name(&self, name: &str) -> Option<String> {
        self.inner
            .lock()
            .unwrap()
            .containers
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.id.clone())
    }

    pub fn container_state(&self, id: &str) -> Option<ContainerState> {
        self.inner
            .lock()
            .unwrap()
            .containers
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.state)
    }

    pub fn container_env(&self, id: &str) -> Vec<String> {
        self.with_container(id, |c| c.env.clone())
    }

    pub fn container_entrypoint(&self, id: &str) -> Vec<String> {
        self.with_container(id, |c| c.entrypoint.clone())
    }

    pub fn container_mounts(&self, id: &str) -> Vec<VolumeMount> {
        self.with_container(id, |c| c.mounts.clone())
    }

    pub fn container_count(&self) -> usize {
        self.inner.lock().unwrap().containers.len()
    }

    fn with_container<T>(&self, id: &str, f: impl FnOnce(&FakeContainer) -> T) -> T {
        let inner = self.inner.lock().unwrap();
        let container = inner
            .containers
            .iter()
            .find(|c| c.id == id)
            .expect("container exists");
        f(container)
    }

    fn set_state(&self, id: &str, state: ContainerState) -> Result<(), HostError> {
        let mut inner = self.inner.lock().unwrap();
        let container = inner
            .containers
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(HostError::ContainerNotExist)?;
        container.state = state;
        Ok(())
    }
}

#[async_trait]
impl ContainerHost for FakeHost {
    async fn state(
        &self,
        selector: StateSelector,
        value: &str,
    ) -> Result<(String, ContainerState), HostError> {
        let inner = self.inner.lock().unwrap();
        inner
            .containers
            .iter()
            .find(|c| match selector {
                StateSelector::Id => c.id == value,
                StateSelector::Name => c.name == value,
            })
            .map(|c| (c.id.clone(), c.state))
            .ok_or(HostError::ContainerNotExist)
    }

    async fn run(&self, opts: RunOptions) -> Result<String, HostError> {
        let id = self.next_id();
        self.inner.lock().unwrap().containers.push(FakeContainer {
            id: id.clone(),
            name: opts.name,
            image: opts.image,
            env: opts.env,
            entrypoint: opts.entrypoint,
            mounts: opts.mounts,
            state: ContainerState::Running,
            exit_code: 0,
            files: BTreeMap::new(),
        });
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<(), HostError> {
        self.set_state(id, ContainerState::Running)
    }

    async fn pause(&self, id: &str) -> Result<(), HostError> {
        self.set_state(id, ContainerState::Paused)
    }

    async fn unpause(&self, id: &str) -> Result<(), HostError> {
        self.set_state(id, ContainerState::Running)
    }

    async fn restart(&self, id: &str) -> Result<(), HostError> {
        self.set_state(id, ContainerState::Running)
    }

    async fn delete(&self, id: &str) -> Result<(), HostError> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.containers.len();
        inner.containers.retain(|c| c.id != id);
        if inner.containers.len() == before {
            return Err(HostError::ContainerNotExist);
        }
        Ok(())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerDetails, HostError> {
        let inner = self.inner.lock().unwrap();
        inner
            .containers
            .iter()
            .find(|c| c.id == id)
            .map(|c| ContainerDetails {
                id: c.id.clone(),
                image: c.image.clone(),
                entrypoint: c.entrypoint.clone(),
                mounts: c.mounts.clone(),
            })
            .ok_or(HostError::ContainerNotExist)
    }

    async fn exit_code(&self, id: &str) -> Result<i64, HostError> {
        let inner = self.inner.lock().unwrap();
        inner
            .containers
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.exit_code)
            .ok_or(HostError::ContainerNotExist)
    }

    async fn read_files(
        &self,
        id: &str,
        _path: &str,
    ) -> Result<BTreeMap<String, String>, HostError> {
        let inner = self.inner.lock().unwrap();
        inner
            .containers
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.files.clone())
            .ok_or(HostError::ContainerNotExist)
    }

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, HostError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .containers
            .iter()
            .map(|c| ContainerSummary {
                id: c.id.clone(),
                image: c.image.clone(),
                volume_names: c.mounts.iter().map(|m| m.source.clone()).collect(),
            })
            .collect())
    }

    async fn exist_volume(&self, name: &str) -> Result<(), HostError> {
        if self.has_volume(name) {
            Ok(())
        } else {
            Err(HostError::VolumeNotExist)
        }
    }

    async fn create_volume(&self, name: &str) -> Result<String, HostError> {
        self.add_volume(name);
        Ok(name.to_string())
    }

    async fn delete_volume(&self, name: &str, _force: bool) -> Result<(), HostError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.volumes.remove(name) {
            return Err(HostError::VolumeNotExist);
        }
        Ok(())
    }

    async fn logs(&self, id: &str, _tail: usize) -> Result<String, HostError> {
        let inner = self.inner.lock().unwrap();
        inner
            .containers
            .iter()
            .find(|c| c.id == id)
            .map(|_| String::new())
            .ok_or(HostError::ContainerNotExist)
    }
}

/// Hands every endpoint the same fake host.
pub(crate) struct FakeHostFactory {
    pub host: Arc<FakeHost>,
}

#[async_trait]
impl HostFactory for FakeHostFactory {
    async fn connect(
        &self,
        _endpoint: &HostEndpoint,
    ) -> Result<Arc<dyn ContainerHost>, HostError> {
        Ok(self.host.clone())
    }
}
