//! Task CRUD and control-verb semantics.

use std::collections::BTreeMap;
use std::sync::Arc;

use taskcube_core::reference;
use taskcube_core::store::{
    sort_oldest_first, Page, RecordFilter, RecordQuery, RecordStore,
};
use taskcube_core::types::{generate_version, rfc3339_now, Kind, Script, Task, TaskState};
use taskcube_host::{HostEndpoint, HostFactory};

use crate::{check_step, ApiError};

pub struct TaskService {
    tasks: Arc<dyn RecordStore<Task>>,
    scripts: Arc<dyn RecordStore<Script>>,
    hosts: Arc<dyn HostFactory>,
    api_version: String,
}

impl TaskService {
    pub fn new(
        tasks: Arc<dyn RecordStore<Task>>,
        scripts: Arc<dyn RecordStore<Script>>,
        hosts: Arc<dyn HostFactory>,
        api_version: impl Into<String>,
    ) -> Self {
        Self {
            tasks,
            scripts,
            hosts,
            api_version: api_version.into(),
        }
    }

    /// Admit a new task: validate the spec, stamp identity and persist it as
    /// `Created` for the scheduler to pick up.
    pub async fn create(&self, mut task: Task) -> Result<Task, ApiError> {
        self.check_kind(&task)?;
        if task.metadata.name.is_empty() {
            return Err(ApiError::InvalidArgument(
                "task name cannot be empty".to_string(),
            ));
        }
        if self
            .tasks
            .exist(&RecordFilter::by_name(&task.metadata.name))
            .await?
        {
            return Err(ApiError::Conflict(format!(
                "Task/{} existed",
                task.metadata.name
            )));
        }
        self.check_spec(&mut task).await?;

        if task.metadata.version.is_empty() {
            task.metadata.version = generate_version();
        }
        task.metadata.create_at = rfc3339_now();
        task.status.status = TaskState::Created;
        self.tasks.create(&task).await?;
        tracing::info!(task = %task.metadata.name, version = %task.metadata.version, "task created");
        Ok(task)
    }

    /// Replace the spec of a task that has not started running yet.
    pub async fn update(&self, mut task: Task) -> Result<Task, ApiError> {
        self.check_kind(&task)?;
        let existing = self.load(&task.metadata.name).await?;
        if !existing.status.status.can_update() {
            return Err(ApiError::InvalidArgument(format!(
                "Task/{} status {} is immutable",
                task.metadata.name, existing.status.status
            )));
        }
        self.check_spec(&mut task).await?;

        if task.metadata.version.is_empty() {
            task.metadata.version = existing.metadata.version.clone();
        }
        self.tasks.update(&task).await?;
        Ok(task)
    }

    pub async fn query(&self, query: &RecordQuery) -> Result<Page<Task>, ApiError> {
        let mut page = self.tasks.query(query).await?;
        sort_oldest_first(&mut page.items);
        Ok(page)
    }

    /// Deletion is soft: stamp `DeleteAt` and let the reconciler terminate
    /// the task and remove the record.
    pub async fn delete(&self, name: &str, version: &str) -> Result<(), ApiError> {
        if name.is_empty() {
            return Err(ApiError::InvalidArgument(
                "task name cannot be empty".to_string(),
            ));
        }
        let matched: Vec<Task> = self
            .tasks
            .get(&RecordFilter::by_name_version(name, version))
            .await?;
        if matched.is_empty() {
            return Err(ApiError::NotFound(format!("Task/{name} not exist")));
        }
        for mut task in matched {
            task.metadata.delete_at = rfc3339_now();
            self.tasks.update(&task).await?;
        }
        Ok(())
    }

    /// Request a pause of the current step container.
    pub async fn pause(&self, name: &str) -> Result<Task, ApiError> {
        self.set_control_flag(name, |task| task.spec.pause = true).await
    }

    /// Resume a paused task.
    pub async fn unpause(&self, name: &str) -> Result<Task, ApiError> {
        self.set_control_flag(name, |task| task.spec.pause = false).await
    }

    /// Request termination; the reconciler deletes the container and the
    /// record.
    pub async fn stop(&self, name: &str) -> Result<Task, ApiError> {
        self.set_control_flag(name, |task| task.spec.terminate = true).await
    }

    /// Combined stdout/stderr of one step's container.
    pub async fn step_logs(
        &self,
        name: &str,
        step_name: &str,
        tail: usize,
    ) -> Result<String, ApiError> {
        let task = self.load(name).await?;
        let step = task
            .status
            .steps
            .iter()
            .find(|s| s.name == step_name)
            .ok_or_else(|| {
                ApiError::NotFound(format!("Task/{name}.Status.Steps[{step_name}] not exist"))
            })?;
        if step.container_id.is_empty() {
            return Err(ApiError::InvalidArgument(format!(
                "Task/{name}.Status.Steps[{step_name}].ContainerID is null"
            )));
        }
        if task.spec.host.is_empty() {
            return Err(ApiError::InvalidArgument(format!(
                "Task/{name} has no host assigned"
            )));
        }

        let cli = self
            .hosts
            .connect(&HostEndpoint::new(&task.spec.host, &self.api_version))
            .await?;
        Ok(cli.logs(&step.container_id, tail).await?)
    }

    async fn set_control_flag(
        &self,
        name: &str,
        apply: impl FnOnce(&mut Task),
    ) -> Result<Task, ApiError> {
        let mut task = self.load(name).await?;
        if !task.status.status.can_pause_stop() {
            return Err(ApiError::InvalidArgument(format!(
                "Task/{name} status {} does not accept pause/stop requests",
                task.status.status
            )));
        }
        apply(&mut task);
        self.tasks.update(&task).await?;
        Ok(task)
    }

    async fn load(&self, name: &str) -> Result<Task, ApiError> {
        let matched: Vec<Task> = self.tasks.get(&RecordFilter::by_name(name)).await?;
        matched
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::NotFound(format!("Task/{name} not exist")))
    }

    fn check_kind(&self, task: &Task) -> Result<(), ApiError> {
        if task.kind != Kind::Task {
            return Err(ApiError::InvalidArgument(format!(
                "unsupported kind: {}, only support: Task",
                task.kind
            )));
        }
        Ok(())
    }

    /// Steps and reference wiring must hold before a task is persisted.
    pub(crate) async fn check_spec(&self, task: &mut Task) -> Result<(), ApiError> {
        if task.spec.steps.is_empty() {
            return Err(ApiError::InvalidArgument(
                "Spec.Steps can not be empty".to_string(),
            ));
        }
        for index in 0..task.spec.steps.len() {
            let mut step = task.spec.steps[index].clone();
            check_step(self.scripts.as_ref(), index, &mut step).await?;
            task.spec.steps[index] = step;
        }

        for index in 0..task.spec.steps.len() {
            let input = task.spec.steps[index].input.clone();
            check_mapping_references(&input, task, &format!("Spec.Steps.{index}.Input"))?;
        }
        check_mapping_references(&task.spec.input.clone(), task, "Spec.Input")?;
        check_mapping_references(&task.spec.output.clone(), task, "Spec.Output")?;
        Ok(())
    }
}

/// Admission-time reference validation.
///
/// References into `Metadata`/`Spec` must resolve against the submitted
/// document (this is what rejects forward-dangling references to outputs a
/// step never declares). References rooted at `Status` carry runtime values
/// that cannot exist yet; for those only the step index is bounds-checked.
fn check_mapping_references(
    mapping: &BTreeMap<String, String>,
    task: &Task,
    where_: &str,
) -> Result<(), ApiError> {
    for (key, value) in mapping {
        if !reference::is_reference(value) {
            continue;
        }
        let path = value
            .trim_start_matches("{{")
            .trim_end_matches("}}")
            .to_string();
        let segments: Vec<&str> = path.split('.').collect();
        if segments.first() == Some(&"Status") {
            if segments.get(1) == Some(&"Steps") {
                let index = segments
                    .get(2)
                    .and_then(|s| s.parse::<usize>().ok())
                    .ok_or_else(|| {
                        ApiError::InvalidArgument(format!(
                            "check {where_}.{key} failed, reference not found: {path}"
                        ))
                    })?;
                if index >= task.spec.steps.len() {
                    return Err(ApiError::InvalidArgument(format!(
                        "check {where_}.{key} failed, reference not found: {path}"
                    )));
                }
            }
            continue;
        }
        if let Err(e) = reference::resolve(value, task) {
            return Err(ApiError::InvalidArgument(format!(
                "check {where_}.{key} failed, {e}"
            )));
        }
    }
    Ok(())
}
