//! Step lifecycle: drive each running task one container at a time.

use taskcube_core::reference;
use taskcube_core::store::{sort_newest_first, sort_oldest_first, RecordFilter};
use taskcube_core::types::{
    rand_suffix, rfc3339_now, ScriptType, StepState, Task, TaskSpecStep, TaskState,
};
use taskcube_host::{ContainerHost, ContainerState, HostError, RunOptions, StateSelector, VolumeMount};

use crate::{ControllerError, TaskController, AGENT_NAME, AGENT_VOLUME, EXEC_PATH};

/// Directory inside a step container harvested for declared outputs.
pub const OUTPUT_PATH: &str = "/agent/output";
/// Environment variable carrying the script source into the container.
pub const SCRIPT_CONTENT_ENV: &str = "EXECUTE_SCRIPT_CONTENT";
/// Prefix for input parameters injected as environment variables.
pub const PARA_PREFIX: &str = "EXECUTE_PARA_";

impl TaskController {
    /// One reconcile pass over every `Running` task. Per-task errors are
    /// logged and the loop moves on; the ticker is the retry loop.
    pub async fn lifecycle_tick(&self) {
        let filter = RecordFilter::all().with_states(&[TaskState::Running]);
        let mut tasks = match self.tasks.get(&filter).await {
            Ok(tasks) => tasks,
            Err(e) => {
                tracing::error!(error = %e, "query running tasks failed");
                return;
            }
        };
        sort_oldest_first(&mut tasks);

        for mut task in tasks {
            if let Err(e) = self.reconcile_task(&mut task).await {
                tracing::error!(task = %task.metadata.name, error = %e, "reconcile task failed");
            }
        }
    }

    async fn reconcile_task(&self, task: &mut Task) -> Result<(), ControllerError> {
        if task.status.steps.is_empty() {
            task.status.status = TaskState::Failed;
            task.status.message = "task has no steps".to_string();
            self.tasks.update(task).await?;
            return Ok(());
        }

        let k = task.current_step_index();
        task.set_progress(k);
        let host = task.spec.host.clone();
        let cli = self.connect(&host).await?;

        let container_id = task.status.steps[k].container_id.clone();
        if container_id.is_empty() {
            if let Err(e) = self.create_step_container(cli.as_ref(), k, task).await {
                task.status.status = TaskState::Failed;
                task.status.message = format!("create container for step({k}) failed, {e}");
                tracing::error!(task = %task.metadata.name, step = k, error = %e, "create step container failed");
            } else {
                tracing::info!(
                    task = %task.metadata.name,
                    step = k,
                    host = %host,
                    container = %task.status.steps[k].container_id,
                    "step container created"
                );
            }
            self.tasks.update(task).await?;
            return Ok(());
        }

        let state = match cli.state(StateSelector::Id, &container_id).await {
            Ok((_, state)) => Some(state),
            Err(HostError::ContainerNotExist) => {
                tracing::warn!(
                    task = %task.metadata.name,
                    step = k,
                    container = %container_id,
                    "step container is gone"
                );
                None
            }
            // Transport-level failure: keep the step in place, retry next tick.
            Err(other) => return Err(other.into()),
        };

        if !task.metadata.delete_at.is_empty() {
            task.spec.terminate = true;
        }
        if task.spec.terminate {
            return self.terminate_task(cli.as_ref(), k, state, task).await;
        }

        if task.spec.pause {
            if state != Some(ContainerState::Paused) {
                match cli.pause(&container_id).await {
                    Ok(()) => {
                        let step = &mut task.status.steps[k];
                        step.status = StepState::Paused;
                        step.message =
                            format!("step({k}) paused, container({host}/{container_id}) paused");
                        tracing::info!(task = %task.metadata.name, step = k, "step paused");
                    }
                    Err(e) => {
                        task.status.steps[k].message =
                            format!("pause container({host}/{container_id}) failed, {e}");
                        tracing::error!(task = %task.metadata.name, step = k, error = %e, "pause step failed");
                    }
                }
                self.tasks.update(task).await?;
            }
            return Ok(());
        }

        match state {
            None => {
                let msg = format!(
                    "step({k}) should be running but container({host}/{container_id}) not exist"
                );
                tracing::error!(task = %task.metadata.name, step = k, "{msg}");
                task.status.status = TaskState::Failed;
                task.status.message = msg;
            }
            Some(
                observed @ (ContainerState::Creating
                | ContainerState::Created
                | ContainerState::Initializing
                | ContainerState::Running),
            ) => {
                let step = &mut task.status.steps[k];
                step.status = StepState::Creating;
                step.message = format!(
                    "step({k}) in progress, container({host}/{container_id}) state is {observed}"
                );
            }
            Some(ContainerState::Paused) => {
                if let Err(e) = cli.unpause(&container_id).await {
                    let step = &mut task.status.steps[k];
                    step.status = StepState::Paused;
                    step.message =
                        format!("unpause container({host}/{container_id}) failed, {e}");
                    tracing::error!(task = %task.metadata.name, step = k, error = %e, "unpause step failed");
                } else {
                    tracing::info!(task = %task.metadata.name, step = k, "step unpaused");
                }
            }
            Some(ContainerState::Exited) => {
                self.complete_step(cli.as_ref(), &container_id, k, task).await;
            }
        }

        self.tasks.update(task).await?;
        Ok(())
    }

    async fn terminate_task(
        &self,
        cli: &dyn ContainerHost,
        k: usize,
        state: Option<ContainerState>,
        task: &mut Task,
    ) -> Result<(), ControllerError> {
        let host = task.spec.host.clone();
        let container_id = task.status.steps[k].container_id.clone();

        let container_alive = state.is_some() && state != Some(ContainerState::Exited);
        if container_alive {
            match cli.delete(&container_id).await {
                Ok(()) => {
                    let step = &mut task.status.steps[k];
                    step.status = StepState::Exited;
                    step.message = format!(
                        "task terminated, container({host}/{container_id}) has been deleted"
                    );
                    tracing::info!(task = %task.metadata.name, step = k, "step container deleted on terminate");
                }
                Err(e) => {
                    task.status.steps[k].message = format!(
                        "task terminated but delete container({host}/{container_id}) failed, {e}"
                    );
                    tracing::error!(task = %task.metadata.name, step = k, error = %e, "delete step container failed");
                }
            }
            task.status.status = TaskState::Terminating;
            // Revisit next tick to make sure the container really went away.
            self.tasks.update(task).await?;
            return Ok(());
        }

        task.status.status = TaskState::Terminated;
        tracing::info!(task = %task.metadata.name, "task terminated, removing record");
        self.tasks
            .delete(&RecordFilter::by_name_version(
                &task.metadata.name,
                &task.metadata.version,
            ))
            .await?;
        Ok(())
    }

    /// Step completion: harvest exit code and declared outputs, settle
    /// `Status.Output`, then decide the task outcome.
    async fn complete_step(
        &self,
        cli: &dyn ContainerHost,
        container_id: &str,
        k: usize,
        task: &mut Task,
    ) {
        let host = task.spec.host.clone();
        task.status.steps[k].finished_at = rfc3339_now();

        let code = match cli.exit_code(container_id).await {
            Ok(code) => code,
            Err(e) => {
                task.status.steps[k].message =
                    format!("get container({host}/{container_id}) exit code failed, {e}");
                tracing::error!(task = %task.metadata.name, step = k, error = %e, "get exit code failed");
                return;
            }
        };

        let files = match cli.read_files(container_id, OUTPUT_PATH).await {
            Ok(files) => files,
            Err(e) => {
                task.status.steps[k].message =
                    format!("read container({host}/{container_id}) outputs failed, {e}");
                tracing::error!(task = %task.metadata.name, step = k, error = %e, "read step outputs failed");
                return;
            }
        };

        {
            let step = &mut task.status.steps[k];
            step.status = StepState::Exited;
            step.exit_code = code;
            step.message.clear();
        }
        tracing::info!(
            task = %task.metadata.name,
            step = k,
            exit_code = code,
            "step exited"
        );

        let declared: Vec<String> = task.spec.steps[k].output.keys().cloned().collect();
        for key in declared {
            // Absent files resolve to the empty string, stable across runs.
            let value = files.get(&key).cloned().unwrap_or_default();
            task.status.steps[k].output.insert(key, value);
        }
        task.resolve_status_output();

        if code != 0 {
            task.status.status = TaskState::Failed;
            return;
        }
        if k + 1 == task.step_count() {
            task.status.status = TaskState::Succeeded;
            tracing::info!(task = %task.metadata.name, "task finished");
        }
        // Otherwise stay Running: the next tick sees the new current step
        // with an empty ContainerID and creates its container.
    }

    /// Create the container for the current step, wiring the script source
    /// and resolved inputs through environment variables.
    async fn create_step_container(
        &self,
        cli: &dyn ContainerHost,
        k: usize,
        task: &mut Task,
    ) -> Result<(), ControllerError> {
        let step_spec = task.spec.steps[k].clone();
        let name = format!(
            "{}-{}-{}",
            task.metadata.name,
            step_spec.name,
            rand_suffix(5)
        );

        let (script_type, source) = self.step_script(&step_spec).await?;

        task.set_progress(k);
        {
            let step = &mut task.status.steps[k];
            step.container_id.clear();
            step.status = StepState::Creating;
            step.started_at = rfc3339_now();
            // Step inputs override task inputs.
            let mut merged = task.spec.input.clone();
            merged.extend(step_spec.input.clone());
            step.input = merged;
        }
        let mut input = std::mem::take(&mut task.status.steps[k].input);
        reference::resolve_mapping(&mut input, task);
        task.status.steps[k].input = input;

        let mut env = Vec::with_capacity(task.spec.input.len() + task.status.steps[k].input.len() + 1);
        env.push(format!("{SCRIPT_CONTENT_ENV}={source}"));
        for (key, value) in &task.spec.input {
            env.push(format!("{PARA_PREFIX}{key}={value}"));
        }
        for (key, value) in &task.status.steps[k].input {
            env.push(format!("{PARA_PREFIX}{key}={value}"));
        }

        let opts = RunOptions {
            name,
            image: step_spec.image.clone(),
            env,
            entrypoint: vec![
                format!("{EXEC_PATH}/{AGENT_NAME}"),
                "run".to_string(),
                script_type.as_str().to_string(),
            ],
            mounts: vec![VolumeMount {
                source: AGENT_VOLUME.to_string(),
                target: EXEC_PATH.to_string(),
                read_only: true,
            }],
        };

        let id = cli.run(opts).await?;
        task.status.steps[k].container_id = id;
        Ok(())
    }

    /// Inline source wins over a script reference; otherwise the newest
    /// version of the named script is used.
    async fn step_script(
        &self,
        step: &TaskSpecStep,
    ) -> Result<(ScriptType, String), ControllerError> {
        if !step.source.is_empty() {
            return Ok((ScriptType::Bash, step.source.clone()));
        }

        let mut scripts = self
            .scripts
            .get(&RecordFilter::by_name(&step.script))
            .await?;
        if scripts.is_empty() {
            return Err(ControllerError::ScriptNotExist(format!(
                "Script/{}",
                step.script
            )));
        }
        sort_newest_first(&mut scripts);
        let latest = scripts.swap_remove(0);
        Ok((latest.metadata.script_type, latest.source))
    }
}
