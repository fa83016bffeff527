//! Task records: instances of a pipeline driven by the controller.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{Kind, Metadata, StepState, TaskSpecStep, TaskState, TaskTemplate};
use crate::reference;

/// An instance of a multi-step pipeline.
///
/// Identity is immutable after creation; only `Spec.Pause`, `Spec.Terminate`,
/// `Metadata.DeleteAt` and the `Status` block change afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Task {
    pub kind: Kind,
    pub metadata: Metadata,
    pub spec: TaskSpec,
    pub status: TaskStatus,
}

impl Default for Task {
    fn default() -> Self {
        Self {
            kind: Kind::Task,
            metadata: Metadata::default(),
            spec: TaskSpec::default(),
            status: TaskStatus::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct TaskSpec {
    pub pause: bool,
    pub terminate: bool,
    pub host: String,
    pub steps: Vec<TaskSpecStep>,
    pub input: BTreeMap<String, String>,
    pub output: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct TaskStatus {
    pub status: TaskState,
    pub message: String,
    pub progress: String,
    pub input: BTreeMap<String, String>,
    pub output: BTreeMap<String, String>,
    pub steps: Vec<TaskStatusStep>,
}

/// Runtime status of one step, parallel to `Spec.Steps`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct TaskStatusStep {
    pub name: String,
    #[serde(rename = "ContainerID")]
    pub container_id: String,
    pub status: StepState,
    pub message: String,
    pub exit_code: i64,
    pub input: BTreeMap<String, String>,
    pub output: BTreeMap<String, String>,
    pub started_at: String,
    pub finished_at: String,
}

impl Task {
    /// Instantiate a task from a template: the spec is a deep copy of the
    /// template's, pause/terminate cleared, host left to the scheduler.
    pub fn from_template(template: &TaskTemplate, name: String, version: String) -> Self {
        Self {
            kind: Kind::Task,
            metadata: Metadata {
                name,
                version,
                ..Metadata::default()
            },
            spec: TaskSpec {
                pause: false,
                terminate: false,
                host: String::new(),
                steps: template.spec.steps.clone(),
                input: template.spec.input.clone(),
                output: template.spec.output.clone(),
            },
            status: TaskStatus::default(),
        }
    }

    pub fn step_count(&self) -> usize {
        self.spec.steps.len()
    }

    /// Index of the current step: the first one not yet exited, or the last
    /// step once every step has exited.
    pub fn current_step_index(&self) -> usize {
        for (i, step) in self.status.steps.iter().enumerate() {
            if step.status != StepState::Exited {
                return i;
            }
        }
        self.status.steps.len().saturating_sub(1)
    }

    /// Record progress as `"(k+1)/n"` with `n = len(Spec.Steps)`.
    pub fn set_progress(&mut self, current_step: usize) {
        self.status.progress = format!("{}/{}", current_step + 1, self.step_count());
    }

    /// Initialize the status block at admission time: `Created`, progress
    /// `0/n`, one status step per spec step, and `Status.Input` resolved from
    /// `Spec.Input`.
    pub fn init_status(&mut self) {
        self.status.status = TaskState::Created;
        self.status.message.clear();
        self.status.progress = format!("0/{}", self.step_count());
        self.status.steps = self
            .spec
            .steps
            .iter()
            .map(|step| TaskStatusStep {
                name: step.name.clone(),
                input: step.input.clone(),
                ..TaskStatusStep::default()
            })
            .collect();
        self.resolve_status_input();
    }

    /// Copy `Spec.Input` into `Status.Input` and resolve references.
    pub fn resolve_status_input(&mut self) {
        let mut input = self.spec.input.clone();
        reference::resolve_mapping(&mut input, self);
        self.status.input = input;
    }

    /// Resolve `Status.Output` from `Spec.Output`. The copy happens once;
    /// later calls only substitute references that have become resolvable,
    /// so values settle as steps publish their outputs.
    pub fn resolve_status_output(&mut self) {
        if self.status.output.is_empty() {
            self.status.output = self.spec.output.clone();
        }
        let mut output = std::mem::take(&mut self.status.output);
        reference::resolve_mapping(&mut output, self);
        self.status.output = output;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaskTemplateSpec;

    fn two_step_task() -> Task {
        let template = TaskTemplate {
            metadata: Metadata::named("pipeline"),
            spec: TaskTemplateSpec {
                input: BTreeMap::from([("db".to_string(), "orders".to_string())]),
                output: BTreeMap::from([(
                    "result".to_string(),
                    "{{Spec.Steps.1.Output.result}}".to_string(),
                )]),
                steps: vec![
                    TaskSpecStep {
                        name: "dump".to_string(),
                        image: "alpine".to_string(),
                        source: "echo one > /agent/output/x".to_string(),
                        output: BTreeMap::from([("x".to_string(), String::new())]),
                        ..TaskSpecStep::default()
                    },
                    TaskSpecStep {
                        name: "load".to_string(),
                        image: "alpine".to_string(),
                        source: "echo $EXECUTE_PARA_x".to_string(),
                        input: BTreeMap::from([(
                            "x".to_string(),
                            "{{Status.Steps.0.Output.x}}".to_string(),
                        )]),
                        output: BTreeMap::from([("result".to_string(), String::new())]),
                        ..TaskSpecStep::default()
                    },
                ],
            },
            ..TaskTemplate::default()
        };
        Task::from_template(&template, "pipeline-abc12".to_string(), "v1".to_string())
    }

    #[test]
    fn test_from_template_copies_steps_deeply() {
        let task = two_step_task();
        assert_eq!(task.kind, Kind::Task);
        assert!(!task.spec.pause);
        assert!(!task.spec.terminate);
        assert!(task.spec.host.is_empty());
        assert_eq!(task.spec.steps.len(), 2);
        assert_eq!(task.spec.steps[0].name, "dump");
        assert_eq!(task.spec.input["db"], "orders");
    }

    #[test]
    fn test_init_status_allocates_parallel_steps() {
        let mut task = two_step_task();
        task.init_status();

        assert_eq!(task.status.status, TaskState::Created);
        assert_eq!(task.status.progress, "0/2");
        assert_eq!(task.status.steps.len(), task.spec.steps.len());
        for (status_step, spec_step) in task.status.steps.iter().zip(task.spec.steps.iter()) {
            assert_eq!(status_step.name, spec_step.name);
            assert_eq!(status_step.input, spec_step.input);
            assert!(status_step.container_id.is_empty());
            assert_eq!(status_step.status, StepState::Unset);
        }
        assert_eq!(task.status.input["db"], "orders");
    }

    #[test]
    fn test_current_step_index_and_progress() {
        let mut task = two_step_task();
        task.init_status();
        assert_eq!(task.current_step_index(), 0);

        task.status.steps[0].status = StepState::Exited;
        assert_eq!(task.current_step_index(), 1);
        task.set_progress(1);
        assert_eq!(task.status.progress, "2/2");

        task.status.steps[1].status = StepState::Exited;
        // All exited: the index pins to the last step.
        assert_eq!(task.current_step_index(), 1);
    }

    #[test]
    fn test_resolve_status_output_settles_as_steps_finish() {
        let mut task = two_step_task();
        task.init_status();

        // Before any step exits the reference stays in place.
        task.resolve_status_output();
        assert_eq!(task.status.output["result"], "{{Spec.Steps.1.Output.result}}");

        task.status.steps[1].output =
            BTreeMap::from([("result".to_string(), "done".to_string())]);
        task.resolve_status_output();
        assert_eq!(task.status.output["result"], "done");
    }

    #[test]
    fn test_task_roundtrip_is_identity() {
        let mut task = two_step_task();
        task.init_status();
        task.status.steps[0].container_id = "c0ffee".to_string();
        task.status.steps[0].status = StepState::Running;

        let json = serde_json::to_string(&task).unwrap();
        let back: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(back, task);

        // The wire field for the container id keeps the uppercase suffix.
        assert!(json.contains("\"ContainerID\":\"c0ffee\""));
    }
}
