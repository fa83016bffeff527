//! Record type definitions.
//!
//! Every record is identified by `(Kind, Name, Version)` and serializes to a
//! PascalCase JSON document; reference expressions resolve against exactly
//! that projection.

mod script;
mod task;
mod template;

pub use script::{Script, ScriptMetadata};
pub use task::{Task, TaskSpec, TaskStatus, TaskStatusStep};
pub use template::{TaskSpecStep, TaskTemplate, TaskTemplateSpec};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Versions kept per script/template name; older ones are reaped on update.
pub const RESERVED_VERSIONS: usize = 20;

/// Record kind discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Kind {
    Script,
    Task,
    TaskTemplate,
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Kind::Script => write!(f, "Script"),
            Kind::Task => write!(f, "Task"),
            Kind::TaskTemplate => write!(f, "TaskTemplate"),
        }
    }
}

/// Interpreter a script source runs under inside the step container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptType {
    #[default]
    Bash,
    Sh,
    Python,
}

impl ScriptType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptType::Bash => "bash",
            ScriptType::Sh => "sh",
            ScriptType::Python => "python",
        }
    }
}

impl std::fmt::Display for ScriptType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TaskState {
    /// Freshly submitted, not yet admitted by the scheduler.
    #[default]
    #[serde(rename = "")]
    Unset,
    Created,
    Pending,
    Running,
    Pausing,
    Paused,
    Succeeded,
    Failed,
    Unknown,
    Terminating,
    Terminated,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Unset => "",
            TaskState::Created => "Created",
            TaskState::Pending => "Pending",
            TaskState::Running => "Running",
            TaskState::Pausing => "Pausing",
            TaskState::Paused => "Paused",
            TaskState::Succeeded => "Succeeded",
            TaskState::Failed => "Failed",
            TaskState::Unknown => "Unknown",
            TaskState::Terminating => "Terminating",
            TaskState::Terminated => "Terminated",
        }
    }

    /// The spec may still be replaced in these states.
    pub fn can_update(&self) -> bool {
        matches!(self, TaskState::Unset | TaskState::Created | TaskState::Pending)
    }

    /// Pause/terminate requests are accepted in these states.
    pub fn can_pause_stop(&self) -> bool {
        matches!(
            self,
            TaskState::Unset
                | TaskState::Created
                | TaskState::Pending
                | TaskState::Running
                | TaskState::Pausing
                | TaskState::Paused
        )
    }

    /// Terminal outcomes are never rolled back.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Terminated
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Step lifecycle state, mirroring the container runtime taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepState {
    #[default]
    #[serde(rename = "")]
    Unset,
    Creating,
    Created,
    Initializing,
    Running,
    Paused,
    Exited,
}

impl StepState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepState::Unset => "",
            StepState::Creating => "creating",
            StepState::Created => "created",
            StepState::Initializing => "initializing",
            StepState::Running => "running",
            StepState::Paused => "paused",
            StepState::Exited => "exited",
        }
    }
}

impl std::fmt::Display for StepState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity and audit metadata shared by tasks and templates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Metadata {
    pub name: String,
    pub version: String,
    pub create_at: String,
    pub delete_at: String,
}

impl Metadata {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Generate a lexicographically sortable version string; a newer instant
/// always compares greater.
pub fn generate_version() -> String {
    let now = Utc::now();
    format!(
        "{}{:03}",
        now.format("%Y%m%d%H%M%S"),
        now.timestamp_subsec_millis()
    )
}

/// RFC3339 timestamp used for CreateAt/StartedAt/FinishedAt stamps.
pub fn rfc3339_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Random lowercase-alphanumeric suffix appended to generated names
/// (submitted tasks, step containers).
pub fn rand_suffix(len: usize) -> String {
    use rand::Rng;
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_state_classification() {
        assert!(TaskState::Unset.can_update());
        assert!(TaskState::Created.can_update());
        assert!(TaskState::Pending.can_update());
        assert!(!TaskState::Running.can_update());
        assert!(!TaskState::Succeeded.can_update());

        assert!(TaskState::Running.can_pause_stop());
        assert!(TaskState::Paused.can_pause_stop());
        assert!(!TaskState::Failed.can_pause_stop());
        assert!(!TaskState::Terminating.can_pause_stop());

        assert!(TaskState::Succeeded.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Terminated.is_terminal());
        assert!(!TaskState::Running.is_terminal());
    }

    #[test]
    fn test_state_serialization_uses_wire_labels() {
        assert_eq!(serde_json::to_string(&TaskState::Unset).unwrap(), "\"\"");
        assert_eq!(
            serde_json::to_string(&TaskState::Running).unwrap(),
            "\"Running\""
        );
        assert_eq!(
            serde_json::to_string(&StepState::Creating).unwrap(),
            "\"creating\""
        );
        assert_eq!(serde_json::to_string(&StepState::Unset).unwrap(), "\"\"");
        assert_eq!(
            serde_json::to_string(&ScriptType::Python).unwrap(),
            "\"python\""
        );

        let state: TaskState = serde_json::from_str("\"Terminating\"").unwrap();
        assert_eq!(state, TaskState::Terminating);
        let step: StepState = serde_json::from_str("\"exited\"").unwrap();
        assert_eq!(step, StepState::Exited);
    }

    #[test]
    fn test_generate_version_is_sortable() {
        let v = generate_version();
        assert_eq!(v.len(), 17);
        assert!(v.chars().all(|c| c.is_ascii_digit()));
        // A strictly later instant must compare greater as a plain string.
        assert!("20250101000000000" < v.as_str());
    }

    #[test]
    fn test_rand_suffix_shape() {
        let suffix = rand_suffix(5);
        assert_eq!(suffix.len(), 5);
        assert!(suffix
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        assert_ne!(rand_suffix(16), rand_suffix(16));
    }
}
