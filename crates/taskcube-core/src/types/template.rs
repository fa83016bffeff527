//! TaskTemplate records: reusable definitions of multi-step pipelines.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{Kind, Metadata};

/// A versioned, reusable multi-step pipeline definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct TaskTemplate {
    pub kind: Kind,
    pub metadata: Metadata,
    pub spec: TaskTemplateSpec,
}

impl Default for TaskTemplate {
    fn default() -> Self {
        Self {
            kind: Kind::TaskTemplate,
            metadata: Metadata::default(),
            spec: TaskTemplateSpec::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct TaskTemplateSpec {
    pub input: BTreeMap<String, String>,
    pub output: BTreeMap<String, String>,
    pub steps: Vec<TaskSpecStep>,
}

/// One containerized step of a pipeline.
///
/// Exactly one of `script` (a Script record name) or `source` (inline text)
/// is expected; when both are present `source` wins at admission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct TaskSpecStep {
    pub name: String,
    pub image: String,
    pub script: String,
    pub source: String,
    pub input: BTreeMap<String, String>,
    pub output: BTreeMap<String, String>,
}
