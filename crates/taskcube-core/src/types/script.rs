//! Script records: reusable, versioned source texts.

use serde::{Deserialize, Serialize};

use super::{Kind, ScriptType};

/// A versioned script source executed by step containers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Script {
    pub kind: Kind,
    pub metadata: ScriptMetadata,
    pub source: String,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            kind: Kind::Script,
            metadata: ScriptMetadata::default(),
            source: String::new(),
        }
    }
}

impl Script {
    pub fn new(name: impl Into<String>, script_type: ScriptType, source: impl Into<String>) -> Self {
        Self {
            kind: Kind::Script,
            metadata: ScriptMetadata {
                name: name.into(),
                script_type,
                ..ScriptMetadata::default()
            },
            source: source.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ScriptMetadata {
    pub name: String,
    pub version: String,
    #[serde(rename = "Type")]
    pub script_type: ScriptType,
    pub create_at: String,
}
