//! Reference expressions.
//!
//! A reference is a string of the form `{{dotted.path}}`; the interior path
//! is evaluated against the JSON projection of a [`Task`] document
//! (`Metadata.Name`, `Spec.Input.foo`, `Status.Steps.2.Output.key`, ...).
//! Numeric segments index into arrays.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::types::Task;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("reference not found: {0}")]
    NotFound(String),
    #[error("serialize task document failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Whether `s` is a reference expression.
pub fn is_reference(s: &str) -> bool {
    s.len() >= OPEN.len() + CLOSE.len() && s.starts_with(OPEN) && s.ends_with(CLOSE)
}

fn path_of(expr: &str) -> &str {
    expr.trim_start_matches(OPEN).trim_end_matches(CLOSE)
}

/// Resolve one expression against the task document, or fail with
/// [`ReferenceError::NotFound`].
pub fn resolve(expr: &str, task: &Task) -> Result<String, ReferenceError> {
    let doc = serde_json::to_value(task)?;
    lookup(path_of(expr), &doc).ok_or_else(|| ReferenceError::NotFound(path_of(expr).to_string()))
}

/// Rewrite `{{Spec.Steps.N.Output.KEY}}` to `{{Status.Steps.N.Output.KEY}}`.
///
/// Templates are authored against the declaration in `Spec`, but runtime
/// output values live in `Status`; any other expression passes through
/// untouched.
pub fn rewrite_step_output(expr: &str) -> String {
    if !is_reference(expr) {
        return expr.to_string();
    }
    let segments: Vec<&str> = path_of(expr).split('.').collect();
    let is_step_output = segments.len() > 4
        && segments[0] == "Spec"
        && segments[1] == "Steps"
        && !segments[2].is_empty()
        && segments[2].bytes().all(|b| b.is_ascii_digit())
        && segments[3] == "Output";
    if is_step_output {
        format!("{}Status.{}{}", OPEN, segments[1..].join("."), CLOSE)
    } else {
        expr.to_string()
    }
}

/// Best-effort in-place substitution over a mapping: reference values are
/// replaced by their resolved value; unresolvable ones keep the original
/// expression. Already-resolved mappings are left untouched.
pub fn resolve_mapping(mapping: &mut BTreeMap<String, String>, task: &Task) {
    if !mapping.values().any(|v| is_reference(v)) {
        return;
    }
    let Ok(doc) = serde_json::to_value(task) else {
        return;
    };
    for value in mapping.values_mut() {
        if !is_reference(value) {
            continue;
        }
        let rewritten = rewrite_step_output(value);
        if let Some(resolved) = lookup(path_of(&rewritten), &doc) {
            *value = resolved;
        }
    }
}

fn lookup(path: &str, doc: &serde_json::Value) -> Option<String> {
    let mut current = doc;
    for segment in path.split('.') {
        current = match current {
            serde_json::Value::Object(map) => map.get(segment)?,
            serde_json::Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(stringify(current))
}

fn stringify(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Metadata, StepState, TaskSpecStep, TaskStatusStep};

    fn sample_task() -> Task {
        let mut task = Task {
            metadata: Metadata::named("demo"),
            ..Task::default()
        };
        task.spec.input.insert("db".to_string(), "orders".to_string());
        task.spec.steps.push(TaskSpecStep {
            name: "dump".to_string(),
            image: "alpine".to_string(),
            source: "true".to_string(),
            output: BTreeMap::from([("x".to_string(), String::new())]),
            ..TaskSpecStep::default()
        });
        task.status.steps.push(TaskStatusStep {
            name: "dump".to_string(),
            status: StepState::Exited,
            output: BTreeMap::from([("x".to_string(), "one".to_string())]),
            ..TaskStatusStep::default()
        });
        task
    }

    #[test]
    fn test_is_reference() {
        assert!(is_reference("{{Metadata.Name}}"));
        assert!(is_reference("{{}}"));
        assert!(!is_reference("Metadata.Name"));
        assert!(!is_reference("{{Metadata.Name"));
        assert!(!is_reference("Metadata.Name}}"));
        assert!(!is_reference(""));
    }

    #[test]
    fn test_resolve_scalar_paths() {
        let task = sample_task();
        assert_eq!(resolve("{{Metadata.Name}}", &task).unwrap(), "demo");
        assert_eq!(resolve("{{Spec.Input.db}}", &task).unwrap(), "orders");
        assert_eq!(
            resolve("{{Status.Steps.0.Output.x}}", &task).unwrap(),
            "one"
        );
        // Non-string leaves stringify.
        assert_eq!(resolve("{{Spec.Pause}}", &task).unwrap(), "false");
    }

    #[test]
    fn test_resolve_missing_path_fails() {
        let task = sample_task();
        let err = resolve("{{Spec.Steps.1.Output.z}}", &task).unwrap_err();
        assert!(matches!(err, ReferenceError::NotFound(_)));
        assert!(resolve("{{}}", &task).is_err());
    }

    #[test]
    fn test_rewrite_step_output() {
        assert_eq!(
            rewrite_step_output("{{Spec.Steps.0.Output.x}}"),
            "{{Status.Steps.0.Output.x}}"
        );
        assert_eq!(
            rewrite_step_output("{{Spec.Steps.12.Output.a.b}}"),
            "{{Status.Steps.12.Output.a.b}}"
        );
        // Only the step-output shape is rewritten.
        assert_eq!(rewrite_step_output("{{Spec.Input.db}}"), "{{Spec.Input.db}}");
        assert_eq!(
            rewrite_step_output("{{Spec.Steps.x.Output.a}}"),
            "{{Spec.Steps.x.Output.a}}"
        );
        assert_eq!(rewrite_step_output("plain"), "plain");
    }

    #[test]
    fn test_resolve_mapping_is_best_effort() {
        let task = sample_task();
        let mut mapping = BTreeMap::from([
            ("a".to_string(), "{{Spec.Steps.0.Output.x}}".to_string()),
            ("b".to_string(), "{{Spec.Input.db}}".to_string()),
            ("c".to_string(), "{{Spec.Input.missing}}".to_string()),
            ("d".to_string(), "literal".to_string()),
        ]);
        resolve_mapping(&mut mapping, &task);

        // Spec step-output references flow from Status.
        assert_eq!(mapping["a"], "one");
        assert_eq!(mapping["b"], "orders");
        // Unresolvable references keep the original expression.
        assert_eq!(mapping["c"], "{{Spec.Input.missing}}");
        assert_eq!(mapping["d"], "literal");
    }

    #[test]
    fn test_resolve_mapping_idempotent_on_resolved_values() {
        let task = sample_task();
        let mut mapping = BTreeMap::from([
            ("a".to_string(), "one".to_string()),
            ("b".to_string(), "orders".to_string()),
        ]);
        let before = mapping.clone();
        resolve_mapping(&mut mapping, &task);
        assert_eq!(mapping, before);
    }
}
