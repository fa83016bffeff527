//! Service layer for the TaskCube HTTP façade.
//!
//! The services own admission validation and the CRUD/control semantics for
//! scripts, templates and tasks; they talk to the record stores and the
//! container hosts through the seams defined in taskcube-core and
//! taskcube-host.

mod error;
mod script;
mod task;
mod template;

#[cfg(test)]
pub(crate) mod testutil;

use taskcube_core::store::{RecordFilter, RecordStore};
use taskcube_core::types::{Script, TaskSpecStep};

pub use error::{ApiError, ErrorCode};
pub use script::ScriptService;
pub use task::TaskService;
pub use template::TemplateService;

/// Validate one step declaration (shared by task and template admission).
///
/// When both `script` and `source` are present, `source` wins and the script
/// reference is cleared; a bare script reference must name an existing
/// Script record.
pub(crate) async fn check_step(
    scripts: &dyn RecordStore<Script>,
    index: usize,
    step: &mut TaskSpecStep,
) -> Result<(), ApiError> {
    if step.name.is_empty() {
        return Err(ApiError::InvalidArgument(format!(
            "Spec.Steps[{index}].Name can not be empty"
        )));
    }
    if step.image.is_empty() {
        return Err(ApiError::InvalidArgument(format!(
            "Spec.Steps[{index}].Image can not be empty"
        )));
    }

    if step.script.is_empty() && step.source.is_empty() {
        return Err(ApiError::InvalidArgument(format!(
            "Spec.Steps[{index}].Script and Spec.Steps[{index}].Source can not both be empty"
        )));
    }
    if !step.script.is_empty() && !step.source.is_empty() {
        step.script.clear();
        return Ok(());
    }
    if !step.script.is_empty() {
        let exists = scripts.exist(&RecordFilter::by_name(&step.script)).await?;
        if !exists {
            return Err(ApiError::NotFound(format!(
                "Script/{} not exist",
                step.script
            )));
        }
    }
    Ok(())
}
