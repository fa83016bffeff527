//! Scheduling: admit freshly submitted tasks onto a host.

use taskcube_core::store::{sort_oldest_first, RecordFilter};
use taskcube_core::types::{Task, TaskState};

use crate::{ControllerError, TaskController};

impl TaskController {
    /// One scheduling pass: every task still in `""`, `Created` or `Pending`
    /// gets its status initialized, a host assigned and moves to `Running`.
    pub async fn schedule_tick(&self) {
        let filter = RecordFilter::all().with_states(&[
            TaskState::Unset,
            TaskState::Created,
            TaskState::Pending,
        ]);
        let mut tasks = match self.tasks.get(&filter).await {
            Ok(tasks) => tasks,
            Err(e) => {
                tracing::error!(error = %e, "query schedulable tasks failed");
                return;
            }
        };
        sort_oldest_first(&mut tasks);

        for mut task in tasks {
            if let Err(e) = self.schedule_task(&mut task) {
                tracing::error!(task = %task.metadata.name, error = %e, "schedule task failed");
                continue;
            }
            if let Err(e) = self.tasks.update(&task).await {
                tracing::error!(task = %task.metadata.name, error = %e, "persist scheduled task failed");
                continue;
            }
            tracing::info!(
                task = %task.metadata.name,
                host = %task.spec.host,
                steps = task.step_count(),
                "task admitted"
            );
        }
    }

    fn schedule_task(&self, task: &mut Task) -> Result<(), ControllerError> {
        task.init_status();

        if self.node_pool.is_empty() {
            return Err(ControllerError::NoNodesAvailable);
        }

        // TODO: pick the least-loaded node once hosts report capacity.
        if task.spec.host.is_empty() {
            task.spec.host = self.node_pool[0].clone();
        }

        task.status.status = TaskState::Running;
        Ok(())
    }
}
