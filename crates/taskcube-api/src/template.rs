//! TaskTemplate CRUD and submission.

use std::sync::Arc;

use taskcube_core::store::{
    sort_newest_first, Page, RecordFilter, RecordQuery, RecordStore,
};
use taskcube_core::types::{
    generate_version, rand_suffix, rfc3339_now, Kind, Script, Task, TaskTemplate,
    RESERVED_VERSIONS,
};

use crate::{check_step, ApiError, TaskService};

pub struct TemplateService {
    templates: Arc<dyn RecordStore<TaskTemplate>>,
    scripts: Arc<dyn RecordStore<Script>>,
}

impl TemplateService {
    pub fn new(
        templates: Arc<dyn RecordStore<TaskTemplate>>,
        scripts: Arc<dyn RecordStore<Script>>,
    ) -> Self {
        Self { templates, scripts }
    }

    pub async fn create(&self, mut template: TaskTemplate) -> Result<TaskTemplate, ApiError> {
        self.check_kind_and_name(&template)?;
        if self
            .templates
            .exist(&RecordFilter::by_name(&template.metadata.name))
            .await?
        {
            return Err(ApiError::Conflict(format!(
                "TaskTemplate/{} existed",
                template.metadata.name
            )));
        }
        self.check_steps(&mut template).await?;

        template.metadata.version = generate_version();
        template.metadata.create_at = rfc3339_now();
        self.templates.create(&template).await?;
        tracing::info!(
            template = %template.metadata.name,
            version = %template.metadata.version,
            "template created"
        );
        Ok(template)
    }

    /// Store a new version of an existing template, reaping beyond the
    /// reserved window.
    pub async fn update(&self, mut template: TaskTemplate) -> Result<TaskTemplate, ApiError> {
        self.check_kind_and_name(&template)?;
        if !self
            .templates
            .exist(&RecordFilter::by_name(&template.metadata.name))
            .await?
        {
            return Err(ApiError::NotFound(format!(
                "TaskTemplate/{} not exist",
                template.metadata.name
            )));
        }
        self.check_steps(&mut template).await?;

        template.metadata.version = generate_version();
        template.metadata.create_at = rfc3339_now();
        self.templates.create(&template).await?;
        self.reap_versions(&template.metadata.name).await;
        Ok(template)
    }

    pub async fn query(&self, query: &RecordQuery) -> Result<Page<TaskTemplate>, ApiError> {
        let mut page = self.templates.query(query).await?;
        sort_newest_first(&mut page.items);
        Ok(page)
    }

    pub async fn delete(&self, name: &str, version: &str) -> Result<(), ApiError> {
        if name.is_empty() {
            return Err(ApiError::InvalidArgument(
                "task template name cannot be empty".to_string(),
            ));
        }
        let filter = RecordFilter::by_name_version(name, version);
        let matched: Vec<TaskTemplate> = self.templates.get(&filter).await?;
        if matched.is_empty() {
            return Err(ApiError::NotFound(format!(
                "TaskTemplate/{name} not exist"
            )));
        }
        self.templates.delete(&filter).await?;
        Ok(())
    }

    /// Instantiate a task from the (newest matching version of the)
    /// template and admit it through the task service.
    pub async fn submit(
        &self,
        name: &str,
        version: &str,
        tasks: &TaskService,
    ) -> Result<Task, ApiError> {
        if name.is_empty() {
            return Err(ApiError::InvalidArgument(
                "task template name cannot be empty".to_string(),
            ));
        }
        let mut matched: Vec<TaskTemplate> = self
            .templates
            .get(&RecordFilter::by_name_version(name, version))
            .await?;
        if matched.is_empty() {
            return Err(ApiError::NotFound(format!(
                "TaskTemplate/{name} not exist"
            )));
        }
        sort_newest_first(&mut matched);
        let template = matched.swap_remove(0);

        let task_name = format!("{}-{}", template.metadata.name, rand_suffix(5));
        let task = Task::from_template(&template, task_name, generate_version());
        tasks.create(task).await
    }

    fn check_kind_and_name(&self, template: &TaskTemplate) -> Result<(), ApiError> {
        if template.kind != Kind::TaskTemplate {
            return Err(ApiError::InvalidArgument(format!(
                "unsupported kind: {}, only support: TaskTemplate",
                template.kind
            )));
        }
        if template.metadata.name.is_empty() {
            return Err(ApiError::InvalidArgument(
                "task template name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    async fn check_steps(&self, template: &mut TaskTemplate) -> Result<(), ApiError> {
        if template.spec.steps.is_empty() {
            return Err(ApiError::InvalidArgument(
                "Spec.Steps can not be empty".to_string(),
            ));
        }
        for index in 0..template.spec.steps.len() {
            let mut step = template.spec.steps[index].clone();
            check_step(self.scripts.as_ref(), index, &mut step).await?;
            template.spec.steps[index] = step;
        }
        Ok(())
    }

    async fn reap_versions(&self, name: &str) {
        let mut versions: Vec<TaskTemplate> =
            match self.templates.get(&RecordFilter::by_name(name)).await {
                Ok(versions) => versions,
                Err(e) => {
                    tracing::error!(template = %name, error = %e, "query versions for reaping failed");
                    return;
                }
            };
        if versions.len() <= RESERVED_VERSIONS {
            return;
        }
        sort_newest_first(&mut versions);
        for stale in &versions[RESERVED_VERSIONS..] {
            let filter =
                RecordFilter::by_name_version(&stale.metadata.name, &stale.metadata.version);
            if let Err(e) = self.templates.delete(&filter).await {
                tracing::error!(
                    template = %stale.metadata.name,
                    version = %stale.metadata.version,
                    error = %e,
                    "reap template version failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{new_task_service_with_store, sample_template};
    use taskcube_core::types::TaskState;
    use taskcube_stores::InMemoryRecordStore;

    fn services() -> (TemplateService, TaskService, Arc<InMemoryRecordStore>) {
        let store = Arc::new(InMemoryRecordStore::new());
        let templates = TemplateService::new(store.clone(), store.clone());
        let tasks = new_task_service_with_store(store.clone());
        (templates, tasks, store)
    }

    #[test]
    fn test_create_and_duplicate_rejection() {
        tokio_test::block_on(async {
            let (templates, _, _) = services();
            let created = templates.create(sample_template("nightly")).await.unwrap();
            assert!(!created.metadata.version.is_empty());

            assert!(matches!(
                templates
                    .create(sample_template("nightly"))
                    .await
                    .unwrap_err(),
                ApiError::Conflict(_)
            ));
        });
    }

    #[test]
    fn test_submit_instantiates_task_from_template() {
        tokio_test::block_on(async {
            let (templates, tasks, store) = services();
            let template = templates.create(sample_template("nightly")).await.unwrap();

            let task = templates.submit("nightly", "", &tasks).await.unwrap();
            assert!(task.metadata.name.starts_with("nightly-"));
            assert_eq!(task.metadata.name.len(), "nightly-".len() + 5);
            assert_eq!(task.status.status, TaskState::Created);
            // Deep equality with the template's steps.
            assert_eq!(task.spec.steps, template.spec.steps);
            assert_eq!(task.spec.input, template.spec.input);
            assert!(!task.spec.pause);
            assert!(!task.spec.terminate);

            let stored: Vec<Task> = store
                .get(&RecordFilter::by_name(&task.metadata.name))
                .await
                .unwrap();
            assert_eq!(stored.len(), 1);
        });
    }

    #[test]
    fn test_submit_unknown_template_fails() {
        tokio_test::block_on(async {
            let (templates, tasks, _) = services();
            assert!(matches!(
                templates.submit("ghost", "", &tasks).await.unwrap_err(),
                ApiError::NotFound(_)
            ));
        });
    }

    #[test]
    fn test_update_requires_existing_template() {
        tokio_test::block_on(async {
            let (templates, _, _) = services();
            assert!(matches!(
                templates
                    .update(sample_template("ghost"))
                    .await
                    .unwrap_err(),
                ApiError::NotFound(_)
            ));
        });
    }

    #[test]
    fn test_delete_template() {
        tokio_test::block_on(async {
            let (templates, _, store) = services();
            templates.create(sample_template("nightly")).await.unwrap();
            templates.delete("nightly", "").await.unwrap();

            let left: Vec<TaskTemplate> = store
                .get(&RecordFilter::by_name("nightly"))
                .await
                .unwrap();
            assert!(left.is_empty());
        });
    }
}
