//! Template catalog service over a lineage repository

use std::sync::Arc;

use uuid::Uuid;

use crate::infrastructure::config::TemplateConfig;
use crate::infrastructure::metrics::TemplateMetrics;
use crate::infrastructure::postgres::PostgresPool;

use super::postgres::PostgresTemplateRepository;
use super::repository::{MemoryTemplateRepository, TemplateRepository};
use super::types::{
    NewTemplate, NotificationTemplate, TemplateError, TemplateResult, TemplateRevision,
};

/// Versioned template catalog.
///
/// Every content change appends a row; the only in-place change is the
/// status toggle. Several rows of one lineage may be active at once unless
/// the caller opts into `activate_exclusive`.
pub struct TemplateStore {
    repository: Arc<dyn TemplateRepository>,
}

impl TemplateStore {
    pub fn new(repository: Arc<dyn TemplateRepository>) -> Self {
        Self { repository }
    }

    /// Store backed by an in-memory repository
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryTemplateRepository::new()))
    }

    pub fn backend_name(&self) -> &'static str {
        self.repository.backend_name()
    }

    /// Create the first version (version 1, active) of a new lineage.
    pub async fn create(
        &self,
        new: NewTemplate,
        actor: &str,
    ) -> TemplateResult<NotificationTemplate> {
        let template = NotificationTemplate::create(new, actor);
        let result = match template.validate() {
            Ok(()) => self.repository.insert_first(&template).await,
            Err(e) => Err(e),
        };
        TemplateMetrics::record("create", result.is_ok());
        result?;

        tracing::info!(
            template_name = %template.template_name,
            template_id = %template.id,
            actor = %actor,
            "Template created"
        );

        Ok(template)
    }

    /// Snapshot the row `source_id` into a new active row with version + 1.
    ///
    /// The source row is not touched. Fails with `VersionConflict` when the
    /// source is not the latest version of its lineage.
    pub async fn create_new_version(
        &self,
        source_id: Uuid,
        actor: &str,
    ) -> TemplateResult<NotificationTemplate> {
        let result = self.append_from(source_id, actor, None).await;
        TemplateMetrics::record("create_new_version", result.is_ok());
        result
    }

    /// Like `create_new_version`, carrying content changes into the new row.
    pub async fn revise(
        &self,
        source_id: Uuid,
        revision: TemplateRevision,
        actor: &str,
    ) -> TemplateResult<NotificationTemplate> {
        let result = self.append_from(source_id, actor, Some(revision)).await;
        TemplateMetrics::record("revise", result.is_ok());
        result
    }

    async fn append_from(
        &self,
        source_id: Uuid,
        actor: &str,
        revision: Option<TemplateRevision>,
    ) -> TemplateResult<NotificationTemplate> {
        let source = self.get(source_id).await?;
        let next = match revision {
            Some(revision) => source.with_revision(revision, actor)?,
            None => source.with_new_version(actor)?,
        };
        next.validate()?;

        self.repository.append(&next).await?;

        tracing::info!(
            template_name = %next.template_name,
            template_id = %next.id,
            version = next.version,
            previous_id = %source.id,
            actor = %actor,
            "Template version created"
        );

        Ok(next)
    }

    /// Toggle `active` on one row without changing its version.
    pub async fn update_status(
        &self,
        id: Uuid,
        active: bool,
        actor: &str,
    ) -> TemplateResult<NotificationTemplate> {
        let result = async {
            let updated = self.get(id).await?.with_active(active, actor);
            self.repository.update_status(&updated).await?;
            Ok(updated)
        }
        .await;
        TemplateMetrics::record("update_status", result.is_ok());

        if let Ok(updated) = &result {
            tracing::info!(
                template_name = %updated.template_name,
                template_id = %updated.id,
                version = updated.version,
                active = active,
                actor = %actor,
                "Template status updated"
            );
        }
        result
    }

    /// Activate one row and deactivate the rest of its lineage.
    pub async fn activate_exclusive(
        &self,
        id: Uuid,
        actor: &str,
    ) -> TemplateResult<NotificationTemplate> {
        let result = self.repository.activate_exclusive(id, actor).await;
        TemplateMetrics::record("activate_exclusive", result.is_ok());
        result
    }

    pub async fn get(&self, id: Uuid) -> TemplateResult<NotificationTemplate> {
        self.repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| TemplateError::NotFound(id.to_string()))
    }

    /// All versions of `name`, oldest first
    pub async fn lineage(&self, name: &str) -> TemplateResult<Vec<NotificationTemplate>> {
        self.repository.lineage(name).await
    }

    /// Highest active version of `name`, if any
    pub async fn current(&self, name: &str) -> TemplateResult<Option<NotificationTemplate>> {
        let rows = self.repository.lineage(name).await?;
        Ok(rows
            .into_iter()
            .filter(|row| row.active)
            .max_by_key(|row| row.version))
    }

    pub async fn list_active(&self) -> TemplateResult<Vec<NotificationTemplate>> {
        self.repository.list_active().await
    }
}

/// Build the template store selected by `settings.backend`.
///
/// `"postgres"` needs a pool and falls back to memory without one.
pub async fn create_template_store(
    settings: &TemplateConfig,
    postgres_pool: Option<Arc<PostgresPool>>,
) -> TemplateResult<Arc<TemplateStore>> {
    let repository: Arc<dyn TemplateRepository> = match settings.backend.as_str() {
        "postgres" => match postgres_pool {
            Some(pool) => {
                let repository = PostgresTemplateRepository::new(pool.pool().clone());
                repository.ensure_schema().await?;
                tracing::info!(
                    backend = "postgres",
                    database = %pool.masked_url(),
                    "Creating PostgreSQL template repository"
                );
                Arc::new(repository)
            }
            None => {
                tracing::warn!(
                    "PostgreSQL template backend requested but no pool provided, falling back to memory"
                );
                Arc::new(MemoryTemplateRepository::new())
            }
        },
        "memory" => {
            tracing::info!(backend = "memory", "Creating in-memory template repository");
            Arc::new(MemoryTemplateRepository::new())
        }
        other => {
            tracing::warn!(
                backend = %other,
                "Unknown template backend, falling back to memory"
            );
            Arc::new(MemoryTemplateRepository::new())
        }
    };

    Ok(Arc::new(TemplateStore::new(repository)))
}
