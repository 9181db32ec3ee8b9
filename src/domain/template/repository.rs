//! Persistence seam for template lineages.
//!
//! Rows are appended, never rewritten: the only in-place change a backend
//! accepts is the status toggle (`active`, `updated_at`, `updated_by`).

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use super::types::{NotificationTemplate, TemplateError, TemplateResult};

/// Storage backend for template lineages.
///
/// Implementations must serialise version bumps per `template_name`:
/// two concurrent `append` calls for the same name cannot both succeed with
/// the same version.
#[async_trait]
pub trait TemplateRepository: Send + Sync {
    /// Store the first row of a new lineage.
    ///
    /// Fails with `AlreadyExists` when any row already carries the name.
    async fn insert_first(&self, template: &NotificationTemplate) -> TemplateResult<()>;

    /// Append a new version to an existing lineage.
    ///
    /// `template.version` must equal the lineage's latest version + 1,
    /// otherwise `VersionConflict`.
    async fn append(&self, template: &NotificationTemplate) -> TemplateResult<()>;

    /// Persist the status fields of an existing row.
    async fn update_status(&self, template: &NotificationTemplate) -> TemplateResult<()>;

    async fn find_by_id(&self, id: Uuid) -> TemplateResult<Option<NotificationTemplate>>;

    /// Every row of a lineage, ordered by version ascending
    async fn lineage(&self, name: &str) -> TemplateResult<Vec<NotificationTemplate>>;

    async fn list_active(&self) -> TemplateResult<Vec<NotificationTemplate>>;

    /// Activate one row and deactivate all of its siblings atomically.
    async fn activate_exclusive(&self, id: Uuid, actor: &str)
        -> TemplateResult<NotificationTemplate>;

    fn backend_name(&self) -> &'static str;
}

/// In-memory lineage storage.
///
/// Each lineage lives under its name in a `DashMap`; holding the entry guard
/// while checking and pushing makes version bumps atomic per name.
pub struct MemoryTemplateRepository {
    lineages: DashMap<String, Vec<NotificationTemplate>>,
    names_by_id: DashMap<Uuid, String>,
}

impl Default for MemoryTemplateRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTemplateRepository {
    pub fn new() -> Self {
        Self {
            lineages: DashMap::new(),
            names_by_id: DashMap::new(),
        }
    }

    fn name_of(&self, id: Uuid) -> Option<String> {
        self.names_by_id.get(&id).map(|name| name.value().clone())
    }
}

#[async_trait]
impl TemplateRepository for MemoryTemplateRepository {
    async fn insert_first(&self, template: &NotificationTemplate) -> TemplateResult<()> {
        match self.lineages.entry(template.template_name.clone()) {
            Entry::Occupied(_) => Err(TemplateError::AlreadyExists(
                template.template_name.clone(),
            )),
            Entry::Vacant(slot) => {
                slot.insert(vec![template.clone()]);
                self.names_by_id
                    .insert(template.id, template.template_name.clone());
                Ok(())
            }
        }
    }

    async fn append(&self, template: &NotificationTemplate) -> TemplateResult<()> {
        let mut rows = self
            .lineages
            .get_mut(&template.template_name)
            .ok_or_else(|| TemplateError::NotFound(template.template_name.clone()))?;

        let expected = rows.last().map_or(1, |latest| latest.version + 1);
        if template.version != expected {
            return Err(TemplateError::VersionConflict {
                name: template.template_name.clone(),
                expected,
                found: template.version,
            });
        }

        rows.push(template.clone());
        self.names_by_id
            .insert(template.id, template.template_name.clone());
        Ok(())
    }

    async fn update_status(&self, template: &NotificationTemplate) -> TemplateResult<()> {
        let name = self
            .name_of(template.id)
            .ok_or_else(|| TemplateError::NotFound(template.id.to_string()))?;
        let mut rows = self
            .lineages
            .get_mut(&name)
            .ok_or_else(|| TemplateError::NotFound(name.clone()))?;

        let row = rows
            .iter_mut()
            .find(|row| row.id == template.id)
            .ok_or_else(|| TemplateError::NotFound(template.id.to_string()))?;

        row.active = template.active;
        row.updated_at = template.updated_at;
        row.updated_by = template.updated_by.clone();
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> TemplateResult<Option<NotificationTemplate>> {
        let Some(name) = self.name_of(id) else {
            return Ok(None);
        };
        Ok(self
            .lineages
            .get(&name)
            .and_then(|rows| rows.iter().find(|row| row.id == id).cloned()))
    }

    async fn lineage(&self, name: &str) -> TemplateResult<Vec<NotificationTemplate>> {
        Ok(self
            .lineages
            .get(name)
            .map(|rows| rows.value().clone())
            .unwrap_or_default())
    }

    async fn list_active(&self) -> TemplateResult<Vec<NotificationTemplate>> {
        let mut active: Vec<NotificationTemplate> = self
            .lineages
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .filter(|row| row.active)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        active.sort_by(|a, b| {
            a.template_name
                .cmp(&b.template_name)
                .then(a.version.cmp(&b.version))
        });
        Ok(active)
    }

    async fn activate_exclusive(
        &self,
        id: Uuid,
        actor: &str,
    ) -> TemplateResult<NotificationTemplate> {
        let name = self
            .name_of(id)
            .ok_or_else(|| TemplateError::NotFound(id.to_string()))?;
        let mut rows = self
            .lineages
            .get_mut(&name)
            .ok_or_else(|| TemplateError::NotFound(name.clone()))?;

        if !rows.iter().any(|row| row.id == id) {
            return Err(TemplateError::NotFound(id.to_string()));
        }

        let mut activated = None;
        for row in rows.iter_mut() {
            let should_be_active = row.id == id;
            if row.active != should_be_active {
                *row = row.with_active(should_be_active, actor);
            }
            if should_be_active {
                activated = Some(row.clone());
            }
        }

        activated.ok_or_else(|| TemplateError::NotFound(id.to_string()))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::notification::Channel;
    use crate::domain::template::types::{NewTemplate, TemplateCategory};

    fn first(name: &str) -> NotificationTemplate {
        NotificationTemplate::create(
            NewTemplate::new(
                name,
                "Display",
                "",
                Channel::Sms,
                TemplateCategory::Notification,
                "",
                "body",
            ),
            "admin",
        )
    }

    #[tokio::test]
    async fn test_insert_first_rejects_duplicate_name() {
        let repo = MemoryTemplateRepository::new();
        repo.insert_first(&first("dup")).await.unwrap();

        let err = repo.insert_first(&first("dup")).await.unwrap_err();
        assert!(matches!(err, TemplateError::AlreadyExists(name) if name == "dup"));
    }

    #[tokio::test]
    async fn test_append_requires_next_version() {
        let repo = MemoryTemplateRepository::new();
        let v1 = first("lineage");
        repo.insert_first(&v1).await.unwrap();

        let v2 = v1.with_new_version("editor").unwrap();
        repo.append(&v2).await.unwrap();

        // a second bump from v1 now collides with v2
        let stale = v1.with_new_version("other").unwrap();
        let err = repo.append(&stale).await.unwrap_err();
        assert!(matches!(
            err,
            TemplateError::VersionConflict { expected: 3, found: 2, .. }
        ));

        let rows = repo.lineage("lineage").await.unwrap();
        assert_eq!(rows.iter().map(|r| r.version).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_append_unknown_lineage() {
        let repo = MemoryTemplateRepository::new();
        let orphan = first("orphan").with_new_version("editor").unwrap();
        assert!(matches!(
            repo.append(&orphan).await,
            Err(TemplateError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_status_touches_only_status() {
        let repo = MemoryTemplateRepository::new();
        let v1 = first("status");
        repo.insert_first(&v1).await.unwrap();

        let mut toggled = v1.with_active(false, "ops");
        toggled.content_template = "sneaky rewrite".into();
        repo.update_status(&toggled).await.unwrap();

        let stored = repo.find_by_id(v1.id).await.unwrap().unwrap();
        assert!(!stored.active);
        assert_eq!(stored.updated_by, "ops");
        assert_eq!(stored.content_template, "body");
    }

    #[tokio::test]
    async fn test_activate_exclusive_deactivates_siblings() {
        let repo = MemoryTemplateRepository::new();
        let v1 = first("exclusive");
        repo.insert_first(&v1).await.unwrap();
        let v2 = v1.with_new_version("editor").unwrap();
        repo.append(&v2).await.unwrap();

        assert_eq!(repo.list_active().await.unwrap().len(), 2);

        let active = repo.activate_exclusive(v1.id, "ops").await.unwrap();
        assert_eq!(active.version, 1);

        let rows = repo.lineage("exclusive").await.unwrap();
        assert!(rows[0].active);
        assert!(!rows[1].active);
        assert_eq!(rows[1].updated_by, "ops");
    }
}
