//! PostgreSQL-backed template lineage storage.
//!
//! Each row keeps its lookup columns (`id`, `template_name`, `version`,
//! `active`) next to a JSONB snapshot of the full template. Version bumps run
//! inside a transaction holding `pg_advisory_xact_lock(hashtext(name))`, and
//! `UNIQUE (template_name, version)` backs the check.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::repository::TemplateRepository;
use super::types::{NotificationTemplate, TemplateError, TemplateResult};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS notification_templates (
    id UUID PRIMARY KEY,
    template_name TEXT NOT NULL,
    version INTEGER NOT NULL,
    active BOOLEAN NOT NULL,
    data JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL,
    CONSTRAINT notification_templates_name_version UNIQUE (template_name, version)
)
"#;

const ACTIVE_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_notification_templates_active
    ON notification_templates (template_name, version DESC)
    WHERE active
"#;

pub struct PostgresTemplateRepository {
    pool: PgPool,
}

impl PostgresTemplateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the table and index if they do not exist yet.
    pub async fn ensure_schema(&self) -> TemplateResult<()> {
        sqlx::query(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        sqlx::query(ACTIVE_INDEX)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(())
    }

    async fn lock_name(tx: &mut Transaction<'_, Postgres>, name: &str) -> TemplateResult<()> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(name)
            .execute(&mut **tx)
            .await
            .map_err(storage)?;
        Ok(())
    }

    async fn latest_version(
        tx: &mut Transaction<'_, Postgres>,
        name: &str,
    ) -> TemplateResult<Option<i32>> {
        let row: (Option<i32>,) = sqlx::query_as(
            "SELECT MAX(version) FROM notification_templates WHERE template_name = $1",
        )
        .bind(name)
        .fetch_one(&mut **tx)
        .await
        .map_err(storage)?;
        Ok(row.0)
    }

    async fn insert_row(
        tx: &mut Transaction<'_, Postgres>,
        template: &NotificationTemplate,
    ) -> TemplateResult<()> {
        let data = serde_json::to_value(template)
            .map_err(|e| TemplateError::Storage(format!("serialize template: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO notification_templates
                (id, template_name, version, active, data, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(template.id)
        .bind(&template.template_name)
        .bind(template.version as i32)
        .bind(template.active)
        .bind(&data)
        .bind(template.created_at)
        .bind(template.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(storage)?;
        Ok(())
    }
}

fn storage(e: sqlx::Error) -> TemplateError {
    TemplateError::Storage(e.to_string())
}

fn decode_rows(rows: Vec<(serde_json::Value, bool)>) -> TemplateResult<Vec<NotificationTemplate>> {
    rows.into_iter().map(decode_row).collect()
}

/// The `active` column is authoritative over the snapshot.
fn decode_row((data, active): (serde_json::Value, bool)) -> TemplateResult<NotificationTemplate> {
    let mut template: NotificationTemplate = serde_json::from_value(data)
        .map_err(|e| TemplateError::Storage(format!("deserialize template: {}", e)))?;
    template.active = active;
    Ok(template)
}

#[async_trait]
impl TemplateRepository for PostgresTemplateRepository {
    async fn insert_first(&self, template: &NotificationTemplate) -> TemplateResult<()> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        Self::lock_name(&mut tx, &template.template_name).await?;

        if Self::latest_version(&mut tx, &template.template_name)
            .await?
            .is_some()
        {
            return Err(TemplateError::AlreadyExists(template.template_name.clone()));
        }

        Self::insert_row(&mut tx, template).await?;
        tx.commit().await.map_err(storage)?;

        tracing::debug!(
            template_name = %template.template_name,
            template_id = %template.id,
            "Template lineage created in PostgreSQL"
        );
        Ok(())
    }

    async fn append(&self, template: &NotificationTemplate) -> TemplateResult<()> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        Self::lock_name(&mut tx, &template.template_name).await?;

        let latest = Self::latest_version(&mut tx, &template.template_name)
            .await?
            .ok_or_else(|| TemplateError::NotFound(template.template_name.clone()))?;

        let expected = latest as u32 + 1;
        if template.version != expected {
            return Err(TemplateError::VersionConflict {
                name: template.template_name.clone(),
                expected,
                found: template.version,
            });
        }

        Self::insert_row(&mut tx, template).await?;
        tx.commit().await.map_err(storage)?;
        Ok(())
    }

    async fn update_status(&self, template: &NotificationTemplate) -> TemplateResult<()> {
        // Only the status fields of the snapshot are rewritten
        let result = sqlx::query(
            r#"
            UPDATE notification_templates
            SET active = $2,
                updated_at = $3,
                data = data || jsonb_build_object(
                    'active', $2::boolean,
                    'updatedAt', to_jsonb($3::timestamptz),
                    'updatedBy', $4::text
                )
            WHERE id = $1
            "#,
        )
        .bind(template.id)
        .bind(template.active)
        .bind(template.updated_at)
        .bind(&template.updated_by)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        if result.rows_affected() == 0 {
            return Err(TemplateError::NotFound(template.id.to_string()));
        }
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> TemplateResult<Option<NotificationTemplate>> {
        let row: Option<(serde_json::Value, bool)> =
            sqlx::query_as("SELECT data, active FROM notification_templates WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(storage)?;

        row.map(decode_row).transpose()
    }

    async fn lineage(&self, name: &str) -> TemplateResult<Vec<NotificationTemplate>> {
        let rows: Vec<(serde_json::Value, bool)> = sqlx::query_as(
            r#"
            SELECT data, active FROM notification_templates
            WHERE template_name = $1
            ORDER BY version ASC
            "#,
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        decode_rows(rows)
    }

    async fn list_active(&self) -> TemplateResult<Vec<NotificationTemplate>> {
        let rows: Vec<(serde_json::Value, bool)> = sqlx::query_as(
            r#"
            SELECT data, active FROM notification_templates
            WHERE active
            ORDER BY template_name ASC, version ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        decode_rows(rows)
    }

    async fn activate_exclusive(
        &self,
        id: Uuid,
        actor: &str,
    ) -> TemplateResult<NotificationTemplate> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        let name: Option<(String,)> =
            sqlx::query_as("SELECT template_name FROM notification_templates WHERE id = $1")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(storage)?;
        let (name,) = name.ok_or_else(|| TemplateError::NotFound(id.to_string()))?;

        Self::lock_name(&mut tx, &name).await?;

        let now = chrono::Utc::now();
        sqlx::query(
            r#"
            UPDATE notification_templates
            SET active = (id = $2),
                updated_at = $3,
                data = data || jsonb_build_object(
                    'active', (id = $2),
                    'updatedAt', to_jsonb($3::timestamptz),
                    'updatedBy', $4::text
                )
            WHERE template_name = $1 AND active IS DISTINCT FROM (id = $2)
            "#,
        )
        .bind(&name)
        .bind(id)
        .bind(now)
        .bind(actor)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        let row: (serde_json::Value, bool) =
            sqlx::query_as("SELECT data, active FROM notification_templates WHERE id = $1")
                .bind(id)
                .fetch_one(&mut *tx)
                .await
                .map_err(storage)?;

        tx.commit().await.map_err(storage)?;

        tracing::info!(
            template_name = %name,
            template_id = %id,
            actor = %actor,
            "Template activated exclusively"
        );

        decode_row(row)
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
