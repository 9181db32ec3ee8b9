//! Template value type, lineage transitions and error definitions

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::notification::{Channel, Priority};

/// Template-specific error type
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Template not found: {0}")]
    NotFound(String),

    #[error("Template already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    #[error("Version conflict for {name}: expected version {expected}, got {found}")]
    VersionConflict {
        name: String,
        expected: u32,
        found: u32,
    },

    #[error("Template storage unavailable: {0}")]
    Storage(String),
}

/// Result type for template operations
pub type TemplateResult<T> = Result<T, TemplateError>;

/// Fixed category enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TemplateCategory {
    Authentication,
    Transactional,
    Marketing,
    System,
    Trading,
    Account,
    Support,
    Compliance,
    Welcome,
    Notification,
}

impl TemplateCategory {
    pub const ALL: [TemplateCategory; 10] = [
        TemplateCategory::Authentication,
        TemplateCategory::Transactional,
        TemplateCategory::Marketing,
        TemplateCategory::System,
        TemplateCategory::Trading,
        TemplateCategory::Account,
        TemplateCategory::Support,
        TemplateCategory::Compliance,
        TemplateCategory::Welcome,
        TemplateCategory::Notification,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateCategory::Authentication => "AUTHENTICATION",
            TemplateCategory::Transactional => "TRANSACTIONAL",
            TemplateCategory::Marketing => "MARKETING",
            TemplateCategory::System => "SYSTEM",
            TemplateCategory::Trading => "TRADING",
            TemplateCategory::Account => "ACCOUNT",
            TemplateCategory::Support => "SUPPORT",
            TemplateCategory::Compliance => "COMPLIANCE",
            TemplateCategory::Welcome => "WELCOME",
            TemplateCategory::Notification => "NOTIFICATION",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let upper = raw.trim().to_ascii_uppercase();
        Self::ALL.into_iter().find(|c| c.as_str() == upper)
    }
}

impl fmt::Display for TemplateCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One persisted row of a template lineage.
///
/// Values are immutable: content never changes on an existing row. A change
/// is a new row with `version + 1` and the same `template_name`
/// (`with_new_version` / `with_revision`); `active` is the only field that may
/// change in place (`with_active`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationTemplate {
    /// Row identity, unique per version
    pub id: Uuid,
    /// Logical key shared by every version of the lineage
    pub template_name: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub notification_type: Channel,
    pub category: TemplateCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_template: Option<String>,
    pub content_template: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_template: Option<String>,
    #[serde(default)]
    pub required_variables: BTreeSet<String>,
    #[serde(default)]
    pub optional_variables: BTreeSet<String>,
    pub version: u32,
    pub active: bool,
    #[serde(default)]
    pub default_priority: Priority,
    /// Hint for the external rate-limit policy; not enforced here
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_per_hour: Option<u32>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: String,
    pub updated_by: String,
}

impl NotificationTemplate {
    /// Factory for the first row of a lineage: version 1, active.
    pub fn create(new: NewTemplate, actor: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            template_name: new.template_name,
            display_name: new.display_name,
            description: new.description,
            notification_type: new.notification_type,
            category: new.category,
            subject_template: new.subject_template,
            content_template: new.content_template,
            html_template: new.html_template,
            required_variables: new.required_variables,
            optional_variables: new.optional_variables,
            version: 1,
            active: true,
            default_priority: new.default_priority,
            rate_limit_per_hour: new.rate_limit_per_hour,
            tags: new.tags,
            created_at: now,
            updated_at: now,
            created_by: actor.to_string(),
            updated_by: actor.to_string(),
        }
    }

    /// Snapshot every content and config field into a new row with
    /// `version + 1`. `self` is left as it was.
    pub fn with_new_version(&self, actor: &str) -> TemplateResult<Self> {
        let version = self.version.checked_add(1).ok_or_else(|| {
            TemplateError::InvalidTemplate(format!(
                "{} has reached the last representable version {}",
                self.template_name, self.version
            ))
        })?;
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            version,
            active: true,
            created_at: now,
            updated_at: now,
            created_by: actor.to_string(),
            updated_by: actor.to_string(),
            ..self.clone()
        })
    }

    /// New version carrying the given content changes.
    pub fn with_revision(
        &self,
        revision: TemplateRevision,
        actor: &str,
    ) -> TemplateResult<Self> {
        let mut next = self.with_new_version(actor)?;
        revision.apply(&mut next);
        Ok(next)
    }

    /// Same row with `active` toggled; the version does not change.
    pub fn with_active(&self, active: bool, actor: &str) -> Self {
        Self {
            active,
            updated_at: Utc::now(),
            updated_by: actor.to_string(),
            ..self.clone()
        }
    }

    /// Active and has a non-empty content body
    pub fn is_valid_for_sending(&self) -> bool {
        self.active && !self.content_template.trim().is_empty()
    }

    /// Required text fields must be non-blank.
    pub fn validate(&self) -> TemplateResult<()> {
        let name = self.template_name.trim();
        if name.is_empty() || name.len() > 128 {
            return Err(TemplateError::InvalidTemplate(
                "templateName must be 1-128 characters".to_string(),
            ));
        }

        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(TemplateError::InvalidTemplate(
                "templateName may contain only alphanumerics, '-', '_' or '.'".to_string(),
            ));
        }

        if self.display_name.trim().is_empty() {
            return Err(TemplateError::InvalidTemplate(
                "displayName must not be blank".to_string(),
            ));
        }

        if self.content_template.trim().is_empty() {
            return Err(TemplateError::InvalidTemplate(
                "contentTemplate must not be blank".to_string(),
            ));
        }

        if self.notification_type == Channel::Email
            && self
                .subject_template
                .as_deref()
                .map_or(true, |s| s.trim().is_empty())
        {
            return Err(TemplateError::InvalidTemplate(
                "email templates require a subjectTemplate".to_string(),
            ));
        }

        if let Some(overlap) = self
            .required_variables
            .intersection(&self.optional_variables)
            .next()
        {
            return Err(TemplateError::InvalidTemplate(format!(
                "variable {} is both required and optional",
                overlap
            )));
        }

        Ok(())
    }
}

/// Input for the first version of a template
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTemplate {
    pub template_name: String,
    pub display_name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub notification_type: Channel,
    pub category: TemplateCategory,
    #[serde(default)]
    pub subject_template: Option<String>,
    pub content_template: String,
    #[serde(default)]
    pub html_template: Option<String>,
    #[serde(default)]
    pub required_variables: BTreeSet<String>,
    #[serde(default)]
    pub optional_variables: BTreeSet<String>,
    #[serde(default)]
    pub default_priority: Priority,
    #[serde(default)]
    pub rate_limit_per_hour: Option<u32>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl NewTemplate {
    pub fn new(
        template_name: impl Into<String>,
        display_name: impl Into<String>,
        description: impl Into<String>,
        notification_type: Channel,
        category: TemplateCategory,
        subject_template: impl Into<String>,
        content_template: impl Into<String>,
    ) -> Self {
        let description = description.into();
        let subject = subject_template.into();
        Self {
            template_name: template_name.into(),
            display_name: display_name.into(),
            description: (!description.is_empty()).then_some(description),
            notification_type,
            category,
            subject_template: (!subject.is_empty()).then_some(subject),
            content_template: content_template.into(),
            html_template: None,
            required_variables: BTreeSet::new(),
            optional_variables: BTreeSet::new(),
            default_priority: Priority::default(),
            rate_limit_per_hour: None,
            tags: Vec::new(),
        }
    }

    pub fn html(mut self, html: impl Into<String>) -> Self {
        self.html_template = Some(html.into());
        self
    }

    pub fn required<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_variables = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn optional<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.optional_variables = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.default_priority = priority;
        self
    }

    pub fn rate_limit_per_hour(mut self, limit: u32) -> Self {
        self.rate_limit_per_hour = Some(limit);
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// Content changes carried into a new version. `None` keeps the
/// predecessor's value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateRevision {
    pub display_name: Option<String>,
    pub description: Option<Option<String>>,
    pub subject_template: Option<Option<String>>,
    pub content_template: Option<String>,
    pub html_template: Option<Option<String>>,
    pub required_variables: Option<BTreeSet<String>>,
    pub optional_variables: Option<BTreeSet<String>>,
    pub default_priority: Option<Priority>,
    pub rate_limit_per_hour: Option<Option<u32>>,
    pub tags: Option<Vec<String>>,
}

impl TemplateRevision {
    fn apply(self, target: &mut NotificationTemplate) {
        if let Some(v) = self.display_name {
            target.display_name = v;
        }
        if let Some(v) = self.description {
            target.description = v;
        }
        if let Some(v) = self.subject_template {
            target.subject_template = v;
        }
        if let Some(v) = self.content_template {
            target.content_template = v;
        }
        if let Some(v) = self.html_template {
            target.html_template = v;
        }
        if let Some(v) = self.required_variables {
            target.required_variables = v;
        }
        if let Some(v) = self.optional_variables {
            target.optional_variables = v;
        }
        if let Some(v) = self.default_priority {
            target.default_priority = v;
        }
        if let Some(v) = self.rate_limit_per_hour {
            target.rate_limit_per_hour = v;
        }
        if let Some(v) = self.tags {
            target.tags = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> NotificationTemplate {
        NotificationTemplate::create(
            NewTemplate::new(
                "trade-executed",
                "Trade Executed",
                "Sent when an order fills",
                Channel::Email,
                TemplateCategory::Trading,
                "Your {{side}} order for {{symbol}} was executed",
                "Order {{orderId}} filled at {{price}}",
            )
            .required(["orderId", "price"]),
            "admin",
        )
    }

    #[test]
    fn test_factory_sets_version_one_active() {
        let t = sample();
        assert_eq!(t.version, 1);
        assert!(t.active);
        assert_eq!(t.created_by, "admin");
        assert!(t.validate().is_ok());
    }

    #[test]
    fn test_new_version_from_version_three() {
        let mut v3 = sample();
        v3.version = 3;
        let before = v3.clone();

        let v4 = v3.with_new_version("editor").unwrap();

        assert_eq!(v4.version, 4);
        assert_eq!(v4.template_name, v3.template_name);
        assert_ne!(v4.id, v3.id);
        assert!(v4.active);
        assert_eq!(v4.created_by, "editor");
        assert_eq!(v4.content_template, v3.content_template);
        assert_eq!(v4.required_variables, v3.required_variables);
        // source untouched and still active
        assert_eq!(v3, before);
        assert!(v3.active);
    }

    #[test]
    fn test_revision_changes_only_named_fields() {
        let v1 = sample();
        let v2 = v1.with_revision(
            TemplateRevision {
                content_template: Some("Filled: {{orderId}}".into()),
                ..Default::default()
            },
            "editor",
        )
        .unwrap();
        assert_eq!(v2.version, 2);
        assert_eq!(v2.content_template, "Filled: {{orderId}}");
        assert_eq!(v2.subject_template, v1.subject_template);
        assert_eq!(v1.content_template, "Order {{orderId}} filled at {{price}}");
    }

    #[test]
    fn test_new_version_at_version_ceiling_is_rejected() {
        let mut last = sample();
        last.version = u32::MAX;

        assert!(matches!(
            last.with_new_version("editor"),
            Err(TemplateError::InvalidTemplate(_))
        ));
        assert_eq!(last.version, u32::MAX);
    }

    #[test]
    fn test_with_active_keeps_version() {
        let v1 = sample();
        let off = v1.with_active(false, "ops");
        assert_eq!(off.version, 1);
        assert_eq!(off.id, v1.id);
        assert!(!off.active);
        assert_eq!(off.updated_by, "ops");
        assert!(v1.active);
    }

    #[test]
    fn test_is_valid_for_sending() {
        let t = sample();
        assert!(t.is_valid_for_sending());

        assert!(!t.with_active(false, "ops").is_valid_for_sending());

        let mut blank = t.clone();
        blank.content_template = "   ".into();
        assert!(!blank.is_valid_for_sending());
        assert!(!blank.with_active(false, "ops").is_valid_for_sending());
    }

    #[test]
    fn test_validate_rejects_blank_fields() {
        let mut t = sample();
        t.display_name = " ".into();
        assert!(matches!(t.validate(), Err(TemplateError::InvalidTemplate(_))));

        let mut t = sample();
        t.subject_template = None;
        assert!(matches!(t.validate(), Err(TemplateError::InvalidTemplate(_))));

        let mut t = sample();
        t.template_name = "bad name!".into();
        assert!(t.validate().is_err());
    }

    #[test]
    fn test_sms_template_needs_no_subject() {
        let t = NotificationTemplate::create(
            NewTemplate::new(
                "trade-executed-sms",
                "Trade SMS",
                "",
                Channel::Sms,
                TemplateCategory::Trading,
                "",
                "Order {{orderId}} filled",
            ),
            "admin",
        );
        assert!(t.subject_template.is_none());
        assert!(t.description.is_none());
        assert!(t.validate().is_ok());
    }

    #[test]
    fn test_category_parse() {
        assert_eq!(TemplateCategory::parse("trading"), Some(TemplateCategory::Trading));
        assert_eq!(TemplateCategory::parse("weather"), None);
        assert_eq!(TemplateCategory::ALL.len(), 10);
    }

    #[test]
    fn test_serializes_camel_case() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["templateName"], "trade-executed");
        assert_eq!(json["notificationType"], "EMAIL");
        assert_eq!(json["category"], "TRADING");
        assert_eq!(json["version"], 1);
    }
}
