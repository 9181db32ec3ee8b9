//! Template catalog lineage tests against the in-memory repository.

use std::sync::Arc;

use tokio_test::assert_ok;

use notification_dispatch_service::domain::notification::{Channel, Priority};
use notification_dispatch_service::domain::template::{
    NewTemplate, NotificationTemplate, TemplateCategory, TemplateError, TemplateRevision,
    TemplateStore,
};

fn welcome() -> NewTemplate {
    NewTemplate::new(
        "welcome-email",
        "Welcome",
        "Sent after registration",
        Channel::Email,
        TemplateCategory::Welcome,
        "Welcome, {{userName}}",
        "Hi {{userName}}, verify here: {{verificationLink}}",
    )
    .required(["userName", "verificationLink"])
    .priority(Priority::Normal)
    .tags(["onboarding"])
}

async fn lineage_to_version(store: &TemplateStore, version: u32) -> NotificationTemplate {
    let mut latest = assert_ok!(store.create(welcome(), "alice").await);
    while latest.version < version {
        latest = assert_ok!(store.create_new_version(latest.id, "alice").await);
    }
    latest
}

#[tokio::test]
async fn test_new_version_leaves_source_untouched() {
    let store = TemplateStore::in_memory();
    let v3 = lineage_to_version(&store, 3).await;

    let v4 = assert_ok!(store.create_new_version(v3.id, "bob").await);

    assert_eq!(v4.version, 4);
    assert_ne!(v4.id, v3.id);
    assert!(v4.active);
    assert_eq!(v4.created_by, "bob");
    assert_eq!(v4.content_template, v3.content_template);
    assert_eq!(v4.required_variables, v3.required_variables);
    assert_eq!(v4.tags, v3.tags);

    let source = assert_ok!(store.get(v3.id).await);
    assert_eq!(source, v3);
    assert!(source.active);
    assert_eq!(source.created_by, "alice");

    let versions: Vec<u32> = assert_ok!(store.lineage("welcome-email").await)
        .iter()
        .map(|t| t.version)
        .collect();
    assert_eq!(versions, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn test_several_versions_stay_active_without_exclusive_activation() {
    let store = TemplateStore::in_memory();
    lineage_to_version(&store, 3).await;

    let active = assert_ok!(store.list_active().await);
    assert_eq!(active.len(), 3);

    let current = assert_ok!(store.current("welcome-email").await).unwrap();
    assert_eq!(current.version, 3);
}

#[tokio::test]
async fn test_branching_from_an_old_version_conflicts() {
    let store = TemplateStore::in_memory();
    let v1 = lineage_to_version(&store, 1).await;
    assert_ok!(store.create_new_version(v1.id, "alice").await);

    match store.create_new_version(v1.id, "mallory").await {
        Err(TemplateError::VersionConflict {
            expected, found, ..
        }) => {
            assert_eq!(expected, 3);
            assert_eq!(found, 2);
        }
        other => panic!("expected version conflict, got {:?}", other),
    }
    assert_eq!(assert_ok!(store.lineage("welcome-email").await).len(), 2);
}

#[tokio::test]
async fn test_revision_changes_only_the_new_row() {
    let store = TemplateStore::in_memory();
    let v1 = lineage_to_version(&store, 1).await;

    let v2 = assert_ok!(
        store
            .revise(
                v1.id,
                TemplateRevision {
                    content_template: Some("Hello {{userName}}".into()),
                    ..TemplateRevision::default()
                },
                "carol",
            )
            .await
    );

    assert_eq!(v2.version, 2);
    assert_eq!(v2.content_template, "Hello {{userName}}");
    assert_eq!(v2.subject_template, v1.subject_template);
    assert_eq!(
        assert_ok!(store.get(v1.id).await).content_template,
        v1.content_template
    );
}

#[tokio::test]
async fn test_status_toggle_and_sendability() {
    let store = TemplateStore::in_memory();
    let v1 = lineage_to_version(&store, 1).await;
    assert!(v1.is_valid_for_sending());

    let inactive = assert_ok!(store.update_status(v1.id, false, "ops").await);
    assert_eq!(inactive.version, 1);
    assert!(!inactive.is_valid_for_sending());
    assert!(assert_ok!(store.current("welcome-email").await).is_none());

    let reactivated = assert_ok!(store.update_status(v1.id, true, "ops").await);
    assert!(reactivated.is_valid_for_sending());
    assert_eq!(reactivated.updated_by, "ops");
    assert_eq!(reactivated.created_by, "alice");
}

#[tokio::test]
async fn test_activate_exclusive_keeps_one_active_row() {
    let store = TemplateStore::in_memory();
    let v1 = lineage_to_version(&store, 1).await;
    lineage_to_version_from(&store, &v1, 3).await;

    let chosen = assert_ok!(store.activate_exclusive(v1.id, "ops").await);
    assert!(chosen.active);

    let rows = assert_ok!(store.lineage("welcome-email").await);
    let active: Vec<u32> = rows.iter().filter(|t| t.active).map(|t| t.version).collect();
    assert_eq!(active, vec![1]);
    assert_eq!(
        assert_ok!(store.current("welcome-email").await).map(|t| t.id),
        Some(v1.id)
    );
}

async fn lineage_to_version_from(store: &TemplateStore, from: &NotificationTemplate, version: u32) {
    let mut latest = from.clone();
    while latest.version < version {
        latest = assert_ok!(store.create_new_version(latest.id, "alice").await);
    }
}

#[tokio::test]
async fn test_concurrent_version_bumps_produce_one_winner() {
    let store = Arc::new(TemplateStore::in_memory());
    let v1 = lineage_to_version(&store, 1).await;

    let attempts: Vec<_> = (0..8)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .create_new_version(v1.id, &format!("editor-{i}"))
                    .await
            })
        })
        .collect();

    let mut winners = 0;
    for attempt in attempts {
        if assert_ok!(attempt.await).is_ok() {
            winners += 1;
        }
    }

    assert_eq!(winners, 1);
    let versions: Vec<u32> = assert_ok!(store.lineage("welcome-email").await)
        .iter()
        .map(|t| t.version)
        .collect();
    assert_eq!(versions, vec![1, 2]);
}

#[tokio::test]
async fn test_invalid_templates_are_rejected() {
    let store = TemplateStore::in_memory();

    let no_subject = NewTemplate::new(
        "bad-email",
        "Bad",
        "",
        Channel::Email,
        TemplateCategory::System,
        "",
        "body",
    );
    assert!(matches!(
        store.create(no_subject, "ops").await,
        Err(TemplateError::InvalidTemplate(_))
    ));

    let bad_name = NewTemplate::new(
        "has spaces",
        "Bad",
        "",
        Channel::Sms,
        TemplateCategory::System,
        "",
        "body",
    );
    assert!(matches!(
        store.create(bad_name, "ops").await,
        Err(TemplateError::InvalidTemplate(_))
    ));
}
