//! Tests for the store module.

use super::{ChangeType, LabelSelector, SqliteStore, Store, StoreError};
use crate::model::{
    LABEL_TEMPLATE_NAME, ModelTemplate, ModelTemplateVersion, OwnerReference, Resource,
    ResourceKind,
};

fn store() -> SqliteStore {
    SqliteStore::in_memory().unwrap()
}

fn owned_by(mut version: ModelTemplateVersion, template: &ModelTemplate) -> ModelTemplateVersion {
    version.metadata.owner_references.push(OwnerReference {
        api_version: crate::model::API_VERSION.to_string(),
        kind: ResourceKind::ModelTemplate.as_str().to_string(),
        name: template.metadata.name.clone(),
        uid: template.metadata.uid.clone(),
        block_owner_deletion: true,
        controller: true,
    });
    version
}

// =============================================================================
// CRUD Tests
// =============================================================================

#[test]
fn test_create_assigns_store_metadata() {
    let store = store();
    let created = store.create(&ModelTemplate::new("default", "llama")).unwrap();

    assert!(!created.metadata.uid.is_empty());
    assert!(created.metadata.resource_version > 0);
    assert_eq!(
        created.metadata.creation_revision,
        created.metadata.resource_version
    );
    assert!(created.metadata.creation_timestamp.is_some());

    let fetched: ModelTemplate = store.get("default", "llama").unwrap();
    assert_eq!(fetched, created);
}

#[test]
fn test_create_duplicate_fails() {
    let store = store();
    store.create(&ModelTemplate::new("default", "llama")).unwrap();
    let err = store
        .create(&ModelTemplate::new("default", "llama"))
        .unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists { .. }));
}

#[test]
fn test_create_rejects_empty_name() {
    let store = store();
    let err = store.create(&ModelTemplate::new("default", "")).unwrap_err();
    assert!(matches!(err, StoreError::Invalid(_)));
}

#[test]
fn test_same_name_different_kinds_coexist() {
    let store = store();
    store.create(&ModelTemplate::new("default", "llama")).unwrap();
    store
        .create(&ModelTemplateVersion::new("default", "llama", "llama"))
        .unwrap();
    assert_eq!(store.count(ResourceKind::ModelTemplate).unwrap(), 1);
    assert_eq!(store.count(ResourceKind::ModelTemplateVersion).unwrap(), 1);
}

#[test]
fn test_get_missing_is_not_found() {
    let store = store();
    let err = store.get::<ModelTemplate>("default", "nope").unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn test_update_bumps_resource_version() {
    let store = store();
    let mut t = store.create(&ModelTemplate::new("default", "llama")).unwrap();
    let before = t.metadata.resource_version;

    t.spec.description = "updated".to_string();
    let updated = store.update(&t).unwrap();

    assert!(updated.metadata.resource_version > before);
    assert_eq!(updated.metadata.uid, t.metadata.uid);
    assert_eq!(updated.metadata.creation_revision, t.metadata.creation_revision);
    let fetched: ModelTemplate = store.get("default", "llama").unwrap();
    assert_eq!(fetched.spec.description, "updated");
}

#[test]
fn test_stale_update_conflicts() {
    let store = store();
    let t = store.create(&ModelTemplate::new("default", "llama")).unwrap();

    let mut first = t.clone();
    first.spec.description = "first".to_string();
    store.update(&first).unwrap();

    let mut stale = t;
    stale.spec.description = "stale".to_string();
    let err = store.update(&stale).unwrap_err();
    assert!(err.is_conflict());

    let fetched: ModelTemplate = store.get("default", "llama").unwrap();
    assert_eq!(fetched.spec.description, "first");
}

#[test]
fn test_update_preserves_store_owned_fields() {
    let store = store();
    let t = store.create(&ModelTemplate::new("default", "llama")).unwrap();

    let mut tampered = t.clone();
    tampered.metadata.uid = "forged".to_string();
    tampered.metadata.creation_revision = 999;
    let updated = store.update(&tampered).unwrap();

    assert_eq!(updated.metadata.uid, t.metadata.uid);
    assert_eq!(updated.metadata.creation_revision, t.metadata.creation_revision);
}

#[test]
fn test_update_missing_is_not_found() {
    let store = store();
    let err = store
        .update(&ModelTemplate::new("default", "ghost"))
        .unwrap_err();
    assert!(err.is_not_found());
}

// =============================================================================
// List Tests
// =============================================================================

#[test]
fn test_list_orders_by_creation_revision() {
    let store = store();
    for name in ["c", "a", "b"] {
        store
            .create(&ModelTemplateVersion::new("default", name, "llama"))
            .unwrap();
    }
    // Updating an early object must not move it in the listing.
    let mut c: ModelTemplateVersion = store.get("default", "c").unwrap();
    c.spec.description = "touched".to_string();
    store.update(&c).unwrap();

    let names: Vec<String> = store
        .list::<ModelTemplateVersion>(Some("default"), &LabelSelector::everything())
        .unwrap()
        .into_iter()
        .map(|v| v.metadata.name)
        .collect();
    assert_eq!(names, vec!["c", "a", "b"]);
}

#[test]
fn test_list_filters_namespace_and_labels() {
    let store = store();
    let mut labelled = ModelTemplateVersion::new("default", "v1", "llama");
    labelled
        .metadata
        .labels
        .insert(LABEL_TEMPLATE_NAME.to_string(), "llama".to_string());
    store.create(&labelled).unwrap();
    store
        .create(&ModelTemplateVersion::new("default", "v2", "llama"))
        .unwrap();
    store
        .create(&ModelTemplateVersion::new("other", "v3", "llama"))
        .unwrap();

    let all: Vec<ModelTemplateVersion> = store.list(None, &LabelSelector::everything()).unwrap();
    assert_eq!(all.len(), 3);

    let ns: Vec<ModelTemplateVersion> = store
        .list(Some("default"), &LabelSelector::everything())
        .unwrap();
    assert_eq!(ns.len(), 2);

    let selector = LabelSelector::everything().with(LABEL_TEMPLATE_NAME, "llama");
    let matched: Vec<ModelTemplateVersion> = store.list(Some("default"), &selector).unwrap();
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].metadata.name, "v1");
}

// =============================================================================
// Deletion Tests
// =============================================================================

#[test]
fn test_delete_without_finalizers_removes() {
    let store = store();
    store.create(&ModelTemplate::new("default", "llama")).unwrap();
    store.delete::<ModelTemplate>("default", "llama").unwrap();
    assert!(
        store
            .get::<ModelTemplate>("default", "llama")
            .unwrap_err()
            .is_not_found()
    );
}

#[test]
fn test_delete_missing_is_not_found() {
    let store = store();
    let err = store.delete::<ModelTemplate>("default", "ghost").unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn test_delete_with_finalizers_is_two_phase() {
    let store = store();
    let mut t = ModelTemplate::new("default", "llama");
    t.metadata.finalizers.push("modelver.io/cleanup".to_string());
    store.create(&t).unwrap();

    store.delete::<ModelTemplate>("default", "llama").unwrap();
    let marked: ModelTemplate = store.get("default", "llama").unwrap();
    assert!(marked.is_deleting());

    // A second delete is a no-op while finalizers remain.
    store.delete::<ModelTemplate>("default", "llama").unwrap();
    let again: ModelTemplate = store.get("default", "llama").unwrap();
    assert_eq!(again.metadata.resource_version, marked.metadata.resource_version);

    let mut released = marked;
    released.metadata.finalizers.clear();
    store.update(&released).unwrap();
    assert!(
        store
            .get::<ModelTemplate>("default", "llama")
            .unwrap_err()
            .is_not_found()
    );
}

#[test]
fn test_update_cannot_clear_deletion_timestamp() {
    let store = store();
    let mut t = ModelTemplate::new("default", "llama");
    t.metadata.finalizers.push("keep".to_string());
    store.create(&t).unwrap();
    store.delete::<ModelTemplate>("default", "llama").unwrap();

    let mut marked: ModelTemplate = store.get("default", "llama").unwrap();
    marked.metadata.deletion_timestamp = None;
    let updated = store.update(&marked).unwrap();
    assert!(updated.is_deleting());
}

#[test]
fn test_removing_owner_collects_dependents() {
    let store = store();
    let template = store.create(&ModelTemplate::new("default", "llama")).unwrap();
    store
        .create(&owned_by(
            ModelTemplateVersion::new("default", "v1", "llama"),
            &template,
        ))
        .unwrap();
    store
        .create(&owned_by(
            ModelTemplateVersion::new("default", "v2", "llama"),
            &template,
        ))
        .unwrap();
    store
        .create(&ModelTemplateVersion::new("default", "orphan", "llama"))
        .unwrap();

    store.delete::<ModelTemplate>("default", "llama").unwrap();

    let left: Vec<ModelTemplateVersion> = store
        .list(Some("default"), &LabelSelector::everything())
        .unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].metadata.name, "orphan");
}

#[test]
fn test_collected_dependent_with_finalizer_is_only_marked() {
    let store = store();
    let template = store.create(&ModelTemplate::new("default", "llama")).unwrap();
    let mut v1 = owned_by(ModelTemplateVersion::new("default", "v1", "llama"), &template);
    v1.metadata.finalizers.push("keep".to_string());
    store.create(&v1).unwrap();

    store.delete::<ModelTemplate>("default", "llama").unwrap();

    let marked: ModelTemplateVersion = store.get("default", "v1").unwrap();
    assert!(marked.is_deleting());
}

// =============================================================================
// Change Log Tests
// =============================================================================

#[test]
fn test_changes_record_every_write_in_order() {
    let store = store();
    assert_eq!(store.head_revision().unwrap(), 0);

    let t = store.create(&ModelTemplate::new("default", "llama")).unwrap();
    let v = store
        .create(&ModelTemplateVersion::new("default", "v1", "llama"))
        .unwrap();
    store.delete::<ModelTemplateVersion>("default", "v1").unwrap();

    let changes = store.changes_since(0, 100).unwrap();
    assert_eq!(changes.len(), 3);
    assert_eq!(changes[0].revision, t.metadata.resource_version);
    assert_eq!(changes[0].kind, ResourceKind::ModelTemplate);
    assert_eq!(changes[0].change_type, ChangeType::Applied);
    assert_eq!(changes[1].revision, v.metadata.resource_version);
    assert_eq!(changes[2].change_type, ChangeType::Deleted);
    assert_eq!(store.head_revision().unwrap(), changes[2].revision);

    let tombstone: ModelTemplateVersion = changes[2].tombstone().unwrap();
    assert_eq!(tombstone.metadata.name, "v1");
    assert_eq!(tombstone.spec.template_name, "llama");
    assert!(changes[2].tombstone::<ModelTemplate>().is_none());
}

#[test]
fn test_changes_since_respects_cursor_and_limit() {
    let store = store();
    for i in 0..5 {
        store
            .create(&ModelTemplate::new("default", format!("t{i}")))
            .unwrap();
    }
    let first = store.changes_since(0, 2).unwrap();
    assert_eq!(first.len(), 2);
    let rest = store.changes_since(first[1].revision, 100).unwrap();
    assert_eq!(rest.len(), 3);
    assert!(rest.iter().all(|c| c.revision > first[1].revision));
}

#[test]
fn test_compaction_keeps_revisions_monotonic() {
    let store = store();
    let a = store.create(&ModelTemplate::new("default", "a")).unwrap();
    let b = store.create(&ModelTemplate::new("default", "b")).unwrap();

    let removed = store.compact_changes(b.metadata.resource_version).unwrap();
    assert_eq!(removed, 2);
    assert!(store.changes_since(0, 100).unwrap().is_empty());
    assert_eq!(store.head_revision().unwrap(), b.metadata.resource_version);

    let c = store.create(&ModelTemplate::new("default", "c")).unwrap();
    assert!(c.metadata.resource_version > b.metadata.resource_version);
    assert!(b.metadata.resource_version > a.metadata.resource_version);
}

#[test]
fn test_reopen_preserves_objects_and_revisions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");

    let head = {
        let store = SqliteStore::open(&path).unwrap();
        store.create(&ModelTemplate::new("default", "llama")).unwrap();
        store.head_revision().unwrap()
    };

    let store = SqliteStore::open(&path).unwrap();
    assert_eq!(store.path(), Some(path.as_path()));
    assert_eq!(store.head_revision().unwrap(), head);
    let t: ModelTemplate = store.get("default", "llama").unwrap();
    assert_eq!(t.metadata.resource_version, head);
}
