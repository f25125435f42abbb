//! Session fundamentals: read-your-writes, save semantics, properties,
//! locks and ACLs.

mod support;

use canopy_core::models::{AclEntry, NodeId, PropertyValue};
use canopy_core::{PropertyError, RepositoryConfig, SessionError, ValidationError};
use support::{counting_repo, memory_repo, memory_repo_with};

#[tokio::test]
async fn session_sees_its_own_writes_before_save() {
    let repo = memory_repo().await;
    let mut session = repo.open_session();

    let doc = session
        .add_child(&NodeId::root(), "readme", "note")
        .await
        .unwrap();
    session
        .set_property(&doc.id, "dublincore:title", PropertyValue::string("Hello"))
        .await
        .unwrap();

    // Visible in this session without any save.
    let read = session.get_node(&doc.id).await.unwrap();
    assert_eq!(read.name, "readme");
    let title = session
        .get_property(&doc.id, "dublincore:title")
        .await
        .unwrap();
    assert_eq!(title.as_ref().and_then(|v| v.as_str()), Some("Hello"));
    let children = session.get_children(&NodeId::root()).await.unwrap();
    assert_eq!(children.len(), 1);

    // Invisible to a sibling session until save.
    let mut other = repo.open_session();
    assert!(matches!(
        other.get_node(&doc.id).await,
        Err(SessionError::NodeNotFound(_))
    ));

    session.save().await.unwrap();
    let mut fresh = repo.open_session();
    let found = fresh.get_node(&doc.id).await.unwrap();
    assert_eq!(found.name, "readme");
}

#[tokio::test]
async fn noop_save_writes_nothing() {
    let (repo, store) = counting_repo().await;
    let mut session = repo.open_session();
    let doc = session
        .add_child(&NodeId::root(), "doc", "note")
        .await
        .unwrap();
    session
        .set_property(&doc.id, "dublincore:title", PropertyValue::string("a"))
        .await
        .unwrap();
    session.save().await.unwrap();
    let baseline = store.write_count();

    // No pending changes: the store is not touched.
    session.save().await.unwrap();
    assert_eq!(store.write_count(), baseline);

    // A value rewritten to its pristine state is not a change either.
    session
        .set_property(&doc.id, "dublincore:title", PropertyValue::string("b"))
        .await
        .unwrap();
    session
        .set_property(&doc.id, "dublincore:title", PropertyValue::string("a"))
        .await
        .unwrap();
    session.save().await.unwrap();
    assert_eq!(store.write_count(), baseline);
}

#[tokio::test]
async fn creating_then_removing_before_save_writes_nothing() {
    let (repo, store) = counting_repo().await;
    let baseline = store.write_count();
    let mut session = repo.open_session();
    let doc = session
        .add_child(&NodeId::root(), "ephemeral", "note")
        .await
        .unwrap();
    session.remove_node(&doc.id).await.unwrap();
    session.save().await.unwrap();
    assert_eq!(store.write_count(), baseline);
}

#[tokio::test]
async fn property_resolution_failures_are_typed() {
    let repo = memory_repo().await;
    let mut session = repo.open_session();
    let doc = session
        .add_child(&NodeId::root(), "doc", "note")
        .await
        .unwrap();

    let err = session
        .set_property(&doc.id, "nosuch:title", PropertyValue::string("x"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::Property(PropertyError::NoSuchSchema { .. })
    ));

    let err = session
        .set_property(&doc.id, "dublincore:nosuch", PropertyValue::string("x"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::Property(PropertyError::UnresolvedSegment { .. })
    ));

    // "file" exists as a schema but is not attached to the note type.
    let err = session
        .set_property(&doc.id, "file:content", PropertyValue::binary("ab", 1))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::Property(PropertyError::ForeignSchema { .. })
    ));

    let err = session
        .set_property(&doc.id, "counters:hits", PropertyValue::string("nan"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::Property(PropertyError::TypeMismatch { .. })
    ));

    let err = session
        .set_property(&doc.id, "malformed", PropertyValue::string("x"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::Property(PropertyError::MalformedPath { .. })
    ));
}

#[tokio::test]
async fn multi_valued_properties_round_trip() {
    let repo = memory_repo().await;
    let mut session = repo.open_session();
    let doc = session
        .add_child(&NodeId::root(), "doc", "note")
        .await
        .unwrap();
    session
        .set_property(
            &doc.id,
            "dublincore:subjects",
            PropertyValue::strings(["storage", "rust"]),
        )
        .await
        .unwrap();
    session.save().await.unwrap();

    let mut fresh = repo.open_session();
    let subjects = fresh
        .get_property(&doc.id, "dublincore:subjects")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(subjects.as_array().unwrap().len(), 2);

    let removed = fresh
        .remove_property(&doc.id, "dublincore:subjects")
        .await
        .unwrap();
    assert!(removed.is_some());
    assert!(fresh
        .get_property(&doc.id, "dublincore:subjects")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn bulk_property_writes_flush_on_prepare() {
    let repo = memory_repo().await;
    let mut session = repo.open_session();
    let doc = session
        .add_child(&NodeId::root(), "doc", "note")
        .await
        .unwrap();
    session
        .set_simple_properties(
            &doc.id,
            [
                (
                    "dublincore:title".to_string(),
                    PropertyValue::string("Report"),
                ),
                (
                    "dublincore:description".to_string(),
                    PropertyValue::string("Q3 numbers"),
                ),
            ],
        )
        .await
        .unwrap();
    session.prepare().await.unwrap();

    let mut fresh = repo.open_session();
    let title = fresh.get_property(&doc.id, "dublincore:title").await.unwrap();
    assert_eq!(title.as_ref().and_then(|v| v.as_str()), Some("Report"));
    let desc = fresh
        .get_property(&doc.id, "dublincore:description")
        .await
        .unwrap();
    assert_eq!(desc.as_ref().and_then(|v| v.as_str()), Some("Q3 numbers"));
}

#[tokio::test]
async fn path_lookup_walks_names() {
    let repo = memory_repo().await;
    let mut session = repo.open_session();
    let folder = session
        .add_child(&NodeId::root(), "docs", "folder")
        .await
        .unwrap();
    let doc = session
        .add_child(&folder.id, "readme", "note")
        .await
        .unwrap();
    session.save().await.unwrap();

    let found = session.get_node_by_path("/docs/readme").await.unwrap();
    assert_eq!(found.id, doc.id);
    assert_eq!(
        session.get_node_by_path("/").await.unwrap().id,
        NodeId::root()
    );
    assert!(matches!(
        session.get_node_by_path("/docs/missing").await,
        Err(SessionError::PathNotFound(_))
    ));
}

#[tokio::test]
async fn sibling_name_collision_rejected_in_session() {
    let repo = memory_repo().await;
    let mut session = repo.open_session();
    session
        .add_child(&NodeId::root(), "doc", "note")
        .await
        .unwrap();
    let err = session
        .add_child(&NodeId::root(), "doc", "note")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::Validation(ValidationError::NameExists { .. })
    ));
}

#[tokio::test]
async fn unknown_type_rejected() {
    let repo = memory_repo().await;
    let mut session = repo.open_session();
    let err = session
        .add_child(&NodeId::root(), "doc", "martian")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::Validation(ValidationError::UnknownType(_))
    ));
}

#[tokio::test]
async fn existing_lock_is_returned_not_overwritten() {
    let repo = memory_repo().await;
    let mut session = repo.open_session();
    let doc = session
        .add_child(&NodeId::root(), "doc", "note")
        .await
        .unwrap();

    assert!(session.set_lock(&doc.id, "alice").await.unwrap().is_none());
    let held = session.set_lock(&doc.id, "bob").await.unwrap().unwrap();
    assert_eq!(held.owner, "alice");
    assert_eq!(
        session.get_lock(&doc.id).await.unwrap().unwrap().owner,
        "alice"
    );

    let released = session.remove_lock(&doc.id).await.unwrap().unwrap();
    assert_eq!(released.owner, "alice");
    assert!(session.get_lock(&doc.id).await.unwrap().is_none());
    // Free again.
    assert!(session.set_lock(&doc.id, "bob").await.unwrap().is_none());
}

#[tokio::test]
async fn acl_positions_are_normalized_and_persisted() {
    let repo = memory_repo().await;
    let mut session = repo.open_session();
    let doc = session
        .add_child(&NodeId::root(), "doc", "note")
        .await
        .unwrap();
    let entries = vec![
        AclEntry {
            pos: 99,
            name: "local".into(),
            grant: true,
            permission: "Read".into(),
            user: Some("alice".into()),
            group: None,
        },
        AclEntry {
            pos: 7,
            name: "local".into(),
            grant: false,
            permission: "Write".into(),
            user: None,
            group: Some("members".into()),
        },
    ];
    session.set_acl(&doc.id, entries).await.unwrap();
    session.save().await.unwrap();

    let mut fresh = repo.open_session();
    let acl = fresh.get_acl(&doc.id).await.unwrap();
    assert_eq!(acl.len(), 2);
    assert_eq!(acl[0].pos, 0);
    assert_eq!(acl[1].pos, 1);
    assert_eq!(acl[0].user.as_deref(), Some("alice"));
    assert_eq!(acl[1].group.as_deref(), Some("members"));
}

#[tokio::test]
async fn tiny_cache_evicts_on_reads_without_losing_pending_creations() {
    let mut config = RepositoryConfig::default();
    config.cache_capacity = 1;
    let repo = memory_repo_with(config).await;

    let mut setup = repo.open_session();
    let folder = setup
        .add_child(&NodeId::root(), "folder", "folder")
        .await
        .unwrap();
    let mut extras = Vec::new();
    for i in 0..4 {
        let doc = setup
            .add_child(&NodeId::root(), &format!("doc-{i}"), "note")
            .await
            .unwrap();
        extras.push(doc.id);
    }
    setup.save().await.unwrap();

    let mut session = repo.open_session();
    let child = session.add_child(&folder.id, "pending", "note").await.unwrap();
    // Reads past capacity shed pristine entries but never the parent pinned
    // by the uncommitted creation.
    for id in &extras {
        session.get_node(id).await.unwrap();
    }
    session.save().await.unwrap();

    let mut fresh = repo.open_session();
    let found = fresh
        .get_child_by_name(&folder.id, "pending")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, child.id);
}

#[tokio::test]
async fn rollback_discards_pending_work() {
    let repo = memory_repo().await;
    let mut session = repo.open_session();
    let doc = session
        .add_child(&NodeId::root(), "keep", "note")
        .await
        .unwrap();
    session.save().await.unwrap();

    session
        .set_property(&doc.id, "dublincore:title", PropertyValue::string("draft"))
        .await
        .unwrap();
    session.add_child(&NodeId::root(), "temp", "note").await.unwrap();
    assert!(session.has_pending_changes());
    session.rollback();
    assert!(!session.has_pending_changes());

    session.save().await.unwrap();
    let mut fresh = repo.open_session();
    assert!(fresh
        .get_property(&doc.id, "dublincore:title")
        .await
        .unwrap()
        .is_none());
    assert!(fresh
        .get_child_by_name(&NodeId::root(), "temp")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn commit_events_are_broadcast() {
    let repo = memory_repo().await;
    let mut events = repo.subscribe();
    let mut session = repo.open_session();
    let doc = session
        .add_child(&NodeId::root(), "doc", "note")
        .await
        .unwrap();
    session.save().await.unwrap();

    let event = events.recv().await.unwrap();
    match event {
        canopy_core::RepositoryEvent::DocumentsChanged { created, .. } => {
            assert_eq!(created, vec![doc.id]);
        }
    }
}
