//! Hierarchy operations: move, copy, recursive removal, ordering and the
//! concurrent same-name race.

mod support;

use canopy_core::models::{NodeId, PropertyValue};
use canopy_core::{SessionError, ValidationError};
use support::memory_repo;

#[tokio::test]
async fn move_keeps_identity_and_changes_path() {
    let repo = memory_repo().await;
    let mut session = repo.open_session();
    let src = session
        .add_child(&NodeId::root(), "src", "folder")
        .await
        .unwrap();
    let dst = session
        .add_child(&NodeId::root(), "dst", "folder")
        .await
        .unwrap();
    let doc = session.add_child(&src.id, "doc", "note").await.unwrap();
    session.save().await.unwrap();

    session
        .move_node(&doc.id, &dst.id, Some("renamed"))
        .await
        .unwrap();
    session.save().await.unwrap();

    let mut fresh = repo.open_session();
    let found = fresh.get_node_by_path("/dst/renamed").await.unwrap();
    assert_eq!(found.id, doc.id);
    assert!(matches!(
        fresh.get_node_by_path("/src/doc").await,
        Err(SessionError::PathNotFound(_))
    ));
    assert!(fresh.get_children(&src.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn move_under_own_descendant_rejected() {
    let repo = memory_repo().await;
    let mut session = repo.open_session();
    let a = session
        .add_child(&NodeId::root(), "a", "folder")
        .await
        .unwrap();
    let b = session.add_child(&a.id, "b", "folder").await.unwrap();
    let c = session.add_child(&b.id, "c", "folder").await.unwrap();
    session.save().await.unwrap();

    let err = session.move_node(&a.id, &c.id, None).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Validation(ValidationError::UnderOwnDescendant { op: "move", .. })
    ));
    // Moving onto itself is the same rejection.
    let err = session.move_node(&a.id, &a.id, None).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Validation(ValidationError::UnderOwnDescendant { .. })
    ));
}

#[tokio::test]
async fn move_into_occupied_name_rejected() {
    let repo = memory_repo().await;
    let mut session = repo.open_session();
    let dst = session
        .add_child(&NodeId::root(), "dst", "folder")
        .await
        .unwrap();
    session.add_child(&dst.id, "taken", "note").await.unwrap();
    let doc = session
        .add_child(&NodeId::root(), "taken", "note")
        .await
        .unwrap();
    session.save().await.unwrap();

    let err = session.move_node(&doc.id, &dst.id, None).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Validation(ValidationError::NameExists { .. })
    ));
}

#[tokio::test]
async fn copy_is_deep_with_fresh_ids_and_independent_values() {
    let repo = memory_repo().await;
    let mut session = repo.open_session();
    let src = session
        .add_child(&NodeId::root(), "src", "folder")
        .await
        .unwrap();
    let child = session.add_child(&src.id, "child", "note").await.unwrap();
    session
        .set_property(
            &child.id,
            "dublincore:subjects",
            PropertyValue::strings(["one"]),
        )
        .await
        .unwrap();
    session.save().await.unwrap();

    let copy = session
        .copy_node(&src.id, &NodeId::root(), Some("copy"))
        .await
        .unwrap();
    session.save().await.unwrap();
    assert_ne!(copy.id, src.id);

    let mut fresh = repo.open_session();
    let copied_child = fresh
        .get_child_by_name(&copy.id, "child")
        .await
        .unwrap()
        .unwrap();
    assert_ne!(copied_child.id, child.id);

    // Mutating the copy leaves the source untouched.
    fresh
        .set_property(
            &copied_child.id,
            "dublincore:subjects",
            PropertyValue::strings(["one", "two"]),
        )
        .await
        .unwrap();
    fresh.save().await.unwrap();

    let mut check = repo.open_session();
    let original = check
        .get_property(&child.id, "dublincore:subjects")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(original.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn copy_into_occupied_name_rejected() {
    let repo = memory_repo().await;
    let mut session = repo.open_session();
    let doc = session
        .add_child(&NodeId::root(), "doc", "note")
        .await
        .unwrap();
    session
        .add_child(&NodeId::root(), "copy", "note")
        .await
        .unwrap();
    session.save().await.unwrap();

    let err = session
        .copy_node(&doc.id, &NodeId::root(), Some("copy"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::Validation(ValidationError::NameExists { .. })
    ));
}

#[tokio::test]
async fn copy_under_own_descendant_rejected() {
    let repo = memory_repo().await;
    let mut session = repo.open_session();
    let a = session
        .add_child(&NodeId::root(), "a", "folder")
        .await
        .unwrap();
    let b = session.add_child(&a.id, "b", "folder").await.unwrap();
    session.save().await.unwrap();

    let err = session.copy_node(&a.id, &b.id, None).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Validation(ValidationError::UnderOwnDescendant { op: "copy", .. })
    ));
}

#[tokio::test]
async fn removal_is_recursive() {
    let repo = memory_repo().await;
    let mut session = repo.open_session();
    let top = session
        .add_child(&NodeId::root(), "top", "folder")
        .await
        .unwrap();
    let mid = session.add_child(&top.id, "mid", "folder").await.unwrap();
    let leaf = session.add_child(&mid.id, "leaf", "note").await.unwrap();
    session.save().await.unwrap();

    session.remove_node(&top.id).await.unwrap();
    // Gone in this session's view immediately.
    assert!(session.try_get_node(&leaf.id).await.unwrap().is_none());
    session.save().await.unwrap();

    let mut fresh = repo.open_session();
    for id in [&top.id, &mid.id, &leaf.id] {
        assert!(fresh.try_get_node(id).await.unwrap().is_none());
    }
    assert!(fresh.get_children(&NodeId::root()).await.unwrap().is_empty());
}

#[tokio::test]
async fn root_is_protected() {
    let repo = memory_repo().await;
    let mut session = repo.open_session();
    let folder = session
        .add_child(&NodeId::root(), "f", "folder")
        .await
        .unwrap();
    assert!(matches!(
        session.remove_node(&NodeId::root()).await,
        Err(SessionError::RootOperation(_))
    ));
    assert!(matches!(
        session.move_node(&NodeId::root(), &folder.id, None).await,
        Err(SessionError::RootOperation(_))
    ));
}

#[tokio::test]
async fn children_are_ordered_by_position() {
    let repo = memory_repo().await;
    let mut session = repo.open_session();
    for name in ["first", "second", "third"] {
        session
            .add_child(&NodeId::root(), name, "note")
            .await
            .unwrap();
    }
    session.save().await.unwrap();

    let mut fresh = repo.open_session();
    let names: Vec<String> = fresh
        .get_children(&NodeId::root())
        .await
        .unwrap()
        .into_iter()
        .map(|n| n.name)
        .collect();
    assert_eq!(names, vec!["first", "second", "third"]);
}

#[tokio::test]
async fn concurrent_same_name_creations_keep_a_stable_winner() {
    let repo = memory_repo().await;

    // Two sessions race the same name past each other; neither sees the
    // other's pending node, so both creations succeed.
    let mut s1 = repo.open_session();
    let mut s2 = repo.open_session();
    let d1 = s1.add_child(&NodeId::root(), "clash", "note").await.unwrap();
    let d2 = s2.add_child(&NodeId::root(), "clash", "note").await.unwrap();
    s1.save().await.unwrap();
    s2.save().await.unwrap();

    // Both rows exist; name lookup resolves to one stable winner.
    let mut reader = repo.open_session();
    let children = reader.get_children(&NodeId::root()).await.unwrap();
    assert_eq!(children.len(), 2);
    let winner = reader
        .get_child_by_name(&NodeId::root(), "clash")
        .await
        .unwrap()
        .unwrap();
    let expected = if (d1.pos, &d1.id) < (d2.pos, &d2.id) {
        &d1.id
    } else {
        &d2.id
    };
    assert_eq!(&winner.id, expected);

    // Every fresh reader agrees.
    let mut reader2 = repo.open_session();
    let winner2 = reader2
        .get_child_by_name(&NodeId::root(), "clash")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(winner.id, winner2.id);
}
