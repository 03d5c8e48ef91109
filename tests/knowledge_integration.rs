//! Integration tests for the file-first CRUD service: created entities are
//! written to disk and enter the graph through the same sync flow as user
//! edits.

mod common;

use common::{test_repo, write_file};
use mneme_core::{
    error::MnemeError,
    knowledge::{CreateEntityRequest, KnowledgeService},
    search::SearchQuery,
};
use std::sync::Arc;

#[tokio::test]
async fn test_create_writes_file_then_indexes() {
    common::init_logging();
    let (tmp, sync) = test_repo().await;
    let knowledge = KnowledgeService::new(Arc::new(sync));

    let created = knowledge
        .create_entity(CreateEntityRequest {
            title: "Auth Service".to_string(),
            entity_type: Some("design".to_string()),
            content: Some("Opaque tokens.\n\n- [design] 256-bit tokens #crypto\n".to_string()),
            directory: Some("design".to_string()),
        })
        .await
        .unwrap();

    assert_eq!(created.entity.permalink, "design/auth-service");
    assert_eq!(created.entity.entity_type, "design");
    assert_eq!(created.observations.len(), 1);
    assert!(tmp.path().join("design/auth-service.md").exists());

    // The file on disk round-trips through the parser.
    let on_disk = std::fs::read_to_string(tmp.path().join("design/auth-service.md")).unwrap();
    assert!(on_disk.starts_with("---\ntitle: Auth Service\n"));
    assert!(on_disk.contains("- [design] 256-bit tokens #crypto"));
}

#[tokio::test]
async fn test_create_conflicts_on_existing_file() {
    let (tmp, sync) = test_repo().await;
    write_file(tmp.path(), "note.md", "# Note\n");
    let knowledge = KnowledgeService::new(Arc::new(sync));

    let err = knowledge
        .create_entity(CreateEntityRequest {
            title: "Note".to_string(),
            entity_type: None,
            content: None,
            directory: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, MnemeError::Conflict(_)));
}

#[tokio::test]
async fn test_get_returns_children_both_directions() {
    let (tmp, sync) = test_repo().await;
    write_file(tmp.path(), "a.md", "- implements [[b]]\n");
    write_file(tmp.path(), "b.md", "# B\n\n- [note] b fact\n");
    sync.sync().await.unwrap();
    let knowledge = KnowledgeService::new(Arc::new(sync));

    let b = knowledge.get_entity("b").await.unwrap();
    assert_eq!(b.observations.len(), 1);
    assert!(b.relations.is_empty());
    assert_eq!(b.incoming_relations.len(), 1);
    assert_eq!(b.incoming_relations[0].to_name, "b");

    let err = knowledge.get_entity("nope").await.unwrap_err();
    assert!(matches!(err, MnemeError::NotFound(_)));
}

#[tokio::test]
async fn test_delete_removes_file_and_graph() {
    let (tmp, sync) = test_repo().await;
    write_file(tmp.path(), "gone.md", "# Gone\n\n- [note] a fact\n");
    sync.sync().await.unwrap();
    let sync = Arc::new(sync);
    let knowledge = KnowledgeService::new(sync.clone());

    knowledge.delete_entity("gone").await.unwrap();
    assert!(!tmp.path().join("gone.md").exists());
    assert!(sync
        .store()
        .entity_by_permalink("gone")
        .await
        .unwrap()
        .is_none());
    assert!(sync
        .search()
        .search(&SearchQuery::permalink("gone"))
        .await
        .unwrap()
        .is_empty());

    // Deleting again is NotFound, not a crash.
    let err = knowledge.delete_entity("gone").await.unwrap_err();
    assert!(matches!(err, MnemeError::NotFound(_)));
}
