//! Integration tests for memory:// context expansion: traversal depth,
//! recency windows and glob seeds over a synced repository.

mod common;

use common::{test_repo, write_file};
use mneme_core::{
    context::{ContextBuilder, ContextRequest, MemoryUrl},
    search::{SearchItem, SearchItemType},
    sync::SyncService,
};

fn builder(sync: &SyncService) -> ContextBuilder {
    ContextBuilder::new(sync.store().pool().clone())
}

fn related_permalinks(context: &mneme_core::context::GraphContext) -> Vec<&str> {
    context
        .related_results
        .iter()
        .map(|item| item.result.permalink.as_str())
        .collect()
}

/// Chain a → b → c through relations, then walk from a.
#[tokio::test]
async fn test_context_depth_bounds_traversal() {
    common::init_logging();
    let (tmp, sync) = test_repo().await;
    write_file(tmp.path(), "design/a.md", "- implements [[design/b]]\n");
    write_file(tmp.path(), "design/b.md", "- depends_on [[design/c]]\n");
    write_file(tmp.path(), "design/c.md", "# C\n\n- [note] c fact\n");
    sync.sync().await.unwrap();

    let ctx = builder(&sync);
    let url = MemoryUrl::parse("memory://design/a").unwrap();

    let mut request = ContextRequest::default();
    request.depth = 1;
    let shallow = ctx.build_context(&url, &request).await.unwrap();
    assert_eq!(shallow.primary_results.len(), 1);
    assert_eq!(shallow.primary_results[0].result.permalink, "design/a");
    let permalinks = related_permalinks(&shallow);
    assert!(permalinks.contains(&"design/b"));
    assert!(permalinks.iter().any(|p| p.starts_with("design/a/implements/")));
    assert!(!permalinks.contains(&"design/c"), "depth 1 must not reach c");

    request.depth = 2;
    let deep = ctx.build_context(&url, &request).await.unwrap();
    let permalinks = related_permalinks(&deep);
    assert!(permalinks.contains(&"design/b"));
    assert!(permalinks.contains(&"design/c"));
    assert!(permalinks.iter().any(|p| p.starts_with("design/b/depends_on/")));

    // Relation items are counted in the metadata.
    assert!(deep.metadata.counts.total_relations >= 2);
}

#[tokio::test]
async fn test_context_includes_endpoint_observations() {
    let (tmp, sync) = test_repo().await;
    write_file(tmp.path(), "a.md", "- implements [[b]]\n");
    write_file(tmp.path(), "b.md", "# B\n\n- [tech] b runs somewhere\n");
    sync.sync().await.unwrap();

    let ctx = builder(&sync);
    let url = MemoryUrl::parse("memory://a").unwrap();
    let context = ctx.build_context(&url, &ContextRequest::default()).await.unwrap();
    assert!(context
        .related_results
        .iter()
        .any(|item| matches!(item.result.item, SearchItem::Observation { .. })));
}

#[tokio::test]
async fn test_context_glob_seeds() {
    let (tmp, sync) = test_repo().await;
    write_file(tmp.path(), "design/auth.md", "# Auth\n");
    write_file(tmp.path(), "design/tokens.md", "# Tokens\n");
    write_file(tmp.path(), "notes/todo.md", "# Todo\n");
    sync.sync().await.unwrap();

    let ctx = builder(&sync);
    let url = MemoryUrl::parse("memory://design/*").unwrap();
    let context = ctx.build_context(&url, &ContextRequest::default()).await.unwrap();
    let seeds: Vec<_> = context
        .primary_results
        .iter()
        .map(|item| item.result.permalink.as_str())
        .collect();
    assert_eq!(seeds.len(), 2);
    assert!(seeds.contains(&"design/auth"));
    assert!(seeds.contains(&"design/tokens"));
}

#[tokio::test]
async fn test_recent_window_filters_and_orders() {
    let (tmp, sync) = test_repo().await;
    write_file(
        tmp.path(),
        "old.md",
        "---\ncreated: 10 days ago\n---\n\n# Old\n",
    );
    write_file(
        tmp.path(),
        "mid.md",
        "---\ncreated: 3 days ago\n---\n\n# Mid\n",
    );
    write_file(
        tmp.path(),
        "fresh.md",
        "---\ncreated: 1 day ago\n---\n\n# Fresh\n",
    );
    sync.sync().await.unwrap();

    let ctx = builder(&sync);
    let mut request = ContextRequest::default();
    request.timeframe = Some("7d".to_string());
    request.types = Some(vec![SearchItemType::Entity]);
    let context = ctx
        .build_context(&MemoryUrl::Recent, &request)
        .await
        .unwrap();

    let seeds: Vec<_> = context
        .primary_results
        .iter()
        .map(|item| item.result.permalink.as_str())
        .collect();
    assert_eq!(seeds, vec!["fresh", "mid"], "newest first, old excluded");

    // max_results bounds the window.
    request.max_results = 1;
    let bounded = ctx
        .build_context(&MemoryUrl::Recent, &request)
        .await
        .unwrap();
    assert_eq!(bounded.primary_results.len(), 1);
    assert_eq!(bounded.primary_results[0].result.permalink, "fresh");
}

#[tokio::test]
async fn test_missing_permalink_yields_empty_context() {
    let (_tmp, sync) = test_repo().await;
    let ctx = builder(&sync);
    let url = MemoryUrl::parse("memory://does/not/exist").unwrap();
    let context = ctx.build_context(&url, &ContextRequest::default()).await.unwrap();
    assert!(context.primary_results.is_empty());
    assert!(context.related_results.is_empty());
    assert_eq!(context.metadata.counts.primary, 0);
}

#[tokio::test]
async fn test_bad_timeframe_in_request_is_validation_error() {
    let (_tmp, sync) = test_repo().await;
    let ctx = builder(&sync);
    let mut request = ContextRequest::default();
    request.timeframe = Some("whenever".to_string());
    let err = ctx
        .build_context(&MemoryUrl::Recent, &request)
        .await
        .unwrap_err();
    assert!(matches!(err, mneme_core::MnemeError::Validation(_)));
}
