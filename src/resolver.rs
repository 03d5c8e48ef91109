//! Resolution of free-text link targets to concrete entities.
//!
//! A `[[Auth Service]]` link may name an entity by permalink, by file path,
//! by title, or by a glob over permalinks. Resolution is attempted twice per
//! sync pass: eagerly when a relation is first written, and again in the
//! backfill phase once every entity of the pass has been persisted, so
//! forward references to files appearing later in the same pass still land.

use crate::{
    error::MnemeError,
    models::{normalize_link_target, Entity},
    search::{SearchIndex, SearchItem, SearchItemType, SearchQuery},
    store::GraphStore,
};

#[derive(Debug, Clone)]
pub struct LinkResolver {
    store: GraphStore,
    search: SearchIndex,
}

impl LinkResolver {
    pub fn new(store: GraphStore, search: SearchIndex) -> Self {
        LinkResolver { store, search }
    }

    /// Resolve a link target to an entity, or None when it stays a forward
    /// reference. First hit wins:
    ///
    /// 1. exact permalink
    /// 2. exact file path
    /// 3. permalink derived from the target text
    /// 4. case-insensitive title (ties broken by most-recently-updated)
    /// 5. glob search over permalinks, accepted only when unambiguous
    pub async fn resolve(&self, target: &str) -> Result<Option<Entity>, MnemeError> {
        let target = target.trim();
        if target.is_empty() {
            return Ok(None);
        }

        if let Some(entity) = self.store.entity_by_permalink(target).await? {
            return Ok(Some(entity));
        }

        if let Some(entity) = self.store.entity_by_file_path(target).await? {
            return Ok(Some(entity));
        }

        // Glob targets skip the normalization and title steps: the permalink
        // derivation would eat the wildcards.
        if target.contains('*') {
            return self.resolve_by_pattern(&target.to_lowercase()).await;
        }

        let normalized = normalize_link_target(target);
        if !normalized.is_empty() && normalized != target {
            if let Some(entity) = self.store.entity_by_permalink(&normalized).await? {
                return Ok(Some(entity));
            }
        }

        let by_title = self.store.entities_by_title(target).await?;
        if let Some(entity) = by_title.into_iter().next() {
            return Ok(Some(entity));
        }

        // Pattern fallback: the normalized target itself, then as a path
        // suffix, so `[[Service B]]` finds `design/service-b` when nothing
        // shorter matched.
        if let Some(entity) = self.resolve_by_pattern(&normalized).await? {
            return Ok(Some(entity));
        }
        self.resolve_by_pattern(&format!("**/{normalized}")).await
    }

    async fn resolve_by_pattern(&self, pattern: &str) -> Result<Option<Entity>, MnemeError> {
        if pattern.is_empty() {
            return Ok(None);
        }
        let mut query = SearchQuery::pattern(pattern);
        query.types = Some(vec![SearchItemType::Entity]);
        // Two is enough to tell unique from ambiguous.
        query.limit = Some(2);
        let hits = self.search.search(&query).await?;
        let [only] = hits.as_slice() else {
            if hits.len() > 1 {
                tracing::debug!(
                    "[LinkResolver] pattern '{}' is ambiguous ({}+ hits), leaving unresolved",
                    pattern,
                    hits.len()
                );
            }
            return Ok(None);
        };
        debug_assert!(matches!(only.item, SearchItem::Entity { .. }));
        self.store.entity_by_id(only.id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{db_init_in_memory, EntityUpsert};
    use chrono::{Duration, Utc};
    use std::collections::BTreeMap;

    async fn fixture() -> (GraphStore, SearchIndex, LinkResolver) {
        let pool = db_init_in_memory().await.unwrap();
        let store = GraphStore::new(pool.clone());
        let search = SearchIndex::new(pool);
        let resolver = LinkResolver::new(store.clone(), search.clone());
        (store, search, resolver)
    }

    fn upsert(permalink: &str, file_path: &str, title: &str) -> EntityUpsert {
        EntityUpsert {
            permalink: permalink.to_string(),
            file_path: file_path.to_string(),
            title: title.to_string(),
            entity_type: "note".to_string(),
            content_type: "text/markdown".to_string(),
            checksum: None,
            metadata: BTreeMap::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_resolve_by_permalink_and_file_path() {
        let (store, _search, resolver) = fixture().await;
        store
            .upsert_entity(upsert("design/auth", "design/auth.md", "Auth"))
            .await
            .unwrap();

        let hit = resolver.resolve("design/auth").await.unwrap().unwrap();
        assert_eq!(hit.permalink, "design/auth");
        let hit = resolver.resolve("design/auth.md").await.unwrap().unwrap();
        assert_eq!(hit.permalink, "design/auth");
    }

    #[tokio::test]
    async fn test_resolve_normalized_target() {
        let (store, _search, resolver) = fixture().await;
        store
            .upsert_entity(upsert("design/auth-service", "design/auth-service.md", "X"))
            .await
            .unwrap();
        let hit = resolver.resolve("Design/Auth Service").await.unwrap().unwrap();
        assert_eq!(hit.permalink, "design/auth-service");
    }

    #[tokio::test]
    async fn test_resolve_title_most_recent_wins() {
        let (store, _search, resolver) = fixture().await;
        let mut older = upsert("a", "a.md", "Auth Service");
        older.updated_at = Utc::now() - Duration::days(2);
        store.upsert_entity(older).await.unwrap();
        store
            .upsert_entity(upsert("b", "b.md", "auth service"))
            .await
            .unwrap();

        let hit = resolver.resolve("Auth Service").await.unwrap().unwrap();
        assert_eq!(hit.permalink, "b");
    }

    #[tokio::test]
    async fn test_resolve_pattern_requires_unique_hit() {
        let (store, search, resolver) = fixture().await;
        for p in ["auth-tokens", "auth-flows"] {
            let e = store
                .upsert_entity(upsert(p, &format!("{p}.md"), p))
                .await
                .unwrap();
            search.index_entity(&e, None).await.unwrap();
        }

        assert!(resolver.resolve("auth-*").await.unwrap().is_none());
        let hit = resolver.resolve("auth-t*").await.unwrap().unwrap();
        assert_eq!(hit.permalink, "auth-tokens");
    }

    #[tokio::test]
    async fn test_unresolvable_is_none_not_error() {
        let (_store, _search, resolver) = fixture().await;
        assert!(resolver.resolve("No Such Thing").await.unwrap().is_none());
    }
}
