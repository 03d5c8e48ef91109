//! Lexical search over entities, observations and relations.
//!
//! Backed by one FTS5 table (`search_index`) with a row per searchable item.
//! `title`, `content` and `permalink` are tokenized; everything else rides
//! along UNINDEXED so the same table can serve graph traversal. Permalink
//! glob patterns (`*` stays within a path segment, `**` crosses `/`) are
//! translated to anchored regexes and evaluated by SQLite's REGEXP operator,
//! which sqlx backs with the `regex` crate.

use crate::{
    error::MnemeError,
    models::{Entity, EntityId, Observation, Relation},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Pool, QueryBuilder, Row, Sqlite};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchItemType {
    Entity,
    Observation,
    Relation,
}

impl SearchItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchItemType::Entity => "entity",
            SearchItemType::Observation => "observation",
            SearchItemType::Relation => "relation",
        }
    }

    pub fn parse(s: &str) -> Result<SearchItemType, MnemeError> {
        match s {
            "entity" => Ok(SearchItemType::Entity),
            "observation" => Ok(SearchItemType::Observation),
            "relation" => Ok(SearchItemType::Relation),
            other => Err(MnemeError::Validation(format!(
                "unknown search item type '{other}'"
            ))),
        }
    }
}

impl fmt::Display for SearchItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-variant payload of a search row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SearchItem {
    Entity {
        file_path: String,
    },
    Observation {
        entity_id: EntityId,
        category: String,
    },
    Relation {
        from_id: EntityId,
        to_id: Option<EntityId>,
        relation_type: String,
    },
}

impl SearchItem {
    pub fn item_type(&self) -> SearchItemType {
        match self {
            SearchItem::Entity { .. } => SearchItemType::Entity,
            SearchItem::Observation { .. } => SearchItemType::Observation,
            SearchItem::Relation { .. } => SearchItemType::Relation,
        }
    }
}

/// One ranked search hit: the shared header plus the per-variant payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: i64,
    pub permalink: String,
    pub title: String,
    pub content: Option<String>,
    pub created_at: DateTime<Utc>,
    /// bm25 score when the query carried full-text terms; smaller is better.
    pub score: f64,
    #[serde(flatten)]
    pub item: SearchItem,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Full-text match over `title` and `content`.
    pub text: Option<String>,
    /// Exact permalink.
    pub permalink: Option<String>,
    /// Glob over permalinks: `*` = any run of non-`/`, `**` = any run.
    pub permalink_pattern: Option<String>,
    pub types: Option<Vec<SearchItemType>>,
    /// Only items created at or after this instant.
    pub after: Option<DateTime<Utc>>,
    /// Only items belonging to this entity.
    pub entity_id: Option<EntityId>,
    pub limit: Option<usize>,
}

impl SearchQuery {
    pub fn text(q: impl Into<String>) -> Self {
        SearchQuery {
            text: Some(q.into()),
            ..Default::default()
        }
    }

    pub fn permalink(p: impl Into<String>) -> Self {
        SearchQuery {
            permalink: Some(p.into()),
            ..Default::default()
        }
    }

    pub fn pattern(p: impl Into<String>) -> Self {
        SearchQuery {
            permalink_pattern: Some(p.into()),
            ..Default::default()
        }
    }
}

/// Translate a permalink glob into an anchored regex. `*` matches within one
/// path segment, `**` crosses segments.
pub fn glob_to_regex(pattern: &str) -> String {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    re.push_str(".*");
                } else {
                    re.push_str("[^/]*");
                }
            }
            '.' | '+' | '(' | ')' | '[' | ']' | '{' | '}' | '^' | '$' | '|' | '\\' | '?' => {
                re.push('\\');
                re.push(c);
            }
            _ => re.push(c),
        }
    }
    re.push('$');
    re
}

/// Build an FTS5 match expression restricted to title and content. Terms are
/// quoted so user input cannot inject FTS syntax.
fn fts_match_expr(text: &str) -> String {
    let terms: Vec<String> = text
        .split_whitespace()
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect();
    format!("{{title content}} : ({})", terms.join(" "))
}

const SELECT_COLUMNS: &str = "type, CAST(id AS INTEGER) AS id, title, content, permalink, \
     file_path, CAST(from_id AS INTEGER) AS from_id, CAST(to_id AS INTEGER) AS to_id, \
     relation_type, category, CAST(entity_id AS INTEGER) AS entity_id, created_at, metadata";

#[derive(Debug, Clone)]
pub struct SearchIndex {
    pool: Pool<Sqlite>,
}

impl SearchIndex {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        SearchIndex { pool }
    }

    /// Index (or re-index) an entity row. `content` is the searchable body
    /// text, absent for opaque files.
    pub async fn index_entity(
        &self,
        entity: &Entity,
        content: Option<&str>,
    ) -> Result<(), MnemeError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM search_index WHERE type = 'entity' AND id = ?")
            .bind(entity.id)
            .execute(&mut *tx)
            .await?;
        let metadata = serde_json::to_string(&entity.metadata)?;
        sqlx::query(
            "INSERT INTO search_index \
             (type, id, title, content, permalink, file_path, entity_id, created_at, metadata) \
             VALUES ('entity', ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entity.id)
        .bind(&entity.title)
        .bind(content)
        .bind(&entity.permalink)
        .bind(&entity.file_path)
        .bind(entity.id)
        .bind(entity.created_at.to_rfc3339())
        .bind(&metadata)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn index_observation(
        &self,
        obs: &Observation,
        owner: &Entity,
    ) -> Result<(), MnemeError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM search_index WHERE type = 'observation' AND id = ?")
            .bind(obs.id)
            .execute(&mut *tx)
            .await?;
        // Tags ride inside content so tag words are searchable.
        let mut content = obs.content.clone();
        for tag in &obs.tags {
            content.push_str(" #");
            content.push_str(tag);
        }
        sqlx::query(
            "INSERT INTO search_index \
             (type, id, title, content, permalink, file_path, category, entity_id, created_at) \
             VALUES ('observation', ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(obs.id)
        .bind(&owner.title)
        .bind(&content)
        .bind(format!("{}/observations/{}", owner.permalink, obs.id))
        .bind(&owner.file_path)
        .bind(obs.category.as_str())
        .bind(owner.id)
        .bind(obs.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Index a resolved relation. Unresolved edges are not searchable; per
    /// the store invariants a relation row exists here iff both endpoints
    /// are resolved.
    pub async fn index_relation(
        &self,
        rel: &Relation,
        from: &Entity,
        to: &Entity,
    ) -> Result<(), MnemeError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM search_index WHERE type = 'relation' AND id = ?")
            .bind(rel.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO search_index \
             (type, id, title, content, permalink, file_path, from_id, to_id, relation_type, entity_id, created_at) \
             VALUES ('relation', ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(rel.id)
        .bind(format!("{} {} {}", from.title, rel.relation_type, to.title))
        .bind(&rel.context)
        .bind(format!(
            "{}/{}/{}",
            from.permalink, rel.relation_type, to.permalink
        ))
        .bind(&from.file_path)
        .bind(rel.from_id)
        .bind(rel.to_id)
        .bind(&rel.relation_type)
        .bind(rel.from_id)
        .bind(rel.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn delete_by_permalink(&self, permalink: &str) -> Result<(), MnemeError> {
        sqlx::query("DELETE FROM search_index WHERE permalink = ?")
            .bind(permalink)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Remove the rows an entity owns: its entity row, its observations and
    /// its outgoing relations. Incoming relation rows (owned by other files)
    /// are left alone. Used before re-indexing a synced file.
    pub async fn delete_owned_rows(&self, entity_id: EntityId) -> Result<(), MnemeError> {
        sqlx::query("DELETE FROM search_index WHERE entity_id = ?")
            .bind(entity_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Remove every row incident to an entity, including relation rows that
    /// point at it from other files. Used when the entity is deleted: those
    /// incoming edges become unresolved and stop being searchable.
    pub async fn delete_by_entity(&self, entity_id: EntityId) -> Result<(), MnemeError> {
        sqlx::query(
            "DELETE FROM search_index WHERE entity_id = ?1 OR from_id = ?1 OR to_id = ?1",
        )
        .bind(entity_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_relation_row(&self, relation_id: i64) -> Result<(), MnemeError> {
        sqlx::query("DELETE FROM search_index WHERE type = 'relation' AND id = ?")
            .bind(relation_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Drop every row. Used by full reindex.
    pub async fn clear(&self) -> Result<(), MnemeError> {
        sqlx::query("DELETE FROM search_index")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Ranked query per the search contract: FTS score, then `created_at`
    /// descending, then `id` ascending for determinism.
    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, MnemeError> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT ");
        qb.push(SELECT_COLUMNS);
        if let Some(text) = &query.text {
            qb.push(", bm25(search_index) AS score FROM search_index WHERE search_index MATCH ");
            qb.push_bind(fts_match_expr(text));
        } else {
            qb.push(", 0.0 AS score FROM search_index WHERE 1 = 1");
        }
        if let Some(permalink) = &query.permalink {
            qb.push(" AND permalink = ");
            qb.push_bind(permalink.clone());
        }
        if let Some(pattern) = &query.permalink_pattern {
            qb.push(" AND permalink REGEXP ");
            qb.push_bind(glob_to_regex(pattern));
        }
        if let Some(types) = &query.types {
            qb.push(" AND type IN (");
            let mut separated = qb.separated(", ");
            for t in types {
                separated.push_bind(t.as_str());
            }
            qb.push(")");
        }
        if let Some(after) = &query.after {
            qb.push(" AND created_at >= ");
            qb.push_bind(after.to_rfc3339());
        }
        if let Some(entity_id) = query.entity_id {
            qb.push(" AND entity_id = ");
            qb.push_bind(entity_id);
        }
        qb.push(" ORDER BY score ASC, created_at DESC, id ASC");
        if let Some(limit) = query.limit {
            qb.push(" LIMIT ");
            qb.push_bind(limit as i64);
        }

        let rows = qb.build().fetch_all(&self.pool).await.map_err(|e| {
            tracing::error!("[SearchIndex.search] SQL error: {}", e);
            MnemeError::from(e)
        })?;
        rows.iter().map(decode_row).collect()
    }
}

/// Decode one `search_index` row (ours or the context builder's CTE output)
/// into a [`SearchResult`].
pub(crate) fn decode_row(row: &SqliteRow) -> Result<SearchResult, MnemeError> {
    let item_type: String = row.try_get("type")?;
    let id: i64 = row.try_get("id")?;
    let title: String = row.try_get("title")?;
    let content: Option<String> = row.try_get("content")?;
    let permalink: String = row.try_get("permalink")?;
    let created_at_raw: String = row.try_get("created_at")?;
    let created_at = DateTime::parse_from_rfc3339(&created_at_raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| MnemeError::Store(format!("bad created_at in search row: {e}")))?;
    let score: f64 = row.try_get("score").unwrap_or(0.0);

    let item = match item_type.as_str() {
        "entity" => SearchItem::Entity {
            file_path: row.try_get::<Option<String>, _>("file_path")?.unwrap_or_default(),
        },
        "observation" => SearchItem::Observation {
            entity_id: row.try_get::<Option<i64>, _>("entity_id")?.unwrap_or_default(),
            category: row.try_get::<Option<String>, _>("category")?.unwrap_or_default(),
        },
        "relation" => SearchItem::Relation {
            from_id: row.try_get::<Option<i64>, _>("from_id")?.unwrap_or_default(),
            to_id: row.try_get("to_id")?,
            relation_type: row
                .try_get::<Option<String>, _>("relation_type")?
                .unwrap_or_default(),
        },
        other => {
            return Err(MnemeError::Store(format!(
                "unknown search row type '{other}'"
            )))
        }
    };

    Ok(SearchResult {
        id,
        permalink,
        title,
        content,
        created_at,
        score,
        item,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ObservationCategory;
    use crate::store::{db_init_in_memory, EntityUpsert, GraphStore, RelationUpsert};
    use std::collections::BTreeMap;

    #[test]
    fn test_glob_translation() {
        assert_eq!(glob_to_regex("design/*"), "^design/[^/]*$");
        assert_eq!(glob_to_regex("design/**/notes"), "^design/.*/notes$");
        assert_eq!(glob_to_regex("a.b"), "^a\\.b$");
    }

    #[test]
    fn test_glob_star_does_not_cross_segments() {
        let re = regex::Regex::new(&glob_to_regex("design/*")).unwrap();
        assert!(re.is_match("design/auth"));
        assert!(!re.is_match("design/auth/notes"));

        let re = regex::Regex::new(&glob_to_regex("design/**")).unwrap();
        assert!(re.is_match("design/auth/notes"));
    }

    #[test]
    fn test_fts_expr_quotes_terms() {
        assert_eq!(
            fts_match_expr("write tests"),
            "{title content} : (\"write\" \"tests\")"
        );
    }

    async fn fixture() -> (GraphStore, SearchIndex) {
        let pool = db_init_in_memory().await.unwrap();
        (GraphStore::new(pool.clone()), SearchIndex::new(pool))
    }

    fn upsert(permalink: &str) -> EntityUpsert {
        EntityUpsert {
            permalink: permalink.to_string(),
            file_path: format!("{permalink}.md"),
            title: permalink.to_string(),
            entity_type: "note".to_string(),
            content_type: "text/markdown".to_string(),
            checksum: Some("0".repeat(64)),
            metadata: BTreeMap::new(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_index_and_full_text_search() {
        let (store, index) = fixture().await;
        let e = store.upsert_entity(upsert("design/auth")).await.unwrap();
        index
            .index_entity(&e, Some("Opaque tokens and refresh flows."))
            .await
            .unwrap();

        let hits = index.search(&SearchQuery::text("tokens")).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].permalink, "design/auth");
        assert!(matches!(hits[0].item, SearchItem::Entity { .. }));

        let none = index.search(&SearchQuery::text("nonexistent")).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_search_by_pattern_and_type() {
        let (store, index) = fixture().await;
        for permalink in ["design/auth", "design/tokens", "notes/todo"] {
            let e = store.upsert_entity(upsert(permalink)).await.unwrap();
            index.index_entity(&e, None).await.unwrap();
        }

        let hits = index.search(&SearchQuery::pattern("design/*")).await.unwrap();
        let permalinks: Vec<_> = hits.iter().map(|h| h.permalink.as_str()).collect();
        assert_eq!(permalinks.len(), 2);
        assert!(permalinks.contains(&"design/auth"));
        assert!(permalinks.contains(&"design/tokens"));

        let mut q = SearchQuery::pattern("**");
        q.types = Some(vec![SearchItemType::Observation]);
        assert!(index.search(&q).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_observation_indexing_and_entity_filter() {
        let (store, index) = fixture().await;
        let e = store.upsert_entity(upsert("design/auth")).await.unwrap();
        let obs = store
            .replace_observations(
                e.id,
                &[crate::markdown::ParsedObservation {
                    category: ObservationCategory::Todo,
                    content: "Write tests".to_string(),
                    tags: vec!["testing".to_string()],
                    context: None,
                }],
            )
            .await
            .unwrap();
        index.index_entity(&e, None).await.unwrap();
        index.index_observation(&obs[0], &e).await.unwrap();

        let mut q = SearchQuery::text("write tests");
        q.types = Some(vec![SearchItemType::Observation]);
        let hits = index.search(&q).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(
            matches!(&hits[0].item, SearchItem::Observation { category, .. } if category == "todo")
        );

        // Tag words are searchable too
        let hits = index.search(&SearchQuery::text("testing")).await.unwrap();
        assert_eq!(hits.len(), 1);

        let mut q = SearchQuery::default();
        q.entity_id = Some(e.id);
        assert_eq!(index.search(&q).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_delete_owned_vs_incident() {
        let (store, index) = fixture().await;
        let a = store.upsert_entity(upsert("a")).await.unwrap();
        let b = store.upsert_entity(upsert("b")).await.unwrap();
        let rels = store
            .replace_outgoing_relations(
                a.id,
                &[RelationUpsert {
                    to_id: Some(b.id),
                    to_name: "b".to_string(),
                    relation_type: "implements".to_string(),
                    context: None,
                }],
            )
            .await
            .unwrap();
        index.index_entity(&a, None).await.unwrap();
        index.index_entity(&b, None).await.unwrap();
        index.index_relation(&rels[0], &a, &b).await.unwrap();

        // Re-indexing b's rows must not drop a's outgoing relation row
        index.delete_owned_rows(b.id).await.unwrap();
        let mut q = SearchQuery::default();
        q.types = Some(vec![SearchItemType::Relation]);
        assert_eq!(index.search(&q).await.unwrap().len(), 1);

        // Deleting b entirely drops the incident relation row
        index.delete_by_entity(b.id).await.unwrap();
        assert!(index.search(&q).await.unwrap().is_empty());
    }
}
