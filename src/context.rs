//! Context expansion over the knowledge graph.
//!
//! A `memory://` URI names a starting set (a concrete permalink, a glob
//! over permalinks, or the special `recent` recency window) and the builder
//! expands it into a bounded subgraph: a breadth-first walk over relations
//! in both directions that pulls in endpoint entities and their
//! observations, up to `depth` hops, optionally cut off by a `since`
//! timestamp. Items are deduplicated by `(type, id)` keeping the shortest
//! path. Read-only: missing data yields an empty context, never an error.

use crate::{
    error::MnemeError,
    search::{decode_row, SearchIndex, SearchItem, SearchItemType, SearchQuery, SearchResult},
    timeframe,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, QueryBuilder, Row, Sqlite};

/// A parsed `memory://` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryUrl {
    /// `memory://design/auth`: direct permalink lookup.
    Permalink(String),
    /// `memory://design/*`: glob over permalinks.
    Pattern(String),
    /// `memory://recent`: recency window over the whole graph.
    Recent,
}

impl MemoryUrl {
    /// Accepts both the full scheme form and a bare path (the HTTP facade
    /// receives the latter). Permalinks are case-preserving path text, so no
    /// URL normalization is applied.
    pub fn parse(uri: &str) -> Result<MemoryUrl, MnemeError> {
        let path = uri.strip_prefix("memory://").unwrap_or(uri).trim();
        let path = path.trim_matches('/');
        if path.is_empty() {
            return Err(MnemeError::Validation(
                "memory:// URI has an empty path".to_string(),
            ));
        }
        if path == "recent" {
            return Ok(MemoryUrl::Recent);
        }
        if path.contains('*') {
            return Ok(MemoryUrl::Pattern(path.to_string()));
        }
        Ok(MemoryUrl::Permalink(path.to_string()))
    }

    pub fn path(&self) -> &str {
        match self {
            MemoryUrl::Permalink(p) | MemoryUrl::Pattern(p) => p,
            MemoryUrl::Recent => "recent",
        }
    }
}

/// Parameters of a context query.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextRequest {
    /// Breadth-first hop bound.
    pub depth: usize,
    /// Timeframe string in the grammar of [`crate::timeframe`]; filters
    /// traversal (and seeds the `recent` window). None = unbounded.
    pub timeframe: Option<String>,
    /// Bound on the primary seed set.
    pub max_results: usize,
    /// Item types admitted into the `recent` seed set. None = all.
    pub types: Option<Vec<SearchItemType>>,
}

impl Default for ContextRequest {
    fn default() -> Self {
        ContextRequest {
            depth: 1,
            timeframe: None,
            max_results: 10,
            types: None,
        }
    }
}

/// One item of a context, annotated with its traversal depth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextItem {
    #[serde(flatten)]
    pub result: SearchResult,
    pub depth: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextCounts {
    pub primary: usize,
    pub related: usize,
    pub total_relations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextMetadata {
    pub uri: Option<String>,
    pub depth: usize,
    pub timeframe: Option<String>,
    pub generated_at: DateTime<Utc>,
    pub counts: ContextCounts,
}

/// The bounded subgraph returned by a context query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphContext {
    pub primary_results: Vec<ContextItem>,
    pub related_results: Vec<ContextItem>,
    pub metadata: ContextMetadata,
}

#[derive(Debug, Clone)]
pub struct ContextBuilder {
    pool: Pool<Sqlite>,
    search: SearchIndex,
}

impl ContextBuilder {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        let search = SearchIndex::new(pool.clone());
        ContextBuilder { pool, search }
    }

    /// Build a context from a URI. The seed set comes from the URI form;
    /// traversal honors `depth` and the timeframe cutoff.
    pub async fn build_context(
        &self,
        url: &MemoryUrl,
        request: &ContextRequest,
    ) -> Result<GraphContext, MnemeError> {
        tracing::debug!("Building context for URI memory://{}", url.path());
        let since = request
            .timeframe
            .as_deref()
            .map(timeframe::parse_timeframe)
            .transpose()?;

        let primary = match url {
            MemoryUrl::Permalink(permalink) => {
                let mut query = SearchQuery::permalink(permalink.clone());
                query.limit = Some(request.max_results);
                self.search.search(&query).await?
            }
            MemoryUrl::Pattern(pattern) => {
                let mut query = SearchQuery::pattern(pattern.clone());
                query.limit = Some(request.max_results);
                self.search.search(&query).await?
            }
            MemoryUrl::Recent => self.recent_seeds(request, since).await?,
        };

        let related = self
            .find_connected(&primary, request.depth, since)
            .await?;

        let primary: Vec<ContextItem> = primary
            .into_iter()
            .map(|result| ContextItem { result, depth: 0 })
            .collect();
        let total_relations = related
            .iter()
            .filter(|item| matches!(item.result.item, SearchItem::Relation { .. }))
            .count();

        Ok(GraphContext {
            metadata: ContextMetadata {
                uri: Some(format!("memory://{}", url.path())),
                depth: request.depth,
                timeframe: request.timeframe.clone(),
                generated_at: Utc::now(),
                counts: ContextCounts {
                    primary: primary.len(),
                    related: related.len(),
                    total_relations,
                },
            },
            primary_results: primary,
            related_results: related,
        })
    }

    /// Seed set for `memory://recent`: newest first, within the timeframe
    /// (default 7d), restricted to the requested item types.
    async fn recent_seeds(
        &self,
        request: &ContextRequest,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<SearchResult>, MnemeError> {
        let since = match since {
            Some(s) => s,
            None => timeframe::parse_timeframe("7d")?,
        };
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT type, CAST(id AS INTEGER) AS id, title, content, permalink, file_path, \
             CAST(from_id AS INTEGER) AS from_id, CAST(to_id AS INTEGER) AS to_id, \
             relation_type, category, CAST(entity_id AS INTEGER) AS entity_id, \
             created_at, metadata, 0.0 AS score \
             FROM search_index WHERE created_at >= ",
        );
        qb.push_bind(since.to_rfc3339());
        if let Some(types) = &request.types {
            qb.push(" AND type IN (");
            let mut separated = qb.separated(", ");
            for t in types {
                separated.push_bind(t.as_str());
            }
            qb.push(")");
        }
        qb.push(" ORDER BY created_at DESC, id ASC LIMIT ");
        qb.push_bind(request.max_results as i64);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(decode_row).collect()
    }

    /// Breadth-first expansion via a recursive CTE over the search index.
    ///
    /// Each hop from an entity collects its incident relation rows (both
    /// directions), the entity on the other end, and that entity's
    /// observations. The outer query keeps the shortest path per `(type,
    /// id)`. Seed items themselves are excluded from the result.
    async fn find_connected(
        &self,
        seeds: &[SearchResult],
        max_depth: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ContextItem>, MnemeError> {
        if seeds.is_empty() || max_depth == 0 {
            return Ok(Vec::new());
        }

        // Integer ids and enum-derived type names; safe to inline the way
        // the row-value list requires.
        let seed_values = seeds
            .iter()
            .map(|s| format!("('{}', {})", s.item.item_type(), s.id))
            .collect::<Vec<String>>()
            .join(", ");

        let date_filter = |alias: &str| -> String {
            match &since {
                Some(s) => format!("AND {alias}.created_at >= '{}'", s.to_rfc3339()),
                None => String::new(),
            }
        };

        let sql = format!(
            "WITH RECURSIVE context_graph AS ( \
                SELECT base.type AS type, CAST(base.id AS INTEGER) AS id, base.title AS title, \
                       base.content AS content, base.permalink AS permalink, base.file_path AS file_path, \
                       CAST(base.from_id AS INTEGER) AS from_id, CAST(base.to_id AS INTEGER) AS to_id, \
                       base.relation_type AS relation_type, base.category AS category, \
                       CAST(base.entity_id AS INTEGER) AS entity_id, base.created_at AS created_at, \
                       base.metadata AS metadata, 0 AS depth \
                FROM search_index base \
                WHERE (base.type, CAST(base.id AS INTEGER)) IN (VALUES {seed_values}) \
                UNION \
                SELECT related.type, CAST(related.id AS INTEGER), related.title, \
                       related.content, related.permalink, related.file_path, \
                       CAST(related.from_id AS INTEGER), CAST(related.to_id AS INTEGER), \
                       related.relation_type, related.category, \
                       CAST(related.entity_id AS INTEGER), related.created_at, \
                       related.metadata, cg.depth + 1 \
                FROM context_graph cg \
                JOIN search_index r1 ON ( \
                    cg.type = 'entity' AND r1.type = 'relation' \
                    AND (CAST(r1.from_id AS INTEGER) = cg.id OR CAST(r1.to_id AS INTEGER) = cg.id) \
                    {r1_filter} \
                ) \
                JOIN search_index related ON ( \
                    (related.type = 'relation' AND related.id = r1.id) \
                    OR (related.type = 'entity' AND \
                        (CAST(related.id AS INTEGER) = CAST(r1.from_id AS INTEGER) \
                         OR CAST(related.id AS INTEGER) = CAST(r1.to_id AS INTEGER))) \
                    OR (related.type = 'observation' AND \
                        (CAST(related.entity_id AS INTEGER) = CAST(r1.from_id AS INTEGER) \
                         OR CAST(related.entity_id AS INTEGER) = CAST(r1.to_id AS INTEGER))) \
                    {related_filter} \
                ) \
                WHERE cg.depth < {max_depth} \
            ) \
            SELECT type, id, title, content, permalink, file_path, from_id, to_id, \
                   relation_type, category, entity_id, created_at, metadata, \
                   MIN(depth) AS depth, 0.0 AS score \
            FROM context_graph \
            GROUP BY type, id \
            ORDER BY depth ASC, type ASC, id ASC",
            seed_values = seed_values,
            r1_filter = date_filter("r1"),
            related_filter = date_filter("related"),
            max_depth = max_depth,
        );

        let rows = sqlx::query(&sql).fetch_all(&self.pool).await.map_err(|e| {
            tracing::error!("[ContextBuilder.find_connected] SQL error: {}", e);
            MnemeError::from(e)
        })?;

        let seed_keys: Vec<(SearchItemType, i64)> = seeds
            .iter()
            .map(|s| (s.item.item_type(), s.id))
            .collect();

        let mut related = Vec::new();
        for row in &rows {
            let depth: i64 = row.try_get("depth")?;
            let result = decode_row(row)?;
            if seed_keys.contains(&(result.item.item_type(), result.id)) {
                continue;
            }
            related.push(ContextItem { result, depth });
        }
        Ok(related)
    }
}
