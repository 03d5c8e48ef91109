//! SQLite persistence for the knowledge graph.
//!
//! One database per repository, at `<root>/.mneme/memory.db`. Foreign keys
//! are enforced on every connection: deleting an entity cascades to its
//! observations and outgoing relations, while incoming relations survive
//! with `to_id` reset to NULL so their verbatim `to_name` can be re-resolved
//! later.
//!
//! Every public operation runs inside a single transaction on the shared
//! pool; callers compose per-file work by invoking one operation per step so
//! readers only ever observe fully-applied states.

use crate::{
    error::MnemeError,
    markdown::ParsedObservation,
    models::{Entity, EntityId, Observation, Relation},
};
use chrono::{DateTime, Utc};
use futures_core::future::BoxFuture;
use sqlx::{
    error::BoxDynError,
    migrate::{
        Migration as SqlxMigration, MigrationSource, MigrationType, Migrator,
    },
    sqlite::{Sqlite, SqliteConnectOptions},
    ConnectOptions, Pool,
};
use std::{
    collections::BTreeMap,
    path::Path,
    str::FromStr,
};

/// Input for [`GraphStore::upsert_entity`], keyed by `permalink`.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityUpsert {
    pub permalink: String,
    pub file_path: String,
    pub title: String,
    pub entity_type: String,
    pub content_type: String,
    /// NULL marks the pending-resolve state during a sync pass.
    pub checksum: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for [`GraphStore::replace_outgoing_relations`].
#[derive(Debug, Clone, PartialEq)]
pub struct RelationUpsert {
    pub to_id: Option<EntityId>,
    pub to_name: String,
    pub relation_type: String,
    pub context: Option<String>,
}

/// Compact per-entity file state used by the sync diff.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct FileState {
    pub id: EntityId,
    pub permalink: String,
    pub file_path: String,
    pub checksum: Option<String>,
}

/// A migration definition.
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub sql: &'static str,
    pub kind: MigrationType,
}

#[derive(Debug, Clone)]
struct MigrationList(Vec<Migration>);

impl MigrationSource<'static> for MigrationList {
    fn resolve(self) -> BoxFuture<'static, Result<Vec<SqlxMigration>, BoxDynError>> {
        Box::pin(async move {
            let mut migrations = Vec::new();
            for migration in self.0 {
                if matches!(migration.kind, MigrationType::ReversibleUp) {
                    migrations.push(SqlxMigration::new(
                        migration.version,
                        migration.description.into(),
                        migration.kind,
                        migration.sql.into(),
                        false,
                    ));
                }
            }
            Ok(migrations)
        })
    }
}

fn migrations() -> MigrationList {
    MigrationList(vec![
        Migration {
            version: 1,
            description: "create_graph_tables",
            sql: "\
            CREATE TABLE entities (\
                id INTEGER PRIMARY KEY AUTOINCREMENT, \
                permalink TEXT NOT NULL UNIQUE, \
                file_path TEXT NOT NULL UNIQUE, \
                title TEXT NOT NULL, \
                entity_type TEXT NOT NULL DEFAULT 'note', \
                content_type TEXT NOT NULL DEFAULT 'text/markdown', \
                checksum TEXT, \
                metadata TEXT NOT NULL DEFAULT '{}', \
                created_at TEXT NOT NULL, \
                updated_at TEXT NOT NULL); \
            CREATE TABLE observations (\
                id INTEGER PRIMARY KEY AUTOINCREMENT, \
                entity_id INTEGER NOT NULL REFERENCES entities(id) ON DELETE CASCADE, \
                category TEXT NOT NULL DEFAULT 'note', \
                content TEXT NOT NULL, \
                tags TEXT NOT NULL DEFAULT '[]', \
                context TEXT, \
                created_at TEXT NOT NULL); \
            CREATE INDEX idx_observations_entity ON observations(entity_id); \
            CREATE TABLE relations (\
                id INTEGER PRIMARY KEY AUTOINCREMENT, \
                from_id INTEGER NOT NULL REFERENCES entities(id) ON DELETE CASCADE, \
                to_id INTEGER REFERENCES entities(id) ON DELETE SET NULL, \
                to_name TEXT NOT NULL, \
                relation_type TEXT NOT NULL, \
                context TEXT, \
                created_at TEXT NOT NULL); \
            CREATE INDEX idx_relations_from ON relations(from_id); \
            CREATE INDEX idx_relations_to ON relations(to_id);",
            kind: MigrationType::ReversibleUp,
        },
        Migration {
            version: 2,
            description: "create_search_index",
            sql: "\
            CREATE VIRTUAL TABLE search_index USING fts5(\
                title, content, permalink, \
                type UNINDEXED, \
                id UNINDEXED, \
                file_path UNINDEXED, \
                from_id UNINDEXED, \
                to_id UNINDEXED, \
                relation_type UNINDEXED, \
                category UNINDEXED, \
                entity_id UNINDEXED, \
                created_at UNINDEXED, \
                metadata UNINDEXED, \
                tokenize = 'porter unicode61');",
            kind: MigrationType::ReversibleUp,
        },
    ])
}

/// Open (creating if missing) the index database and run migrations.
pub async fn db_init(db_path: &Path) -> Result<Pool<Sqlite>, MnemeError> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let fqdb = format!("sqlite:{}", db_path.display());
    tracing::debug!("Initializing index db from file: {:?}", fqdb);

    let options = SqliteConnectOptions::from_str(&fqdb)
        .map_err(|e| MnemeError::Store(format!("invalid database path {fqdb}: {e}")))?
        .read_only(false)
        .foreign_keys(true)
        .disable_statement_logging()
        .create_if_missing(true)
        .with_regexp();

    use sqlx::pool::PoolOptions;
    let pool = PoolOptions::<Sqlite>::new()
        .connect_with(options)
        .await
        .map_err(|e| MnemeError::Store(format!("cannot open store at {fqdb}: {e}")))?;

    let migrator = Migrator::new(migrations()).await?;
    migrator.run(&pool).await?;

    Ok(pool)
}

/// Open an in-memory database, for tests and ephemeral work.
pub async fn db_init_in_memory() -> Result<Pool<Sqlite>, MnemeError> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .map_err(|e| MnemeError::Store(format!("{e}")))?
        .foreign_keys(true)
        .disable_statement_logging()
        .with_regexp();
    use sqlx::pool::PoolOptions;
    // A single connection: :memory: databases are per-connection.
    let pool = PoolOptions::<Sqlite>::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .map_err(|e| MnemeError::Store(format!("cannot open in-memory store: {e}")))?;
    let migrator = Migrator::new(migrations()).await?;
    migrator.run(&pool).await?;
    Ok(pool)
}

/// Transactional CRUD over entities, observations and relations.
#[derive(Debug, Clone)]
pub struct GraphStore {
    pool: Pool<Sqlite>,
}

impl GraphStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        GraphStore { pool }
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Insert or update keyed by `permalink`. Fails with a Conflict error if
    /// `file_path` is already bound to a different permalink. `created_at`
    /// is preserved on update.
    pub async fn upsert_entity(&self, up: EntityUpsert) -> Result<Entity, MnemeError> {
        let mut tx = self.pool.begin().await?;

        let bound: Option<(String,)> =
            sqlx::query_as("SELECT permalink FROM entities WHERE file_path = ?")
                .bind(&up.file_path)
                .fetch_optional(&mut *tx)
                .await?;
        if let Some((existing,)) = bound {
            if existing != up.permalink {
                return Err(MnemeError::Conflict(format!(
                    "file_path '{}' is already bound to permalink '{}' (attempted '{}')",
                    up.file_path, existing, up.permalink
                )));
            }
        }

        let metadata = serde_json::to_string(&up.metadata)?;
        let entity = sqlx::query_as::<_, Entity>(
            "INSERT INTO entities \
             (permalink, file_path, title, entity_type, content_type, checksum, metadata, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(permalink) DO UPDATE SET \
                file_path = excluded.file_path, \
                title = excluded.title, \
                entity_type = excluded.entity_type, \
                content_type = excluded.content_type, \
                checksum = excluded.checksum, \
                metadata = excluded.metadata, \
                updated_at = excluded.updated_at \
             RETURNING *",
        )
        .bind(&up.permalink)
        .bind(&up.file_path)
        .bind(&up.title)
        .bind(&up.entity_type)
        .bind(&up.content_type)
        .bind(&up.checksum)
        .bind(&metadata)
        .bind(up.created_at)
        .bind(up.updated_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(entity)
    }

    /// Write the content checksum back after a per-file transaction commits,
    /// clearing the pending-resolve state.
    pub async fn set_checksum(&self, id: EntityId, checksum: &str) -> Result<(), MnemeError> {
        sqlx::query("UPDATE entities SET checksum = ? WHERE id = ?")
            .bind(checksum)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Move an entity to a new path/permalink in place, without touching its
    /// children or `created_at`.
    pub async fn relocate_entity(
        &self,
        id: EntityId,
        new_file_path: &str,
        new_permalink: &str,
    ) -> Result<Entity, MnemeError> {
        let mut tx = self.pool.begin().await?;

        let clash: Option<(i64,)> = sqlx::query_as(
            "SELECT id FROM entities WHERE (permalink = ? OR file_path = ?) AND id != ?",
        )
        .bind(new_permalink)
        .bind(new_file_path)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        if clash.is_some() {
            return Err(MnemeError::Conflict(format!(
                "cannot relocate entity {id}: '{new_permalink}' / '{new_file_path}' already bound"
            )));
        }

        let entity = sqlx::query_as::<_, Entity>(
            "UPDATE entities SET file_path = ?, permalink = ?, updated_at = ? WHERE id = ? RETURNING *",
        )
        .bind(new_file_path)
        .bind(new_permalink)
        .bind(Utc::now())
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(entity)
    }

    /// Delete all observations for `entity_id` and insert the new set, in one
    /// transaction.
    pub async fn replace_observations(
        &self,
        entity_id: EntityId,
        observations: &[ParsedObservation],
    ) -> Result<Vec<Observation>, MnemeError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM observations WHERE entity_id = ?")
            .bind(entity_id)
            .execute(&mut *tx)
            .await?;

        let now = Utc::now();
        let mut inserted = Vec::with_capacity(observations.len());
        for obs in observations {
            let tags = serde_json::to_string(&obs.tags)?;
            let row = sqlx::query_as::<_, Observation>(
                "INSERT INTO observations (entity_id, category, content, tags, context, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?) RETURNING *",
            )
            .bind(entity_id)
            .bind(obs.category)
            .bind(&obs.content)
            .bind(&tags)
            .bind(&obs.context)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;
            inserted.push(row);
        }

        tx.commit().await?;
        Ok(inserted)
    }

    /// Delete all outgoing relations for `entity_id` and insert the new set,
    /// in one transaction. `to_id` may be NULL for unresolved targets.
    pub async fn replace_outgoing_relations(
        &self,
        entity_id: EntityId,
        relations: &[RelationUpsert],
    ) -> Result<Vec<Relation>, MnemeError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM relations WHERE from_id = ?")
            .bind(entity_id)
            .execute(&mut *tx)
            .await?;

        let now = Utc::now();
        let mut inserted = Vec::with_capacity(relations.len());
        for rel in relations {
            let row = sqlx::query_as::<_, Relation>(
                "INSERT INTO relations (from_id, to_id, to_name, relation_type, context, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?) RETURNING *",
            )
            .bind(entity_id)
            .bind(rel.to_id)
            .bind(&rel.to_name)
            .bind(&rel.relation_type)
            .bind(&rel.context)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;
            inserted.push(row);
        }

        tx.commit().await?;
        Ok(inserted)
    }

    /// Delete an entity by permalink. Observations and outgoing relations
    /// cascade away; incoming relations are left unresolved (`to_id` NULL,
    /// `to_name` preserved). Returns the deleted row, or None if unknown.
    pub async fn delete_entity(&self, permalink: &str) -> Result<Option<Entity>, MnemeError> {
        let mut tx = self.pool.begin().await?;
        let entity = sqlx::query_as::<_, Entity>("SELECT * FROM entities WHERE permalink = ?")
            .bind(permalink)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(entity) = entity else {
            return Ok(None);
        };
        sqlx::query("DELETE FROM entities WHERE id = ?")
            .bind(entity.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(Some(entity))
    }

    pub async fn entity_by_id(&self, id: EntityId) -> Result<Option<Entity>, MnemeError> {
        Ok(sqlx::query_as::<_, Entity>("SELECT * FROM entities WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn entity_by_permalink(&self, permalink: &str) -> Result<Option<Entity>, MnemeError> {
        Ok(
            sqlx::query_as::<_, Entity>("SELECT * FROM entities WHERE permalink = ?")
                .bind(permalink)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    pub async fn entity_by_file_path(&self, file_path: &str) -> Result<Option<Entity>, MnemeError> {
        Ok(
            sqlx::query_as::<_, Entity>("SELECT * FROM entities WHERE file_path = ?")
                .bind(file_path)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    /// Case-insensitive title match, most recently updated first.
    pub async fn entities_by_title(&self, title: &str) -> Result<Vec<Entity>, MnemeError> {
        Ok(sqlx::query_as::<_, Entity>(
            "SELECT * FROM entities WHERE lower(title) = lower(?) ORDER BY updated_at DESC, id ASC",
        )
        .bind(title)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn all_entities(&self) -> Result<Vec<Entity>, MnemeError> {
        Ok(
            sqlx::query_as::<_, Entity>("SELECT * FROM entities ORDER BY file_path ASC")
                .fetch_all(&self.pool)
                .await?,
        )
    }

    /// The store-side half of the sync diff.
    pub async fn file_states(&self) -> Result<Vec<FileState>, MnemeError> {
        Ok(sqlx::query_as::<_, FileState>(
            "SELECT id, permalink, file_path, checksum FROM entities ORDER BY file_path ASC",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn observations_for(&self, entity_id: EntityId) -> Result<Vec<Observation>, MnemeError> {
        Ok(sqlx::query_as::<_, Observation>(
            "SELECT * FROM observations WHERE entity_id = ? ORDER BY id ASC",
        )
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn outgoing_relations(&self, entity_id: EntityId) -> Result<Vec<Relation>, MnemeError> {
        Ok(sqlx::query_as::<_, Relation>(
            "SELECT * FROM relations WHERE from_id = ? ORDER BY id ASC",
        )
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn incoming_relations(&self, entity_id: EntityId) -> Result<Vec<Relation>, MnemeError> {
        Ok(sqlx::query_as::<_, Relation>(
            "SELECT * FROM relations WHERE to_id = ? ORDER BY id ASC",
        )
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Relations whose target is still a forward reference.
    pub async fn find_unresolved_relations(&self) -> Result<Vec<Relation>, MnemeError> {
        Ok(sqlx::query_as::<_, Relation>(
            "SELECT * FROM relations WHERE to_id IS NULL ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    /// Set `to_id` on a relation. Idempotent.
    pub async fn resolve_relation(
        &self,
        relation_id: i64,
        to_id: EntityId,
    ) -> Result<(), MnemeError> {
        sqlx::query("UPDATE relations SET to_id = ? WHERE id = ?")
            .bind(to_id)
            .bind(relation_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ObservationCategory;

    fn upsert(permalink: &str, file_path: &str) -> EntityUpsert {
        EntityUpsert {
            permalink: permalink.to_string(),
            file_path: file_path.to_string(),
            title: permalink.to_string(),
            entity_type: "note".to_string(),
            content_type: "text/markdown".to_string(),
            checksum: Some("0".repeat(64)),
            metadata: BTreeMap::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn observation(content: &str) -> ParsedObservation {
        ParsedObservation {
            category: ObservationCategory::Note,
            content: content.to_string(),
            tags: Vec::new(),
            context: None,
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_upsert_preserves_created_at() {
        let store = GraphStore::new(db_init_in_memory().await.unwrap());
        let first = store.upsert_entity(upsert("a", "a.md")).await.unwrap();
        let mut second = upsert("a", "a.md");
        second.title = "renamed".to_string();
        let updated = store.upsert_entity(second).await.unwrap();
        assert_eq!(first.id, updated.id);
        assert_eq!(first.created_at, updated.created_at);
        assert_eq!(updated.title, "renamed");
    }

    #[test_log::test(tokio::test)]
    async fn test_upsert_conflicting_file_path() {
        let store = GraphStore::new(db_init_in_memory().await.unwrap());
        store.upsert_entity(upsert("a", "a.md")).await.unwrap();
        let err = store.upsert_entity(upsert("b", "a.md")).await.unwrap_err();
        assert!(matches!(err, MnemeError::Conflict(_)));
    }

    #[test_log::test(tokio::test)]
    async fn test_delete_cascades_and_unresolves() {
        let store = GraphStore::new(db_init_in_memory().await.unwrap());
        let a = store.upsert_entity(upsert("a", "a.md")).await.unwrap();
        let b = store.upsert_entity(upsert("b", "b.md")).await.unwrap();

        store
            .replace_observations(b.id, &[observation("b fact")])
            .await
            .unwrap();
        // a → b
        store
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

        let deleted = store.delete_entity("b").await.unwrap().unwrap();
        assert_eq!(deleted.id, b.id);

        // b's observations are gone with it
        assert!(store.observations_for(b.id).await.unwrap().is_empty());

        // a's outgoing edge survives, unresolved, name preserved
        let rels = store.outgoing_relations(a.id).await.unwrap();
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].to_id, None);
        assert_eq!(rels[0].to_name, "b");
    }

    #[test_log::test(tokio::test)]
    async fn test_replace_observations_is_wholesale() {
        let store = GraphStore::new(db_init_in_memory().await.unwrap());
        let a = store.upsert_entity(upsert("a", "a.md")).await.unwrap();
        store
            .replace_observations(a.id, &[observation("one"), observation("two")])
            .await
            .unwrap();
        store
            .replace_observations(a.id, &[observation("three")])
            .await
            .unwrap();
        let obs = store.observations_for(a.id).await.unwrap();
        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0].content, "three");
    }

    #[test_log::test(tokio::test)]
    async fn test_resolve_relation_idempotent() {
        let store = GraphStore::new(db_init_in_memory().await.unwrap());
        let a = store.upsert_entity(upsert("a", "a.md")).await.unwrap();
        let rels = store
            .replace_outgoing_relations(
                a.id,
                &[RelationUpsert {
                    to_id: None,
                    to_name: "Service B".to_string(),
                    relation_type: "implements".to_string(),
                    context: None,
                }],
            )
            .await
            .unwrap();
        assert_eq!(store.find_unresolved_relations().await.unwrap().len(), 1);

        let b = store.upsert_entity(upsert("b", "b.md")).await.unwrap();
        store.resolve_relation(rels[0].id, b.id).await.unwrap();
        store.resolve_relation(rels[0].id, b.id).await.unwrap();
        assert!(store.find_unresolved_relations().await.unwrap().is_empty());
    }
}
