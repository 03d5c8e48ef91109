//! # Sync Engine - Filesystem to Graph Reconciliation
//!
//! The sync engine is the single writer to the store and index. A pass:
//!
//! 1. **Scan**: walk the repository, checksum every visible file.
//! 2. **Diff**: compare `(file_path, checksum)` against the store to
//!    classify files as new, modified, deleted, moved or unchanged. Moves
//!    are detected by pairing a deleted and a new path that share a
//!    checksum (stable path order, greedy first match).
//! 3. **Apply, phase 1**: per-file work in lexicographic order. Moves are
//!    relocated in place without reparsing, deletions purge the entity and
//!    its search rows, new/modified files are parsed and their entity plus
//!    replaced observation/relation sets are persisted and indexed. The
//!    entity's checksum is written back only after its per-file transaction
//!    commits, so a NULL checksum marks the pending-resolve state.
//! 4. **Apply, phase 2**: backfill. Every still-unresolved relation gets
//!    another shot at the resolver, so forward references to files that
//!    appeared later in the same pass land.
//!
//! A file that fails to sync is recorded in the report's `failed` list and
//! its previous state is left untouched; a pass never aborts because of one
//! file. Cancellation is cooperative: the pass finishes its current file,
//! marks the rest `pending` and returns.

pub mod scanner;
#[cfg(feature = "service")]
pub mod watch;

use crate::{
    config::ProjectConfig,
    error::MnemeError,
    markdown::{frontmatter::split_frontmatter, EntityMarkdown, EntityParser},
    models::{
        content_type_for_path, generate_permalink, is_markdown, Entity, EntityId,
    },
    resolver::LinkResolver,
    search::SearchIndex,
    store::{EntityUpsert, FileState, GraphStore, RelationUpsert},
};
use chrono::Utc;
use scanner::FileScanner;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use std::{
    collections::BTreeMap,
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tokio::sync::Mutex;

/// One file that could not be synced, with the offending path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFailure {
    pub path: String,
    pub error: String,
}

/// The observable outcome of a sync pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub new: Vec<String>,
    pub modified: Vec<String>,
    /// old path → new path
    pub moves: BTreeMap<String, String>,
    pub deleted: Vec<String>,
    pub failed: Vec<SyncFailure>,
    /// Files not reached before cancellation.
    pub pending: Vec<String>,
    /// path → sha256 hex for files touched this pass
    pub checksums: BTreeMap<String, String>,
}

impl SyncReport {
    pub fn total_changes(&self) -> usize {
        self.new.len() + self.modified.len() + self.moves.len() + self.deleted.len()
    }

    pub fn is_clean(&self) -> bool {
        self.total_changes() == 0 && self.failed.is_empty() && self.pending.is_empty()
    }
}

/// Classification produced by the checksum diff.
#[derive(Debug, Clone, Default, PartialEq)]
struct SyncDiff {
    new: Vec<String>,
    modified: Vec<String>,
    /// (old path, new path, entity id)
    moves: Vec<(String, String, EntityId)>,
    /// (path, permalink)
    deleted: Vec<(String, String)>,
}

/// Compare the scanned tree against the store's file states.
fn compute_diff(scanned: &BTreeMap<String, String>, stored: &[FileState]) -> SyncDiff {
    let stored_by_path: BTreeMap<&str, &FileState> =
        stored.iter().map(|s| (s.file_path.as_str(), s)).collect();

    let mut diff = SyncDiff::default();
    let mut new_candidates: Vec<&str> = Vec::new();
    for (path, checksum) in scanned {
        match stored_by_path.get(path.as_str()) {
            None => new_candidates.push(path),
            Some(state) => {
                if state.checksum.as_deref() != Some(checksum.as_str()) {
                    diff.modified.push(path.clone());
                }
            }
        }
    }

    let mut deleted_candidates: Vec<&FileState> = stored
        .iter()
        .filter(|s| !scanned.contains_key(&s.file_path))
        .collect();
    // Stable order on both sides makes the greedy pairing deterministic.
    deleted_candidates.sort_by(|a, b| a.file_path.cmp(&b.file_path));

    let mut paired_new: Vec<bool> = vec![false; new_candidates.len()];
    for state in &deleted_candidates {
        let Some(old_checksum) = state.checksum.as_deref() else {
            diff.deleted.push((state.file_path.clone(), state.permalink.clone()));
            continue;
        };
        let matched = new_candidates.iter().enumerate().find(|(idx, path)| {
            !paired_new[*idx] && scanned.get(**path).map(String::as_str) == Some(old_checksum)
        });
        match matched {
            Some((idx, path)) => {
                paired_new[idx] = true;
                diff.moves
                    .push((state.file_path.clone(), path.to_string(), state.id));
            }
            None => diff
                .deleted
                .push((state.file_path.clone(), state.permalink.clone())),
        }
    }

    for (idx, path) in new_candidates.iter().enumerate() {
        if !paired_new[idx] {
            diff.new.push(path.to_string());
        }
    }

    diff
}

/// Detects and applies filesystem changes. The single writer to the store
/// and index; passes serialize on an internal repository-level mutex while
/// reads elsewhere proceed freely.
#[derive(Debug, Clone)]
pub struct SyncService {
    config: ProjectConfig,
    store: GraphStore,
    search: SearchIndex,
    resolver: LinkResolver,
    parser: EntityParser,
    scanner: FileScanner,
    write_lock: Arc<Mutex<()>>,
}

impl SyncService {
    pub fn new(config: ProjectConfig, pool: Pool<Sqlite>) -> Self {
        let store = GraphStore::new(pool.clone());
        let search = SearchIndex::new(pool);
        let resolver = LinkResolver::new(store.clone(), search.clone());
        let parser = EntityParser::new(&config.home);
        let scanner = FileScanner::new(&config.home);
        SyncService {
            config,
            store,
            search,
            resolver,
            parser,
            scanner,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    pub fn search(&self) -> &SearchIndex {
        &self.search
    }

    /// Scan and diff without applying anything. The read-only half of the
    /// `status` command.
    pub async fn status(&self) -> Result<SyncReport, MnemeError> {
        let scanned = self.scanner.scan()?;
        let stored = self.store.file_states().await?;
        let diff = compute_diff(&scanned, &stored);

        let mut report = SyncReport::default();
        for (old, new, _) in &diff.moves {
            report.moves.insert(old.clone(), new.clone());
        }
        report.deleted = diff.deleted.iter().map(|(p, _)| p.clone()).collect();
        report.new = diff.new.clone();
        report.modified = diff.modified.clone();
        for path in report.new.iter().chain(report.modified.iter()) {
            if let Some(checksum) = scanned.get(path) {
                report.checksums.insert(path.clone(), checksum.clone());
            }
        }
        Ok(report)
    }

    /// Run a full sync pass.
    pub async fn sync(&self) -> Result<SyncReport, MnemeError> {
        self.sync_cancellable(None).await
    }

    /// Run a full sync pass with a cooperative cancellation flag. When the
    /// flag flips, the current per-file transaction completes, the rest of
    /// the work is reported as `pending`, and the pass returns.
    pub async fn sync_cancellable(
        &self,
        cancel: Option<Arc<AtomicBool>>,
    ) -> Result<SyncReport, MnemeError> {
        let _guard = self.write_lock.lock().await;

        let scanned = self.scanner.scan()?;
        let stored = self.store.file_states().await?;
        let diff = compute_diff(&scanned, &stored);
        tracing::info!(
            "[SyncService] diff: {} new, {} modified, {} moved, {} deleted",
            diff.new.len(),
            diff.modified.len(),
            diff.moves.len(),
            diff.deleted.len()
        );

        let mut report = SyncReport::default();
        let cancelled = || {
            cancel
                .as_ref()
                .map(|flag| flag.load(Ordering::Relaxed))
                .unwrap_or(false)
        };

        // Phase 1a: moves relocate in place, before new/modified so a moved
        // file is not misclassified against its old row.
        let mut move_queue: Vec<&(String, String, EntityId)> = diff.moves.iter().collect();
        move_queue.sort_by(|a, b| a.0.cmp(&b.0));
        let mut halted = false;
        for (old_path, new_path, entity_id) in move_queue {
            if cancelled() {
                report.pending.push(new_path.clone());
                halted = true;
                continue;
            }
            match self.apply_move(*entity_id, old_path, new_path).await {
                Ok(()) => {
                    report.moves.insert(old_path.clone(), new_path.clone());
                    if let Some(checksum) = scanned.get(new_path) {
                        report.checksums.insert(new_path.clone(), checksum.clone());
                    }
                }
                Err(e) => {
                    tracing::warn!("[SyncService] move failed for {:?}: {}", new_path, e);
                    report.failed.push(SyncFailure {
                        path: new_path.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        // Phase 1b: deletions precede insertions so a delete(A) + new(B)
        // sharing a permalink never collides.
        for (path, permalink) in &diff.deleted {
            if cancelled() {
                report.pending.push(path.clone());
                halted = true;
                continue;
            }
            match self.apply_delete(permalink).await {
                Ok(()) => report.deleted.push(path.clone()),
                Err(e) => {
                    tracing::warn!("[SyncService] delete failed for {:?}: {}", path, e);
                    report.failed.push(SyncFailure {
                        path: path.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        // Phase 1c: new and modified files, lexicographic.
        let mut upsert_queue: Vec<(&String, bool)> = diff
            .new
            .iter()
            .map(|p| (p, true))
            .chain(diff.modified.iter().map(|p| (p, false)))
            .collect();
        upsert_queue.sort_by(|a, b| a.0.cmp(b.0));
        for (path, is_new) in upsert_queue {
            if cancelled() {
                report.pending.push(path.clone());
                halted = true;
                continue;
            }
            let checksum = scanned
                .get(path)
                .cloned()
                .unwrap_or_default();
            match self.sync_file(path, &checksum).await {
                Ok(()) => {
                    if is_new {
                        report.new.push(path.clone());
                    } else {
                        report.modified.push(path.clone());
                    }
                    report.checksums.insert(path.clone(), checksum);
                }
                Err(e) => {
                    tracing::warn!("[SyncService] sync failed for {:?}: {}", path, e);
                    report.failed.push(SyncFailure {
                        path: path.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        // Phase 2: relation backfill.
        if !halted {
            match self.backfill_relations().await {
                Ok(resolved) if resolved > 0 => {
                    tracing::info!("[SyncService] backfill resolved {} relations", resolved);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("[SyncService] backfill pass failed: {}", e);
                }
            }
        }

        Ok(report)
    }

    /// Sync exactly one repo-relative path: present on disk → upsert flow,
    /// absent → delete flow. Used by the knowledge CRUD service after it
    /// writes or removes a file.
    pub async fn sync_path(&self, file_path: &str) -> Result<SyncReport, MnemeError> {
        let _guard = self.write_lock.lock().await;

        let mut report = SyncReport::default();
        let absolute = self.config.absolute(file_path);
        if absolute.exists() {
            let checksum = scanner::checksum_file(&absolute)?;
            let existed = self.store.entity_by_file_path(file_path).await?.is_some();
            self.sync_file(file_path, &checksum).await?;
            if existed {
                report.modified.push(file_path.to_string());
            } else {
                report.new.push(file_path.to_string());
            }
            report.checksums.insert(file_path.to_string(), checksum);
            let _ = self.backfill_relations().await?;
        } else if let Some(entity) = self.store.entity_by_file_path(file_path).await? {
            self.apply_delete(&entity.permalink).await?;
            report.deleted.push(file_path.to_string());
        }
        Ok(report)
    }

    /// Rebuild the whole search index from the store. Recovery path for a
    /// corrupt or out-of-date index.
    pub async fn full_reindex(&self) -> Result<(), MnemeError> {
        let _guard = self.write_lock.lock().await;
        self.search.clear().await?;
        for entity in self.store.all_entities().await? {
            self.index_entity_from_store(&entity).await?;
        }
        Ok(())
    }

    async fn apply_move(
        &self,
        entity_id: EntityId,
        old_path: &str,
        new_path: &str,
    ) -> Result<(), MnemeError> {
        let Some(entity) = self.store.entity_by_id(entity_id).await? else {
            return Err(MnemeError::NotFound(format!(
                "moved entity {entity_id} vanished from the store"
            )));
        };
        // Explicit frontmatter permalinks survive a move; derived ones track
        // the new path.
        let new_permalink = if entity.permalink == generate_permalink(old_path) {
            generate_permalink(new_path)
        } else {
            entity.permalink.clone()
        };
        tracing::debug!(
            "[SyncService] move {:?} -> {:?} (permalink {:?} -> {:?})",
            old_path,
            new_path,
            entity.permalink,
            new_permalink
        );
        let moved = self
            .store
            .relocate_entity(entity_id, new_path, &new_permalink)
            .await?;
        self.index_entity_from_store(&moved).await?;
        Ok(())
    }

    async fn apply_delete(&self, permalink: &str) -> Result<(), MnemeError> {
        if let Some(entity) = self.store.delete_entity(permalink).await? {
            self.search.delete_by_entity(entity.id).await?;
        }
        Ok(())
    }

    /// Per-file upsert flow for a new or modified path.
    async fn sync_file(&self, file_path: &str, checksum: &str) -> Result<(), MnemeError> {
        if is_markdown(file_path) {
            self.sync_markdown_file(file_path, checksum).await
        } else {
            self.sync_opaque_file(file_path, checksum).await
        }
    }

    async fn sync_markdown_file(&self, file_path: &str, checksum: &str) -> Result<(), MnemeError> {
        let md = self.parser.parse_file(file_path).await?;
        for issue in &md.issues {
            tracing::warn!(
                "[SyncService] parse issue in {:?} line {}: {}",
                file_path,
                issue.line,
                issue.message
            );
        }

        let permalink = md
            .frontmatter
            .permalink
            .clone()
            .unwrap_or_else(|| generate_permalink(file_path));
        self.guard_permalink(file_path, &permalink).await?;

        let now = Utc::now();
        let mut metadata = md.frontmatter.metadata.clone();
        if !md.frontmatter.tags.is_empty() {
            metadata.insert("tags".to_string(), md.frontmatter.tags.join(", "));
        }
        let entity = self
            .store
            .upsert_entity(EntityUpsert {
                permalink,
                file_path: file_path.to_string(),
                title: md
                    .frontmatter
                    .title
                    .clone()
                    .unwrap_or_else(|| file_path.to_string()),
                entity_type: md
                    .frontmatter
                    .entity_type
                    .clone()
                    .unwrap_or_else(|| "note".to_string()),
                content_type: "text/markdown".to_string(),
                checksum: None,
                metadata,
                created_at: md.frontmatter.created.unwrap_or(now),
                updated_at: md.frontmatter.modified.unwrap_or(now),
            })
            .await?;

        let observations = self
            .store
            .replace_observations(entity.id, &md.observations)
            .await?;
        let relation_upserts = self.resolve_relations(&md).await?;
        let relations = self
            .store
            .replace_outgoing_relations(entity.id, &relation_upserts)
            .await?;

        self.search.delete_owned_rows(entity.id).await?;
        self.search.index_entity(&entity, Some(&md.body)).await?;
        for obs in &observations {
            self.search.index_observation(obs, &entity).await?;
        }
        for rel in &relations {
            if let Some(to_id) = rel.to_id {
                if let Some(to) = self.store.entity_by_id(to_id).await? {
                    self.search.index_relation(rel, &entity, &to).await?;
                }
            }
        }

        self.store.set_checksum(entity.id, checksum).await?;
        Ok(())
    }

    /// Non-markdown files are tracked by checksum only: an entity row with
    /// no observations or relations.
    async fn sync_opaque_file(&self, file_path: &str, checksum: &str) -> Result<(), MnemeError> {
        let permalink = generate_permalink(file_path);
        self.guard_permalink(file_path, &permalink).await?;
        let title = Path::new(file_path)
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| file_path.to_string());
        let now = Utc::now();
        let entity = self
            .store
            .upsert_entity(EntityUpsert {
                permalink,
                file_path: file_path.to_string(),
                title,
                entity_type: "file".to_string(),
                content_type: content_type_for_path(file_path).to_string(),
                checksum: None,
                metadata: BTreeMap::new(),
                created_at: now,
                updated_at: now,
            })
            .await?;
        self.search.delete_owned_rows(entity.id).await?;
        self.search.index_entity(&entity, None).await?;
        self.store.set_checksum(entity.id, checksum).await?;
        Ok(())
    }

    /// Two files claiming one permalink is a conflict for the later one; a
    /// permalink edit on an existing file is a relocation, not a conflict.
    async fn guard_permalink(&self, file_path: &str, permalink: &str) -> Result<(), MnemeError> {
        if let Some(holder) = self.store.entity_by_permalink(permalink).await? {
            if holder.file_path != file_path {
                return Err(MnemeError::Conflict(format!(
                    "permalink '{permalink}' already belongs to '{}'",
                    holder.file_path
                )));
            }
        }
        if let Some(existing) = self.store.entity_by_file_path(file_path).await? {
            if existing.permalink != permalink {
                self.store
                    .relocate_entity(existing.id, file_path, permalink)
                    .await?;
            }
        }
        Ok(())
    }

    async fn resolve_relations(
        &self,
        md: &EntityMarkdown,
    ) -> Result<Vec<RelationUpsert>, MnemeError> {
        let mut upserts = Vec::with_capacity(md.relations.len());
        for rel in &md.relations {
            // Best effort; phase 2 retries whatever stays unresolved.
            let to_id = match self.resolver.resolve(&rel.target).await {
                Ok(found) => found.map(|e| e.id),
                Err(e) => {
                    tracing::debug!(
                        "[SyncService] eager resolution of '{}' failed: {}",
                        rel.target,
                        e
                    );
                    None
                }
            };
            upserts.push(RelationUpsert {
                to_id,
                to_name: rel.target.clone(),
                relation_type: rel.relation_type.clone(),
                context: rel.context.clone(),
            });
        }
        Ok(upserts)
    }

    /// Phase 2: retry the resolver for every relation with `to_id = NULL`
    /// and index each newly resolved edge.
    pub async fn backfill_relations(&self) -> Result<usize, MnemeError> {
        let mut resolved_count = 0;
        for rel in self.store.find_unresolved_relations().await? {
            let Some(to) = self.resolver.resolve(&rel.to_name).await? else {
                continue;
            };
            self.store.resolve_relation(rel.id, to.id).await?;
            if let Some(from) = self.store.entity_by_id(rel.from_id).await? {
                let mut resolved = rel.clone();
                resolved.to_id = Some(to.id);
                self.search.index_relation(&resolved, &from, &to).await?;
            }
            resolved_count += 1;
        }
        Ok(resolved_count)
    }

    /// Re-index an entity and everything incident to it from store state
    /// alone. Body text is re-read from disk for markdown files so the
    /// entity row stays full-text searchable.
    async fn index_entity_from_store(&self, entity: &Entity) -> Result<(), MnemeError> {
        self.search.delete_owned_rows(entity.id).await?;

        let body = if is_markdown(&entity.file_path) {
            match tokio::fs::read_to_string(self.config.absolute(&entity.file_path)).await {
                Ok(content) => split_frontmatter(&content)
                    .map(|(_, body)| body.to_string())
                    .ok(),
                Err(_) => None,
            }
        } else {
            None
        };
        self.search.index_entity(entity, body.as_deref()).await?;

        for obs in self.store.observations_for(entity.id).await? {
            self.search.index_observation(&obs, entity).await?;
        }
        for rel in self.store.outgoing_relations(entity.id).await? {
            if let Some(to_id) = rel.to_id {
                if let Some(to) = self.store.entity_by_id(to_id).await? {
                    self.search.index_relation(&rel, entity, &to).await?;
                }
            }
        }
        // Incoming edges embed this entity's permalink in their index rows.
        for rel in self.store.incoming_relations(entity.id).await? {
            if let Some(from) = self.store.entity_by_id(rel.from_id).await? {
                self.search.index_relation(&rel, &from, entity).await?;
            }
        }
        Ok(())
    }
}
