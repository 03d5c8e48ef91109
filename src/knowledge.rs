//! Programmatic CRUD over knowledge entities.
//!
//! The filesystem is the source of truth: create writes the markdown file
//! first and then runs a partial sync of that one path, so the store and
//! index are updated through exactly the same flow a user edit would take.
//! Deletes remove the file and let the same partial sync purge the graph.

use crate::{
    config::ProjectConfig,
    error::MnemeError,
    markdown::{parse_content, render_entity},
    models::{normalize_segment, Entity, Observation, Relation},
    store::GraphStore,
    sync::SyncService,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEntityRequest {
    pub title: String,
    #[serde(default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    /// Repo-relative directory for the new file; root when absent.
    #[serde(default)]
    pub directory: Option<String>,
}

/// An entity with its owned observations and both relation directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityWithChildren {
    pub entity: Entity,
    pub observations: Vec<Observation>,
    pub relations: Vec<Relation>,
    pub incoming_relations: Vec<Relation>,
}

#[derive(Debug, Clone)]
pub struct KnowledgeService {
    config: ProjectConfig,
    store: GraphStore,
    sync: Arc<SyncService>,
}

impl KnowledgeService {
    pub fn new(sync: Arc<SyncService>) -> Self {
        KnowledgeService {
            config: sync.config().clone(),
            store: sync.store().clone(),
            sync,
        }
    }

    pub async fn get_entity(&self, permalink: &str) -> Result<EntityWithChildren, MnemeError> {
        let entity = self
            .store
            .entity_by_permalink(permalink)
            .await?
            .ok_or_else(|| MnemeError::NotFound(format!("no entity '{permalink}'")))?;
        self.with_children(entity).await
    }

    /// Create a new entity: write the file, then sync that path.
    pub async fn create_entity(
        &self,
        request: CreateEntityRequest,
    ) -> Result<EntityWithChildren, MnemeError> {
        let title = request.title.trim();
        if title.is_empty() {
            return Err(MnemeError::Validation("entity title is empty".to_string()));
        }
        let stem = normalize_segment(title);
        if stem.is_empty() {
            return Err(MnemeError::Validation(format!(
                "title '{title}' yields an empty file name"
            )));
        }
        let file_path = match request.directory.as_deref().map(str::trim) {
            Some(dir) if !dir.is_empty() => {
                if dir.starts_with('.') || dir.contains("..") {
                    return Err(MnemeError::Validation(format!(
                        "invalid target directory '{dir}'"
                    )));
                }
                format!("{}/{stem}.md", dir.trim_matches('/'))
            }
            _ => format!("{stem}.md"),
        };

        let absolute = self.config.absolute(&file_path);
        if absolute.exists() {
            return Err(MnemeError::Conflict(format!(
                "file '{file_path}' already exists"
            )));
        }

        let now = Utc::now();
        let provisional = Entity {
            id: 0,
            permalink: crate::models::generate_permalink(&file_path),
            file_path: file_path.clone(),
            title: title.to_string(),
            entity_type: request.entity_type.unwrap_or_else(|| "note".to_string()),
            content_type: "text/markdown".to_string(),
            checksum: None,
            metadata: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        };
        // The caller's content is authoritative for a brand-new entity: its
        // inline constructs become the store set, so the renderer keeps them.
        let parsed = parse_content(request.content.as_deref().unwrap_or(""));
        let rendered = render_entity(
            &provisional,
            &parsed.observations,
            &parsed.relations,
            request.content.as_deref(),
        );

        if let Some(parent) = absolute.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&absolute, rendered).await?;
        tracing::info!("[KnowledgeService] created {:?}", file_path);

        self.sync.sync_path(&file_path).await?;
        let entity = self
            .store
            .entity_by_file_path(&file_path)
            .await?
            .ok_or_else(|| {
                MnemeError::Store(format!("created file '{file_path}' did not sync"))
            })?;
        self.with_children(entity).await
    }

    /// Delete an entity's file, then sync that path so the graph and index
    /// drop it through the normal delete flow.
    pub async fn delete_entity(&self, permalink: &str) -> Result<(), MnemeError> {
        let entity = self
            .store
            .entity_by_permalink(permalink)
            .await?
            .ok_or_else(|| MnemeError::NotFound(format!("no entity '{permalink}'")))?;
        let absolute = self.config.absolute(&entity.file_path);
        if absolute.exists() {
            tokio::fs::remove_file(&absolute).await?;
        }
        tracing::info!("[KnowledgeService] deleted {:?}", entity.file_path);
        self.sync.sync_path(&entity.file_path).await?;
        Ok(())
    }

    async fn with_children(&self, entity: Entity) -> Result<EntityWithChildren, MnemeError> {
        let observations = self.store.observations_for(entity.id).await?;
        let relations = self.store.outgoing_relations(entity.id).await?;
        let incoming_relations = self.store.incoming_relations(entity.id).await?;
        Ok(EntityWithChildren {
            entity,
            observations,
            relations,
            incoming_relations,
        })
    }
}
