//! Row types for the knowledge graph: entities, observations, relations.
//!
//! One entity per file. Observations and relations are owned by the entity
//! parsed from their source file and are replaced wholesale whenever that
//! file is re-synced. Rows are keyed by SQLite integer ids; the graph is
//! never materialized as cyclic in-memory references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

pub type EntityId = i64;

/// A node in the knowledge graph, one per file on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Entity {
    pub id: EntityId,
    /// Stable, human-readable identifier derived from the file path,
    /// e.g. `design/auth-service`.
    pub permalink: String,
    /// Repo-relative path with `/` separators.
    pub file_path: String,
    pub title: String,
    pub entity_type: String,
    pub content_type: String,
    /// SHA-256 of the on-disk bytes. NULL only while the entity is in the
    /// pending-resolve state during a sync pass.
    pub checksum: Option<String>,
    #[sqlx(json)]
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An atomic fact attached to an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Observation {
    pub id: i64,
    pub entity_id: EntityId,
    pub category: ObservationCategory,
    pub content: String,
    #[sqlx(json)]
    pub tags: Vec<String>,
    pub context: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A directed, typed edge between entities. `to_id` stays NULL while the
/// target named by `to_name` has not been resolved to a concrete entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Relation {
    pub id: i64,
    pub from_id: EntityId,
    pub to_id: Option<EntityId>,
    /// Verbatim link text as written in the source file, retained so the
    /// edge can be re-resolved after the target appears or disappears.
    pub to_name: String,
    pub relation_type: String,
    pub context: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ObservationCategory {
    #[default]
    Note,
    Tech,
    Design,
    Issue,
    Todo,
    Question,
}

impl ObservationCategory {
    /// Category markers outside the enum silently map to `Note`.
    pub fn from_marker(s: &str) -> ObservationCategory {
        match s.trim().to_lowercase().as_str() {
            "note" => ObservationCategory::Note,
            "tech" => ObservationCategory::Tech,
            "design" => ObservationCategory::Design,
            "issue" => ObservationCategory::Issue,
            "todo" => ObservationCategory::Todo,
            "question" => ObservationCategory::Question,
            _ => ObservationCategory::Note,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ObservationCategory::Note => "note",
            ObservationCategory::Tech => "tech",
            ObservationCategory::Design => "design",
            ObservationCategory::Issue => "issue",
            ObservationCategory::Todo => "todo",
            ObservationCategory::Question => "question",
        }
    }
}

impl fmt::Display for ObservationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalize one path segment for permalink use: lowercase, non-alphanumeric
/// runs become `-`, leading/trailing `-` trimmed.
pub fn normalize_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    let mut dash_pending = false;
    for c in segment.chars() {
        if c.is_alphanumeric() {
            if dash_pending && !out.is_empty() {
                out.push('-');
            }
            dash_pending = false;
            for lower in c.to_lowercase() {
                out.push(lower);
            }
        } else {
            dash_pending = true;
        }
    }
    out
}

/// Derive a permalink from a repo-relative file path.
///
/// `design/Auth Service.md` → `design/auth-service`. The `.md` suffix is
/// stripped; other extensions are kept as part of the final segment so
/// non-markdown files stay addressable.
pub fn generate_permalink(file_path: &str) -> String {
    let path = Path::new(file_path);
    let stripped = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("md") => path.with_extension(""),
        _ => path.to_path_buf(),
    };
    stripped
        .components()
        .map(|c| normalize_segment(&c.as_os_str().to_string_lossy()))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Apply the permalink derivation to a free-text link target, preserving `/`
/// separators. Used by the link resolver's normalized-match step.
pub fn normalize_link_target(target: &str) -> String {
    target
        .split('/')
        .map(normalize_segment)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Content type recorded for a file tracked as an opaque entity.
pub fn content_type_for_path(file_path: &str) -> &'static str {
    match Path::new(file_path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("md") | Some("markdown") => "text/markdown",
        Some("txt") => "text/plain",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("svg") => "image/svg+xml",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// True when the scanner should hand this path to the markdown parser.
pub fn is_markdown(file_path: &str) -> bool {
    Path::new(file_path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("md"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_permalink_basic() {
        assert_eq!(generate_permalink("design/auth-service.md"), "design/auth-service");
        assert_eq!(generate_permalink("design/Auth Service.md"), "design/auth-service");
        assert_eq!(generate_permalink("Notes/My  Note!!.md"), "notes/my-note");
    }

    #[test]
    fn test_generate_permalink_keeps_non_md_extension() {
        assert_eq!(generate_permalink("assets/diagram.png"), "assets/diagram-png");
    }

    #[test]
    fn test_normalize_segment_collapses_runs() {
        assert_eq!(normalize_segment("A--B__C"), "a-b-c");
        assert_eq!(normalize_segment("--x--"), "x");
    }

    #[test]
    fn test_normalize_link_target_preserves_slashes() {
        assert_eq!(normalize_link_target("Design/Auth Service"), "design/auth-service");
    }

    #[test]
    fn test_category_from_marker_unknown_is_note() {
        assert_eq!(ObservationCategory::from_marker("tech"), ObservationCategory::Tech);
        assert_eq!(ObservationCategory::from_marker("TODO"), ObservationCategory::Todo);
        assert_eq!(ObservationCategory::from_marker("whatever"), ObservationCategory::Note);
    }
}
