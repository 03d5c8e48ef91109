//! Markdown parsing and rendering for knowledge files.
//!
//! A knowledge file is ordinary markdown with an optional YAML frontmatter
//! block and two inline list-item constructs:
//!
//! ```markdown
//! - [design] Tokens are opaque 256-bit. #crypto (see RFC-123)
//! - implements [[OAuth2 Spec]] (Section 4.1)
//! ```
//!
//! The first is an *observation* (categorized, tagged fact), the second a
//! *relation* (typed edge to another entity named by its link text). Parsing
//! is line-scoped: a malformed construct poisons only its own line, and
//! everything else in the file is still extracted.
//!
//! [`render::render_entity`] is the inverse direction and upholds the
//! round-trip law `parse(render(entity)) == entity` modulo prose reflow.

pub mod frontmatter;
pub mod parser;
pub mod render;

pub use frontmatter::Frontmatter;
pub use parser::{parse_content, EntityParser, ParsedContent};
pub use render::render_entity;

use crate::models::ObservationCategory;
use serde::{Deserialize, Serialize};

/// An observation as written in a source file, before it is attached to a
/// stored entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedObservation {
    pub category: ObservationCategory,
    pub content: String,
    pub tags: Vec<String>,
    pub context: Option<String>,
}

/// A relation as written in a source file. `target` is the verbatim text
/// inside the `[[...]]` brackets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedRelation {
    pub relation_type: String,
    pub target: String,
    pub context: Option<String>,
}

/// A line-scoped parse problem. Collected, never raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseIssue {
    pub line: usize,
    pub message: String,
}

/// The full parse of one markdown file.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityMarkdown {
    pub frontmatter: Frontmatter,
    /// Body content with the frontmatter block removed.
    pub body: String,
    pub observations: Vec<ParsedObservation>,
    pub relations: Vec<ParsedRelation>,
    pub issues: Vec<ParseIssue>,
}
