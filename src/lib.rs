//! # mneme-core
//!
//! A Rust library for mirroring a tree of plain markdown files into a
//! queryable knowledge graph with full-text search and context expansion.
//!
//! The name "mneme" comes from the Greek muse of memory.
//!
//! ## Overview
//!
//! Users edit ordinary markdown files with a lightweight inline syntax for
//! *observations* (categorized, tagged facts) and *relations* (typed links
//! to other files via `[[wiki targets]]`). mneme-core keeps an SQLite index
//! of entities, observations and relations in sync with the tree. The
//! filesystem is the source of truth; the index is always reconstructible.
//!
//! ```markdown
//! ---
//! title: Auth Service
//! type: design
//! tags: [security, rfc]
//! ---
//!
//! Free-form prose.
//!
//! - [design] Tokens are opaque 256-bit. #crypto (see RFC-123)
//! - implements [[OAuth2 Spec]] (Section 4.1)
//! - depends_on [[Token Store]]
//! ```
//!
//! ### Key Features
//!
//! - **Checksum-diff sync**: creations, edits, deletions and moves are
//!   detected by content hash and applied in deterministic path order
//! - **Forward references**: a link to a file that does not exist yet is
//!   stored unresolved and backfilled once the target appears
//! - **Lexical search**: one FTS5 index over entities, observations and
//!   relations, with permalink globs and recency filters
//! - **Context expansion**: `memory://` URIs expand into bounded subgraphs
//!   via breadth-first traversal with depth and timeframe limits
//! - **Error tolerance**: malformed lines and broken files are reported in
//!   the [`sync::SyncReport`], never abort a pass
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mneme_core::{config::ProjectConfig, store::db_init, sync::SyncService};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), mneme_core::MnemeError> {
//!     let config = ProjectConfig::load("./notes")?;
//!     let pool = db_init(&config.database_path()).await?;
//!     let sync = SyncService::new(config, pool);
//!
//!     let report = sync.sync().await?;
//!     println!(
//!         "{} new, {} modified, {} moved, {} deleted",
//!         report.new.len(),
//!         report.modified.len(),
//!         report.moves.len(),
//!         report.deleted.len()
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`markdown`]: frontmatter + inline construct parsing, and the inverse
//!   renderer upholding `parse(render(entity)) == entity`
//! - [`store`]: transactional SQLite persistence with enforced foreign keys
//! - [`search`]: the FTS5 index and ranked query surface
//! - [`resolver`]: free-text link target → entity resolution
//! - [`sync`]: the scan / diff / two-phase apply engine, plus the file
//!   watcher behind the `service` feature
//! - [`context`]: `memory://` URIs and recursive graph traversal
//! - [`knowledge`]: file-first programmatic CRUD
//! - [`api`]: the HTTP facade (`service` feature)
//!
//! ## Concurrency Contract
//!
//! Single writer, many readers. Sync passes (and CRUD writes, which funnel
//! through partial syncs) serialize on a repository-level mutex; searches
//! and context queries run freely against the pool and only ever observe
//! fully-applied per-file states. During the relation backfill phase a
//! reader may see some relations still unresolved; that is the documented
//! intermediate state, not a torn write.
//!
//! ## Features
//!
//! - **default**: parser, store, search, sync, context
//! - **service**: file watching (`notify`), HTTP facade (`axum`)
//! - **bin**: the `mneme` CLI

pub mod config;
pub mod context;
pub mod error;
pub mod knowledge;
pub mod markdown;
pub mod models;
pub mod resolver;
pub mod search;
pub mod store;
pub mod sync;
pub mod timeframe;

#[cfg(feature = "service")]
pub mod api;

pub use error::*;
