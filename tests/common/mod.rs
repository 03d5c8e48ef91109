//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```

use mneme_core::{config::ProjectConfig, store::db_init, sync::SyncService};
use std::path::Path;
use tempfile::TempDir;

/// Initialize tracing for tests, respecting RUST_LOG env var.
///
/// Safe to call multiple times — subsequent calls are no-ops.
#[allow(dead_code)]
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// Create a repository in a TempDir with a real on-disk database and a
/// ready sync service.
#[allow(dead_code)]
pub async fn test_repo() -> (TempDir, SyncService) {
    let tmp = TempDir::new().unwrap();
    let config = ProjectConfig::new(tmp.path());
    let pool = db_init(&config.database_path()).await.unwrap();
    let sync = SyncService::new(config, pool);
    (tmp, sync)
}

/// Write a repo-relative file, creating parent directories.
#[allow(dead_code)]
pub fn write_file(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}
