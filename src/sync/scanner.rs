use crate::{config::DATA_DIR_NAME, error::MnemeError};
use sha2::{Digest, Sha256};
use std::{
    collections::BTreeMap,
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};
use walkdir::{DirEntry, WalkDir};

/// Walks a repository root and checksums every visible file.
#[derive(Debug, Clone)]
pub struct FileScanner {
    root: PathBuf,
}

fn is_ignored(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('.') || name == DATA_DIR_NAME)
        .unwrap_or(true)
}

impl FileScanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileScanner { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Scan the tree, returning `repo-relative path → sha256 hex` in
    /// lexicographic path order. Dot-entries (including the data directory)
    /// are skipped whole.
    pub fn scan(&self) -> Result<BTreeMap<String, String>, MnemeError> {
        let mut out = BTreeMap::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_ignored(e));
        for entry in walker {
            let entry = entry.map_err(|e| MnemeError::Io(format!("scan failed: {e}")))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry.path().strip_prefix(&self.root)?;
            let rel_str = rel.to_string_lossy().replace('\\', "/");
            let checksum = checksum_file(entry.path())?;
            out.insert(rel_str, checksum);
        }
        tracing::debug!("[FileScanner] scanned {} files under {:?}", out.len(), self.root);
        Ok(out)
    }
}

/// Streaming SHA-256 of a file's bytes, hex encoded.
pub fn checksum_file(path: &Path) -> Result<String, MnemeError> {
    let mut file = File::open(path)
        .map_err(|e| MnemeError::Io(format!("cannot open {:?} for hashing: {e}", path)))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| MnemeError::Io(format!("read failed while hashing {:?}: {e}", path)))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// SHA-256 of in-memory content, for callers that already hold the bytes.
pub fn checksum_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
