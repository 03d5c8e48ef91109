use crate::error::MnemeError;
use serde::{Deserialize, Serialize};
use std::{
    fs::{create_dir_all, read_to_string, write},
    path::{Path, PathBuf},
};

/// Name of the internal data directory inside a repository root. Everything
/// under it (and any other dot-entry) is invisible to the scanner.
pub const DATA_DIR_NAME: &str = ".mneme";

/// Name of the index database inside the data directory.
pub const DATABASE_NAME: &str = "memory.db";

const CONFIG_FILE_NAME: &str = "config.toml";

/// Configuration for a single knowledge repository.
///
/// There is deliberately no process-wide configuration: a `ProjectConfig` is
/// constructed once and handed by value into every service constructor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Repository root: the user-owned markdown tree.
    pub home: PathBuf,
    /// Project name, used only for display.
    #[serde(default = "default_project_name")]
    pub project: String,
}

fn default_project_name() -> String {
    "default".to_string()
}

impl ProjectConfig {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        ProjectConfig {
            home: home.into(),
            project: default_project_name(),
        }
    }

    /// Load the config stored under `<home>/.mneme/config.toml`, falling back
    /// to defaults when the file does not exist.
    pub fn load(home: impl Into<PathBuf>) -> Result<Self, MnemeError> {
        let home = home.into();
        let path = home.join(DATA_DIR_NAME).join(CONFIG_FILE_NAME);
        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(ProjectConfig::new(home));
        }
        let content = read_to_string(&path)?;
        let mut config: ProjectConfig = toml::from_str(&content)?;
        // The on-disk home is advisory; the directory we were pointed at wins.
        config.home = home;
        Ok(config)
    }

    /// Persist to `<home>/.mneme/config.toml`, creating the data directory.
    pub fn save(&self) -> Result<(), MnemeError> {
        let dir = self.data_dir();
        create_dir_all(&dir)?;
        let toml_string = toml::to_string(self)?;
        write(dir.join(CONFIG_FILE_NAME), toml_string)?;
        Ok(())
    }

    pub fn data_dir(&self) -> PathBuf {
        self.home.join(DATA_DIR_NAME)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir().join(DATABASE_NAME)
    }

    /// Absolute path for a repo-relative file path.
    pub fn absolute(&self, file_path: impl AsRef<Path>) -> PathBuf {
        self.home.join(file_path.as_ref())
    }
}
