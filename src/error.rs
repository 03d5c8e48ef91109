use std::{fmt, io, path::StripPrefixError};

use http::status::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(feature = "service")]
use notify::{Error as NotifyError, ErrorKind as NotifyErrorKind};

use serde_json::Error as JsonError;
use serde_yaml::Error as YamlError;
use sqlx::Error as SqlxError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum MnemeError {
    /// Malformed frontmatter or inline construct. Scoped to a file (and line
    /// where known); the sync engine records these per-file rather than
    /// aborting a pass.
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Item Not Found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("File System error: {0}")]
    Io(String),
    #[error("Store error: {0}")]
    Store(String),
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
    #[error("Operation cancelled")]
    Cancelled,
    #[error("You do not have permission to access this resource")]
    PermissionDenied,
}

impl MnemeError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            MnemeError::Parse(_) => StatusCode::UNPROCESSABLE_ENTITY,
            MnemeError::Validation(_) => StatusCode::BAD_REQUEST,
            MnemeError::NotFound(_) => StatusCode::NOT_FOUND,
            MnemeError::Conflict(_) => StatusCode::CONFLICT,
            MnemeError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            MnemeError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            MnemeError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            MnemeError::Cancelled => StatusCode::NO_CONTENT,
            MnemeError::PermissionDenied => StatusCode::FORBIDDEN,
        }
    }

    /// Process exit code for the CLI driver. 1 is a user error, 3 is an
    /// unrecoverable store failure. 2 (sync completed with per-file failures)
    /// is decided by the caller from the SyncReport, not from an error value.
    pub fn exit_code(&self) -> i32 {
        match self {
            MnemeError::Store(_) => 3,
            _ => 1,
        }
    }
}

impl From<io::Error> for MnemeError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => MnemeError::NotFound(format!("{x}")),
            io::ErrorKind::PermissionDenied => MnemeError::PermissionDenied,
            _ => MnemeError::Io(format!("IOError: {}", x.kind())),
        }
    }
}

impl From<StripPrefixError> for MnemeError {
    fn from(src: StripPrefixError) -> MnemeError {
        MnemeError::NotFound(format!("Strip prefix failed for path. Error: {src}"))
    }
}

impl From<toml::de::Error> for MnemeError {
    fn from(src: toml::de::Error) -> MnemeError {
        MnemeError::Serialization(format!("Toml deserialization error: {src}"))
    }
}

impl From<toml::ser::Error> for MnemeError {
    fn from(src: toml::ser::Error) -> MnemeError {
        MnemeError::Serialization(format!("Toml serialization error: {src}"))
    }
}

impl From<JsonError> for MnemeError {
    fn from(src: JsonError) -> MnemeError {
        MnemeError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<YamlError> for MnemeError {
    fn from(src: YamlError) -> MnemeError {
        MnemeError::Parse(format!("Frontmatter YAML error: {src}"))
    }
}

impl From<fmt::Error> for MnemeError {
    fn from(x: fmt::Error) -> Self {
        MnemeError::Serialization(format!("{x}"))
    }
}

impl From<SqlxError> for MnemeError {
    fn from(db_error: SqlxError) -> Self {
        match db_error {
            SqlxError::RowNotFound => MnemeError::NotFound("database row not found".to_string()),
            other => MnemeError::Store(format!("database error: {other:?}")),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for MnemeError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        MnemeError::Store(format!("migration error: {e}"))
    }
}

#[cfg(feature = "service")]
impl From<NotifyError> for MnemeError {
    fn from(notify_error: NotifyError) -> Self {
        match notify_error.kind {
            NotifyErrorKind::Generic(msg) => MnemeError::Io(format!(
                "notify-debouncer: {}, paths: {:?}",
                msg, notify_error.paths
            )),
            NotifyErrorKind::Io(io_error) => MnemeError::Io(format!(
                "notify-debouncer: io error {}, paths: {:?}",
                io_error.kind(),
                notify_error.paths
            )),
            NotifyErrorKind::PathNotFound => MnemeError::NotFound(format!(
                "notify-debouncer: path(s) not found: {:?}",
                notify_error.paths
            )),
            NotifyErrorKind::WatchNotFound => MnemeError::NotFound(format!(
                "notify-debouncer: watch not found, paths: {:?}",
                notify_error.paths
            )),
            NotifyErrorKind::InvalidConfig(_) => {
                MnemeError::Io("notify-debouncer invalid config".to_string())
            }
            NotifyErrorKind::MaxFilesWatch => {
                MnemeError::Io("notify-debouncer max file watch limit reached".to_string())
            }
        }
    }
}
