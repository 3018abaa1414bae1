//! Error types for the preview cache

use std::path::PathBuf;

/// Failure inside the preview database. Never delivered to consumers:
/// reads degrade to a miss and writes are dropped.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to create database directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("preview blob error: {0}")]
    Blob(#[from] image::ImageError),
}

/// Failure reported by a preview generator
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct RenderError(pub String);

impl RenderError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// What a waiting consumer can receive instead of an image
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PreviewError {
    #[error("preview generation failed: {0}")]
    Render(#[from] RenderError),

    #[error("preview request was cancelled")]
    Cancelled,

    #[error("preview was already delivered for this request")]
    AlreadyDelivered,

    #[error("preview loader needs a tokio runtime")]
    NoRuntime,
}

/// Failure loading configuration or manifests
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid TOML in {path}: {source}")]
    Toml {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid manifest {path}: {source}")]
    Manifest {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("could not determine a {0} directory")]
    NoDirectory(&'static str),
}
