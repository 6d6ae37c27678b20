use thiserror::Error;

use bakery_plugin_db::{ScanError, StoreError};

use crate::config::ConfigError;

/// Failure of a single project's load.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("project {project} has {found} main plugins, expected exactly one")]
    InvariantViolation { project: String, found: usize },
    #[error("load cancelled")]
    Cancelled,
}

/// Failure that aborts the whole collection.
#[derive(Debug, Error)]
pub enum CollectionError {
    #[error("plugin cache is unusable: {0}")]
    Cache(#[from] StoreError),
    #[error("failed to list projects: {0}")]
    Scan(#[from] ScanError),
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("load cancelled")]
    Cancelled,
}
