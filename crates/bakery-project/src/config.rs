use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use bakery_plugin_db::{CacheTable, JsonCacheTable};

pub const DEFAULT_PROJECTS_DIR: &str = "Projects";
pub const DEFAULT_CACHE_FILE: &str = "BakeryCache.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("no config directory available")]
    NoConfigDir,
}

fn default_projects_dir() -> String {
    DEFAULT_PROJECTS_DIR.to_owned()
}

fn default_use_cache() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub base_dir: PathBuf,
    /// Name of the directory below `base_dir` holding one sub-directory per project.
    #[serde(default = "default_projects_dir")]
    pub projects_dir: String,
    /// Cache table location. Defaults to `BakeryCache.json` in the base directory.
    #[serde(default)]
    pub cache_path: Option<PathBuf>,
    #[serde(default = "default_use_cache")]
    pub use_cache: bool,
    /// Worker pool size. `None` lets rayon pick.
    #[serde(default)]
    pub worker_threads: Option<usize>,
}

impl CollectionConfig {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            projects_dir: default_projects_dir(),
            cache_path: None,
            use_cache: true,
            worker_threads: None,
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// `<config dir>/bakery/config.json`.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let mut path = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        path.push("bakery");
        path.push("config.json");
        Ok(path)
    }

    pub fn projects_root(&self) -> PathBuf {
        self.base_dir.join(&self.projects_dir)
    }

    pub fn resolved_cache_path(&self) -> PathBuf {
        self.cache_path
            .clone()
            .unwrap_or_else(|| self.base_dir.join(DEFAULT_CACHE_FILE))
    }

    pub fn cache_table(&self) -> Option<Arc<dyn CacheTable>> {
        if self.use_cache {
            Some(Arc::new(JsonCacheTable::open(self.resolved_cache_path())))
        } else {
            None
        }
    }
}
