#![allow(dead_code)]

use std::fs;
use std::path::Path;

use bakery_plugin_db::{CacheFile, CacheRecord};
use bakery_project::{CancelToken, CollectionConfig, LoadSummary, ProgressTally, ProjectCollection};
use tempfile::{tempdir, TempDir};

pub const CACHE_FILE: &str = "cache.json";

pub fn write_tree(files: &[(&str, &str)]) -> TempDir {
    let dir = tempdir().unwrap();
    for (relative, body) in files {
        let path = dir.path().join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, body).unwrap();
    }
    dir
}

pub fn config(base: &Path, use_cache: bool) -> CollectionConfig {
    let mut config = CollectionConfig::new(base);
    config.use_cache = use_cache;
    config.cache_path = Some(base.join(CACHE_FILE));
    config.worker_threads = Some(4);
    config
}

pub fn load(base: &Path, use_cache: bool) -> (ProjectCollection, LoadSummary, ProgressTally) {
    let mut collection = ProjectCollection::new(&config(base, use_cache)).unwrap();
    collection.prepare_load().unwrap();
    let tally = ProgressTally::new();
    let summary = collection.load(&tally, &CancelToken::new()).unwrap();
    (collection, summary, tally)
}

/// Writes a cache table holding every plugin currently loaded in `collection`.
pub fn write_cache(base: &Path, collection: &ProjectCollection) {
    let mut records = Vec::new();
    for project in collection.projects() {
        for plugin in project.all_plugins().iter() {
            records.push(CacheRecord::from_plugin(base, plugin).unwrap());
        }
    }
    let file = CacheFile { records };
    fs::write(base.join(CACHE_FILE), serde_json::to_string(&file).unwrap()).unwrap();
}

/// Short paths of a project in canonical order.
pub fn order(collection: &ProjectCollection, project: &str) -> Vec<String> {
    collection
        .get(project)
        .unwrap()
        .all_plugins()
        .iter()
        .map(|plugin| plugin.short_path.clone())
        .collect()
}
