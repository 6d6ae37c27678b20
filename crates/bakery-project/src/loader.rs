//! Fork-join loading of one project's plugin files.

use std::path::{Path, PathBuf};

use rayon::prelude::*;

use bakery_plugin_db::{
    relative_key, CacheSnapshot, Fingerprint, ParseRequest, Plugin, PluginParser, PluginType,
    MAIN_LEVEL,
};

use crate::cancel::CancelToken;
use crate::error::LoadError;
use crate::progress::{LoadStatus, ProgressSink};

/// Shared, read-only services for one fork-join batch.
#[derive(Clone, Copy)]
pub struct LoadContext<'a> {
    pub base_dir: &'a Path,
    pub projects_root: &'a Path,
    pub parser: &'a dyn PluginParser,
    pub cache: Option<&'a CacheSnapshot>,
    pub progress: &'a dyn ProgressSink,
    pub cancel: &'a CancelToken,
}

impl<'a> LoadContext<'a> {
    /// Cache lookup for `path`, rebinding a hit to the requesting project.
    pub(crate) fn cached(&self, project: &str, path: &Path) -> Option<Plugin> {
        let cache = self.cache?;
        let relative = relative_key(self.base_dir, path)?;
        let fingerprint = Fingerprint::of(path).ok()?;
        let mut plugin = cache.lookup(&relative, &fingerprint)?;
        plugin.project = project.to_owned();
        plugin.full_path = path.to_path_buf();
        plugin.short_path =
            relative_key(self.projects_root, path).unwrap_or_else(|| path.display().to_string());
        Some(plugin)
    }

    pub(crate) fn request<'r>(&'r self, project: &'r str, path: &'r Path) -> ParseRequest<'r> {
        ParseRequest::new(path, PluginType::from_path(path), project, self.projects_root)
    }
}

/// Result of one load batch.
#[derive(Debug)]
pub struct LoadedBatch {
    pub plugins: Vec<Plugin>,
    pub requested: usize,
    pub cache_hits: usize,
    pub failed: usize,
}

pub struct PluginLoader<'a> {
    ctx: LoadContext<'a>,
}

impl<'a> PluginLoader<'a> {
    pub fn new(ctx: LoadContext<'a>) -> Self {
        Self { ctx }
    }

    /// Loads every path on the current rayon pool and returns once all of them finished.
    ///
    /// Items that fail to parse are logged and left out. Exactly one loaded plugin must be the
    /// project's main descriptor.
    pub fn load_batch(
        &self,
        project: &str,
        main_path: &Path,
        paths: &[PathBuf],
    ) -> Result<LoadedBatch, LoadError> {
        // One slot per scheduled path; workers never share a slot.
        let slots: Vec<Option<(Plugin, bool)>> = paths
            .par_iter()
            .map(|path| self.load_one(project, main_path, path))
            .collect();

        if self.ctx.cancel.is_cancelled() {
            return Err(LoadError::Cancelled);
        }

        let mut plugins = Vec::with_capacity(slots.len());
        let mut cache_hits = 0;
        let mut failed = 0;
        for slot in slots {
            match slot {
                Some((plugin, cached)) => {
                    cache_hits += usize::from(cached);
                    plugins.push(plugin);
                }
                None => failed += 1,
            }
        }

        let found = plugins.iter().filter(|plugin| plugin.is_main).count();
        if found != 1 {
            return Err(LoadError::InvariantViolation {
                project: project.to_owned(),
                found,
            });
        }

        tracing::debug!(
            project,
            loaded = plugins.len(),
            cache_hits,
            failed,
            "plugin batch loaded"
        );
        Ok(LoadedBatch {
            plugins,
            requested: paths.len(),
            cache_hits,
            failed,
        })
    }

    fn load_one(&self, project: &str, main_path: &Path, path: &Path) -> Option<(Plugin, bool)> {
        if self.ctx.cancel.is_cancelled() {
            return None;
        }
        let is_main = path == main_path;

        if let Some(mut plugin) = self.ctx.cached(project, path) {
            plugin.is_main = is_main;
            if is_main {
                plugin.level = MAIN_LEVEL;
            }
            self.ctx
                .progress
                .report(LoadStatus::CacheHit, plugin.short_dir());
            return Some((plugin, true));
        }

        let request = self.ctx.request(project, path).main(is_main);
        match self.ctx.parser.parse(&request) {
            Ok(plugin) => {
                self.ctx.progress.report(LoadStatus::Parsed, plugin.short_dir());
                Some((plugin, false))
            }
            Err(err) => {
                tracing::warn!(project, path = %path.display(), error = %err, "failed to load plugin");
                self.ctx.progress.report(LoadStatus::Parsed, None);
                None
            }
        }
    }
}
