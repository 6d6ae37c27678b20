//! Every project under one base directory, loaded together.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bakery_plugin_db::{
    list_projects, CacheSnapshot, CacheTable, IniParser, PathScanner, PluginParser, ProjectScan,
    StoreError,
};

use crate::cancel::CancelToken;
use crate::config::CollectionConfig;
use crate::error::{CollectionError, LoadError};
use crate::link::{self, LinkOutcome};
use crate::loader::LoadContext;
use crate::progress::ProgressSink;
use crate::project::Project;

/// Sizes gathered by [`ProjectCollection::prepare_load`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrepareReport {
    pub projects: usize,
    pub total: usize,
    /// Links are processed twice, once when loaded and once when resolved.
    pub links: usize,
}

impl PrepareReport {
    /// Number of progress reports a full load emits at most.
    pub fn expected_reports(&self) -> usize {
        self.total + self.links
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub projects: usize,
    pub plugins: usize,
    pub cache_hits: usize,
    pub failed_items: usize,
    pub links_resolved: usize,
    pub links_removed: usize,
    pub failed_projects: usize,
}

/// A project that was left out of the collection.
#[derive(Debug)]
pub struct ProjectFailure {
    pub project: String,
    pub error: LoadError,
}

pub struct ProjectCollection {
    base_dir: PathBuf,
    projects_root: PathBuf,
    parser: Arc<dyn PluginParser>,
    cache: Option<Arc<dyn CacheTable>>,
    pool: rayon::ThreadPool,
    only: Option<Vec<String>>,
    scans: BTreeMap<String, ProjectScan>,
    projects: BTreeMap<String, Arc<Project>>,
    all_paths: Vec<PathBuf>,
    failed: Vec<ProjectFailure>,
}

impl std::fmt::Debug for ProjectCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectCollection")
            .field("base_dir", &self.base_dir)
            .field("projects", &self.projects.keys().collect::<Vec<_>>())
            .field("failed", &self.failed.len())
            .finish()
    }
}

impl ProjectCollection {
    pub fn new(config: &CollectionConfig) -> Result<Self, CollectionError> {
        let mut builder =
            rayon::ThreadPoolBuilder::new().thread_name(|index| format!("bakery-load-{index}"));
        if let Some(threads) = config.worker_threads {
            builder = builder.num_threads(threads);
        }
        let pool = builder.build()?;
        Ok(Self {
            base_dir: config.base_dir.clone(),
            projects_root: config.projects_root(),
            parser: Arc::new(IniParser),
            cache: config.cache_table(),
            pool,
            only: None,
            scans: BTreeMap::new(),
            projects: BTreeMap::new(),
            all_paths: Vec::new(),
            failed: Vec::new(),
        })
    }

    pub fn with_parser(mut self, parser: Arc<dyn PluginParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_cache(mut self, cache: Option<Arc<dyn CacheTable>>) -> Self {
        self.cache = cache;
        self
    }

    /// Restricts loading to the named projects (ASCII case-insensitive).
    pub fn only_projects(mut self, names: Vec<String>) -> Self {
        self.only = if names.is_empty() { None } else { Some(names) };
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn projects_root(&self) -> &Path {
        &self.projects_root
    }

    /// Scans every project directory. Directories without a main descriptor are skipped.
    pub fn prepare_load(&mut self) -> Result<PrepareReport, CollectionError> {
        let (names, rejected) = list_projects(&self.projects_root)?;
        for err in rejected {
            tracing::warn!(error = %err, "skipping project directory");
        }

        let scanner = PathScanner::new();
        let mut report = PrepareReport::default();
        self.scans.clear();
        self.all_paths.clear();
        for name in names {
            if let Some(only) = &self.only {
                if !only.iter().any(|wanted| wanted.eq_ignore_ascii_case(&name)) {
                    continue;
                }
            }
            match scanner.scan(&self.projects_root.join(&name)) {
                Ok(scan) => {
                    report.projects += 1;
                    report.total += scan.paths.len();
                    report.links += scan.link_count;
                    self.all_paths.extend(scan.paths.iter().cloned());
                    self.scans.insert(name, scan);
                }
                Err(err) => tracing::warn!(project = %name, error = %err, "skipping project"),
            }
        }

        tracing::info!(
            projects = report.projects,
            total = report.total,
            links = report.links,
            "projects scanned"
        );
        Ok(report)
    }

    fn capture_cache(&self) -> Result<Option<CacheSnapshot>, StoreError> {
        match &self.cache {
            Some(table) => Ok(Some(CacheSnapshot::capture(table.as_ref())?)),
            None => Ok(None),
        }
    }

    /// Loads every scanned project, resolves links across all of them and sorts each one.
    ///
    /// A project whose load breaks the main plugin invariant is recorded in
    /// [`failed`](Self::failed) and left out. An unreadable cache table or cancellation
    /// aborts the whole load.
    pub fn load(
        &mut self,
        progress: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<LoadSummary, CollectionError> {
        let mut summary = LoadSummary::default();
        let mut loaded: BTreeMap<String, Arc<Project>> = BTreeMap::new();
        let mut failed = Vec::new();

        for (name, scan) in &self.scans {
            if cancel.is_cancelled() {
                return Err(CollectionError::Cancelled);
            }
            let snapshot = self.capture_cache()?;
            let ctx = LoadContext {
                base_dir: &self.base_dir,
                projects_root: &self.projects_root,
                parser: self.parser.as_ref(),
                cache: snapshot.as_ref(),
                progress,
                cancel,
            };
            let project = Project::new(
                name.as_str(),
                &self.base_dir,
                &self.projects_root,
                Arc::clone(&self.parser),
            );
            match self.pool.install(|| project.load(&scan.paths, &ctx)) {
                Ok(stats) => {
                    summary.cache_hits += stats.cache_hits;
                    summary.failed_items += stats.failed;
                    loaded.insert(name.clone(), Arc::new(project));
                }
                Err(LoadError::Cancelled) => return Err(CollectionError::Cancelled),
                Err(error) => {
                    tracing::error!(project = %name, error = %error, "project load failed");
                    failed.push(ProjectFailure {
                        project: name.clone(),
                        error,
                    });
                }
            }
        }

        let jobs: Vec<_> = loaded
            .values()
            .flat_map(|project| project.link_jobs())
            .collect();
        if !jobs.is_empty() {
            let snapshot = self.capture_cache()?;
            let ctx = LoadContext {
                base_dir: &self.base_dir,
                projects_root: &self.projects_root,
                parser: self.parser.as_ref(),
                cache: snapshot.as_ref(),
                progress,
                cancel,
            };
            let job_count = jobs.len();
            let outcomes = self.pool.install(|| link::resolve_all(&ctx, jobs));
            if cancel.is_cancelled() {
                return Err(CollectionError::Cancelled);
            }

            let mut grouped: HashMap<String, Vec<LinkOutcome>> = HashMap::new();
            for outcome in outcomes {
                grouped
                    .entry(outcome.project.clone())
                    .or_default()
                    .push(outcome);
            }
            for (name, project) in &loaded {
                if let Some(outcomes) = grouped.remove(name) {
                    summary.links_removed += project.apply_link_outcomes(outcomes);
                }
            }
            summary.links_resolved = job_count - summary.links_removed;
            tracing::debug!(
                count = job_count,
                removed = summary.links_removed,
                "links resolved"
            );
        }

        loaded.retain(|name, project| match project.post_load() {
            Ok(()) => true,
            Err(error) => {
                tracing::error!(project = %name, error = %error, "project post-load failed");
                failed.push(ProjectFailure {
                    project: name.clone(),
                    error,
                });
                false
            }
        });

        summary.projects = loaded.len();
        summary.plugins = loaded
            .values()
            .map(|project| project.loaded_plugin_count())
            .sum();
        summary.failed_projects = failed.len();
        self.projects = loaded;
        self.failed = failed;

        tracing::info!(
            projects = summary.projects,
            plugins = summary.plugins,
            cache_hits = summary.cache_hits,
            failed = summary.failed_projects,
            "collection loaded"
        );
        Ok(summary)
    }

    /// Loaded projects, sorted by name.
    pub fn projects(&self) -> Vec<Arc<Project>> {
        self.projects.values().cloned().collect()
    }

    pub fn project_names(&self) -> Vec<String> {
        self.projects.keys().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<Project>> {
        self.projects.get(name).cloned().or_else(|| {
            self.projects
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, project)| Arc::clone(project))
        })
    }

    pub fn len(&self) -> usize {
        self.projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }

    /// Every path found by the last [`prepare_load`](Self::prepare_load).
    pub fn all_paths(&self) -> &[PathBuf] {
        &self.all_paths
    }

    pub fn failed(&self) -> &[ProjectFailure] {
        &self.failed
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use pretty_assertions::assert_eq;
    use tempfile::{tempdir, TempDir};

    use std::sync::atomic::{AtomicUsize, Ordering};

    use bakery_plugin_db::{MemoryCacheTable, ParseError, ParseRequest, Plugin, MAIN_DESCRIPTOR};

    use super::*;
    use crate::progress::{LoadStatus, NullProgress, ProgressTally};

    fn base(files: &[(&str, &str)]) -> TempDir {
        let dir = tempdir().unwrap();
        for (relative, body) in files {
            let path = dir.path().join(relative);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, body).unwrap();
        }
        dir
    }

    fn collection(dir: &TempDir) -> ProjectCollection {
        let mut config = CollectionConfig::new(dir.path());
        config.use_cache = false;
        config.worker_threads = Some(2);
        ProjectCollection::new(&config).unwrap()
    }

    const FILES: &[(&str, &str)] = &[
        ("Projects/Alpha/script.project", "[Main]\nTitle=Alpha\n"),
        ("Projects/Alpha/One.script", "[Main]\nLevel=1\n"),
        ("Projects/Alpha/Shared.link", "[Main]\nLink=Projects/Beta/Tools/Two.script\n"),
        ("Projects/Alpha/Dead.link", "[Main]\nLink=Projects/Beta/Nope.script\n"),
        ("Projects/Beta/script.project", "[Main]\nTitle=Beta\n"),
        ("Projects/Beta/Tools/Two.script", "[Main]\nLevel=2\n"),
        ("Projects/Broken/script.project", "not a plugin\n"),
        ("Projects/Broken/Three.script", "[Main]\n"),
        ("Projects/Empty/readme.txt", "nothing here\n"),
    ];

    #[test]
    fn prepare_counts_paths_and_links() {
        let dir = base(FILES);
        let mut collection = collection(&dir);
        let report = collection.prepare_load().unwrap();
        assert_eq!(
            report,
            PrepareReport {
                projects: 3,
                total: 8,
                links: 2,
            }
        );
        assert_eq!(report.expected_reports(), 10);
        assert_eq!(collection.all_paths().len(), 8);
        assert!(collection.all_paths()[0].ends_with(format!("Alpha/{MAIN_DESCRIPTOR}")));
    }

    #[test]
    fn load_resolves_links_across_projects() {
        let dir = base(FILES);
        let mut collection = collection(&dir);
        collection.prepare_load().unwrap();
        let tally = ProgressTally::new();
        let summary = collection.load(&tally, &CancelToken::new()).unwrap();

        assert_eq!(collection.project_names(), vec!["Alpha", "Beta"]);
        assert_eq!(summary.failed_projects, 1);
        assert_eq!(collection.failed()[0].project, "Broken");
        assert!(matches!(
            collection.failed()[0].error,
            LoadError::InvariantViolation { found: 0, .. }
        ));
        assert_eq!(summary.links_resolved, 1);
        assert_eq!(summary.links_removed, 1);
        assert_eq!(tally.count(LoadStatus::LinkInvalid), 1);

        let alpha = collection.get("alpha").unwrap();
        let names: Vec<_> = alpha
            .all_plugins()
            .iter()
            .map(|plugin| plugin.short_path.clone())
            .collect();
        assert_eq!(
            names,
            vec!["Alpha/script.project", "Alpha/One.script", "Alpha/Shared.link"]
        );
        let shared = alpha.plugin_by_short_path("Alpha/Shared.link").unwrap();
        assert_eq!(shared.level, 2);
        assert_eq!(
            shared.link_target().unwrap().short_path,
            "Beta/Tools/Two.script"
        );
        assert_eq!(summary.plugins, 3 + 2);
    }

    #[test]
    fn only_selected_projects_are_loaded() {
        let dir = base(FILES);
        let mut collection = collection(&dir).only_projects(vec!["BETA".into()]);
        let report = collection.prepare_load().unwrap();
        assert_eq!(report.projects, 1);
        collection.load(&NullProgress, &CancelToken::new()).unwrap();
        assert_eq!(collection.project_names(), vec!["Beta"]);
        assert!(collection.failed().is_empty());
    }

    #[test]
    fn cancellation_aborts_the_load() {
        let dir = base(FILES);
        let mut collection = collection(&dir);
        collection.prepare_load().unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = collection.load(&NullProgress, &cancel).unwrap_err();
        assert!(matches!(err, CollectionError::Cancelled));
    }

    #[test]
    fn unreadable_cache_table_aborts_the_load() {
        let dir = base(FILES);
        let cache_path = dir.path().join("cache.json");
        fs::write(&cache_path, "{ not json").unwrap();
        let mut config = CollectionConfig::new(dir.path());
        config.cache_path = Some(cache_path);
        let mut collection = ProjectCollection::new(&config).unwrap();
        collection.prepare_load().unwrap();
        let err = collection
            .load(&NullProgress, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, CollectionError::Cache(StoreError::Parse(_))));
    }

    #[test]
    fn an_empty_cache_table_loads_everything_fresh() {
        let dir = base(FILES);
        let mut collection =
            collection(&dir).with_cache(Some(Arc::new(MemoryCacheTable::default())));
        collection.prepare_load().unwrap();
        let tally = ProgressTally::new();
        let summary = collection.load(&tally, &CancelToken::new()).unwrap();
        assert_eq!(summary.cache_hits, 0);
        assert_eq!(tally.count(LoadStatus::CacheHit), 0);
        assert_eq!(collection.len(), 2);
    }

    #[derive(Default)]
    struct CountingParser {
        calls: AtomicUsize,
    }

    impl PluginParser for CountingParser {
        fn parse(&self, request: &ParseRequest<'_>) -> Result<Plugin, ParseError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            IniParser.parse(request)
        }
    }

    #[test]
    fn custom_parser_sees_every_fresh_file() {
        let dir = base(FILES);
        let parser = Arc::new(CountingParser::default());
        let mut collection = collection(&dir).with_parser(parser.clone());
        let report = collection.prepare_load().unwrap();
        collection.load(&NullProgress, &CancelToken::new()).unwrap();
        // One call per scanned file plus the resolved link target.
        assert_eq!(parser.calls.load(Ordering::Relaxed), report.total + 1);
    }
}
