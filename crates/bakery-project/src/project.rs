//! One project: its plugin list, derived views and runtime patching.

use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::RwLock;

use bakery_plugin_db::{
    ParseRequest, Plugin, PluginParser, PluginType, SelectedState, MAIN_DESCRIPTOR,
};

use crate::cancel::CancelToken;
use crate::error::LoadError;
use crate::link::{self, LinkJob, LinkOutcome};
use crate::loader::{LoadContext, PluginLoader};
use crate::progress::NullProgress;
use crate::tree::ProjectTreeBuilder;
use crate::variables::Variables;

/// Counters of one [`Project::load`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub requested: usize,
    pub loaded: usize,
    pub cache_hits: usize,
    pub failed: usize,
}

pub struct Project {
    name: String,
    base_dir: PathBuf,
    projects_root: PathBuf,
    project_dir: PathBuf,
    parser: Arc<dyn PluginParser>,
    plugins: ArcSwap<Vec<Arc<Plugin>>>,
    variables: RwLock<Variables>,
    loaded_count: AtomicUsize,
    all_count: AtomicUsize,
}

impl std::fmt::Debug for Project {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Project")
            .field("name", &self.name)
            .field("project_dir", &self.project_dir)
            .field("plugins", &self.plugins.load().len())
            .finish()
    }
}

fn same_path(a: &Path, b: &Path) -> bool {
    a.to_string_lossy().eq_ignore_ascii_case(&b.to_string_lossy())
}

impl Project {
    pub fn new(
        name: impl Into<String>,
        base_dir: impl Into<PathBuf>,
        projects_root: impl Into<PathBuf>,
        parser: Arc<dyn PluginParser>,
    ) -> Self {
        let name = name.into();
        let projects_root = projects_root.into();
        let project_dir = projects_root.join(&name);
        Self {
            name,
            base_dir: base_dir.into(),
            projects_root,
            project_dir,
            parser,
            plugins: ArcSwap::from_pointee(Vec::new()),
            variables: RwLock::new(Variables::new()),
            loaded_count: AtomicUsize::new(0),
            all_count: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn projects_root(&self) -> &Path {
        &self.projects_root
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn main_descriptor_path(&self) -> PathBuf {
        self.project_dir.join(MAIN_DESCRIPTOR)
    }

    /// Loads `paths` in parallel and publishes the unsorted result.
    pub fn load(&self, paths: &[PathBuf], ctx: &LoadContext<'_>) -> Result<LoadStats, LoadError> {
        let batch =
            PluginLoader::new(*ctx).load_batch(&self.name, &self.main_descriptor_path(), paths)?;
        let stats = LoadStats {
            requested: batch.requested,
            loaded: batch.plugins.len(),
            cache_hits: batch.cache_hits,
            failed: batch.failed,
        };
        self.all_count.store(paths.len(), Ordering::Relaxed);
        self.loaded_count.store(stats.loaded, Ordering::Relaxed);
        self.plugins
            .store(Arc::new(batch.plugins.into_iter().map(Arc::new).collect()));
        Ok(stats)
    }

    /// Every link of the current list, addressed by index.
    pub fn link_jobs(&self) -> Vec<LinkJob> {
        self.plugins
            .load()
            .iter()
            .enumerate()
            .filter(|(_, plugin)| plugin.is_link())
            .map(|(index, plugin)| LinkJob {
                project: self.name.clone(),
                index,
                link: Arc::clone(plugin),
            })
            .collect()
    }

    /// Publishes a list with resolved links swapped in and failed ones removed.
    /// Returns the number of removed links.
    pub fn apply_link_outcomes(&self, outcomes: Vec<LinkOutcome>) -> usize {
        if outcomes.is_empty() {
            return 0;
        }
        let mut list = Vec::clone(&self.plugins.load());
        let removed = link::apply_outcomes(&mut list, outcomes);
        self.loaded_count.store(list.len(), Ordering::Relaxed);
        self.plugins.store(Arc::new(list));
        removed
    }

    /// Sorts the list into canonical order and initialises the variables.
    pub fn post_load(&self) -> Result<(), LoadError> {
        let current = self.plugins.load_full();
        let mains: Vec<&Arc<Plugin>> = current.iter().filter(|plugin| plugin.is_main).collect();
        let [main] = mains.as_slice() else {
            return Err(LoadError::InvariantViolation {
                project: self.name.clone(),
                found: mains.len(),
            });
        };
        let sorted = ProjectTreeBuilder::new(&self.name, &self.project_dir).sort(main, &current);
        *self.variables.write() =
            Variables::for_project(&self.name, &self.base_dir, &self.project_dir, main);
        self.loaded_count.store(sorted.len(), Ordering::Relaxed);
        self.plugins.store(Arc::new(sorted));
        Ok(())
    }

    pub fn main_plugin(&self) -> Option<Arc<Plugin>> {
        self.plugins
            .load()
            .iter()
            .find(|plugin| plugin.is_main)
            .cloned()
    }

    pub fn all_plugins(&self) -> Arc<Vec<Arc<Plugin>>> {
        self.plugins.load_full()
    }

    /// Main plugin plus every plugin-variant entry that is selected or mandatory.
    /// Entries whose selection is unset are never active.
    pub fn active_plugins(&self) -> Vec<Arc<Plugin>> {
        self.plugins
            .load()
            .iter()
            .filter(|plugin| plugin.plugin_type() == PluginType::Plugin)
            .filter(|plugin| {
                plugin.is_main
                    || (plugin.selected != SelectedState::Unset
                        && (plugin.mandatory || plugin.selected == SelectedState::True))
            })
            .cloned()
            .collect()
    }

    /// Entries shown in selection views: every level above zero.
    pub fn visible_plugins(&self) -> Vec<Arc<Plugin>> {
        self.plugins
            .load()
            .iter()
            .filter(|plugin| plugin.level > 0)
            .cloned()
            .collect()
    }

    pub fn plugin_by_full_path(&self, full_path: &Path) -> Option<Arc<Plugin>> {
        self.plugins
            .load()
            .iter()
            .find(|plugin| same_path(&plugin.full_path, full_path))
            .cloned()
    }

    pub fn plugin_by_short_path(&self, short_path: &str) -> Option<Arc<Plugin>> {
        self.plugins
            .load()
            .iter()
            .find(|plugin| plugin.short_path.eq_ignore_ascii_case(short_path))
            .cloned()
    }

    /// Parses one file outside a load batch. A link is followed to its terminal plugin
    /// without consulting the cache. Any failure yields `None`.
    pub fn load_plugin(&self, path: &Path, ignore_main: bool) -> Option<Plugin> {
        let plugin_type = PluginType::from_path(path);
        let is_main = same_path(path, &self.main_descriptor_path());
        let request = ParseRequest::new(path, plugin_type, &self.name, &self.projects_root)
            .main(is_main)
            .ignore_main_check(ignore_main && plugin_type == PluginType::Plugin);
        let plugin = match self.parser.parse(&request) {
            Ok(plugin) => plugin,
            Err(err) => {
                tracing::debug!(project = %self.name, path = %path.display(), error = %err, "plugin load failed");
                return None;
            }
        };
        if !plugin.is_link() {
            return Some(plugin);
        }

        let cancel = CancelToken::new();
        let ctx = LoadContext {
            base_dir: &self.base_dir,
            projects_root: &self.projects_root,
            parser: self.parser.as_ref(),
            cache: None,
            progress: &NullProgress,
            cancel: &cancel,
        };
        match link::follow_chain(&ctx, &plugin) {
            Ok(resolved) => Some(link::bind(&plugin, resolved.target)),
            Err(err) => {
                tracing::debug!(project = %self.name, path = %path.display(), error = %err, "link load failed");
                None
            }
        }
    }

    /// Loads a file while the project is in use. Paths outside the base directory are
    /// rejected. With `add_to_list` the result replaces the entry with the same full path,
    /// or is appended when there is none.
    pub fn load_plugin_monkey_patch(
        &self,
        path: &Path,
        add_to_list: bool,
        ignore_main: bool,
    ) -> Option<Arc<Plugin>> {
        if !self.is_inside_base(path) {
            tracing::warn!(project = %self.name, path = %path.display(), "rejecting plugin outside the base directory");
            return None;
        }
        let plugin = Arc::new(self.load_plugin(path, ignore_main)?);
        if add_to_list {
            let mut appended = false;
            self.plugins.rcu(|current| {
                let mut list = Vec::clone(current);
                match list
                    .iter()
                    .position(|existing| same_path(&existing.full_path, path))
                {
                    Some(index) => {
                        list[index] = Arc::clone(&plugin);
                        appended = false;
                    }
                    None => {
                        list.push(Arc::clone(&plugin));
                        appended = true;
                    }
                }
                list
            });
            if appended {
                self.all_count.fetch_add(1, Ordering::Relaxed);
                self.loaded_count.fetch_add(1, Ordering::Relaxed);
            }
        }
        Some(plugin)
    }

    /// Re-parses `plugin` from disk and swaps it in by full path. A plugin that is not part
    /// of the list is loaded as an out-of-tree addition and the list is left alone.
    pub fn refresh_plugin(&self, plugin: &Plugin) -> Option<Arc<Plugin>> {
        let path = plugin.full_path.as_path();
        if self.plugin_by_full_path(path).is_none() {
            return self.load_plugin(path, true).map(Arc::new);
        }

        let fresh = Arc::new(self.load_plugin(path, false)?);
        self.plugins.rcu(|current| {
            let mut list = Vec::clone(current);
            if let Some(index) = list
                .iter()
                .position(|existing| same_path(&existing.full_path, path))
            {
                list[index] = Arc::clone(&fresh);
            }
            list
        });
        Some(fresh)
    }

    fn is_inside_base(&self, path: &Path) -> bool {
        if path
            .components()
            .any(|component| matches!(component, Component::ParentDir))
        {
            return false;
        }
        let mut candidate = path.components();
        for part in self.base_dir.components() {
            match candidate.next() {
                Some(other)
                    if other
                        .as_os_str()
                        .to_string_lossy()
                        .eq_ignore_ascii_case(&part.as_os_str().to_string_lossy()) => {}
                _ => return false,
            }
        }
        candidate.next().is_some()
    }

    pub fn variables(&self) -> Variables {
        self.variables.read().clone()
    }

    pub fn set_variable(&self, name: &str, value: impl Into<String>) {
        self.variables.write().set(name, value);
    }

    pub fn remove_variable(&self, name: &str) -> Option<String> {
        self.variables.write().remove(name)
    }

    pub fn expand(&self, text: &str) -> String {
        self.variables.read().expand(text)
    }

    pub fn loaded_plugin_count(&self) -> usize {
        self.loaded_count.load(Ordering::Relaxed)
    }

    pub fn all_plugin_count(&self) -> usize {
        self.all_count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use pretty_assertions::assert_eq;
    use tempfile::{tempdir, TempDir};

    use bakery_plugin_db::{IniParser, PathScanner, MAIN_LEVEL};

    use super::*;
    use crate::link::resolve_all;

    struct Fixture {
        dir: TempDir,
        project: Project,
    }

    impl Fixture {
        fn new(files: &[(&str, &str)]) -> Self {
            let dir = tempdir().unwrap();
            for (relative, body) in files {
                let path = dir.path().join(relative);
                fs::create_dir_all(path.parent().unwrap()).unwrap();
                fs::write(&path, body).unwrap();
            }
            let project = Project::new(
                "Demo",
                dir.path(),
                dir.path().join("Projects"),
                Arc::new(IniParser),
            );
            Self { dir, project }
        }

        fn path(&self, relative: &str) -> PathBuf {
            self.dir.path().join(relative)
        }

        fn load(&self) -> LoadStats {
            let scan = PathScanner::new().scan(self.project.project_dir()).unwrap();
            let cancel = CancelToken::new();
            let ctx = LoadContext {
                base_dir: self.project.base_dir(),
                projects_root: self.project.projects_root(),
                parser: &IniParser,
                cache: None,
                progress: &NullProgress,
                cancel: &cancel,
            };
            let stats = self.project.load(&scan.paths, &ctx).unwrap();
            let outcomes = resolve_all(&ctx, self.project.link_jobs());
            self.project.apply_link_outcomes(outcomes);
            self.project.post_load().unwrap();
            stats
        }

        fn names(&self) -> Vec<String> {
            self.project
                .all_plugins()
                .iter()
                .map(|plugin| plugin.project_relative_path().to_owned())
                .collect()
        }
    }

    const FILES: &[(&str, &str)] = &[
        (
            "Projects/Demo/script.project",
            "[Main]\nTitle=Demo\n[Variables]\n%Target%=%BaseDir%/Target\n",
        ),
        ("Projects/Demo/Top.script", "[Main]\nLevel=1\nSelected=False\n"),
        ("Projects/Demo/Hidden.script", "[Main]\nLevel=0\nSelected=None\n"),
        ("Projects/Demo/Forced.script", "[Main]\nLevel=2\nSelected=False\nMandatory=True\n"),
        ("Projects/Demo/Apps/Net/Foo.script", "[Main]\nLevel=5\n"),
        ("Projects/Demo/Apps/Net/Bar.script", "[Main]\nLevel=5\n"),
        ("Projects/Demo/Apps/Alias.link", "[Main]\nLink=Projects/Demo/Apps/Net/Bar.script\n"),
        ("Projects/Demo/Apps/Broken.link", "[Main]\nLink=Projects/Demo/Missing.script\n"),
    ];

    #[test]
    fn load_resolves_links_and_sorts() {
        let fixture = Fixture::new(FILES);
        let stats = fixture.load();
        assert_eq!(stats.requested, 8);
        assert_eq!(stats.loaded, 8);
        assert_eq!(
            fixture.names(),
            vec![
                "script.project",
                "Hidden.script",
                "Top.script",
                "Forced.script",
                "Apps/Alias.link",
                "Apps/Net/Bar.script",
                "Apps/Net/Foo.script",
            ]
        );
        assert_eq!(fixture.project.loaded_plugin_count(), 7);
        assert_eq!(fixture.project.all_plugin_count(), 8);

        let main = fixture.project.main_plugin().unwrap();
        assert_eq!(main.level, MAIN_LEVEL);
        let alias = fixture
            .project
            .plugin_by_short_path("demo/apps/alias.LINK")
            .unwrap();
        assert_eq!(alias.level, 5);
        assert_eq!(
            alias.link_target().unwrap().short_path,
            "Demo/Apps/Net/Bar.script"
        );
    }

    #[test]
    fn active_and_visible_views() {
        let fixture = Fixture::new(FILES);
        fixture.load();
        let active: Vec<_> = fixture
            .project
            .active_plugins()
            .iter()
            .map(|plugin| plugin.project_relative_path().to_owned())
            .collect();
        assert_eq!(
            active,
            vec![
                "script.project",
                "Forced.script",
                "Apps/Net/Bar.script",
                "Apps/Net/Foo.script"
            ]
        );
        let visible = fixture.project.visible_plugins();
        assert_eq!(visible.len(), 5);
        assert!(visible.iter().all(|plugin| plugin.level > 0));
    }

    #[test]
    fn variables_come_from_the_main_plugin() {
        let fixture = Fixture::new(FILES);
        fixture.load();
        assert_eq!(
            fixture.project.expand("%Target%/%ProjectName%"),
            format!("{}/Target/Demo", fixture.dir.path().display())
        );
        fixture.project.set_variable("Extra", "1");
        assert_eq!(fixture.project.variables().get("extra"), Some("1"));
        assert_eq!(fixture.project.remove_variable("EXTRA").as_deref(), Some("1"));
    }

    #[test]
    fn post_load_without_main_fails() {
        let fixture = Fixture::new(&[("Projects/Demo/script.project", "[Main]\n")]);
        let err = fixture.project.post_load().unwrap_err();
        assert!(matches!(err, LoadError::InvariantViolation { found: 0, .. }));
    }

    #[test]
    fn load_plugin_follows_links() {
        let fixture = Fixture::new(FILES);
        let alias = fixture
            .project
            .load_plugin(&fixture.path("Projects/Demo/Apps/Alias.link"), false)
            .unwrap();
        assert!(alias.link_loaded());
        assert!(fixture
            .project
            .load_plugin(&fixture.path("Projects/Demo/Apps/Broken.link"), false)
            .is_none());
        let main = fixture
            .project
            .load_plugin(&fixture.path("Projects/Demo/script.project"), false)
            .unwrap();
        assert!(main.is_main);
    }

    #[test]
    fn monkey_patch_rejects_paths_outside_the_base() {
        let fixture = Fixture::new(FILES);
        fixture.load();
        let outside = tempdir().unwrap();
        let stray = outside.path().join("Stray.script");
        fs::write(&stray, "[Main]\n").unwrap();
        assert!(fixture
            .project
            .load_plugin_monkey_patch(&stray, true, false)
            .is_none());

        let escaped = fixture
            .path("Projects")
            .join("..")
            .join("..")
            .join("Stray.script");
        assert!(fixture
            .project
            .load_plugin_monkey_patch(&escaped, true, false)
            .is_none());
        assert_eq!(fixture.project.all_plugins().len(), 7);
    }

    #[test]
    fn monkey_patch_appends_then_replaces() {
        let fixture = Fixture::new(FILES);
        fixture.load();
        let extra = fixture.path("Tools/Extra.script");
        fs::create_dir_all(extra.parent().unwrap()).unwrap();
        fs::write(&extra, "no main section\n").unwrap();

        assert!(fixture
            .project
            .load_plugin_monkey_patch(&extra, true, false)
            .is_none());
        let added = fixture
            .project
            .load_plugin_monkey_patch(&extra, true, true)
            .unwrap();
        assert_eq!(added.level, 0);
        assert_eq!(fixture.project.all_plugins().len(), 8);
        assert_eq!(fixture.project.all_plugin_count(), 9);

        fs::write(&extra, "[Main]\nLevel=3\n").unwrap();
        let replaced = fixture
            .project
            .load_plugin_monkey_patch(&extra, true, false)
            .unwrap();
        assert_eq!(replaced.level, 3);
        assert_eq!(fixture.project.all_plugins().len(), 8);
        assert_eq!(
            fixture.project.plugin_by_full_path(&extra).unwrap().level,
            3
        );
    }

    #[test]
    fn refresh_swaps_in_place() {
        let fixture = Fixture::new(FILES);
        fixture.load();
        let top = fixture
            .project
            .plugin_by_full_path(&fixture.path("Projects/Demo/Top.script"))
            .unwrap();
        fs::write(&top.full_path, "[Main]\nLevel=1\nTitle=Renamed\n").unwrap();
        let refreshed = fixture.project.refresh_plugin(&top).unwrap();
        assert_eq!(refreshed.title(), "Renamed");

        let list = fixture.project.all_plugins();
        let position = list
            .iter()
            .position(|plugin| plugin.full_path == top.full_path)
            .unwrap();
        assert_eq!(position, 2);
        assert_eq!(list[position].title(), "Renamed");
        assert_eq!(list.len(), 7);
    }

    #[test]
    fn refresh_of_unknown_plugin_leaves_the_list_alone() {
        let fixture = Fixture::new(FILES);
        fixture.load();
        let loose = fixture.path("Loose.script");
        fs::write(&loose, "Title only\n").unwrap();
        let plugin = Plugin::new(PluginType::Plugin, &loose, "Loose.script", "Demo");
        assert!(fixture.project.refresh_plugin(&plugin).is_some());
        assert_eq!(fixture.project.all_plugins().len(), 7);
    }
}
