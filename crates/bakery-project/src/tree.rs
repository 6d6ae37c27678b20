//! Canonical, directory-mirroring ordering of a project's plugins.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use bakery_plugin_db::Plugin;

/// Sibling order: level first, then plugins before directories, then path.
///
/// Paths compare ASCII case-insensitively with an ordinal tie-break, so the order is total.
pub fn compare_plugins(a: &Plugin, b: &Plugin) -> Ordering {
    a.level
        .cmp(&b.level)
        .then_with(|| a.is_directory().cmp(&b.is_directory()))
        .then_with(|| {
            let left = a.full_path.to_string_lossy();
            let right = b.full_path.to_string_lossy();
            left.to_ascii_lowercase()
                .cmp(&right.to_ascii_lowercase())
                .then_with(|| left.cmp(&right))
        })
}

#[derive(Debug)]
struct Node {
    plugin: Arc<Plugin>,
    children: Vec<usize>,
}

/// Arena tree rooted at the main plugin.
#[derive(Debug)]
struct PluginTree {
    nodes: Vec<Node>,
}

impl PluginTree {
    const ROOT: usize = 0;

    fn new(root: Arc<Plugin>) -> Self {
        Self {
            nodes: vec![Node {
                plugin: root,
                children: Vec::new(),
            }],
        }
    }

    fn add_node(&mut self, parent: usize, plugin: Arc<Plugin>) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node {
            plugin,
            children: Vec::new(),
        });
        self.nodes[parent].children.push(id);
        id
    }

    fn sort(&mut self) {
        for index in 0..self.nodes.len() {
            let mut children = std::mem::take(&mut self.nodes[index].children);
            children.sort_by(|&a, &b| compare_plugins(&self.nodes[a].plugin, &self.nodes[b].plugin));
            self.nodes[index].children = children;
        }
    }

    /// Pre-order walk starting at the root.
    fn depth_first(&self) -> Vec<&Arc<Plugin>> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![Self::ROOT];
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index];
            order.push(&node.plugin);
            stack.extend(node.children.iter().rev());
        }
        order
    }
}

pub struct ProjectTreeBuilder<'a> {
    project: &'a str,
    project_dir: &'a Path,
}

impl<'a> ProjectTreeBuilder<'a> {
    pub fn new(project: &'a str, project_dir: &'a Path) -> Self {
        Self {
            project,
            project_dir,
        }
    }

    /// Orders `plugins` under `main`. The result holds `main` first, followed by every other
    /// input exactly once; synthetic directory nodes never appear in it.
    ///
    /// Directories are keyed by `(level, prefix)`, so one folder holding plugins of two
    /// levels becomes two separate directory nodes.
    pub fn sort(&self, main: &Arc<Plugin>, plugins: &[Arc<Plugin>]) -> Vec<Arc<Plugin>> {
        let mut tree = PluginTree::new(Arc::clone(main));
        let mut directories: HashMap<(i32, String), usize> = HashMap::new();

        for plugin in plugins {
            if Arc::ptr_eq(plugin, main) || plugin.is_directory() {
                continue;
            }
            let segments: Vec<&str> = plugin
                .project_relative_path()
                .split(['/', '\\'])
                .filter(|segment| !segment.is_empty())
                .collect();

            let mut parent = PluginTree::ROOT;
            if segments.len() > 1 {
                for depth in 1..segments.len() {
                    let prefix = segments[..depth].join("/");
                    let key = (plugin.level, prefix.to_lowercase());
                    parent = match directories.get(&key) {
                        Some(&id) => id,
                        None => {
                            let directory = Plugin::directory(
                                self.project_dir.join(&prefix),
                                format!("{}/{}", self.project, prefix),
                                self.project,
                                plugin.level,
                            );
                            let id = tree.add_node(parent, Arc::new(directory));
                            directories.insert(key, id);
                            id
                        }
                    };
                }
            }
            tree.add_node(parent, Arc::clone(plugin));
        }

        tree.sort();
        tree.depth_first()
            .into_iter()
            .filter(|plugin| !plugin.is_directory())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use pretty_assertions::assert_eq;

    use bakery_plugin_db::{PluginType, MAIN_DESCRIPTOR, MAIN_LEVEL};

    use super::*;

    const ROOT: &str = "/base/Projects/Demo";

    fn plugin(relative: &str, level: i32) -> Arc<Plugin> {
        let mut plugin = Plugin::new(
            PluginType::from_path(Path::new(relative)),
            PathBuf::from(ROOT).join(relative),
            format!("Demo/{relative}"),
            "Demo",
        );
        plugin.level = level;
        if relative == MAIN_DESCRIPTOR {
            plugin.is_main = true;
        }
        Arc::new(plugin)
    }

    fn names(sorted: &[Arc<Plugin>]) -> Vec<&str> {
        sorted.iter().map(|p| p.project_relative_path()).collect()
    }

    fn sort(main: &Arc<Plugin>, plugins: &[Arc<Plugin>]) -> Vec<Arc<Plugin>> {
        ProjectTreeBuilder::new("Demo", Path::new(ROOT)).sort(main, plugins)
    }

    #[test]
    fn mirrors_directories_and_breaks_ties_by_name() {
        let main = plugin(MAIN_DESCRIPTOR, MAIN_LEVEL);
        let plugins = vec![
            plugin("Apps/Net/Foo.script", 5),
            main.clone(),
            plugin("Top.script", 1),
            plugin("Apps/Net/Bar.script", 5),
        ];
        let sorted = sort(&main, &plugins);
        assert_eq!(
            names(&sorted),
            vec![MAIN_DESCRIPTOR, "Top.script", "Apps/Net/Bar.script", "Apps/Net/Foo.script"]
        );
    }

    #[test]
    fn plugins_precede_directories_within_a_level() {
        let main = plugin(MAIN_DESCRIPTOR, MAIN_LEVEL);
        let plugins = vec![
            plugin("Apps/Zed.script", 3),
            plugin("Zoo.script", 3),
            plugin("Apps/Alpha.script", 3),
            plugin("Base.script", 2),
        ];
        let sorted = sort(&main, &plugins);
        assert_eq!(
            names(&sorted),
            vec![
                MAIN_DESCRIPTOR,
                "Base.script",
                "Zoo.script",
                "Apps/Alpha.script",
                "Apps/Zed.script"
            ]
        );
    }

    #[test]
    fn same_folder_on_two_levels_yields_two_groups() {
        let main = plugin(MAIN_DESCRIPTOR, MAIN_LEVEL);
        let plugins = vec![
            plugin("Apps/Late.script", 9),
            plugin("Apps/Early.script", 1),
            plugin("Mid.script", 5),
        ];
        let sorted = sort(&main, &plugins);
        assert_eq!(
            names(&sorted),
            vec![MAIN_DESCRIPTOR, "Apps/Early.script", "Mid.script", "Apps/Late.script"]
        );
    }

    #[test]
    fn links_sort_like_plugins_and_directories_are_dropped() {
        let main = plugin(MAIN_DESCRIPTOR, MAIN_LEVEL);
        let stray = Arc::new(Plugin::directory(
            PathBuf::from(ROOT).join("Apps"),
            "Demo/Apps",
            "Demo",
            1,
        ));
        let plugins = vec![plugin("B.link", 1), plugin("A.script", 1), stray];
        let sorted = sort(&main, &plugins);
        assert_eq!(names(&sorted), vec![MAIN_DESCRIPTOR, "A.script", "B.link"]);
    }

    #[test]
    fn comparator_orders_by_level_then_kind_then_path() {
        let dir = Plugin::directory(PathBuf::from(ROOT).join("A"), "Demo/A", "Demo", 1);
        let file = plugin("Z.script", 1);
        let lower = plugin("Zz.script", 0);
        assert_eq!(compare_plugins(&file, &dir), Ordering::Less);
        assert_eq!(compare_plugins(&dir, &file), Ordering::Greater);
        assert_eq!(compare_plugins(&lower, &dir), Ordering::Less);
        assert_eq!(
            compare_plugins(&plugin("apps.script", 1), &plugin("Bar.script", 1)),
            Ordering::Less
        );
    }
}
