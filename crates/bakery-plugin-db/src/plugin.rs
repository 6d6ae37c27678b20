use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Reserved level of a project's main descriptor.
pub const MAIN_LEVEL: i32 = -256;
/// File name of the descriptor every project directory must contain.
pub const MAIN_DESCRIPTOR: &str = "script.project";
pub const SCRIPT_EXTENSION: &str = "script";
pub const PLUGIN_EXTENSION: &str = "bakery";
pub const LINK_EXTENSION: &str = "link";
pub const MAIN_SECTION: &str = "Main";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub enum PluginType {
    Plugin,
    Link,
    Directory,
}

impl PluginType {
    /// Infers the on-disk variant of a file. Only the link extension yields a link.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case(LINK_EXTENSION) => Self::Link,
            _ => Self::Plugin,
        }
    }

    pub fn is_candidate_extension(ext: &str) -> bool {
        [SCRIPT_EXTENSION, PLUGIN_EXTENSION, LINK_EXTENSION]
            .iter()
            .any(|known| ext.eq_ignore_ascii_case(known))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash, Default)]
pub enum SelectedState {
    /// No selection is offered; the plugin is never active on its own.
    Unset,
    #[default]
    True,
    False,
}

impl SelectedState {
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("true") {
            Some(Self::True)
        } else if value.eq_ignore_ascii_case("false") {
            Some(Self::False)
        } else if value.eq_ignore_ascii_case("none") {
            Some(Self::Unset)
        } else {
            None
        }
    }
}

/// Resolution state carried only by link plugins.
///
/// The target is always a plugin-variant terminal, so holding it by `Arc` cannot form a
/// cycle. It is never persisted: cached links are re-resolved on every load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkState {
    #[serde(skip)]
    target: Option<Arc<Plugin>>,
}

impl LinkState {
    pub fn target(&self) -> Option<&Arc<Plugin>> {
        self.target.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PluginKind {
    Plugin,
    Link(LinkState),
    /// Synthetic grouping node created while ordering a project. Never persisted.
    Directory,
}

impl PluginKind {
    pub fn from_type(plugin_type: PluginType) -> Self {
        match plugin_type {
            PluginType::Plugin => Self::Plugin,
            PluginType::Link => Self::Link(LinkState::default()),
            PluginType::Directory => Self::Directory,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub name: String,
    /// `key=value` lines in file order.
    pub entries: Vec<(String, String)>,
    /// Every non-empty, non-comment line in file order, including the `key=value` ones.
    pub lines: Vec<String>,
}

impl Section {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
            lines: Vec::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(key))
            .map(|(_, value)| value.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sections(Vec<Section>);

impl Sections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Section> {
        self.0
            .iter()
            .find(|section| section.name.eq_ignore_ascii_case(name))
    }

    /// Returns the named section, appending an empty one if it does not exist yet.
    pub fn entry(&mut self, name: &str) -> &mut Section {
        let index = match self
            .0
            .iter()
            .position(|section| section.name.eq_ignore_ascii_case(name))
        {
            Some(index) => index,
            None => {
                self.0.push(Section::new(name));
                self.0.len() - 1
            }
        };
        &mut self.0[index]
    }

    pub fn value(&self, section: &str, key: &str) -> Option<&str> {
        self.get(section).and_then(|section| section.get(key))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Section> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A loadable unit of a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plugin {
    pub kind: PluginKind,
    pub full_path: PathBuf,
    /// Path relative to the projects root, starting with the project name.
    pub short_path: String,
    /// Name of the owning project.
    pub project: String,
    pub level: i32,
    pub is_main: bool,
    pub selected: SelectedState,
    pub mandatory: bool,
    pub sections: Sections,
}

impl Plugin {
    pub fn new(
        plugin_type: PluginType,
        full_path: impl Into<PathBuf>,
        short_path: impl Into<String>,
        project: impl Into<String>,
    ) -> Self {
        Self {
            kind: PluginKind::from_type(plugin_type),
            full_path: full_path.into(),
            short_path: short_path.into(),
            project: project.into(),
            level: 0,
            is_main: false,
            selected: SelectedState::default(),
            mandatory: false,
            sections: Sections::new(),
        }
    }

    /// Builds a synthetic directory node for the project ordering tree.
    pub fn directory(
        full_path: impl Into<PathBuf>,
        short_path: impl Into<String>,
        project: impl Into<String>,
        level: i32,
    ) -> Self {
        let mut plugin = Self::new(PluginType::Directory, full_path, short_path, project);
        plugin.level = level;
        plugin
    }

    pub fn plugin_type(&self) -> PluginType {
        match self.kind {
            PluginKind::Plugin => PluginType::Plugin,
            PluginKind::Link(_) => PluginType::Link,
            PluginKind::Directory => PluginType::Directory,
        }
    }

    pub fn is_link(&self) -> bool {
        matches!(self.kind, PluginKind::Link(_))
    }

    pub fn is_directory(&self) -> bool {
        matches!(self.kind, PluginKind::Directory)
    }

    pub fn main_section(&self) -> Option<&Section> {
        self.sections.get(MAIN_SECTION)
    }

    /// Target path a link declares in its `[Main]` section, relative to the base directory.
    pub fn declared_link(&self) -> Option<&str> {
        self.sections
            .value(MAIN_SECTION, "Link")
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn link_target(&self) -> Option<&Arc<Plugin>> {
        match &self.kind {
            PluginKind::Link(state) => state.target(),
            _ => None,
        }
    }

    pub fn link_loaded(&self) -> bool {
        self.link_target().is_some()
    }

    /// Points a link directly at its terminal plugin. Returns `false` for non-link plugins
    /// and for targets that are not plugin-variant terminals.
    pub fn set_link_target(&mut self, target: Arc<Plugin>) -> bool {
        if target.plugin_type() != PluginType::Plugin {
            return false;
        }
        match &mut self.kind {
            PluginKind::Link(state) => {
                state.target = Some(target);
                true
            }
            _ => false,
        }
    }

    /// The short path with the leading project name removed.
    pub fn project_relative_path(&self) -> &str {
        match self.short_path.find(['/', '\\']) {
            Some(index) => &self.short_path[index + 1..],
            None => &self.short_path,
        }
    }

    /// Directory part of the short path, used as the progress label.
    pub fn short_dir(&self) -> Option<&str> {
        self.short_path
            .rfind(['/', '\\'])
            .map(|index| &self.short_path[..index])
    }

    pub fn title(&self) -> String {
        self.sections
            .value(MAIN_SECTION, "Title")
            .map(|title| title.trim().to_owned())
            .filter(|title| !title.is_empty())
            .unwrap_or_else(|| {
                self.full_path
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_else(|| self.short_path.clone())
            })
    }
}

/// Path of `path` relative to `base`, with `/` separators.
///
/// `None` when `path` is not under `base` or still carries `..` or root components, so two
/// spellings of one file never produce different keys.
pub fn relative_key(base: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(base).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Normalizes a user supplied relative path (`Apps\Net\..\Foo.script`) to `/` separators,
/// resolving `.` and `..` lexically.
///
/// `None` when the path is empty or climbs above its root.
pub fn normalize_key(path: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            part if parts.is_empty() && part.ends_with(':') => return None,
            part => parts.push(part),
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
