use std::fs;
use std::path::Path;

use crate::plugin::{relative_key, Plugin, PluginType, SelectedState, MAIN_LEVEL, MAIN_SECTION};

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{path} is not valid UTF-8")]
    Encoding { path: String },
    #[error("{path} has no [{section}] section")]
    MissingSection { path: String, section: &'static str },
    #[error("{path} is missing {section}.{key}")]
    MissingKey {
        path: String,
        section: &'static str,
        key: &'static str,
    },
    #[error("{path}: invalid value {value:?} for {key}")]
    InvalidValue {
        path: String,
        key: &'static str,
        value: String,
    },
}

/// Everything a parser needs to turn one file into a [`Plugin`].
#[derive(Debug, Clone, Copy)]
pub struct ParseRequest<'a> {
    pub path: &'a Path,
    pub plugin_type: PluginType,
    pub project: &'a str,
    /// Directory holding every project; short paths are computed against it.
    pub projects_root: &'a Path,
    pub is_main: bool,
    /// Accept files without a `[Main]` section.
    pub ignore_main_check: bool,
}

impl<'a> ParseRequest<'a> {
    pub fn new(
        path: &'a Path,
        plugin_type: PluginType,
        project: &'a str,
        projects_root: &'a Path,
    ) -> Self {
        Self {
            path,
            plugin_type,
            project,
            projects_root,
            is_main: false,
            ignore_main_check: false,
        }
    }

    pub fn main(mut self, is_main: bool) -> Self {
        self.is_main = is_main;
        self
    }

    pub fn ignore_main_check(mut self, ignore: bool) -> Self {
        self.ignore_main_check = ignore;
        self
    }

    /// Short path of the requested file, falling back to the full path outside the root.
    pub fn short_path(&self) -> String {
        relative_key(self.projects_root, self.path)
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Turns a plugin file into a structured record. Implementations must be usable from
/// many worker threads at once.
pub trait PluginParser: Send + Sync {
    fn parse(&self, request: &ParseRequest<'_>) -> Result<Plugin, ParseError>;
}

/// Reference parser for INI-style plugin files.
///
/// ```text
/// [Main]
/// Title=Firefox
/// Level=5
/// Selected=True
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct IniParser;

impl PluginParser for IniParser {
    fn parse(&self, request: &ParseRequest<'_>) -> Result<Plugin, ParseError> {
        let raw = fs::read(request.path)?;
        let text = String::from_utf8(raw).map_err(|_| ParseError::Encoding {
            path: request.path.display().to_string(),
        })?;
        parse_text(&text, request)
    }
}

/// Parses already loaded plugin text.
pub fn parse_text(text: &str, request: &ParseRequest<'_>) -> Result<Plugin, ParseError> {
    let display = request.path.display().to_string();
    let mut plugin = Plugin::new(
        request.plugin_type,
        request.path,
        request.short_path(),
        request.project,
    );
    plugin.is_main = request.is_main;

    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut current: Option<String> = None;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || is_comment(line) {
            continue;
        }
        if let Some(name) = line
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
        {
            let name = name.trim().to_owned();
            plugin.sections.entry(&name);
            current = Some(name);
            continue;
        }
        let Some(name) = current.as_deref() else {
            log::trace!("{display}: ignoring line outside of any section");
            continue;
        };
        let section = plugin.sections.entry(name);
        if let Some((key, value)) = line.split_once('=') {
            section
                .entries
                .push((key.trim().to_owned(), value.trim().to_owned()));
        }
        section.lines.push(line.to_owned());
    }

    let main = plugin.sections.get(MAIN_SECTION).cloned();
    let Some(main) = main else {
        if request.ignore_main_check {
            plugin.level = if request.is_main { MAIN_LEVEL } else { 0 };
            return Ok(plugin);
        }
        return Err(ParseError::MissingSection {
            path: display,
            section: MAIN_SECTION,
        });
    };

    if request.plugin_type == PluginType::Link && plugin.declared_link().is_none() {
        return Err(ParseError::MissingKey {
            path: display,
            section: MAIN_SECTION,
            key: "Link",
        });
    }

    plugin.level = if request.is_main {
        MAIN_LEVEL
    } else {
        match main.get("Level") {
            Some(value) => value
                .trim()
                .parse::<i32>()
                .map_err(|_| ParseError::InvalidValue {
                    path: display.clone(),
                    key: "Level",
                    value: value.to_owned(),
                })?,
            None => 0,
        }
    };

    if let Some(value) = main.get("Selected") {
        plugin.selected = SelectedState::parse(value).ok_or_else(|| ParseError::InvalidValue {
            path: display.clone(),
            key: "Selected",
            value: value.to_owned(),
        })?;
    }
    plugin.mandatory = main
        .get("Mandatory")
        .map(|value| value.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    Ok(plugin)
}

fn is_comment(line: &str) -> bool {
    line.starts_with("//") || line.starts_with('#') || line.starts_with(';')
}
