use std::collections::BTreeMap;
use std::path::Path;

use bakery_plugin_db::Plugin;

pub const VARIABLES_SECTION: &str = "Variables";

/// Deepest chain of variables expanded inside one another.
pub const MAX_EXPANSION_DEPTH: usize = 16;
/// Output length after which no further references are substituted.
pub const MAX_EXPANDED_LEN: usize = 64 * 1024;

/// Project level `%Name%` variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Variables {
    // lowercase name -> (name as declared, value)
    values: BTreeMap<String, (String, String)>,
}

fn normalize_name(name: &str) -> String {
    name.trim().trim_matches('%').to_lowercase()
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixed project variables plus every entry of the main plugin's `[Variables]` section.
    pub fn for_project(name: &str, base_dir: &Path, project_dir: &Path, main: &Plugin) -> Self {
        let mut variables = Self::new();
        variables.set("BaseDir", base_dir.display().to_string());
        variables.set("ProjectDir", project_dir.display().to_string());
        variables.set("ProjectName", name);
        if let Some(section) = main.sections.get(VARIABLES_SECTION) {
            for (key, value) in &section.entries {
                variables.set(key, value.as_str());
            }
        }
        variables
    }

    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let declared = name.trim().trim_matches('%').to_owned();
        if declared.is_empty() {
            return;
        }
        self.values
            .insert(normalize_name(name), (declared, value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .get(&normalize_name(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.values
            .remove(&normalize_name(name))
            .map(|(_, value)| value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(&normalize_name(name))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values
            .values()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Replaces `%Name%` references with their values, expanding references inside values too.
    ///
    /// Unknown names are left as written, as is a name referenced from its own expansion.
    /// Nesting stops at [`MAX_EXPANSION_DEPTH`] and substitution stops once the output reaches
    /// [`MAX_EXPANDED_LEN`] bytes; the rest is copied verbatim.
    pub fn expand(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut stack = Vec::new();
        self.expand_into(text, &mut stack, &mut out);
        out
    }

    fn expand_into(&self, text: &str, stack: &mut Vec<String>, out: &mut String) {
        let mut rest = text;
        while let Some(start) = rest.find('%') {
            out.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            let Some(end) = after.find('%') else {
                out.push_str(&rest[start..]);
                return;
            };
            let name = &after[..end];
            let key = normalize_name(name);
            let expandable = !name.is_empty()
                && out.len() < MAX_EXPANDED_LEN
                && stack.len() < MAX_EXPANSION_DEPTH
                && !stack.contains(&key);
            match self.values.get(&key).filter(|_| expandable) {
                Some((_, value)) => {
                    stack.push(key);
                    self.expand_into(value, stack, out);
                    stack.pop();
                    rest = &after[end + 1..];
                }
                None => {
                    // Keep the opening `%`; the closing one may start a real reference.
                    out.push('%');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
    }
}
