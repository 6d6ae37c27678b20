use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::plugin::{PluginType, LINK_EXTENSION, MAIN_DESCRIPTOR, SCRIPT_EXTENSION};

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{} has no main descriptor", .0.display())]
    MissingMainDescriptor(PathBuf),
}

/// Plugin paths discovered in one project directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectScan {
    pub name: String,
    pub dir: PathBuf,
    pub main: PathBuf,
    /// Main descriptor first, then scripts, plugins and links.
    pub paths: Vec<PathBuf>,
    pub link_count: usize,
}

impl ProjectScan {
    pub fn main_descriptor(&self) -> &Path {
        &self.main
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PathScanner;

impl PathScanner {
    pub fn new() -> Self {
        Self
    }

    /// Returns the main descriptor followed by every candidate plugin file below `dir`.
    pub fn scan(&self, dir: &Path) -> Result<ProjectScan, ScanError> {
        let main = dir.join(MAIN_DESCRIPTOR);
        if !main.is_file() {
            return Err(ScanError::MissingMainDescriptor(dir.to_path_buf()));
        }

        let mut scripts = Vec::new();
        let mut plugins = Vec::new();
        let mut links = Vec::new();
        for entry in WalkDir::new(dir) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    log::debug!("skipping entry while scanning {}: {}", dir.display(), err);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(ext) = entry.path().extension().and_then(|ext| ext.to_str()) else {
                continue;
            };
            if !PluginType::is_candidate_extension(ext) {
                continue;
            }
            if ext.eq_ignore_ascii_case(SCRIPT_EXTENSION) {
                scripts.push(entry.into_path());
            } else if ext.eq_ignore_ascii_case(LINK_EXTENSION) {
                links.push(entry.into_path());
            } else {
                plugins.push(entry.into_path());
            }
        }
        scripts.sort();
        plugins.sort();
        links.sort();

        let link_count = links.len();
        let mut paths = Vec::with_capacity(1 + scripts.len() + plugins.len() + link_count);
        paths.push(main.clone());
        paths.extend(scripts);
        paths.extend(plugins);
        paths.extend(links);

        Ok(ProjectScan {
            name: dir
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            dir: dir.to_path_buf(),
            main,
            paths,
            link_count,
        })
    }
}

/// Names of every directory under `projects_root` holding a main descriptor, sorted.
/// Directories without one are returned separately so callers can report them.
pub fn list_projects(projects_root: &Path) -> Result<(Vec<String>, Vec<ScanError>), ScanError> {
    let mut names = Vec::new();
    let mut rejected = Vec::new();
    for entry in fs::read_dir(projects_root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let dir = entry.path();
        if dir.join(MAIN_DESCRIPTOR).is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        } else {
            rejected.push(ScanError::MissingMainDescriptor(dir));
        }
    }
    names.sort();
    Ok((names, rejected))
}
