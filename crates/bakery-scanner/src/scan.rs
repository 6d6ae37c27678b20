use std::thread;

use anyhow::{Context, Result};
use crossbeam_channel::Receiver;

use bakery_project::{
    CancelToken, ChannelProgress, CollectionConfig, LoadStatus, LoadSummary, PrepareReport,
    ProgressEvent, ProjectCollection,
};

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub config: CollectionConfig,
    /// Project names to load. Empty loads every project.
    pub projects: Vec<String>,
}

impl ScanOptions {
    pub fn new(config: CollectionConfig) -> Self {
        Self {
            config,
            projects: Vec::new(),
        }
    }
}

/// Number of progress events received per status code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressCounts {
    pub by_status: [usize; 4],
}

impl ProgressCounts {
    pub fn get(&self, status: LoadStatus) -> usize {
        self.by_status[usize::from(status.code())]
    }

    pub fn total(&self) -> usize {
        self.by_status.iter().sum()
    }

    fn drain(rx: Receiver<ProgressEvent>) -> Self {
        let mut counts = Self::default();
        for event in rx {
            tracing::trace!(
                status = event.status.code(),
                label = event.label.as_deref().unwrap_or(""),
                "progress"
            );
            counts.by_status[usize::from(event.status.code())] += 1;
        }
        counts
    }
}

pub struct ScanOutcome {
    pub report: PrepareReport,
    pub summary: LoadSummary,
    pub progress: ProgressCounts,
    pub collection: ProjectCollection,
}

pub struct Scanner {
    options: ScanOptions,
}

impl Scanner {
    pub fn new(options: ScanOptions) -> Self {
        Self { options }
    }

    /// Scans and loads the collection while a scoped thread drains progress events.
    pub fn run(&self, cancel: &CancelToken) -> Result<ScanOutcome> {
        let config = &self.options.config;
        let mut collection = ProjectCollection::new(config)
            .context("failed to set up project collection")?
            .only_projects(self.options.projects.clone());
        let report = collection.prepare_load().with_context(|| {
            format!(
                "failed to scan projects in {}",
                config.projects_root().display()
            )
        })?;

        let (sink, rx) = ChannelProgress::new();
        let (summary, progress) = thread::scope(|scope| {
            let consumer = scope.spawn(move || ProgressCounts::drain(rx));
            let summary = collection.load(&sink, cancel);
            drop(sink);
            let progress = consumer.join().unwrap_or_default();
            (summary, progress)
        });
        let summary = summary.context("failed to load projects")?;

        Ok(ScanOutcome {
            report,
            summary,
            progress,
            collection,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn run_reports_progress_for_every_unit() {
        let dir = tempdir().unwrap();
        for (relative, body) in [
            ("Projects/Demo/script.project", "[Main]\n"),
            ("Projects/Demo/A.script", "[Main]\nLevel=1\n"),
            ("Projects/Demo/B.link", "[Main]\nLink=Projects/Demo/A.script\n"),
        ] {
            let path = dir.path().join(relative);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, body).unwrap();
        }
        let mut config = CollectionConfig::new(dir.path());
        config.use_cache = false;
        let outcome = Scanner::new(ScanOptions::new(config))
            .run(&CancelToken::new())
            .unwrap();

        assert_eq!(outcome.report.expected_reports(), 4);
        assert_eq!(outcome.progress.total(), 4);
        assert_eq!(outcome.progress.get(LoadStatus::Parsed), 4);
        assert_eq!(outcome.summary.plugins, 3);
        assert_eq!(outcome.collection.project_names(), vec!["Demo"]);
    }

    #[test]
    fn missing_projects_directory_is_an_error() {
        let dir = tempdir().unwrap();
        let result = Scanner::new(ScanOptions::new(CollectionConfig::new(dir.path())))
            .run(&CancelToken::new());
        assert!(result.is_err());
    }
}
