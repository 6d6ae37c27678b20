//! Resolution of link plugins to their terminal plugin.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use rayon::prelude::*;
use thiserror::Error;

use bakery_plugin_db::{normalize_key, relative_key, ParseError, Plugin, PluginType};

use crate::loader::LoadContext;
use crate::progress::LoadStatus;

/// Upper bound on links followed from one link before giving up.
pub const MAX_LINK_HOPS: usize = 32;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("{0} does not declare a link target")]
    MissingDeclaration(String),
    #[error("link target {0} leaves the base directory")]
    OutsideBase(String),
    #[error("link target {} does not exist", .0.display())]
    MissingTarget(PathBuf),
    #[error("link target {} failed to parse: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: ParseError,
    },
    #[error("link chain returns to {0}")]
    Cycle(String),
    #[error("link chain exceeds the hop limit")]
    TooManyHops,
    #[error("link resolution cancelled")]
    Cancelled,
}

/// Terminal plugin reached from a link.
#[derive(Debug)]
pub struct Resolved {
    pub target: Plugin,
    /// At least one hop was served from the cache.
    pub cached: bool,
}

/// Follows the declared targets of `link` until a plugin-variant terminal is reached.
///
/// Every hop is loaded cache-first. Targets are resolved lexically against the base directory
/// and may not climb out of it. Revisiting a path or exceeding [`MAX_LINK_HOPS`] fails.
pub fn follow_chain(ctx: &LoadContext<'_>, link: &Plugin) -> Result<Resolved, LinkError> {
    let mut visited = HashSet::new();
    if let Some(own) = relative_key(ctx.base_dir, &link.full_path) {
        visited.insert(own.to_lowercase());
    }
    let mut declared = link
        .declared_link()
        .ok_or_else(|| LinkError::MissingDeclaration(link.short_path.clone()))?
        .to_owned();
    let mut cached = false;

    for _ in 0..MAX_LINK_HOPS {
        if ctx.cancel.is_cancelled() {
            return Err(LinkError::Cancelled);
        }
        let key = normalize_key(&declared)
            .ok_or_else(|| LinkError::OutsideBase(declared.clone()))?;
        let full_path = ctx.base_dir.join(&key);
        if !full_path.is_file() {
            return Err(LinkError::MissingTarget(full_path));
        }
        if !visited.insert(key.to_lowercase()) {
            return Err(LinkError::Cycle(key));
        }

        let target = match ctx.cached(&link.project, &full_path) {
            Some(target) => {
                cached = true;
                target
            }
            None => ctx
                .parser
                .parse(&ctx.request(&link.project, &full_path))
                .map_err(|source| LinkError::Parse {
                    path: full_path.clone(),
                    source,
                })?,
        };

        match target.plugin_type() {
            PluginType::Plugin => return Ok(Resolved { target, cached }),
            PluginType::Link => {
                declared = target
                    .declared_link()
                    .ok_or_else(|| LinkError::MissingDeclaration(target.short_path.clone()))?
                    .to_owned();
            }
            PluginType::Directory => return Err(LinkError::MissingTarget(full_path)),
        }
    }
    Err(LinkError::TooManyHops)
}

/// Returns a copy of `link` pointing straight at `resolved`.
///
/// A link that does not declare a level of its own takes the level of its target.
pub fn bind(link: &Plugin, resolved: Plugin) -> Plugin {
    let declares_level = link
        .main_section()
        .is_some_and(|main| main.contains_key("Level"));
    let mut bound = link.clone();
    if !declares_level {
        bound.level = resolved.level;
    }
    bound.set_link_target(Arc::new(resolved));
    bound
}

/// One link waiting for resolution, addressed by its position in its project's list.
#[derive(Debug, Clone)]
pub struct LinkJob {
    pub project: String,
    pub index: usize,
    pub link: Arc<Plugin>,
}

#[derive(Debug)]
pub struct LinkOutcome {
    pub project: String,
    pub index: usize,
    /// Replacement for the link, or the reason it has to be dropped.
    pub result: Result<Plugin, LinkError>,
}

/// Resolves every job on the current rayon pool and returns once all of them finished.
/// Nothing is published here; callers apply the outcomes afterwards.
pub fn resolve_all(ctx: &LoadContext<'_>, jobs: Vec<LinkJob>) -> Vec<LinkOutcome> {
    jobs.into_par_iter()
        .map(|job| {
            let result = follow_chain(ctx, &job.link).map(|resolved| {
                let status = if resolved.cached {
                    LoadStatus::LinkCacheHit
                } else {
                    LoadStatus::Parsed
                };
                ctx.progress.report(status, job.link.short_dir());
                bind(&job.link, resolved.target)
            });
            if let Err(err) = &result {
                tracing::warn!(
                    project = %job.project,
                    link = %job.link.short_path,
                    error = %err,
                    "dropping unresolved link"
                );
                ctx.progress.report(LoadStatus::LinkInvalid, None);
            }
            LinkOutcome {
                project: job.project,
                index: job.index,
                result,
            }
        })
        .collect()
}

/// Swaps resolved links into `plugins` and removes the failed ones.
///
/// Removal runs in descending index order so earlier indices stay valid.
pub fn apply_outcomes(plugins: &mut Vec<Arc<Plugin>>, outcomes: Vec<LinkOutcome>) -> usize {
    let mut removals = Vec::new();
    for outcome in outcomes {
        match outcome.result {
            Ok(bound) if outcome.index < plugins.len() => {
                plugins[outcome.index] = Arc::new(bound);
            }
            Ok(_) => {}
            Err(_) => removals.push(outcome.index),
        }
    }
    removals.sort_unstable_by(|a, b| b.cmp(a));
    removals.dedup();
    let mut removed = 0;
    for index in removals {
        if index < plugins.len() {
            plugins.remove(index);
            removed += 1;
        }
    }
    removed
}
