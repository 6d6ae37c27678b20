use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use bakery_project::{CancelToken, CollectionConfig, LoadStatus};
use bakery_scanner::{render_project, ScanOptions, Scanner, View};

#[derive(Parser, Debug)]
#[command(name = "bakery-scanner")]
struct Args {
    /// Base directory holding the `Projects` folder
    #[arg(long, value_name = "DIR")]
    base_dir: Option<PathBuf>,

    /// JSON config file, defaults to the per-user config if present
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Cache table location
    #[arg(long, value_name = "FILE")]
    cache: Option<PathBuf>,

    /// Parse every file, ignoring the cache table
    #[arg(long)]
    no_cache: bool,

    /// Worker pool size
    #[arg(long, value_name = "N")]
    threads: Option<usize>,

    /// Only load the named projects
    #[arg(long = "project", value_name = "NAME")]
    projects: Vec<String>,

    #[arg(long, value_enum, default_value_t = View::All)]
    view: View,
}

fn load_config(args: &Args) -> anyhow::Result<CollectionConfig> {
    let from_file = match &args.config {
        Some(path) => Some(
            CollectionConfig::from_file(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
        ),
        None => match CollectionConfig::default_path() {
            Ok(path) if path.is_file() => Some(CollectionConfig::from_file(&path)?),
            _ => None,
        },
    };

    let mut config = match (from_file, &args.base_dir) {
        (Some(mut config), Some(base_dir)) => {
            config.base_dir = base_dir.clone();
            config
        }
        (Some(config), None) => config,
        (None, Some(base_dir)) => CollectionConfig::new(base_dir),
        (None, None) => bail!("no base directory given; pass --base-dir or --config"),
    };
    if let Some(cache) = &args.cache {
        config.cache_path = Some(cache.clone());
    }
    if args.no_cache {
        config.use_cache = false;
    }
    if args.threads.is_some() {
        config.worker_threads = args.threads;
    }
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let args = Args::parse();
    let mut options = ScanOptions::new(load_config(&args)?);
    options.projects = args.projects.clone();

    let outcome = Scanner::new(options).run(&CancelToken::new())?;
    for project in outcome.collection.projects() {
        print!("{}", render_project(&project, args.view));
    }
    for failure in outcome.collection.failed() {
        eprintln!("{}: {}", failure.project, failure.error);
    }

    let progress = outcome.progress;
    println!(
        "{} projects, {} plugins ({} parsed, {} cached, {} links from cache, {} invalid links)",
        outcome.summary.projects,
        outcome.summary.plugins,
        progress.get(LoadStatus::Parsed),
        progress.get(LoadStatus::CacheHit),
        progress.get(LoadStatus::LinkCacheHit),
        progress.get(LoadStatus::LinkInvalid),
    );
    Ok(())
}
