//! Parallel project loading: plugin batches, link resolution and canonical ordering.

pub mod cancel;
pub mod collection;
pub mod config;
pub mod error;
pub mod link;
pub mod loader;
pub mod progress;
pub mod project;
pub mod tree;
pub mod variables;

pub use cancel::CancelToken;
pub use collection::{LoadSummary, PrepareReport, ProjectCollection, ProjectFailure};
pub use config::{CollectionConfig, ConfigError};
pub use error::{CollectionError, LoadError};
pub use link::{LinkError, MAX_LINK_HOPS};
pub use loader::{LoadContext, PluginLoader};
pub use progress::{ChannelProgress, LoadStatus, NullProgress, ProgressEvent, ProgressSink, ProgressTally};
pub use project::{LoadStats, Project};
pub use tree::{compare_plugins, ProjectTreeBuilder};
pub use variables::{Variables, MAX_EXPANDED_LEN, MAX_EXPANSION_DEPTH};
