//! Plugin records, parsing, directory scanning and the persisted parse cache.

mod cache;
mod parse;
mod plugin;
mod scan;

pub use cache::*;
pub use parse::*;
pub use plugin::*;
pub use scan::*;
