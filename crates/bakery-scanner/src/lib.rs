//! Command line front end that loads a project collection and prints its canonical order.

mod render;
mod scan;

pub use render::*;
pub use scan::*;
