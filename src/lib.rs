// kiln - module-graph bundler library
// Resolver -> transform pipeline -> graph builder -> chunk splitter -> emitter

pub mod cli;
pub mod core;
pub mod infrastructure;
pub mod plugins;
pub mod utils;

pub use crate::core::{BuildService, BundlerService};
pub use crate::utils::{KilnError, Result};
