// Processors module
pub mod asset_processor;
pub mod common;
pub mod css_processor;
pub mod js_processor;
pub mod minifier;
pub mod pipeline;
pub mod scss_processor;
pub mod source_map;

pub use asset_processor::*;
pub use css_processor::*;
pub use js_processor::*;
pub use minifier::*;
pub use pipeline::*;
pub use scss_processor::*;
