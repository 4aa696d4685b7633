// Infrastructure layer
pub mod chunk_splitter;
pub mod emitter;
pub mod file_system;
pub mod graph;
pub mod processors;
pub mod resolver;

pub use chunk_splitter::*;
pub use emitter::*;
pub use file_system::*;
pub use graph::*;
pub use processors::*;
pub use resolver::*;
