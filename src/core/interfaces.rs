use crate::core::models::*;
use crate::utils::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// File system operations interface
#[async_trait]
pub trait FileSystemService: Send + Sync {
    async fn read_bytes(&self, path: &Path) -> Result<Vec<u8>>;
    async fn write_file(&self, path: &Path, content: &[u8]) -> Result<()>;
    async fn create_directory(&self, path: &Path) -> Result<()>;
    async fn remove_directory(&self, path: &Path) -> Result<()>;
}

/// Maps a specifier seen in some directory to one concrete file.
/// Implementations are synchronous; callers run them on the blocking pool.
pub trait ModuleResolver: Send + Sync {
    fn resolve(&self, specifier: &str, from_dir: &Path) -> Result<PathBuf>;
}

/// One step of a transform chain. A stage reads the unit produced by the
/// previous stage and leaves its own output in place.
pub trait TransformStage: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, unit: &mut TransformUnit) -> Result<()>;
}

/// Partitions a module graph into chunks
pub trait ChunkPolicy: Send + Sync {
    fn name(&self) -> &str;
    fn split(&self, graph: &ModuleGraph) -> Result<ChunkGraph>;
}

/// Build service interface
#[async_trait]
pub trait BuildService: Send + Sync {
    async fn build(&self, config: &BuildConfig) -> Result<BuildResult>;
    fn state(&self) -> BuildState;
}
