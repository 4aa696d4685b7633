// Plugin hooks for kiln
// Plugins run around the core pipeline; they see the manifest and may add files to the output

use crate::core::models::{BuildConfig, BuildResult, Manifest};
use crate::infrastructure::RenderedFile;
use crate::utils::Result;
use std::path::PathBuf;
use std::sync::Arc;

/// What a plugin knows about the build it is attached to
#[derive(Debug, Clone)]
pub struct PluginContext {
    pub root: PathBuf,
    pub output_dir: PathBuf,
    pub config: Arc<BuildConfig>,
}

impl PluginContext {
    pub fn from_config(config: &BuildConfig) -> Self {
        Self {
            root: config.root.clone(),
            output_dir: config.output.dir.clone(),
            config: Arc::new(config.clone()),
        }
    }
}

/// Build-lifecycle hook.
///
/// `prepare` runs before resolution starts, `extra_files` once every chunk is
/// rendered but before anything is written, and `finish` once the
/// [`BuildResult`] is assembled. An error from any hook fails the build.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn prepare(&self, _ctx: &PluginContext) -> Result<()> {
        Ok(())
    }

    /// Files to add to the output directory, named relative to it
    fn extra_files(&self, _ctx: &PluginContext, _manifest: &Manifest) -> Result<Vec<RenderedFile>> {
        Ok(Vec::new())
    }

    fn finish(&self, _ctx: &PluginContext, _result: &BuildResult) -> Result<()> {
        Ok(())
    }
}

/// Ordered set of plugins attached to one build
#[derive(Default)]
pub struct PluginManager {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        tracing::debug!("🔌 Plugin registered: {}", plugin.name());
        self.plugins.push(plugin);
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    pub fn prepare(&self, ctx: &PluginContext) -> Result<()> {
        self.plugins.iter().try_for_each(|p| p.prepare(ctx))
    }

    /// Generated files from every plugin, in registration order
    pub fn extra_files(&self, ctx: &PluginContext, manifest: &Manifest) -> Result<Vec<RenderedFile>> {
        let mut files = Vec::new();
        for plugin in &self.plugins {
            files.extend(plugin.extra_files(ctx, manifest)?);
        }
        Ok(files)
    }

    pub fn finish(&self, ctx: &PluginContext, result: &BuildResult) -> Result<()> {
        self.plugins.iter().try_for_each(|p| p.finish(ctx, result))
    }
}
