use crate::core::interfaces::{BuildService, ChunkPolicy, FileSystemService, ModuleResolver};
use crate::core::models::*;
use crate::core::plugin::{Plugin, PluginContext, PluginManager};
use crate::infrastructure::{
    detect_cycles, EmitOptions, Emitter, GraphBuilder, MinChunksPolicy, NodeModuleResolver,
    TransformRegistry,
};
use crate::plugins::{CopyPlugin, HtmlPlugin};
use crate::utils::{KilnError, Logger, Result, Timer};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Output directories owned by a running build in this process
static ACTIVE_OUTPUTS: Lazy<Mutex<HashSet<PathBuf>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// Exclusive claim on an output directory, released on drop
struct OutputGuard {
    dir: PathBuf,
}

impl OutputGuard {
    fn acquire(dir: &Path) -> Result<Self> {
        let dir = normalize_path(dir);
        if !ACTIVE_OUTPUTS.lock().insert(dir.clone()) {
            return Err(KilnError::OutputLocked(dir));
        }
        Ok(Self { dir })
    }
}

impl Drop for OutputGuard {
    fn drop(&mut self) {
        ACTIVE_OUTPUTS.lock().remove(&self.dir);
    }
}

/// Main build service: resolve, transform, split, emit
pub struct BundlerService {
    fs_service: Arc<dyn FileSystemService>,
    chunk_policy: Option<Arc<dyn ChunkPolicy>>,
    plugins: Vec<Arc<dyn Plugin>>,
    state: Mutex<BuildState>,
    history: Mutex<Vec<BuildState>>,
}

impl BundlerService {
    pub fn new(fs_service: Arc<dyn FileSystemService>) -> Self {
        Self {
            fs_service,
            chunk_policy: None,
            plugins: Vec::new(),
            state: Mutex::new(BuildState::Idle),
            history: Mutex::new(vec![BuildState::Idle]),
        }
    }

    /// Replace the default min-chunks policy
    pub fn with_chunk_policy(mut self, policy: Arc<dyn ChunkPolicy>) -> Self {
        self.chunk_policy = Some(policy);
        self
    }

    /// Add a plugin after the built-in ones
    pub fn with_plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// States visited by the last build, starting at `Idle`
    pub fn state_history(&self) -> Vec<BuildState> {
        self.history.lock().clone()
    }

    fn transition(&self, to: BuildState) {
        let mut state = self.state.lock();
        Logger::state(state.as_str(), to.as_str());
        *state = to;
        self.history.lock().push(to);
    }

    /// Built-in plugins for the mode, then user plugins
    fn plugin_manager(&self, config: &BuildConfig) -> PluginManager {
        let mut manager = PluginManager::new();
        if let Some(html) = &config.html {
            manager.register(Arc::new(HtmlPlugin::new(html.clone())));
        }
        if !config.copy.is_empty() {
            manager.register(Arc::new(CopyPlugin::new(config.copy.clone())));
        }
        for plugin in &self.plugins {
            manager.register(plugin.clone());
        }
        manager
    }

    async fn run(&self, config: &BuildConfig) -> Result<BuildResult> {
        let start_time = Instant::now();
        config.validate()?;
        let _guard = OutputGuard::acquire(&config.output.dir)?;

        Logger::build_start(
            &config.root.display().to_string(),
            &config.output.dir.display().to_string(),
            config.mode.as_str(),
        );

        let plugin_manager = self.plugin_manager(config);
        let plugin_context = PluginContext::from_config(config);
        plugin_manager.prepare(&plugin_context)?;

        let resolver: Arc<dyn ModuleResolver> =
            Arc::new(NodeModuleResolver::new(&config.root, &config.resolve));
        let registry = Arc::new(TransformRegistry::for_config(config)?);
        let builder = GraphBuilder::new(
            &config.root,
            config.workers,
            resolver,
            registry,
            self.fs_service.clone(),
        );

        self.transition(BuildState::Resolving);
        let entries = builder.resolve_entries(&config.entries).await?;

        self.transition(BuildState::Transforming);
        let graph = builder.build(&entries).await?;
        self.transition(BuildState::GraphBuilt);

        let warnings = detect_cycles(&graph);
        for warning in &warnings {
            Logger::warn(&warning.to_string());
        }

        let policy: Arc<dyn ChunkPolicy> = match &self.chunk_policy {
            Some(policy) => policy.clone(),
            None => Arc::new(MinChunksPolicy::from_config(&config.optimization)),
        };
        let chunks = {
            let _timer = Timer::start(&format!("Splitting chunks ({})", policy.name()));
            policy.split(&graph)?
        };
        self.transition(BuildState::ChunkSplit);

        let modules_processed = builder.transform_count();
        let chunk_names: Vec<String> = chunks.chunks.iter().map(|c| c.name.clone()).collect();

        let emitter = Emitter::new(EmitOptions::from_config(config), self.fs_service.clone());
        let mut rendered = emitter.render(Arc::new(graph), Arc::new(chunks)).await?;
        // plugin files join the single write pass; a failing plugin leaves the output untouched
        let extra = plugin_manager.extra_files(&plugin_context, &rendered.manifest)?;
        rendered.files.extend(extra);
        let (manifest, output_files) = emitter.write(rendered).await?;
        self.transition(BuildState::Emitted);

        let result = BuildResult {
            mode: config.mode,
            modules_processed,
            chunks: chunk_names,
            manifest,
            output_files,
            warnings,
            build_time: start_time.elapsed(),
        };
        plugin_manager.finish(&plugin_context, &result)?;

        Logger::build_complete(
            result.modules_processed,
            result.chunks.len(),
            result.output_files.len(),
            result.build_time,
        );
        Ok(result)
    }
}

#[async_trait]
impl BuildService for BundlerService {
    async fn build(&self, config: &BuildConfig) -> Result<BuildResult> {
        *self.state.lock() = BuildState::Idle;
        *self.history.lock() = vec![BuildState::Idle];

        match self.run(config).await {
            Ok(result) => Ok(result),
            Err(e) => {
                self.transition(BuildState::Failed);
                Logger::error(&e.to_string());
                Err(e)
            }
        }
    }

    fn state(&self) -> BuildState {
        *self.state.lock()
    }
}
