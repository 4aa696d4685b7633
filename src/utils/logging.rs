use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

pub struct Logger;

impl Logger {
    /// Install the global subscriber. `RUST_LOG` wins over the verbosity flag.
    pub fn init(verbose: bool) {
        let default_directive = if verbose { "kiln=debug" } else { "kiln=info" };
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive));

        // A second init (tests, embedding) keeps the first subscriber
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init();
    }

    pub fn build_start(root: &str, outdir: &str, mode: &str) {
        info!("🔥 kiln - {} build", mode);
        info!("📁 Root: {}", root);
        info!("📦 Output: {}", outdir);
    }

    pub fn state(from: &str, to: &str) {
        debug!("🔁 Build state: {} -> {}", from, to);
    }

    pub fn resolving(specifier: &str, from: &str) {
        debug!("🔎 Resolving '{}' from {}", specifier, from);
    }

    pub fn transforming(name: &str, rule: &str) {
        debug!("⚡ Transforming: {} ({})", name, rule);
    }

    pub fn chunk_created(name: &str, modules: usize) {
        debug!("🧱 Chunk '{}' with {} modules", name, modules);
    }

    pub fn emitted(file: &str, size: usize) {
        info!("  • {} ({:.1}KB)", file, size as f64 / 1024.0);
    }

    pub fn build_complete(modules: usize, chunks: usize, files: usize, build_time: std::time::Duration) {
        info!("");
        info!("📊 Build Statistics:");
        info!("  • Modules: {}", modules);
        info!("  • Chunks: {}", chunks);
        info!("  • Files written: {}", files);
        info!("  • Build time: {:.2?}", build_time);
        info!("✅ Build completed successfully!");
    }

    pub fn info(msg: &str) {
        info!("{}", msg);
    }

    pub fn debug(msg: &str) {
        debug!("{}", msg);
    }

    pub fn error(msg: &str) {
        error!("❌ {}", msg);
    }

    pub fn warn(msg: &str) {
        warn!("⚠️  {}", msg);
    }
}

pub struct Timer {
    start: Instant,
    name: String,
}

impl Timer {
    pub fn start(name: &str) -> Self {
        debug!("⏱️  Starting: {}", name);
        Self {
            start: Instant::now(),
            name: name.to_string(),
        }
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        debug!("⏱️  Completed: {} in {:.2?}", self.name, self.elapsed());
    }
}
