use crate::core::{interfaces::*, models::*, services::*};
use crate::infrastructure::TokioFileSystemService;
use crate::utils::{CliOverrides, ConfigLoader, Logger, Result, CONFIG_FILE_NAME};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "kiln - module-graph bundler for scripts, styles and assets")]
pub struct Cli {
    /// Verbose logging (same as RUST_LOG=kiln=debug)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build the project
    Build {
        /// Root directory
        #[arg(short, long, default_value = ".")]
        root: String,
        /// development, production or test (defaults to NODE_ENV, then development)
        #[arg(short, long)]
        mode: Option<String>,
        /// Output directory, relative to the root
        #[arg(short, long)]
        outdir: Option<String>,
        /// Entry point as name=specifier; repeat to add more
        #[arg(short, long = "entry")]
        entries: Vec<String>,
        /// Disable minification
        #[arg(long)]
        no_minify: bool,
        /// Worker pool size
        #[arg(short, long)]
        workers: Option<usize>,
    },
    /// Show the resolved configuration and bundler information
    Info {
        /// Root directory
        #[arg(short, long, default_value = ".")]
        root: String,
        #[arg(short, long)]
        mode: Option<String>,
    },
}

pub struct CliHandler;

impl CliHandler {
    pub fn new() -> Self {
        Self
    }

    pub async fn run(&self) -> Result<()> {
        let cli = Cli::parse();
        Logger::init(cli.verbose);

        match cli.command {
            Commands::Build {
                root,
                mode,
                outdir,
                entries,
                no_minify,
                workers,
            } => {
                let entries = entries
                    .iter()
                    .map(|flag| ConfigLoader::parse_entry_flag(flag))
                    .collect::<Result<Vec<_>>>()?;
                let overrides = CliOverrides {
                    mode,
                    outdir,
                    entries,
                    minify: no_minify.then_some(false),
                    workers,
                };
                self.handle_build_command(&root, overrides).await
            }
            Commands::Info { root, mode } => {
                let overrides = CliOverrides { mode, ..CliOverrides::default() };
                self.handle_info_command(&root, overrides)
            }
        }
    }

    fn load_config(root: &str, overrides: CliOverrides) -> Result<BuildConfig> {
        let root = PathBuf::from(root);
        let file_config = ConfigLoader::load_from_file(&root)?;
        ConfigLoader::merge_with_cli(file_config, root, overrides, std::env::var("NODE_ENV").ok())
    }

    async fn handle_build_command(&self, root: &str, overrides: CliOverrides) -> Result<()> {
        let config = Self::load_config(root, overrides)?;

        let build_service = BundlerService::new(Arc::new(TokioFileSystemService));
        let result = build_service.build(&config).await?;

        for warning in &result.warnings {
            Logger::warn(&warning.to_string());
        }
        for (name, assets) in &result.manifest.entrypoints {
            Logger::info(&format!("🎯 {}: {}", name, assets.js.join(", ")));
        }

        Ok(())
    }

    fn handle_info_command(&self, root: &str, overrides: CliOverrides) -> Result<()> {
        let config = Self::load_config(root, overrides)?;
        config.validate()?;

        tracing::info!("🔥 kiln v{}", env!("CARGO_PKG_VERSION"));
        tracing::info!("══════════════════════════════════════");
        tracing::info!("📁 Root: {}", config.root.display());
        tracing::info!("⚙️  Config file: {}", CONFIG_FILE_NAME);
        tracing::info!("🌱 Mode: {}", config.mode);
        tracing::info!("📦 Output: {}", config.output.dir.display());
        tracing::info!("");
        tracing::info!("🎯 Entries:");
        for (name, specifiers) in &config.entries {
            tracing::info!("  • {}: {}", name, specifiers.join(", "));
        }
        tracing::info!("");
        tracing::info!("🛠️  Build:");
        tracing::info!("  • Minify: {}", config.optimization.minify);
        tracing::info!("  • Extract styles: {}", config.css.extract);
        tracing::info!(
            "  • Shared chunk: '{}' (min {} entries)",
            config.optimization.shared_chunk_name,
            config.optimization.min_chunks
        );
        tracing::info!("  • Workers: {}", config.workers);
        tracing::info!("  • HTML document: {}", config.html.is_some());
        tracing::info!("  • Copy patterns: {}", config.copy.len());

        Ok(())
    }
}

impl Default for CliHandler {
    fn default() -> Self {
        Self::new()
    }
}
