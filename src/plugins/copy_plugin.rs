// Copy Plugin: mirrors static directories into the output

use crate::core::models::{CopyPattern, Manifest};
use crate::core::plugin::{Plugin, PluginContext};
use crate::infrastructure::RenderedFile;
use crate::utils::{KilnError, Logger, Result};
use walkdir::WalkDir;

pub struct CopyPlugin {
    patterns: Vec<CopyPattern>,
}

impl CopyPlugin {
    pub fn new(patterns: Vec<CopyPattern>) -> Self {
        Self { patterns }
    }
}

impl Plugin for CopyPlugin {
    fn name(&self) -> &str {
        "copy-plugin"
    }

    fn extra_files(&self, context: &PluginContext, _manifest: &Manifest) -> Result<Vec<RenderedFile>> {
        let mut files = Vec::new();

        for pattern in &self.patterns {
            let from = context.root.join(&pattern.from);
            if !from.exists() {
                Logger::debug(&format!("Copy source {} does not exist, skipping", from.display()));
                continue;
            }

            for entry in WalkDir::new(&from).sort_by_file_name() {
                let entry = entry.map_err(|e| KilnError::Io(e.into()))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let relative = entry.path().strip_prefix(&from).unwrap_or(entry.path());
                let name = pattern.to.join(relative).to_string_lossy().replace('\\', "/");
                files.push(RenderedFile {
                    name,
                    content: std::fs::read(entry.path())?,
                });
            }
        }

        Logger::debug(&format!("Copy plugin collected {} files", files.len()));
        Ok(files)
    }
}
