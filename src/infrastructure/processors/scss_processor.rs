use crate::core::interfaces::TransformStage;
use crate::core::models::{Dependency, Lang, TransformUnit};
use crate::utils::{KilnError, Logger, Result};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};

/// File system handed to grass that remembers every file it read
#[derive(Debug, Default)]
struct RecordingFs {
    reads: Mutex<Vec<PathBuf>>,
}

impl grass::Fs for RecordingFs {
    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn read(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        let content = std::fs::read(path)?;
        let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let mut reads = self.reads.lock();
        if !reads.contains(&canonical) {
            reads.push(canonical);
        }
        Ok(content)
    }
}

/// SCSS/SASS preprocessor using the grass crate (sass-loader).
/// Partials pulled in with `@use`/`@import` become implicit dependencies.
pub struct SassStage;

impl SassStage {
    fn compile(&self, content: &str, path: &Path) -> Result<(String, Vec<PathBuf>)> {
        let _timer = crate::utils::Timer::start(&format!(
            "Compiling SCSS {}",
            path.file_name().and_then(|s| s.to_str()).unwrap_or("unknown")
        ));

        // Detect syntax based on file extension
        let syntax = if path.extension().and_then(|s| s.to_str()) == Some("sass") {
            grass::InputSyntax::Sass
        } else {
            grass::InputSyntax::Scss
        };

        let fs = RecordingFs::default();
        let load_dir = path.parent().unwrap_or(Path::new("."));
        let css = {
            let options = grass::Options::default()
                .input_syntax(syntax)
                .style(grass::OutputStyle::Expanded)
                .load_path(load_dir)
                .fs(&fs);

            grass::from_string(content.to_string(), &options)
                .map_err(|e| KilnError::transform(self.name(), path.to_path_buf(), e.to_string()))?
        };

        let own = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let reads = fs
            .reads
            .into_inner()
            .into_iter()
            .filter(|read| *read != own)
            .collect();

        Ok((css, reads))
    }
}

impl TransformStage for SassStage {
    fn name(&self) -> &str {
        "sass"
    }

    fn apply(&self, unit: &mut TransformUnit) -> Result<()> {
        let (css, reads) = self.compile(unit.text(self.name())?, &unit.path)?;

        Logger::debug(&format!(
            "SCSS compiled: {} -> {} bytes, {} partials",
            unit.path.display(),
            css.len(),
            reads.len()
        ));

        for read in reads {
            unit.add_dependency(Dependency::implicit(read.to_string_lossy()));
        }
        unit.set_text(css, Lang::Style);
        Ok(())
    }
}
