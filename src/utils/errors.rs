use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KilnError {
    #[error("Cannot resolve '{specifier}'{}", importer_suffix(.importer))]
    Resolution {
        specifier: String,
        importer: Option<PathBuf>,
    },

    #[error("Transform '{stage}' failed for {}: {message}", .path.display())]
    Transform {
        stage: String,
        path: PathBuf,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Output directory {} is owned by another build", .0.display())]
    OutputLocked(PathBuf),
}

fn importer_suffix(importer: &Option<PathBuf>) -> String {
    match importer {
        Some(path) => format!(" from {}", path.display()),
        None => String::new(),
    }
}

impl KilnError {
    pub fn resolution(specifier: &str, importer: Option<PathBuf>) -> Self {
        Self::Resolution {
            specifier: specifier.to_string(),
            importer,
        }
    }

    pub fn transform(stage: &str, path: PathBuf, message: impl Into<String>) -> Self {
        Self::Transform {
            stage: stage.to_string(),
            path,
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn write(path: PathBuf, source: std::io::Error) -> Self {
        Self::Write { path, source }
    }

    /// Short category name, matching the build-failure taxonomy
    pub fn kind(&self) -> &'static str {
        match self {
            KilnError::Resolution { .. } => "ResolutionError",
            KilnError::Transform { .. } => "TransformError",
            KilnError::Io(_) | KilnError::Write { .. } => "IOError",
            KilnError::Config(_) | KilnError::OutputLocked(_) => "ConfigError",
        }
    }

    /// Format error with enhanced context display
    pub fn format_detailed(&self) -> String {
        let mut output = format!("❌ {}: {}", self.kind(), self);

        match self {
            KilnError::Resolution { specifier, importer } => {
                output.push_str(&format!("\n🔎 Specifier: {}", specifier));
                if let Some(importer) = importer {
                    output.push_str(&format!("\n📁 Imported by: {}", importer.display()));
                }
            }
            KilnError::Transform { stage, path, .. } => {
                output.push_str(&format!("\n🧩 Stage: {}", stage));
                output.push_str(&format!("\n📁 File: {}", path.display()));
            }
            KilnError::Write { path, .. } => {
                output.push_str(&format!("\n📁 File: {}", path.display()));
            }
            _ => {}
        }

        output
    }
}

pub type Result<T> = std::result::Result<T, KilnError>;

impl From<regex::Error> for KilnError {
    fn from(err: regex::Error) -> Self {
        KilnError::config(format!("Invalid pattern: {}", err))
    }
}

/// Non-fatal findings collected during a build
#[derive(Debug, Clone, PartialEq)]
pub enum BuildWarning {
    /// Modules importing each other; the build still succeeds
    Cycle { modules: Vec<PathBuf> },
}

impl std::fmt::Display for BuildWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildWarning::Cycle { modules } => {
                let names: Vec<String> = modules.iter().map(|p| p.display().to_string()).collect();
                write!(f, "CycleWarning: circular import between {}", names.join(" -> "))
            }
        }
    }
}
