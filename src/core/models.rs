use crate::utils::{BuildWarning, KilnError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use oxc_sourcemap::SourceMap;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// Build environment. Selects the rule table, defines and optimization policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    Development,
    Production,
    Test,
}

impl BuildMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildMode::Development => "development",
            BuildMode::Production => "production",
            BuildMode::Test => "test",
        }
    }
}

impl FromStr for BuildMode {
    type Err = KilnError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "development" => Ok(BuildMode::Development),
            "production" => Ok(BuildMode::Production),
            "test" => Ok(BuildMode::Test),
            other => Err(KilnError::config(format!(
                "unknown build mode '{}' (expected development, production or test)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for BuildMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub dir: PathBuf,
    /// Script chunk template, e.g. `js/[name].[hash].js`
    pub filename: String,
    /// Stylesheet template, e.g. `css/[name].[hash].css`
    pub css_filename: String,
    pub public_path: String,
    pub hash_length: usize,
    /// Remove the output directory before writing
    pub clean: bool,
    /// Write `<chunk>.js.map` next to every script chunk
    pub source_map: bool,
}

#[derive(Debug, Clone)]
pub struct ResolveConfig {
    pub extensions: Vec<String>,
    /// Directory names searched upwards for bare specifiers
    pub modules: Vec<String>,
    pub alias: IndexMap<String, String>,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            extensions: [".ts", ".tsx", ".js", ".jsx", ".json"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            modules: vec!["node_modules".to_string()],
            alias: IndexMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OptimizationConfig {
    pub minify: bool,
    /// Distinct entry chunks a module must be reachable from to be shared
    pub min_chunks: usize,
    pub shared_chunk_name: String,
    /// Put every `node_modules` module in a `vendors` chunk
    pub vendor_chunk: bool,
}

#[derive(Debug, Clone)]
pub struct CssConfig {
    /// Scope class names (CSS modules)
    pub modules: bool,
    pub local_ident_name: String,
    /// Extract styles into stylesheets instead of injecting them at runtime
    pub extract: bool,
}

#[derive(Debug, Clone)]
pub struct AssetRule {
    /// Files up to this size are inlined as data URIs
    pub limit: usize,
    /// Emitted name template, supports `[name]`, `[hash]`, `[hash:N]`, `[ext]`
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct AssetConfig {
    pub images: AssetRule,
    pub fonts: AssetRule,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            images: AssetRule {
                limit: 20_000,
                name: "image/[name]-[hash:8].[ext]".to_string(),
            },
            fonts: AssetRule {
                limit: 100_000,
                name: "fonts/[name]-[hash:7].[ext]".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct HtmlConfig {
    /// Template relative to the root; a minimal document is generated when missing
    pub template: PathBuf,
    pub filename: String,
    pub minify: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CopyPattern {
    pub from: PathBuf,
    pub to: PathBuf,
}

/// Fold `.` and `..` out of a path without touching the file system.
/// Relative paths are taken against the working directory first.
pub fn normalize_path(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Chunk names end up in file names; keep them inside the output directory
fn is_plain_name(name: &str) -> bool {
    !name.contains(['/', '\\']) && !name.contains("..")
}

/// Complete configuration for one build, passed explicitly to every component
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub root: PathBuf,
    pub mode: BuildMode,
    pub entries: IndexMap<String, Vec<String>>,
    pub output: OutputConfig,
    pub resolve: ResolveConfig,
    pub optimization: OptimizationConfig,
    pub css: CssConfig,
    pub assets: AssetConfig,
    pub html: Option<HtmlConfig>,
    pub copy: Vec<CopyPattern>,
    /// Extra compile-time replacements on top of the mode flags
    pub define: IndexMap<String, String>,
    pub workers: usize,
}

impl BuildConfig {
    /// Preset for a mode, mirroring the per-environment plugin lists
    pub fn for_mode(root: impl Into<PathBuf>, mode: BuildMode) -> Self {
        let root = root.into();
        let production = mode == BuildMode::Production;

        let mut entries = IndexMap::new();
        entries.insert("app".to_string(), vec!["./src/index.js".to_string()]);

        let html = match mode {
            BuildMode::Test => None,
            _ => Some(HtmlConfig {
                template: PathBuf::from("src/index.html"),
                filename: "index.html".to_string(),
                minify: production,
            }),
        };

        let copy = if production {
            vec![
                CopyPattern { from: PathBuf::from("src/assets"), to: PathBuf::from("assets") },
                CopyPattern { from: PathBuf::from("src/static"), to: PathBuf::from("static") },
            ]
        } else {
            Vec::new()
        };

        Self {
            output: OutputConfig {
                dir: root.join("dist"),
                filename: "js/[name].[hash].js".to_string(),
                css_filename: "css/[name].[hash].css".to_string(),
                public_path: "/".to_string(),
                hash_length: 8,
                clean: production,
                source_map: production,
            },
            root,
            mode,
            entries,
            resolve: ResolveConfig::default(),
            optimization: OptimizationConfig {
                minify: production,
                min_chunks: 2,
                shared_chunk_name: "shared".to_string(),
                vendor_chunk: false,
            },
            css: CssConfig {
                modules: true,
                local_ident_name: "[local]___[hash:base64:5]".to_string(),
                extract: production,
            },
            assets: AssetConfig::default(),
            html,
            copy,
            define: IndexMap::new(),
            workers: num_cpus::get().max(1),
        }
    }

    /// Reject configurations before any file I/O happens
    pub fn validate(&self) -> Result<()> {
        if self.entries.is_empty() {
            return Err(KilnError::config("at least one entry point is required"));
        }
        for (name, specifiers) in &self.entries {
            if name.trim().is_empty() {
                return Err(KilnError::config("entry names must not be empty"));
            }
            if !is_plain_name(name) {
                return Err(KilnError::config(format!(
                    "entry name '{}' must not contain path separators or '..'",
                    name
                )));
            }
            if specifiers.is_empty() {
                return Err(KilnError::config(format!(
                    "entry '{}' must list at least one module",
                    name
                )));
            }
        }

        for (label, template) in [
            ("output filename", &self.output.filename),
            ("css filename", &self.output.css_filename),
        ] {
            if !template.contains("[name]") {
                return Err(KilnError::config(format!(
                    "{} template '{}' must contain [name]",
                    label, template
                )));
            }
        }

        if self.output.hash_length == 0 || self.output.hash_length > 64 {
            return Err(KilnError::config("hash length must be between 1 and 64"));
        }
        if self.optimization.min_chunks < 2 {
            return Err(KilnError::config("shared chunk threshold must be at least 2"));
        }

        if !is_plain_name(&self.optimization.shared_chunk_name) {
            return Err(KilnError::config(format!(
                "shared chunk name '{}' must not contain path separators or '..'",
                self.optimization.shared_chunk_name
            )));
        }
        if self.output.clean {
            let output = normalize_path(&self.output.dir);
            if normalize_path(&self.root).starts_with(&output) {
                return Err(KilnError::config(format!(
                    "refusing to clean {}: it contains the project root",
                    self.output.dir.display()
                )));
            }
        }

        let mut generated = vec![self.optimization.shared_chunk_name.as_str()];
        if self.optimization.vendor_chunk {
            generated.push("vendors");
        }
        for name in generated {
            if self.entries.contains_key(name) {
                return Err(KilnError::config(format!(
                    "entry '{}' collides with a generated chunk name",
                    name
                )));
            }
        }

        if self.workers == 0 {
            return Err(KilnError::config("worker pool size must be at least 1"));
        }
        if let Some(ext) = self.resolve.extensions.iter().find(|e| !e.starts_with('.')) {
            return Err(KilnError::config(format!("extension '{}' must start with '.'", ext)));
        }
        if self.css.modules
            && !self.css.local_ident_name.contains("[local]")
            && !self.css.local_ident_name.contains("[hash")
        {
            return Err(KilnError::config(
                "local ident name must contain [local] or [hash]",
            ));
        }

        Ok(())
    }

    /// Output directory with `.` and `..` folded away
    pub fn output_dir(&self) -> PathBuf {
        normalize_path(&self.output.dir)
    }

    /// Compile-time constants: mode flags first, user overrides last
    pub fn define_values(&self) -> IndexMap<String, String> {
        let mut values = IndexMap::new();
        values.insert("__DEV__".to_string(), (self.mode == BuildMode::Development).to_string());
        values.insert("__PROD__".to_string(), (self.mode == BuildMode::Production).to_string());
        values.insert("__TEST__".to_string(), (self.mode == BuildMode::Test).to_string());
        values.insert(
            "process.env.NODE_ENV".to_string(),
            format!("\"{}\"", self.mode.as_str()),
        );
        for (key, value) in &self.define {
            values.insert(key.clone(), value.clone());
        }
        values
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    /// `import`/`export … from`/`require()`/`@import`
    Import,
    /// `url()` reference from a stylesheet
    Url,
    /// File a preprocessor read and folded into the importer
    Implicit,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dependency {
    pub specifier: String,
    pub kind: DependencyKind,
}

impl Dependency {
    pub fn import(specifier: impl Into<String>) -> Self {
        Self { specifier: specifier.into(), kind: DependencyKind::Import }
    }

    pub fn url(specifier: impl Into<String>) -> Self {
        Self { specifier: specifier.into(), kind: DependencyKind::Url }
    }

    pub fn implicit(specifier: impl Into<String>) -> Self {
        Self { specifier: specifier.into(), kind: DependencyKind::Implicit }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideFileKind {
    /// Stylesheet text merged into the owning chunk's stylesheet
    Style,
    /// Standalone file written under its own (already hashed) name
    Asset,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SideFile {
    pub kind: SideFileKind,
    /// Output-relative filename for assets; empty for styles
    pub name: String,
    pub content: Vec<u8>,
}

/// Content language flowing between transform stages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lang {
    /// Untouched file bytes
    Raw,
    /// ECMAScript module source (may still contain TS/JSX)
    Script,
    /// Plain CSS text
    Style,
    /// Final registry module body (`module`, `exports`, `require` in scope)
    Module,
}

/// Accumulator handed from one transform stage to the next
#[derive(Debug, Clone)]
pub struct TransformUnit {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
    pub lang: Lang,
    pub dependencies: Vec<Dependency>,
    pub side_files: Vec<SideFile>,
    /// Scoped class names exported by a CSS module
    pub css_exports: IndexMap<String, String>,
    pub public_url: Option<String>,
    /// Script stages record how the current text maps to the original file
    pub map_sources: bool,
    pub source_map: Option<SourceMap>,
}

impl TransformUnit {
    pub fn new(path: PathBuf, bytes: Vec<u8>) -> Self {
        Self {
            path,
            bytes,
            lang: Lang::Raw,
            dependencies: Vec::new(),
            side_files: Vec::new(),
            css_exports: IndexMap::new(),
            public_url: None,
            map_sources: false,
            source_map: None,
        }
    }

    /// Current content as UTF-8 text
    pub fn text(&self, stage: &str) -> Result<&str> {
        std::str::from_utf8(&self.bytes).map_err(|e| {
            KilnError::transform(stage, self.path.clone(), format!("invalid UTF-8: {}", e))
        })
    }

    pub fn set_text(&mut self, text: String, lang: Lang) {
        self.bytes = text.into_bytes();
        self.lang = lang;
    }

    /// Add a dependency once, keeping declaration order
    pub fn add_dependency(&mut self, dependency: Dependency) {
        if !self.dependencies.contains(&dependency) {
            self.dependencies.push(dependency);
        }
    }

    /// Record a `url()`-style reference; returns its index among url references
    pub fn add_url_dependency(&mut self, specifier: &str) -> usize {
        let dependency = Dependency::url(specifier);
        self.add_dependency(dependency.clone());
        self.dependencies
            .iter()
            .filter(|d| d.kind == DependencyKind::Url)
            .position(|d| *d == dependency)
            .unwrap_or(0)
    }
}

/// Result of running a module through its rule chain
#[derive(Debug, Clone)]
pub struct TransformOutput {
    pub rule: String,
    pub code: String,
    pub dependencies: Vec<Dependency>,
    pub side_files: Vec<SideFile>,
    pub public_url: Option<String>,
    pub source_map: Option<Arc<SourceMap>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub usize);

#[derive(Debug, Clone)]
pub struct Module {
    pub id: ModuleId,
    /// Canonical absolute path, the module identity
    pub path: PathBuf,
    /// Root-relative `/`-separated path, the runtime registry id
    pub key: String,
    pub source: Arc<[u8]>,
    pub code: String,
    pub dependencies: Vec<Dependency>,
    pub side_files: Vec<SideFile>,
    pub public_url: Option<String>,
    /// Content already folded into an importer by a preprocessor
    pub inlined: bool,
    /// Maps `code` to the original file, sources named by `key`
    pub source_map: Option<Arc<SourceMap>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub from: ModuleId,
    pub to: ModuleId,
    pub specifier: String,
    pub kind: DependencyKind,
}

#[derive(Debug, Default)]
pub struct ModuleGraph {
    pub modules: Vec<Module>,
    pub index: HashMap<PathBuf, ModuleId>,
    pub edges: Vec<Edge>,
    /// Entry name to its resolved entry modules, in configuration order
    pub entries: IndexMap<String, Vec<ModuleId>>,
}

impl ModuleGraph {
    pub fn module(&self, id: ModuleId) -> &Module {
        &self.modules[id.0]
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn edges_from(&self, id: ModuleId) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |edge| edge.from == id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Entry,
    Shared,
}

#[derive(Debug, Clone)]
pub struct Chunk {
    pub name: String,
    pub kind: ChunkKind,
    /// Constituent modules in first-encountered order
    pub modules: Vec<ModuleId>,
    /// Modules executed when the chunk loads (entry chunks only)
    pub entry_modules: Vec<ModuleId>,
    /// Shared chunks that must load before this one
    pub requires: Vec<String>,
}

#[derive(Debug, Default)]
pub struct ChunkGraph {
    pub chunks: Vec<Chunk>,
    pub module_to_chunk: HashMap<ModuleId, usize>,
}

impl ChunkGraph {
    pub fn chunk(&self, name: &str) -> Option<&Chunk> {
        self.chunks.iter().find(|c| c.name == name)
    }

    pub fn chunk_of(&self, module: ModuleId) -> Option<&Chunk> {
        self.module_to_chunk.get(&module).map(|idx| &self.chunks[*idx])
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EntryAssets {
    pub js: Vec<String>,
    pub css: Vec<String>,
}

/// Logical asset names to emitted files, consumed by document generation
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Manifest {
    pub assets: BTreeMap<String, String>,
    pub entrypoints: IndexMap<String, EntryAssets>,
}

#[derive(Debug, Clone)]
pub struct OutputFile {
    pub path: PathBuf,
    pub size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Idle,
    Resolving,
    Transforming,
    GraphBuilt,
    ChunkSplit,
    Emitted,
    Failed,
}

impl BuildState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildState::Idle => "idle",
            BuildState::Resolving => "resolving",
            BuildState::Transforming => "transforming",
            BuildState::GraphBuilt => "graph-built",
            BuildState::ChunkSplit => "chunk-split",
            BuildState::Emitted => "emitted",
            BuildState::Failed => "failed",
        }
    }
}

#[derive(Debug)]
pub struct BuildResult {
    pub mode: BuildMode,
    pub modules_processed: usize,
    pub chunks: Vec<String>,
    pub manifest: Manifest,
    pub output_files: Vec<OutputFile>,
    pub warnings: Vec<BuildWarning>,
    pub build_time: std::time::Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!("production".parse::<BuildMode>().unwrap(), BuildMode::Production);
        assert_eq!("Development".parse::<BuildMode>().unwrap(), BuildMode::Development);
        assert_eq!("test".parse::<BuildMode>().unwrap(), BuildMode::Test);

        let err = "staging".parse::<BuildMode>().unwrap_err();
        assert!(matches!(err, KilnError::Config(_)));
    }

    #[test]
    fn test_mode_presets() {
        let prod = BuildConfig::for_mode("/app", BuildMode::Production);
        assert!(prod.optimization.minify);
        assert!(prod.css.extract);
        assert!(prod.output.clean);
        assert_eq!(prod.copy.len(), 2);
        assert!(prod.html.as_ref().unwrap().minify);

        let dev = BuildConfig::for_mode("/app", BuildMode::Development);
        assert!(!dev.optimization.minify);
        assert!(!dev.css.extract);
        assert!(!dev.output.clean);
        assert!(dev.copy.is_empty());

        let test = BuildConfig::for_mode("/app", BuildMode::Test);
        assert!(test.html.is_none());
    }

    #[test]
    fn test_validate_rejects_empty_entry() {
        let mut config = BuildConfig::for_mode("/app", BuildMode::Development);
        config.entries.insert("admin".to_string(), Vec::new());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("admin"));
    }

    #[test]
    fn test_validate_rejects_template_without_name() {
        let mut config = BuildConfig::for_mode("/app", BuildMode::Development);
        config.output.filename = "js/bundle.[hash].js".to_string();
        assert!(matches!(config.validate(), Err(KilnError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_entry_named_like_shared_chunk() {
        let mut config = BuildConfig::for_mode("/app", BuildMode::Development);
        config.entries.insert("shared".to_string(), vec!["./src/shared.js".to_string()]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mode_aliases_are_rejected() {
        assert!("dev".parse::<BuildMode>().is_err());
        assert!("prod".parse::<BuildMode>().is_err());
    }

    #[test]
    fn test_validate_refuses_to_clean_the_project_root() {
        let mut config = BuildConfig::for_mode("/app", BuildMode::Production);
        config.output.dir = PathBuf::from("/app/./");
        assert!(matches!(config.validate(), Err(KilnError::Config(_))));

        config.output.dir = PathBuf::from("/app/dist/..");
        assert!(matches!(config.validate(), Err(KilnError::Config(_))));

        config.output.dir = PathBuf::from("/");
        assert!(matches!(config.validate(), Err(KilnError::Config(_))));

        config.output.clean = false;
        config.output.dir = PathBuf::from("/app");
        assert!(config.validate().is_ok());

        config.output.clean = true;
        config.output.dir = PathBuf::from("/app/dist/../build");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_entry_names_with_paths() {
        for name in ["../x", "a/b", "a\\b", ".."] {
            let mut config = BuildConfig::for_mode("/app", BuildMode::Development);
            config.entries.insert(name.to_string(), vec!["./src/x.js".to_string()]);
            let err = config.validate().unwrap_err();
            assert_eq!(err.kind(), "ConfigError", "{}", name);
        }
    }

    #[test]
    fn test_normalize_path_folds_dots() {
        assert_eq!(normalize_path(Path::new("/app/./dist")), PathBuf::from("/app/dist"));
        assert_eq!(normalize_path(Path::new("/app/src/../dist/")), PathBuf::from("/app/dist"));
        assert_eq!(normalize_path(Path::new("dist")), normalize_path(Path::new("./dist")));
    }

    #[test]
    fn test_define_values_follow_mode() {
        let mut config = BuildConfig::for_mode("/app", BuildMode::Production);
        config.define.insert("API_URL".to_string(), "\"https://api\"".to_string());
        let values = config.define_values();
        assert_eq!(values["__PROD__"], "true");
        assert_eq!(values["__DEV__"], "false");
        assert_eq!(values["process.env.NODE_ENV"], "\"production\"");
        assert_eq!(values["API_URL"], "\"https://api\"");
    }

    #[test]
    fn test_transform_unit_dedupes_dependencies() {
        let mut unit = TransformUnit::new(PathBuf::from("a.js"), Vec::new());
        unit.add_dependency(Dependency::import("./b"));
        unit.add_dependency(Dependency::import("./b"));
        unit.add_dependency(Dependency::url("./b"));
        assert_eq!(unit.dependencies.len(), 2);
    }
}
