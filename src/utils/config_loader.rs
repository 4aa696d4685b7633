use crate::core::models::{BuildConfig, BuildMode, CopyPattern, HtmlConfig};
use crate::utils::{KilnError, Logger, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "kiln.config.json";

/// One entry: a single specifier or an ordered list
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum EntryValue {
    One(String),
    Many(Vec<String>),
}

impl EntryValue {
    fn into_vec(self) -> Vec<String> {
        match self {
            EntryValue::One(s) => vec![s],
            EntryValue::Many(list) => list,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileOutputConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub css_filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clean: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_map: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileResolveConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modules: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<IndexMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileOptimizationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minify: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_chunks: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_chunk_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor_chunk: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileCssConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modules: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_ident_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extract: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileHtmlConfig {
    /// `false` disables document generation for every mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minify: Option<bool>,
}

/// Configuration file format (kiln.config.json). Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<IndexMap<String, EntryValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<FileOutputConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolve: Option<FileResolveConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimization: Option<FileOptimizationConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub css: Option<FileCssConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<FileHtmlConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub copy: Option<Vec<CopyPattern>>,
    /// Values are JSON; strings become string literals in the output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub define: Option<IndexMap<String, serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
}

/// Flags given on the command line; `None` means "not given"
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub mode: Option<String>,
    pub outdir: Option<String>,
    pub entries: Vec<(String, String)>,
    pub minify: Option<bool>,
    pub workers: Option<usize>,
}

/// Config loader that supports config files with CLI override
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load `kiln.config.json` from the project root if it exists
    pub fn load_from_file(root: &Path) -> Result<Option<FileConfig>> {
        let config_path = root.join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            Logger::debug("No kiln.config.json found, using mode defaults");
            return Ok(None);
        }

        Logger::debug(&format!("Loading config from {}", config_path.display()));

        let content = std::fs::read_to_string(&config_path)?;
        let config: FileConfig = serde_json::from_str(&content).map_err(|e| {
            KilnError::config(format!("Failed to parse {}: {}", CONFIG_FILE_NAME, e))
        })?;

        Ok(Some(config))
    }

    /// Parse a `name=specifier` entry flag
    pub fn parse_entry_flag(flag: &str) -> Result<(String, String)> {
        match flag.split_once('=') {
            Some((name, spec)) if !name.trim().is_empty() && !spec.trim().is_empty() => {
                Ok((name.trim().to_string(), spec.trim().to_string()))
            }
            _ => Err(KilnError::config(format!(
                "invalid entry '{}' (expected name=specifier)",
                flag
            ))),
        }
    }

    /// Merge file config with CLI flags (CLI > config file > environment > default).
    /// `env_mode` is the value of `NODE_ENV`, if set.
    pub fn merge_with_cli(
        file_config: Option<FileConfig>,
        root: PathBuf,
        cli: CliOverrides,
        env_mode: Option<String>,
    ) -> Result<BuildConfig> {
        let base = file_config.unwrap_or_default();

        let mode = match cli.mode.or(base.mode).or(env_mode) {
            Some(raw) => raw.parse::<BuildMode>()?,
            None => BuildMode::Development,
        };

        let mut config = BuildConfig::for_mode(root.clone(), mode);

        if let Some(entry) = base.entry {
            config.entries = entry.into_iter().map(|(k, v)| (k, v.into_vec())).collect();
        }
        if !cli.entries.is_empty() {
            let mut entries: IndexMap<String, Vec<String>> = IndexMap::new();
            for (name, spec) in cli.entries {
                entries.entry(name).or_default().push(spec);
            }
            config.entries = entries;
        }

        let output = base.output.unwrap_or_default();
        if let Some(dir) = cli.outdir.or(output.dir) {
            config.output.dir = Self::resolve_against(&root, &dir);
        }
        if let Some(filename) = output.filename {
            config.output.filename = filename;
        }
        if let Some(css_filename) = output.css_filename {
            config.output.css_filename = css_filename;
        }
        if let Some(public_path) = output.public_path {
            config.output.public_path = public_path;
        }
        if let Some(hash_length) = output.hash_length {
            config.output.hash_length = hash_length;
        }
        if let Some(clean) = output.clean {
            config.output.clean = clean;
        }
        if let Some(source_map) = output.source_map {
            config.output.source_map = source_map;
        }

        if let Some(resolve) = base.resolve {
            if let Some(extensions) = resolve.extensions {
                config.resolve.extensions = extensions;
            }
            if let Some(modules) = resolve.modules {
                config.resolve.modules = modules;
            }
            if let Some(alias) = resolve.alias {
                config.resolve.alias = alias;
            }
        }

        let optimization = base.optimization.unwrap_or_default();
        if let Some(minify) = cli.minify.or(optimization.minify) {
            config.optimization.minify = minify;
        }
        if let Some(min_chunks) = optimization.min_chunks {
            config.optimization.min_chunks = min_chunks;
        }
        if let Some(name) = optimization.shared_chunk_name {
            config.optimization.shared_chunk_name = name;
        }
        if let Some(vendor_chunk) = optimization.vendor_chunk {
            config.optimization.vendor_chunk = vendor_chunk;
        }

        if let Some(css) = base.css {
            if let Some(modules) = css.modules {
                config.css.modules = modules;
            }
            if let Some(local_ident_name) = css.local_ident_name {
                config.css.local_ident_name = local_ident_name;
            }
            if let Some(extract) = css.extract {
                config.css.extract = extract;
            }
        }

        if let Some(html) = base.html {
            if html.enabled == Some(false) {
                config.html = None;
            } else {
                let mut current = config.html.take().unwrap_or(HtmlConfig {
                    template: PathBuf::from("src/index.html"),
                    filename: "index.html".to_string(),
                    minify: mode == BuildMode::Production,
                });
                if let Some(template) = html.template {
                    current.template = PathBuf::from(template);
                }
                if let Some(filename) = html.filename {
                    current.filename = filename;
                }
                if let Some(minify) = html.minify {
                    current.minify = minify;
                }
                config.html = Some(current);
            }
        }

        if let Some(copy) = base.copy {
            config.copy = copy;
        }

        if let Some(define) = base.define {
            for (key, value) in define {
                let literal = serde_json::to_string(&value)
                    .map_err(|e| KilnError::config(format!("define '{}': {}", key, e)))?;
                config.define.insert(key, literal);
            }
        }

        if let Some(workers) = cli.workers.or(base.workers) {
            config.workers = workers;
        }

        Ok(config)
    }

    fn resolve_against(root: &Path, dir: &str) -> PathBuf {
        if Path::new(dir).is_absolute() {
            PathBuf::from(dir)
        } else {
            root.join(dir)
        }
    }
}
