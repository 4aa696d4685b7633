use crate::core::interfaces::ModuleResolver;
use crate::core::models::ResolveConfig;
use crate::utils::{KilnError, Logger, Result};
use dashmap::DashMap;
use serde::Deserialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// The parts of package.json that pick an entry file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PackageJson {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub main: Option<String>,
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default)]
    pub browser: Option<BrowserField>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum BrowserField {
    String(String),
    Object(serde_json::Map<String, serde_json::Value>),
}

/// Node.js-style module resolution with configurable extensions,
/// search directories and aliases
pub struct NodeModuleResolver {
    root: PathBuf,
    extensions: Vec<String>,
    modules: Vec<String>,
    alias: Vec<(String, String)>,
    /// Parsed package.json files; `None` records an unreadable one
    package_cache: DashMap<PathBuf, Option<Arc<PackageJson>>>,
}

impl NodeModuleResolver {
    pub fn new(root: &Path, config: &ResolveConfig) -> Self {
        Self {
            root: root.to_path_buf(),
            extensions: config.extensions.clone(),
            modules: config.modules.clone(),
            alias: config
                .alias
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            package_cache: DashMap::new(),
        }
    }

    /// Check if a specifier names a package rather than a path
    pub fn is_bare(specifier: &str) -> bool {
        !specifier.starts_with("./")
            && !specifier.starts_with("../")
            && specifier != "."
            && specifier != ".."
            && !Path::new(specifier).is_absolute()
    }

    /// Apply the first matching alias prefix
    fn apply_alias(&self, specifier: &str) -> Option<String> {
        for (prefix, replacement) in &self.alias {
            let rest = if specifier == prefix {
                ""
            } else if let Some(rest) = specifier.strip_prefix(prefix.as_str()) {
                if !rest.starts_with('/') {
                    continue;
                }
                rest
            } else {
                continue;
            };

            let target = format!("{}{}", replacement, rest);
            if target.starts_with("./") || target.starts_with("../") {
                return Some(self.root.join(target).to_string_lossy().into_owned());
            }
            return Some(target);
        }
        None
    }

    /// Split `@scope/pkg/sub` or `pkg/sub` into package name and subpath
    fn parse_package_specifier(specifier: &str) -> (&str, Option<&str>) {
        let split_at = if specifier.starts_with('@') {
            specifier
                .match_indices('/')
                .nth(1)
                .map(|(idx, _)| idx)
        } else {
            specifier.find('/')
        };

        match split_at {
            Some(idx) => (&specifier[..idx], Some(&specifier[idx + 1..])),
            None => (specifier, None),
        }
    }

    fn resolve_node_module(&self, specifier: &str, from_dir: &Path) -> Option<PathBuf> {
        let (pkg_name, subpath) = Self::parse_package_specifier(specifier);

        // Walk up directory tree looking in each search directory
        let mut current = Some(from_dir);
        while let Some(dir) = current {
            for search in &self.modules {
                let package_dir = dir.join(search).join(pkg_name);
                if !package_dir.exists() {
                    continue;
                }
                let found = match subpath {
                    Some(sub) => self.resolve_file_or_directory(&package_dir.join(sub)),
                    None => self.resolve_directory(&package_dir),
                };
                if found.is_some() {
                    return found;
                }
            }
            current = dir.parent();
        }

        None
    }

    fn resolve_file_or_directory(&self, path: &Path) -> Option<PathBuf> {
        self.resolve_as_file(path)
            .or_else(|| self.resolve_directory(path))
    }

    /// Verbatim first, then each extension appended in priority order
    fn resolve_as_file(&self, path: &Path) -> Option<PathBuf> {
        if path.is_file() {
            return Some(path.to_path_buf());
        }

        self.extensions.iter().find_map(|ext| {
            let mut candidate: OsString = path.as_os_str().to_owned();
            candidate.push(ext);
            let candidate = PathBuf::from(candidate);
            candidate.is_file().then_some(candidate)
        })
    }

    /// package.json `module`, string `browser`, `main`, then `index`
    fn resolve_directory(&self, dir: &Path) -> Option<PathBuf> {
        if !dir.is_dir() {
            return None;
        }

        if let Some(pkg) = self.read_package_json(&dir.join("package.json")) {
            let browser = match &pkg.browser {
                Some(BrowserField::String(path)) => Some(path),
                _ => None,
            };
            for field in [pkg.module.as_ref(), browser, pkg.main.as_ref()]
                .into_iter()
                .flatten()
            {
                let entry = dir.join(field);
                if let Some(found) = self
                    .resolve_as_file(&entry)
                    .or_else(|| self.resolve_index(&entry))
                {
                    return Some(found);
                }
            }
        }

        self.resolve_index(dir)
    }

    fn resolve_index(&self, dir: &Path) -> Option<PathBuf> {
        if !dir.is_dir() {
            return None;
        }
        self.resolve_as_file(&dir.join("index"))
    }

    /// Read and cache package.json
    fn read_package_json(&self, path: &Path) -> Option<Arc<PackageJson>> {
        if let Some(cached) = self.package_cache.get(path) {
            return cached.clone();
        }

        let parsed = std::fs::read_to_string(path)
            .ok()
            .and_then(|content| serde_json::from_str::<PackageJson>(&content).ok())
            .map(Arc::new);

        self.package_cache.insert(path.to_path_buf(), parsed.clone());
        parsed
    }
}

impl ModuleResolver for NodeModuleResolver {
    fn resolve(&self, specifier: &str, from_dir: &Path) -> Result<PathBuf> {
        Logger::resolving(specifier, &from_dir.display().to_string());

        // `url(font.woff?#iefix)` style suffixes never name a file
        let cleaned = specifier
            .split(['?', '#'])
            .next()
            .unwrap_or(specifier);
        let aliased = self.apply_alias(cleaned);
        let target = aliased.as_deref().unwrap_or(cleaned);

        let found = if target.is_empty() {
            None
        } else if Self::is_bare(target) {
            // `index.js` is a path relative to `from_dir` before it is a package name
            self.resolve_file_or_directory(&from_dir.join(target))
                .or_else(|| self.resolve_node_module(target, from_dir))
        } else {
            self.resolve_file_or_directory(&from_dir.join(target))
        };

        let found = found.ok_or_else(|| KilnError::resolution(specifier, None))?;
        Ok(std::fs::canonicalize(&found)?)
    }
}

/// Modules installed as third-party packages
pub fn is_vendor_path(path: &Path) -> bool {
    path.components()
        .any(|c| c.as_os_str() == "node_modules")
}
