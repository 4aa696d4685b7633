use super::common::{content_hash, js_string, render_template, TemplateVars};
use crate::core::interfaces::TransformStage;
use crate::core::models::{Dependency, DependencyKind, Lang, SideFile, SideFileKind, TransformUnit};
use crate::utils::{KilnError, Result};
use indexmap::IndexMap;
use lightningcss::{
    printer::PrinterOptions,
    stylesheet::{MinifyOptions, ParserOptions, StyleSheet},
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};

static IMPORT_RULE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"@import\s+(?:url\(\s*)?['"]?([^'")\s;]+)['"]?\s*\)?[^;]*;"#).unwrap()
});

static URL_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"url\(\s*(['"]?)([^'")]+?)['"]?\s*\)"#).unwrap());

static CLASS_OR_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([.#])(-?[_a-zA-Z][_a-zA-Z0-9-]*)").unwrap());

/// Marker left in place of a `url()` target until the graph is linked
pub fn url_placeholder(index: usize) -> String {
    format!("__KILN_URL_{}__", index)
}

/// References that stay as written: remote, data URIs, fragments and root paths
pub fn is_external_reference(specifier: &str) -> bool {
    let lower = specifier.to_ascii_lowercase();
    lower.starts_with("data:")
        || lower.starts_with("http:")
        || lower.starts_with("https:")
        || specifier.starts_with("//")
        || specifier.starts_with('#')
        || specifier.starts_with('/')
}

/// Which files get scoped class names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CssScope {
    /// Every stylesheet handled by the rule
    All,
    /// Only `*.module.*` files
    ModuleFiles,
    None,
}

/// css-loader: dependencies, CSS modules and syntax validation
pub struct CssStage {
    root: PathBuf,
    scope: CssScope,
    local_ident_name: String,
}

impl CssStage {
    pub fn new(root: &Path, scope: CssScope, local_ident_name: &str) -> Self {
        Self {
            root: root.to_path_buf(),
            scope,
            local_ident_name: local_ident_name.to_string(),
        }
    }

    fn is_scoped(&self, path: &Path) -> bool {
        match self.scope {
            CssScope::All => true,
            CssScope::ModuleFiles => path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.contains(".module."))
                .unwrap_or(false),
            CssScope::None => false,
        }
    }

    /// Pull out `@import` rules as dependencies
    fn extract_imports(css: &str, unit: &mut TransformUnit) -> String {
        IMPORT_RULE
            .replace_all(css, |caps: &regex::Captures<'_>| {
                let specifier = &caps[1];
                if is_external_reference(specifier) {
                    caps[0].to_string()
                } else {
                    unit.add_dependency(Dependency::import(specifier));
                    String::new()
                }
            })
            .into_owned()
    }

    /// Replace local `url()` targets with placeholders, recording them as dependencies
    fn extract_urls(css: &str, unit: &mut TransformUnit) -> String {
        URL_REFERENCE
            .replace_all(css, |caps: &regex::Captures<'_>| {
                let specifier = caps[2].trim();
                if is_external_reference(specifier) {
                    return caps[0].to_string();
                }
                let index = unit.add_url_dependency(specifier);
                format!("url(\"{}\")", url_placeholder(index))
            })
            .into_owned()
    }

    /// Rename class and id selectors; declaration blocks and at-rule preludes are left alone
    fn scope_selectors(&self, css: &str, path: &Path) -> (String, IndexMap<String, String>) {
        let relative = path
            .strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("style")
            .trim_end_matches(".module")
            .to_string();

        let mut exports = IndexMap::new();
        let mut out = String::with_capacity(css.len());
        let mut segment_start = 0;

        for (idx, ch) in css.char_indices() {
            if ch != '{' && ch != '}' {
                continue;
            }
            let segment = &css[segment_start..idx];
            let is_selector = ch == '{' && !segment.trim_start().starts_with('@');
            if is_selector {
                let scoped = CLASS_OR_ID.replace_all(segment, |caps: &regex::Captures<'_>| {
                    let local = &caps[2];
                    let scoped = exports
                        .entry(local.to_string())
                        .or_insert_with(|| {
                            let digest = content_hash(format!("{}+{}", relative, local).as_bytes());
                            render_template(
                                &self.local_ident_name,
                                &TemplateVars {
                                    name: &stem,
                                    ext: "css",
                                    local,
                                    digest: &digest,
                                    hash_length: 8,
                                },
                            )
                        })
                        .clone();
                    format!("{}{}", &caps[1], scoped)
                });
                out.push_str(&scoped);
            } else {
                out.push_str(segment);
            }
            out.push(ch);
            segment_start = idx + 1;
        }
        out.push_str(&css[segment_start..]);

        (out, exports)
    }
}

impl TransformStage for CssStage {
    fn name(&self) -> &str {
        "css"
    }

    fn apply(&self, unit: &mut TransformUnit) -> Result<()> {
        let source = unit.text(self.name())?.to_string();

        let css = Self::extract_imports(&source, unit);
        let css = Self::extract_urls(&css, unit);

        let css = if self.is_scoped(&unit.path) {
            let (scoped, exports) = self.scope_selectors(&css, &unit.path);
            unit.css_exports = exports;
            scoped
        } else {
            css
        };

        validate(&css).map_err(|message| {
            KilnError::transform(self.name(), unit.path.clone(), message)
        })?;

        unit.set_text(css, Lang::Style);
        Ok(())
    }
}

fn validate(css: &str) -> std::result::Result<(), String> {
    StyleSheet::parse(css, ParserOptions::default())
        .map(|_| ())
        .map_err(|e| e.to_string())
}

/// Minify a finished stylesheet with lightningcss
pub fn minify_css(css: &str, filename: &str) -> Result<String> {
    let options = ParserOptions {
        filename: filename.to_string(),
        ..ParserOptions::default()
    };
    let mut stylesheet = StyleSheet::parse(css, options)
        .map_err(|e| KilnError::transform("css", PathBuf::from(filename), e.to_string()))?;
    stylesheet
        .minify(MinifyOptions::default())
        .map_err(|e| KilnError::transform("css", PathBuf::from(filename), e.to_string()))?;
    let printed = stylesheet
        .to_css(PrinterOptions {
            minify: true,
            ..PrinterOptions::default()
        })
        .map_err(|e| KilnError::transform("css", PathBuf::from(filename), e.to_string()))?;
    Ok(printed.code)
}

fn class_map_literal(unit: &TransformUnit) -> String {
    let entries: Vec<String> = unit
        .css_exports
        .iter()
        .map(|(local, scoped)| format!("{}: {}", js_string(local), js_string(scoped)))
        .collect();
    format!("{{{}}}", entries.join(", "))
}

/// `require` lines for `@import`ed stylesheets, keeping their order ahead of this one
fn import_requires(unit: &TransformUnit) -> String {
    unit.dependencies
        .iter()
        .filter(|d| d.kind == DependencyKind::Import)
        .map(|d| format!("require({});\n", js_string(&d.specifier)))
        .collect()
}

fn expect_style(unit: &TransformUnit, stage: &str) -> Result<()> {
    if unit.lang == Lang::Style {
        Ok(())
    } else {
        Err(KilnError::transform(
            stage,
            unit.path.clone(),
            format!("expected stylesheet input, got {:?}", unit.lang),
        ))
    }
}

/// mini-css-extract: stylesheet becomes a side file, module exports the class map
pub struct ExtractStyleStage;

impl TransformStage for ExtractStyleStage {
    fn name(&self) -> &str {
        "extract-style"
    }

    fn apply(&self, unit: &mut TransformUnit) -> Result<()> {
        expect_style(unit, self.name())?;
        let css = std::mem::take(&mut unit.bytes);
        unit.side_files.push(SideFile {
            kind: SideFileKind::Style,
            name: String::new(),
            content: css,
        });
        let code = format!("{}module.exports = {};\n", import_requires(unit), class_map_literal(unit));
        unit.set_text(code, Lang::Module);
        Ok(())
    }
}

/// style-loader: module appends a `<style>` element when it runs
pub struct InjectStyleStage;

impl TransformStage for InjectStyleStage {
    fn name(&self) -> &str {
        "inject-style"
    }

    fn apply(&self, unit: &mut TransformUnit) -> Result<()> {
        expect_style(unit, self.name())?;
        let css = unit.text(self.name())?;
        let code = format!(
            "{}require.i({});\nmodule.exports = {};\n",
            import_requires(unit),
            js_string(css),
            class_map_literal(unit)
        );
        unit.set_text(code, Lang::Module);
        Ok(())
    }
}
