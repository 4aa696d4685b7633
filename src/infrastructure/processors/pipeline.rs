use super::asset_processor::{AssetStage, HtmlStage, JsonStage};
use super::css_processor::{CssScope, CssStage, ExtractStyleStage, InjectStyleStage};
use super::js_processor::{DefineStage, EsmStage, TranspileStage};
use super::scss_processor::SassStage;
use crate::core::interfaces::TransformStage;
use crate::core::models::{BuildConfig, Lang, TransformOutput, TransformUnit};
use crate::utils::{KilnError, Logger, Result};
use regex::Regex;
use std::path::Path;
use std::sync::Arc;

/// A file pattern and the stage chain applied to matching files
pub struct TransformRule {
    pub name: String,
    test: Regex,
    exclude: Option<Regex>,
    stages: Vec<Arc<dyn TransformStage>>,
}

impl TransformRule {
    pub fn new(name: &str, test: &str, stages: Vec<Arc<dyn TransformStage>>) -> Result<Self> {
        Ok(Self {
            name: name.to_string(),
            test: Regex::new(test)?,
            exclude: None,
            stages,
        })
    }

    pub fn exclude(mut self, pattern: &str) -> Result<Self> {
        self.exclude = Some(Regex::new(pattern)?);
        Ok(self)
    }

    pub fn matches(&self, path: &str) -> bool {
        self.test.is_match(path)
            && !self.exclude.as_ref().is_some_and(|exclude| exclude.is_match(path))
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }
}

/// Ordered rule list; the first matching rule owns the file
#[derive(Default)]
pub struct TransformRegistry {
    rules: Vec<TransformRule>,
    /// Script stages keep a source map per module
    source_maps: bool,
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self { rules: Vec::new(), source_maps: false }
    }

    pub fn with_source_maps(mut self, enabled: bool) -> Self {
        self.source_maps = enabled;
        self
    }

    pub fn register(&mut self, rule: TransformRule) -> &mut Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(&self) -> &[TransformRule] {
        &self.rules
    }

    pub fn rule_for(&self, path: &Path) -> Option<&TransformRule> {
        let normalized = path.to_string_lossy().replace('\\', "/");
        self.rules.iter().find(|rule| rule.matches(&normalized))
    }

    /// Run a file through its rule's chain, which must end in a registry module
    pub fn transform(&self, path: &Path, bytes: Vec<u8>) -> Result<TransformOutput> {
        let rule = self.rule_for(path).ok_or_else(|| {
            KilnError::transform("registry", path.to_path_buf(), "no transform rule matches this file")
        })?;

        Logger::transforming(
            path.file_name().and_then(|s| s.to_str()).unwrap_or("unknown"),
            &rule.name,
        );

        let mut unit = TransformUnit::new(path.to_path_buf(), bytes);
        unit.map_sources = self.source_maps;
        for stage in &rule.stages {
            stage.apply(&mut unit)?;
        }

        if unit.lang != Lang::Module {
            let last = rule.stages.last().map(|s| s.name()).unwrap_or("registry");
            return Err(KilnError::transform(
                last,
                path.to_path_buf(),
                format!("rule '{}' ended with {:?} content instead of a module", rule.name, unit.lang),
            ));
        }

        let code = String::from_utf8(unit.bytes).map_err(|e| {
            KilnError::transform("registry", path.to_path_buf(), format!("invalid UTF-8: {}", e))
        })?;

        Ok(TransformOutput {
            rule: rule.name.clone(),
            code,
            dependencies: unit.dependencies,
            side_files: unit.side_files,
            public_url: unit.public_url,
            source_map: unit.source_map.map(Arc::new),
        })
    }

    /// The rule table for a build's mode and options
    pub fn for_config(config: &BuildConfig) -> Result<Self> {
        const SCRIPTS: &str = r"\.(js|jsx|ts|tsx|mjs|cjs)$";

        let define: Arc<dyn TransformStage> = Arc::new(DefineStage::new(config.define_values()));
        let esm: Arc<dyn TransformStage> = Arc::new(EsmStage);
        let style: Arc<dyn TransformStage> = if config.css.extract {
            Arc::new(ExtractStyleStage)
        } else {
            Arc::new(InjectStyleStage)
        };
        let (sass_scope, css_scope) = if config.css.modules {
            (CssScope::All, CssScope::ModuleFiles)
        } else {
            (CssScope::None, CssScope::None)
        };
        let public_path = &config.output.public_path;
        let hash_length = config.output.hash_length;

        let mut registry = Self::new().with_source_maps(config.output.source_map);
        registry
            .register(
                TransformRule::new(
                    "scripts",
                    SCRIPTS,
                    vec![Arc::new(TranspileStage::new()), define.clone(), esm.clone()],
                )?
                .exclude("/node_modules/")?,
            )
            .register(TransformRule::new("vendor-scripts", SCRIPTS, vec![define, esm])?)
            .register(TransformRule::new("json", r"\.json$", vec![Arc::new(JsonStage)])?)
            .register(TransformRule::new("html", r"\.html?$", vec![Arc::new(HtmlStage)])?)
            .register(TransformRule::new(
                "sass",
                r"\.s[ac]ss$",
                vec![
                    Arc::new(SassStage),
                    Arc::new(CssStage::new(&config.root, sass_scope, &config.css.local_ident_name)),
                    style.clone(),
                ],
            )?)
            .register(TransformRule::new(
                "css",
                r"\.css$",
                vec![
                    Arc::new(CssStage::new(&config.root, css_scope, &config.css.local_ident_name)),
                    style,
                ],
            )?)
            .register(TransformRule::new(
                "images",
                r"(?i)\.(png|jpe?g|gif|svg|webp)$",
                vec![Arc::new(AssetStage::new(config.assets.images.clone(), public_path, hash_length))],
            )?)
            .register(TransformRule::new(
                "fonts",
                r"(?i)\.(woff2?|eot|ttf|otf)$",
                vec![Arc::new(AssetStage::new(config.assets.fonts.clone(), public_path, hash_length))],
            )?);

        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::{BuildMode, DependencyKind, SideFileKind};
    use std::path::PathBuf;

    fn registry(mode: BuildMode) -> TransformRegistry {
        TransformRegistry::for_config(&BuildConfig::for_mode("/app", mode)).unwrap()
    }

    #[test]
    fn test_first_match_wins() {
        let registry = registry(BuildMode::Development);
        let rule = |p: &str| registry.rule_for(Path::new(p)).map(|r| r.name.clone());

        assert_eq!(rule("/app/src/index.tsx").as_deref(), Some("scripts"));
        assert_eq!(rule("/app/node_modules/react/index.js").as_deref(), Some("vendor-scripts"));
        assert_eq!(rule("/app/src/styles/app.scss").as_deref(), Some("sass"));
        assert_eq!(rule("/app/src/logo.PNG").as_deref(), Some("images"));
        assert_eq!(rule("/app/src/fonts/a.woff2").as_deref(), Some("fonts"));
        assert_eq!(rule("/app/src/notes.txt"), None);
    }

    #[test]
    fn test_stage_chains_follow_mode() {
        let dev = registry(BuildMode::Development);
        let prod = registry(BuildMode::Production);

        let dev_css = dev.rule_for(Path::new("/app/a.css")).unwrap();
        let prod_css = prod.rule_for(Path::new("/app/a.css")).unwrap();
        assert_eq!(dev_css.stage_names(), vec!["css", "inject-style"]);
        assert_eq!(prod_css.stage_names(), vec!["css", "extract-style"]);

        let scripts = dev.rule_for(Path::new("/app/a.ts")).unwrap();
        assert_eq!(scripts.stage_names(), vec!["transpile", "define", "esm"]);
    }

    #[test]
    fn test_unmatched_file_is_registry_error() {
        let err = registry(BuildMode::Test)
            .transform(Path::new("/app/readme.md"), b"# hi".to_vec())
            .unwrap_err();
        assert!(matches!(err, KilnError::Transform { ref stage, .. } if stage == "registry"));
    }

    #[test]
    fn test_chain_must_end_in_module() {
        struct Passthrough;
        impl TransformStage for Passthrough {
            fn name(&self) -> &str {
                "passthrough"
            }
            fn apply(&self, _unit: &mut TransformUnit) -> Result<()> {
                Ok(())
            }
        }

        let mut registry = TransformRegistry::new();
        registry.register(TransformRule::new("text", r"\.txt$", vec![Arc::new(Passthrough)]).unwrap());
        let err = registry.transform(Path::new("/app/a.txt"), b"hi".to_vec()).unwrap_err();
        assert!(matches!(err, KilnError::Transform { ref stage, .. } if stage == "passthrough"));
    }

    #[test]
    fn test_production_scripts_carry_source_maps() {
        let source = b"const answer: number = 42;\nexport default answer;\n".to_vec();
        let prod = registry(BuildMode::Production)
            .transform(Path::new("/app/src/answer.ts"), source.clone())
            .unwrap();
        let dev = registry(BuildMode::Development)
            .transform(Path::new("/app/src/answer.ts"), source)
            .unwrap();

        let map = prod.source_map.expect("production keeps a map");
        assert!(map.get_tokens().count() > 0);
        assert!(dev.source_map.is_none());
    }

    #[test]
    fn test_extracted_stylesheet_output() {
        let output = registry(BuildMode::Production)
            .transform(
                &PathBuf::from("/app/src/card.module.css"),
                b".title { background: url(./bg.png); }".to_vec(),
            )
            .unwrap();

        assert_eq!(output.rule, "css");
        assert_eq!(output.side_files.len(), 1);
        assert_eq!(output.side_files[0].kind, SideFileKind::Style);
        assert_eq!(output.dependencies.len(), 1);
        assert_eq!(output.dependencies[0].kind, DependencyKind::Url);
        assert!(output.code.starts_with("module.exports = {\"title\": \"title___"));
    }
}
