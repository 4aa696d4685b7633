// HTML Plugin: writes the page document with every entrypoint's assets injected

use crate::core::models::{HtmlConfig, Manifest};
use crate::core::plugin::{Plugin, PluginContext};
use crate::infrastructure::RenderedFile;
use crate::utils::{KilnError, Logger, Result};
use once_cell::sync::Lazy;
use regex::Regex;

static BETWEEN_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r">\s+<").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").unwrap());

const DEFAULT_DOCUMENT: &str = "<!DOCTYPE html>
<html>
  <head>
    <meta charset=\"utf-8\">
    <title>kiln</title>
  </head>
  <body>
    <div id=\"root\"></div>
  </body>
</html>
";

/// Injects `<link>` tags before `</head>` and `<script>` tags before `</body>`
pub struct HtmlPlugin {
    config: HtmlConfig,
}

impl HtmlPlugin {
    pub fn new(config: HtmlConfig) -> Self {
        Self { config }
    }

    /// Stylesheet and script URLs across all entrypoints, first occurrence kept
    fn asset_urls(manifest: &Manifest) -> (Vec<&str>, Vec<&str>) {
        let mut styles: Vec<&str> = Vec::new();
        let mut scripts: Vec<&str> = Vec::new();
        for assets in manifest.entrypoints.values() {
            for css in &assets.css {
                if !styles.contains(&css.as_str()) {
                    styles.push(css);
                }
            }
            for js in &assets.js {
                if !scripts.contains(&js.as_str()) {
                    scripts.push(js);
                }
            }
        }
        (styles, scripts)
    }

    pub fn render(&self, template: &str, manifest: &Manifest) -> String {
        let (styles, scripts) = Self::asset_urls(manifest);
        let links: String = styles
            .iter()
            .map(|href| format!("<link rel=\"stylesheet\" href=\"{}\">\n", href))
            .collect();
        let tags: String = scripts
            .iter()
            .map(|src| format!("<script src=\"{}\"></script>\n", src))
            .collect();

        let mut document = template.to_string();
        match document.find("</head>") {
            Some(at) => document.insert_str(at, &links),
            None => document.insert_str(0, &links),
        }
        match document.rfind("</body>") {
            Some(at) => document.insert_str(at, &tags),
            None => document.push_str(&tags),
        }

        if self.config.minify {
            let collapsed = BETWEEN_TAGS.replace_all(&document, "><");
            WHITESPACE.replace_all(&collapsed, " ").trim().to_string()
        } else {
            document
        }
    }

    fn read_template(&self, context: &PluginContext) -> Result<String> {
        let path = context.root.join(&self.config.template);
        match std::fs::read_to_string(&path) {
            Ok(template) => Ok(template),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Logger::debug(&format!(
                    "No HTML template at {}, using the default document",
                    path.display()
                ));
                Ok(DEFAULT_DOCUMENT.to_string())
            }
            Err(e) => Err(KilnError::Io(e)),
        }
    }
}

impl Plugin for HtmlPlugin {
    fn name(&self) -> &str {
        "html-plugin"
    }

    fn extra_files(&self, context: &PluginContext, manifest: &Manifest) -> Result<Vec<RenderedFile>> {
        let template = self.read_template(context)?;
        let document = self.render(&template, manifest);
        Ok(vec![RenderedFile {
            name: self.config.filename.clone(),
            content: document.into_bytes(),
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::{BuildConfig, BuildMode, EntryAssets};
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn manifest() -> Manifest {
        let mut manifest = Manifest::default();
        manifest.entrypoints.insert(
            "app".to_string(),
            EntryAssets {
                js: vec!["/js/shared.1.js".to_string(), "/js/app.2.js".to_string()],
                css: vec!["/css/app.3.css".to_string()],
            },
        );
        manifest.entrypoints.insert(
            "admin".to_string(),
            EntryAssets {
                js: vec!["/js/shared.1.js".to_string(), "/js/admin.4.js".to_string()],
                css: Vec::new(),
            },
        );
        manifest
    }

    fn plugin(minify: bool) -> HtmlPlugin {
        HtmlPlugin::new(HtmlConfig {
            template: PathBuf::from("src/index.html"),
            filename: "index.html".to_string(),
            minify,
        })
    }

    #[test]
    fn test_injects_links_and_scripts() {
        let html = plugin(false).render(
            "<html><head><title>x</title></head><body><main></main></body></html>",
            &manifest(),
        );

        let link = html.find("<link rel=\"stylesheet\" href=\"/css/app.3.css\">").unwrap();
        assert!(link < html.find("</head>").unwrap());
        assert_eq!(html.matches("/js/shared.1.js").count(), 1);

        let shared = html.find("/js/shared.1.js").unwrap();
        let app = html.find("/js/app.2.js").unwrap();
        let admin = html.find("/js/admin.4.js").unwrap();
        assert!(shared < app && app < admin);
        assert!(admin < html.find("</body>").unwrap());
    }

    #[test]
    fn test_minify_collapses_whitespace() {
        let html = plugin(true).render(DEFAULT_DOCUMENT, &manifest());
        assert!(!html.contains(">\n"));
        assert!(html.starts_with("<!DOCTYPE html><html><head>"));
    }

    #[test]
    fn test_missing_template_uses_default_document() {
        let dir = tempdir().unwrap();
        let config = BuildConfig::for_mode(dir.path(), BuildMode::Development);
        let context = PluginContext::from_config(&config);

        let files = plugin(false).extra_files(&context, &manifest()).unwrap();
        assert_eq!(files[0].name, "index.html");
        let html = String::from_utf8(files[0].content.clone()).unwrap();
        assert!(html.contains("<div id=\"root\"></div>"));
        assert!(html.contains("/js/app.2.js"));
    }
}
