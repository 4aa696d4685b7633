use super::common::{content_hash, js_string, name_and_ext, public_url, render_template, TemplateVars};
use super::css_processor::{is_external_reference, url_placeholder};
use crate::core::interfaces::TransformStage;
use crate::core::models::{AssetRule, Lang, SideFile, SideFileKind, TransformUnit};
use crate::utils::{KilnError, Logger, Result};
use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;

static IMG_SRC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<img\b[^>]*?\ssrc\s*=\s*["']([^"']+)["']"#).unwrap());

/// json-loader: validate and export the parsed value
pub struct JsonStage;

impl TransformStage for JsonStage {
    fn name(&self) -> &str {
        "json"
    }

    fn apply(&self, unit: &mut TransformUnit) -> Result<()> {
        let text = unit.text(self.name())?;
        serde_json::from_str::<serde_json::Value>(text)
            .map_err(|e| KilnError::transform(self.name(), unit.path.clone(), e.to_string()))?;

        Logger::debug(&format!("📦 Processing JSON asset: {}", unit.path.display()));

        let code = format!("module.exports = {};\n", text.trim());
        unit.set_text(code, Lang::Module);
        Ok(())
    }
}

/// html-loader: export the markup as a string, `<img src>` targets become dependencies
pub struct HtmlStage;

impl TransformStage for HtmlStage {
    fn name(&self) -> &str {
        "html"
    }

    fn apply(&self, unit: &mut TransformUnit) -> Result<()> {
        let source = unit.text(self.name())?.to_string();

        let markup = IMG_SRC.replace_all(&source, |caps: &regex::Captures<'_>| {
            let (Some(whole), Some(target)) = (caps.get(0), caps.get(1)) else {
                return String::new();
            };
            if is_external_reference(target.as_str()) {
                return whole.as_str().to_string();
            }
            let index = unit.add_url_dependency(target.as_str());
            let offset = whole.start();
            format!(
                "{}{}{}",
                &whole.as_str()[..target.start() - offset],
                url_placeholder(index),
                &whole.as_str()[target.end() - offset..]
            )
        });

        let code = format!("module.exports = {};\n", js_string(&markup));
        unit.set_text(code, Lang::Module);
        Ok(())
    }
}

/// url-loader: small files inline as data URIs, larger ones are emitted
/// under a hashed name and referenced by public URL
pub struct AssetStage {
    rule: AssetRule,
    public_path: String,
    hash_length: usize,
}

impl AssetStage {
    pub fn new(rule: AssetRule, public_path: &str, hash_length: usize) -> Self {
        Self {
            rule,
            public_path: public_path.to_string(),
            hash_length,
        }
    }

    pub fn mime_type(ext: &str) -> &'static str {
        match ext {
            "png" => "image/png",
            "jpg" | "jpeg" => "image/jpeg",
            "gif" => "image/gif",
            "svg" => "image/svg+xml",
            "webp" => "image/webp",
            "woff" => "font/woff",
            "woff2" => "font/woff2",
            "eot" => "application/vnd.ms-fontobject",
            "ttf" => "font/ttf",
            "otf" => "font/otf",
            _ => "application/octet-stream",
        }
    }
}

impl TransformStage for AssetStage {
    fn name(&self) -> &str {
        "asset"
    }

    fn apply(&self, unit: &mut TransformUnit) -> Result<()> {
        let bytes = std::mem::take(&mut unit.bytes);
        let (name, ext) = name_and_ext(&unit.path);

        let url = if bytes.len() <= self.rule.limit {
            format!(
                "data:{};base64,{}",
                Self::mime_type(&ext),
                base64::engine::general_purpose::STANDARD.encode(&bytes)
            )
        } else {
            let digest = content_hash(&bytes);
            let file = render_template(
                &self.rule.name,
                &TemplateVars {
                    name: &name,
                    ext: &ext,
                    local: "",
                    digest: &digest,
                    hash_length: self.hash_length,
                },
            );
            let url = public_url(&self.public_path, &file);
            unit.side_files.push(SideFile {
                kind: SideFileKind::Asset,
                name: file,
                content: bytes,
            });
            url
        };

        unit.set_text(format!("module.exports = {};\n", js_string(&url)), Lang::Module);
        unit.public_url = Some(url);
        Ok(())
    }
}
