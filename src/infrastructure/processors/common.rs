/// Shared helpers for the transform stages and the emitter
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

/// A byte-range replacement in source text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub start: u32,
    pub end: u32,
    pub text: String,
}

impl Edit {
    pub fn replace(start: u32, end: u32, text: impl Into<String>) -> Self {
        Self { start, end, text: text.into() }
    }

    pub fn insert(at: u32, text: impl Into<String>) -> Self {
        Self::replace(at, at, text)
    }
}

/// Edits in application order. An edit starting inside an earlier
/// replacement is dropped; insertions at the same offset keep their order.
pub fn accepted_edits(source: &str, mut edits: Vec<Edit>) -> Vec<Edit> {
    edits.sort_by_key(|e| (e.start, e.end));

    let mut cursor = 0usize;
    edits.retain(|edit| {
        let (start, end) = (edit.start as usize, edit.end as usize);
        if start < cursor || end > source.len() {
            return false;
        }
        cursor = end;
        true
    });
    edits
}

/// Apply non-overlapping edits, see [`accepted_edits`]
pub fn apply_edits(source: &str, edits: Vec<Edit>) -> String {
    let edits = accepted_edits(source, edits);
    let mut out = String::with_capacity(source.len() + edits.len() * 16);
    let mut cursor = 0usize;
    for edit in edits {
        out.push_str(&source[cursor..edit.start as usize]);
        out.push_str(&edit.text);
        cursor = edit.end as usize;
    }
    out.push_str(&source[cursor..]);
    out
}

/// JavaScript string literal for arbitrary text
pub fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// Content digest used for every emitted name
pub fn content_hash(bytes: &[u8]) -> blake3::Hash {
    blake3::hash(bytes)
}

/// Values available to `[placeholder]` templates
pub struct TemplateVars<'a> {
    pub name: &'a str,
    pub ext: &'a str,
    pub local: &'a str,
    pub digest: &'a blake3::Hash,
    /// Length used by a bare `[hash]`
    pub hash_length: usize,
}

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[(name|ext|local|hash)(?::(hex|base64))?(?::(\d+))?\]").unwrap()
});

/// Render `[name]`, `[ext]`, `[local]`, `[hash]`, `[hash:N]` and
/// `[hash:base64:N]`. Unknown placeholders are left as written.
pub fn render_template(template: &str, vars: &TemplateVars<'_>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures<'_>| match &caps[1] {
            "name" => vars.name.to_string(),
            "ext" => vars.ext.to_string(),
            "local" => vars.local.to_string(),
            _ => {
                let length = caps
                    .get(3)
                    .and_then(|m| m.as_str().parse::<usize>().ok())
                    .unwrap_or(vars.hash_length);
                let encoded = match caps.get(2).map(|m| m.as_str()) {
                    Some("base64") => {
                        use base64::Engine;
                        base64::engine::general_purpose::URL_SAFE_NO_PAD
                            .encode(vars.digest.as_bytes())
                    }
                    _ => vars.digest.to_hex().to_string(),
                };
                encoded.chars().take(length).collect()
            }
        })
        .into_owned()
}

/// File stem and lowercase extension of a path
pub fn name_and_ext(path: &Path) -> (String, String) {
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("file")
        .to_string();
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_lowercase();
    (name, ext)
}

/// Join a public path and an output-relative file name
pub fn public_url(public_path: &str, file: &str) -> String {
    if public_path.is_empty() {
        return file.to_string();
    }
    format!("{}/{}", public_path.trim_end_matches('/'), file.trim_start_matches('/'))
}
