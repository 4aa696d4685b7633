use crate::support::{config, project, read_output, snapshot};
use kiln::core::interfaces::BuildService;
use kiln::core::models::BuildMode;
use kiln::core::services::BundlerService;
use kiln::infrastructure::TokioFileSystemService;
use std::sync::Arc;

fn service() -> BundlerService {
    BundlerService::new(Arc::new(TokioFileSystemService))
}

/// Emitted script files containing a registry entry for `key`
fn chunks_defining(dir: &std::path::Path, key: &str) -> usize {
    let marker = format!("\"{}\": [function", key);
    snapshot(&dir.join("dist"))
        .iter()
        .filter(|(name, _)| name.ends_with(".js"))
        .filter(|(_, bytes)| String::from_utf8_lossy(bytes).contains(&marker))
        .count()
}

#[tokio::test]
async fn test_app_admin_and_shared_chunks() {
    let dir = project(&[
        ("src/index.js", "import { format } from './shared';\nconsole.log(format('app'));"),
        ("src/admin.js", "import { format } from './shared';\nconsole.log(format('admin'));"),
        ("src/shared.js", "export function format(name) { return `[${name}]`; }"),
    ]);
    let config = config(
        dir.path(),
        BuildMode::Development,
        &[("app", "./src/index.js"), ("admin", "./src/admin.js")],
    );

    let result = service().build(&config).await.unwrap();

    assert_eq!(result.chunks, vec!["app", "admin", "shared"]);
    assert_eq!(chunks_defining(dir.path(), "src/shared.js"), 1);

    let shared_js = result.manifest.assets["shared.js"].clone();
    let app = &result.manifest.entrypoints["app"];
    let admin = &result.manifest.entrypoints["admin"];
    assert_eq!(app.js, vec![shared_js.clone(), result.manifest.assets["app.js"].clone()]);
    assert_eq!(admin.js, vec![shared_js.clone(), result.manifest.assets["admin.js"].clone()]);

    let app_js = read_output(dir.path(), &app.js[1]);
    assert!(app_js.contains("k.require(\"src/index.js\");"));
    assert!(app_js.contains("{\"./shared\": \"src/shared.js\"}"));
}

#[tokio::test]
async fn test_entry_files_named_without_dot_slash() {
    let dir = project(&[
        ("index.js", "import { format } from './shared';\nconsole.log(format('app'));"),
        ("admin.js", "import { format } from './shared';\nconsole.log(format('admin'));"),
        ("shared.js", "export function format(name) { return `[${name}]`; }"),
    ]);
    let config = config(
        dir.path(),
        BuildMode::Development,
        &[("app", "index.js"), ("admin", "admin.js")],
    );

    let result = service().build(&config).await.unwrap();

    assert_eq!(result.chunks, vec!["app", "admin", "shared"]);
    assert_eq!(chunks_defining(dir.path(), "shared.js"), 1);
    let app_js = read_output(dir.path(), &result.manifest.entrypoints["app"].js[1]);
    assert!(app_js.contains("k.require(\"index.js\");"));
}

#[tokio::test]
async fn test_shared_stylesheet_follows_shared_chunk() {
    let dir = project(&[
        ("src/index.js", "import './common.css';\nimport './app.css';"),
        ("src/admin.js", "import './common.css';"),
        ("src/common.css", "body { margin: 0; }"),
        ("src/app.css", "main { padding: 1px; }"),
    ]);
    let config = config(
        dir.path(),
        BuildMode::Production,
        &[("app", "./src/index.js"), ("admin", "./src/admin.js")],
    );

    let result = service().build(&config).await.unwrap();

    let shared_css = result.manifest.assets["shared.css"].clone();
    let app = &result.manifest.entrypoints["app"];
    let admin = &result.manifest.entrypoints["admin"];
    assert_eq!(app.css, vec![shared_css.clone(), result.manifest.assets["app.css"].clone()]);
    assert_eq!(admin.css, vec![shared_css.clone()]);

    assert!(read_output(dir.path(), &shared_css).contains("margin:0"));
    assert!(!read_output(dir.path(), &app.css[1]).contains("margin"));
}

#[tokio::test]
async fn test_vendor_chunk_holds_node_modules() {
    let dir = project(&[
        ("src/index.js", "import lib from 'lib';\nconsole.log(lib);"),
        ("node_modules/lib/package.json", r#"{ "name": "lib", "main": "main.js" }"#),
        ("node_modules/lib/main.js", "module.exports = { version: 1 };"),
    ]);
    let mut config = config(dir.path(), BuildMode::Development, &[("app", "./src/index.js")]);
    config.optimization.vendor_chunk = true;

    let result = service().build(&config).await.unwrap();

    assert_eq!(result.chunks, vec!["app", "vendors"]);
    let app = &result.manifest.entrypoints["app"];
    assert_eq!(app.js[0], result.manifest.assets["vendors.js"]);
    assert_eq!(chunks_defining(dir.path(), "node_modules/lib/main.js"), 1);
}

#[tokio::test]
async fn test_threshold_above_importers_keeps_modules_in_entries() {
    let dir = project(&[
        ("src/a.js", "import './util';"),
        ("src/b.js", "import './util';"),
        ("src/c.js", "console.log('c');"),
        ("src/util.js", "export const util = true;"),
    ]);
    let mut config = config(
        dir.path(),
        BuildMode::Development,
        &[("a", "./src/a.js"), ("b", "./src/b.js"), ("c", "./src/c.js")],
    );
    config.optimization.min_chunks = 3;

    let result = service().build(&config).await.unwrap();

    assert_eq!(result.chunks, vec!["a", "b", "c"]);
    assert_eq!(chunks_defining(dir.path(), "src/util.js"), 2);
    assert_eq!(result.modules_processed, 4);
}
