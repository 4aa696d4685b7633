use crate::support::{config, project, read_output, snapshot, write};
use async_trait::async_trait;
use kiln::core::interfaces::{BuildService, FileSystemService};
use kiln::core::models::{BuildMode, BuildState};
use kiln::core::services::BundlerService;
use kiln::infrastructure::TokioFileSystemService;
use kiln::utils::{BuildWarning, CliOverrides, ConfigLoader, KilnError, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Notify;

fn service() -> BundlerService {
    BundlerService::new(Arc::new(TokioFileSystemService))
}

#[tokio::test]
async fn test_diamond_imports_transform_each_module_once() {
    let dir = project(&[
        ("src/index.js", "import { a } from './a';\nimport { b } from './b';\nconsole.log(a, b);"),
        ("src/a.js", "import { c } from './c';\nexport const a = c + 1;"),
        ("src/b.js", "import { c } from './c';\nexport const b = c + 2;"),
        ("src/c.js", "export const c = 1;"),
    ]);

    let result = service()
        .build(&config(dir.path(), BuildMode::Development, &[("app", "./src/index.js")]))
        .await
        .unwrap();

    assert_eq!(result.modules_processed, 4);
    assert_eq!(result.chunks, vec!["app"]);
    let js = read_output(dir.path(), &result.manifest.entrypoints["app"].js[0]);
    assert_eq!(js.matches("\"src/c.js\": [function").count(), 1);
}

#[tokio::test]
async fn test_builds_are_deterministic() {
    let dir = project(&[
        ("src/index.js", "import './style.css';\nimport { greet } from './greet';\ngreet('kiln');"),
        ("src/greet.ts", "export function greet(name: string): void { console.log(`hi ${name}`); }"),
        ("src/style.css", "body { margin: 0; }"),
    ]);
    let config = config(dir.path(), BuildMode::Production, &[("app", "./src/index.js")]);

    let first = service().build(&config).await.unwrap();
    let before = snapshot(&config.output.dir);
    let second = service().build(&config).await.unwrap();
    let after = snapshot(&config.output.dir);

    assert_eq!(first.manifest, second.manifest);
    assert_eq!(before, after);
    assert!(before.iter().any(|(name, _)| name == "manifest.json"));
    assert!(before.iter().any(|(name, _)| name == "index.html"));
}

#[tokio::test]
async fn test_missing_module_aborts_without_output() {
    let dir = project(&[("src/index.js", "import './nowhere';")]);
    let config = config(dir.path(), BuildMode::Development, &[("app", "./src/index.js")]);

    let service = service();
    let err = service.build(&config).await.unwrap_err();

    assert_eq!(err.kind(), "ResolutionError");
    assert!(err.to_string().contains("./nowhere"));
    assert_eq!(service.state(), BuildState::Failed);
    assert!(!config.output.dir.exists());
}

#[tokio::test]
async fn test_missing_entry_aborts_without_output() {
    let dir = project(&[("src/index.js", "console.log('here');")]);
    let config = config(dir.path(), BuildMode::Production, &[("app", "./src/absent.js")]);

    let service = service();
    let err = service.build(&config).await.unwrap_err();

    assert_eq!(err.kind(), "ResolutionError");
    assert!(err.to_string().contains("./src/absent.js"));
    assert_eq!(service.state_history().last(), Some(&BuildState::Failed));
    assert!(!config.output.dir.exists());
}

#[tokio::test]
async fn test_entry_without_dot_slash_resolves_from_root() {
    let dir = project(&[
        ("src/index.js", "import { two } from './two';\nconsole.log(two);"),
        ("src/two.js", "export const two = 2;"),
    ]);

    let result = service()
        .build(&config(dir.path(), BuildMode::Development, &[("app", "src/index.js")]))
        .await
        .unwrap();

    assert_eq!(result.modules_processed, 2);
    let js = read_output(dir.path(), &result.manifest.entrypoints["app"].js[0]);
    assert!(js.contains("k.require(\"src/index.js\");"));
}

#[tokio::test]
async fn test_production_writes_source_maps() {
    let dir = project(&[
        ("src/index.js", "import { greet } from './greet';\ngreet('kiln');"),
        ("src/greet.ts", "export function greet(name: string): void {\n  console.log(`hi ${name}`);\n}\n"),
    ]);

    let result = service()
        .build(&config(dir.path(), BuildMode::Production, &[("app", "./src/index.js")]))
        .await
        .unwrap();

    let js_url = &result.manifest.entrypoints["app"].js[0];
    let map_url = &result.manifest.assets["app.js.map"];
    assert_eq!(map_url, &format!("{}.map", js_url));

    let js = read_output(dir.path(), js_url);
    let file_name = js_url.rsplit('/').next().unwrap();
    assert!(js.trim_end().ends_with(&format!("//# sourceMappingURL={}.map", file_name)));

    let map: serde_json::Value = serde_json::from_str(&read_output(dir.path(), map_url)).unwrap();
    assert_eq!(map["version"], 3);
    let sources: Vec<&str> = map["sources"].as_array().unwrap().iter().filter_map(|s| s.as_str()).collect();
    assert!(sources.contains(&"src/greet.ts"));
    assert!(map["sourcesContent"].to_string().contains("name: string"));
}

#[tokio::test]
async fn test_development_writes_no_source_maps() {
    let dir = project(&[("src/index.js", "console.log('dev');")]);
    let config = config(dir.path(), BuildMode::Development, &[("app", "./src/index.js")]);

    let result = service().build(&config).await.unwrap();

    assert!(!result.manifest.assets.contains_key("app.js.map"));
    assert!(snapshot(&config.output.dir).iter().all(|(name, _)| !name.ends_with(".map")));
    let js = read_output(dir.path(), &result.manifest.entrypoints["app"].js[0]);
    assert!(!js.contains("sourceMappingURL"));
}

#[tokio::test]
async fn test_transform_error_names_stage_and_file() {
    let dir = project(&[
        ("src/index.js", "import data from './data.json';\nconsole.log(data);"),
        ("src/data.json", "{ \"broken\": }"),
    ]);
    let config = config(dir.path(), BuildMode::Development, &[("app", "./src/index.js")]);

    let err = service().build(&config).await.unwrap_err();
    match err {
        KilnError::Transform { stage, path, .. } => {
            assert_eq!(stage, "json");
            assert!(path.ends_with("src/data.json"));
        }
        other => panic!("expected transform error, got {other:?}"),
    }
    assert!(!config.output.dir.exists());
}

#[tokio::test]
async fn test_circular_imports_build_with_warning() {
    let dir = project(&[
        ("src/a.js", "import { b } from './b';\nexport function a() { return b; }\nconsole.log(a());"),
        ("src/b.js", "import { a } from './a';\nexport function b() { return a; }"),
    ]);

    let result = service()
        .build(&config(dir.path(), BuildMode::Development, &[("app", "./src/a.js")]))
        .await
        .unwrap();

    assert_eq!(result.modules_processed, 2);
    assert_eq!(
        result.warnings,
        vec![BuildWarning::Cycle {
            modules: vec!["src/a.js".into(), "src/b.js".into()],
        }]
    );
    let js = read_output(dir.path(), &result.manifest.entrypoints["app"].js[0]);
    assert_eq!(js.matches("\"src/a.js\": [function").count(), 1);
    assert_eq!(js.matches("\"src/b.js\": [function").count(), 1);
}

#[tokio::test]
async fn test_production_extracts_styles_and_emits_assets() {
    let dir = project(&[
        (
            "src/index.js",
            "import styles from './app.module.css';\nimport data from './data.json';\nconsole.log(styles.title, data.name);",
        ),
        ("src/app.module.css", ".title { background: url(./hero.png); }"),
        ("src/data.json", "{\"name\": \"kiln\"}"),
        ("src/index.html", "<html>\n  <head><title>app</title></head>\n  <body><main></main></body>\n</html>"),
    ]);
    write(dir.path(), "src/hero.png", &vec![7u8; 30_000]);

    let result = service()
        .build(&config(dir.path(), BuildMode::Production, &[("app", "./src/index.js")]))
        .await
        .unwrap();

    let hero = &result.manifest.assets["src/hero.png"];
    assert!(hero.starts_with("/image/hero-"));
    assert!(dir.path().join("dist").join(hero.trim_start_matches('/')).exists());

    let entry = &result.manifest.entrypoints["app"];
    assert_eq!(entry.css.len(), 1);
    let css = read_output(dir.path(), &entry.css[0]);
    assert!(css.contains(hero.as_str()));
    assert!(css.contains(".title___"));

    let html = read_output(dir.path(), "/index.html");
    assert!(html.contains(&format!("<link rel=\"stylesheet\" href=\"{}\">", entry.css[0])));
    assert!(html.contains(&format!("<script src=\"{}\"></script>", entry.js[0])));
    assert!(!html.contains("\n"));
}

#[tokio::test]
async fn test_development_injects_styles_and_replaces_defines() {
    let dir = project(&[
        ("src/index.ts", "import './theme.scss';\nconst count: number = 2;\nif (__DEV__) { console.log(process.env.NODE_ENV, count); }"),
        ("src/theme.scss", "$accent: #09f;\n.button { color: $accent; }"),
    ]);

    let result = service()
        .build(&config(dir.path(), BuildMode::Development, &[("app", "./src/index.ts")]))
        .await
        .unwrap();

    let entry = &result.manifest.entrypoints["app"];
    assert!(entry.css.is_empty());
    let js = read_output(dir.path(), &entry.js[0]);
    assert!(js.contains("require.i("));
    assert!(js.contains("#09f"));
    assert!(!js.contains("__DEV__"));
    assert!(js.contains("\"development\""));
    assert!(!js.contains("count: number"));
}

#[tokio::test]
async fn test_config_file_drives_the_build() {
    let dir = project(&[
        ("src/main.js", "console.log('main');"),
        (
            "kiln.config.json",
            r#"{ "mode": "test", "entry": { "main": "./src/main.js" }, "output": { "filename": "[name].js" } }"#,
        ),
    ]);

    let file_config = ConfigLoader::load_from_file(dir.path()).unwrap();
    let config = ConfigLoader::merge_with_cli(
        file_config,
        dir.path().to_path_buf(),
        CliOverrides::default(),
        None,
    )
    .unwrap();
    assert_eq!(config.mode, BuildMode::Test);

    let result = service().build(&config).await.unwrap();
    assert_eq!(result.manifest.entrypoints["main"].js, vec!["/main.js"]);
    assert!(dir.path().join("dist/main.js").exists());
    assert!(!dir.path().join("dist/index.html").exists());
}

/// File system whose reads wait until the gate opens
struct GatedFs {
    gate: Arc<Notify>,
    inner: TokioFileSystemService,
}

#[async_trait]
impl FileSystemService for GatedFs {
    async fn read_bytes(&self, path: &Path) -> Result<Vec<u8>> {
        self.gate.notified().await;
        self.gate.notify_one();
        self.inner.read_bytes(path).await
    }
    async fn write_file(&self, path: &Path, content: &[u8]) -> Result<()> {
        self.inner.write_file(path, content).await
    }
    async fn create_directory(&self, path: &Path) -> Result<()> {
        self.inner.create_directory(path).await
    }
    async fn remove_directory(&self, path: &Path) -> Result<()> {
        self.inner.remove_directory(path).await
    }
}

#[tokio::test]
async fn test_second_build_on_same_output_is_locked() {
    let dir = project(&[("src/index.js", "console.log('one');")]);
    let config = config(dir.path(), BuildMode::Development, &[("app", "./src/index.js")]);

    let gate = Arc::new(Notify::new());
    let first = BundlerService::new(Arc::new(GatedFs {
        gate: gate.clone(),
        inner: TokioFileSystemService,
    }));
    let second = service();

    let (first_result, second_result) = tokio::join!(first.build(&config), async {
        let result = second.build(&config).await;
        gate.notify_one();
        result
    });

    assert!(first_result.is_ok());
    assert!(matches!(second_result, Err(KilnError::OutputLocked(_))));
}
