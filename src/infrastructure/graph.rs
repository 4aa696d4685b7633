use super::processors::source_map::rename_sources;
use super::processors::{url_placeholder, TransformRegistry};
use crate::core::interfaces::{FileSystemService, ModuleResolver};
use crate::core::models::{
    Dependency, DependencyKind, Edge, Module, ModuleGraph, ModuleId, SideFileKind, TransformOutput,
};
use crate::utils::{BuildWarning, KilnError, Logger, Result, Timer};
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use indexmap::IndexMap;
use oxc_sourcemap::SourceMap;
use petgraph::algo::tarjan_scc;
use petgraph::graph::DiGraph;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;

/// A module after reading, transforming and resolving its dependencies
#[derive(Debug)]
struct LoadedModule {
    source: Arc<[u8]>,
    /// `None` for implicit dependencies, which are never transformed
    output: Option<TransformOutput>,
    resolved: Vec<(Dependency, PathBuf)>,
}

/// Run CPU-bound work on the blocking pool
async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| KilnError::Io(std::io::Error::other(format!("worker task failed: {}", e))))?
}

fn with_importer(err: KilnError, importer: &Path) -> KilnError {
    match err {
        KilnError::Resolution { specifier, importer: None } => KilnError::Resolution {
            specifier,
            importer: Some(importer.to_path_buf()),
        },
        other => other,
    }
}

/// Discovery bookkeeping: ids are handed out in first-encountered order
#[derive(Default)]
struct Traversal {
    index: HashMap<PathBuf, ModuleId>,
    inlined: Vec<bool>,
    slots: Vec<Option<Module>>,
}

impl Traversal {
    /// Returns the module id and whether it still has to be loaded
    fn discover(&mut self, path: &Path, inlined: bool) -> (ModuleId, bool) {
        if let Some(id) = self.index.get(path) {
            // Imported for real after being seen as a preprocessor partial
            if self.inlined[id.0] && !inlined {
                self.inlined[id.0] = false;
                return (*id, true);
            }
            return (*id, false);
        }
        let id = ModuleId(self.slots.len());
        self.index.insert(path.to_path_buf(), id);
        self.inlined.push(inlined);
        self.slots.push(None);
        (id, true)
    }
}

/// Builds the module graph from entry points, transforming each module once
pub struct GraphBuilder {
    root: PathBuf,
    workers: usize,
    resolver: Arc<dyn ModuleResolver>,
    registry: Arc<TransformRegistry>,
    file_system: Arc<dyn FileSystemService>,
    visited: DashMap<PathBuf, Arc<OnceCell<Arc<LoadedModule>>>>,
    transforms: AtomicUsize,
}

impl GraphBuilder {
    pub fn new(
        root: &Path,
        workers: usize,
        resolver: Arc<dyn ModuleResolver>,
        registry: Arc<TransformRegistry>,
        file_system: Arc<dyn FileSystemService>,
    ) -> Self {
        Self {
            root: std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf()),
            workers: workers.max(1),
            resolver,
            registry,
            file_system,
            visited: DashMap::new(),
            transforms: AtomicUsize::new(0),
        }
    }

    /// Number of transforms run so far
    pub fn transform_count(&self) -> usize {
        self.transforms.load(Ordering::SeqCst)
    }

    /// Root-relative `/`-separated path; files outside the root keep their full path
    pub fn module_key(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    /// Resolve every entry specifier against the project root
    pub async fn resolve_entries(
        &self,
        entries: &IndexMap<String, Vec<String>>,
    ) -> Result<IndexMap<String, Vec<PathBuf>>> {
        let resolver = self.resolver.clone();
        let root = self.root.clone();
        let entries = entries.clone();

        blocking(move || {
            entries
                .into_iter()
                .map(|(name, specifiers)| {
                    let paths = specifiers
                        .iter()
                        .map(|specifier| resolver.resolve(specifier, &root))
                        .collect::<Result<Vec<_>>>()?;
                    Ok((name, paths))
                })
                .collect()
        })
        .await
    }

    /// Breadth-first traversal from resolved entries
    pub async fn build(&self, entries: &IndexMap<String, Vec<PathBuf>>) -> Result<ModuleGraph> {
        let _timer = Timer::start("Building module graph");

        let mut traversal = Traversal::default();
        let mut edges = Vec::new();
        let mut graph_entries = IndexMap::new();
        let mut frontier: Vec<(ModuleId, PathBuf, bool)> = Vec::new();

        for (name, paths) in entries {
            let mut ids = Vec::new();
            for path in paths {
                let (id, schedule) = traversal.discover(path, false);
                if schedule {
                    frontier.push((id, path.clone(), false));
                }
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
            graph_entries.insert(name.clone(), ids);
        }

        while !frontier.is_empty() {
            Logger::debug(&format!("Loading {} modules", frontier.len()));

            // `buffered` keeps results in frontier order whatever finishes first
            let loads: Vec<_> = frontier
                .iter()
                .map(|(_, path, inlined)| self.load(path.clone(), *inlined))
                .collect();
            let results: Vec<Result<Arc<LoadedModule>>> = stream::iter(loads)
            .buffered(self.workers)
            .collect()
            .await;

            let mut next = Vec::new();
            for ((id, path, inlined), result) in frontier.into_iter().zip(results) {
                let loaded = result?;

                // Re-queued as a regular module while this partial load was in flight
                if inlined && !traversal.inlined[id.0] {
                    continue;
                }

                for (dependency, target) in &loaded.resolved {
                    let implicit = dependency.kind == DependencyKind::Implicit;
                    let (to, schedule) = traversal.discover(target, implicit);
                    if schedule {
                        next.push((to, target.clone(), traversal.inlined[to.0]));
                    }
                    edges.push(Edge {
                        from: id,
                        to,
                        specifier: dependency.specifier.clone(),
                        kind: dependency.kind,
                    });
                }

                traversal.slots[id.0] = Some(self.to_module(id, path, inlined, &loaded));
            }
            frontier = next;
        }

        let mut graph = ModuleGraph {
            // every discovered module was loaded before the frontier emptied
            modules: traversal.slots.into_iter().flatten().collect(),
            index: traversal.index,
            edges,
            entries: graph_entries,
        };
        link_urls(&mut graph)?;

        Logger::debug(&format!(
            "Module graph: {} modules, {} edges",
            graph.len(),
            graph.edges.len()
        ));
        Ok(graph)
    }

    /// Resolve the entries, then build the graph
    pub async fn build_graph(&self, entries: &IndexMap<String, Vec<String>>) -> Result<ModuleGraph> {
        let resolved = self.resolve_entries(entries).await?;
        self.build(&resolved).await
    }

    fn to_module(&self, id: ModuleId, path: PathBuf, inlined: bool, loaded: &LoadedModule) -> Module {
        let key = self.module_key(&path);
        match &loaded.output {
            Some(output) => {
                let source_map = output.source_map.as_ref().map(|map| {
                    let mut map = SourceMap::clone(map);
                    rename_sources(&mut map, &key);
                    Arc::new(map)
                });
                Module {
                    id,
                    path,
                    key,
                    source: loaded.source.clone(),
                    code: output.code.clone(),
                    dependencies: output.dependencies.clone(),
                    side_files: output.side_files.clone(),
                    public_url: output.public_url.clone(),
                    source_map,
                    inlined,
                }
            }
            None => Module {
                id,
                path,
                key,
                source: loaded.source.clone(),
                code: String::new(),
                dependencies: Vec::new(),
                side_files: Vec::new(),
                public_url: None,
                source_map: None,
                inlined,
            },
        }
    }

    async fn load(&self, path: PathBuf, inlined: bool) -> Result<Arc<LoadedModule>> {
        if inlined {
            let source = self.file_system.read_bytes(&path).await?;
            return Ok(Arc::new(LoadedModule {
                source: source.into(),
                output: None,
                resolved: Vec::new(),
            }));
        }

        let cell = self.visited.entry(path.clone()).or_default().value().clone();
        cell.get_or_try_init(|| self.transform_and_resolve(path))
            .await
            .map(Arc::clone)
    }

    async fn transform_and_resolve(&self, path: PathBuf) -> Result<Arc<LoadedModule>> {
        let source: Arc<[u8]> = self.file_system.read_bytes(&path).await?.into();

        let registry = self.registry.clone();
        let (file, bytes) = (path.clone(), source.to_vec());
        let output = blocking(move || registry.transform(&file, bytes)).await?;
        self.transforms.fetch_add(1, Ordering::SeqCst);

        let resolver = self.resolver.clone();
        let dependencies = output.dependencies.clone();
        let importer = path.clone();
        let resolved = blocking(move || {
            let from_dir = importer.parent().unwrap_or(Path::new("/"));
            dependencies
                .into_iter()
                .map(|dependency| {
                    resolver
                        .resolve(&dependency.specifier, from_dir)
                        .map(|target| (dependency, target))
                        .map_err(|e| with_importer(e, &importer))
                })
                .collect::<Result<Vec<_>>>()
        })
        .await?;

        Ok(Arc::new(LoadedModule {
            source,
            output: Some(output),
            resolved,
        }))
    }
}

/// Swap `url()` placeholders for the public URL of the module they point at
pub fn link_urls(graph: &mut ModuleGraph) -> Result<()> {
    for idx in 0..graph.modules.len() {
        let module = &graph.modules[idx];
        let mut urls = Vec::new();
        for (k, dependency) in module
            .dependencies
            .iter()
            .filter(|d| d.kind == DependencyKind::Url)
            .enumerate()
        {
            let target = graph
                .edges_from(module.id)
                .find(|e| e.kind == DependencyKind::Url && e.specifier == dependency.specifier)
                .map(|e| graph.module(e.to));
            let url = target.and_then(|t| t.public_url.clone()).ok_or_else(|| {
                KilnError::transform(
                    "link",
                    module.path.clone(),
                    format!("url() target '{}' is not an asset", dependency.specifier),
                )
            })?;
            urls.push((url_placeholder(k), url));
        }
        if urls.is_empty() {
            continue;
        }

        let module = &mut graph.modules[idx];
        for (marker, url) in &urls {
            module.code = module.code.replace(marker, url);
        }
        for side in module.side_files.iter_mut().filter(|s| s.kind == SideFileKind::Style) {
            let mut css = String::from_utf8(std::mem::take(&mut side.content)).map_err(|e| {
                KilnError::transform("link", module.path.clone(), format!("invalid UTF-8: {}", e))
            })?;
            for (marker, url) in &urls {
                css = css.replace(marker, url);
            }
            side.content = css.into_bytes();
        }
    }
    Ok(())
}

/// Strongly connected components with more than one module, plus self-imports
pub fn detect_cycles(graph: &ModuleGraph) -> Vec<BuildWarning> {
    let mut digraph = DiGraph::<ModuleId, ()>::new();
    let nodes: Vec<_> = graph.modules.iter().map(|m| digraph.add_node(m.id)).collect();
    for edge in &graph.edges {
        digraph.update_edge(nodes[edge.from.0], nodes[edge.to.0], ());
    }

    let mut warnings: Vec<BuildWarning> = tarjan_scc(&digraph)
        .into_iter()
        .filter(|scc| scc.len() > 1 || digraph.contains_edge(scc[0], scc[0]))
        .map(|scc| {
            let mut ids: Vec<ModuleId> = scc.iter().map(|n| digraph[*n]).collect();
            ids.sort();
            BuildWarning::Cycle {
                modules: ids.iter().map(|id| PathBuf::from(&graph.module(*id).key)).collect(),
            }
        })
        .collect();
    warnings.sort_by_key(|w| w.to_string());
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::{BuildConfig, BuildMode};
    use crate::infrastructure::{NodeModuleResolver, TokioFileSystemService};
    use tempfile::{tempdir, TempDir};

    fn project(files: &[(&str, &str)]) -> TempDir {
        let dir = tempdir().unwrap();
        for (rel, content) in files {
            let path = dir.path().join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }
        dir
    }

    fn builder(dir: &TempDir) -> GraphBuilder {
        let config = BuildConfig::for_mode(dir.path(), BuildMode::Test);
        GraphBuilder::new(
            dir.path(),
            4,
            Arc::new(NodeModuleResolver::new(dir.path(), &config.resolve)),
            Arc::new(TransformRegistry::for_config(&config).unwrap()),
            Arc::new(TokioFileSystemService),
        )
    }

    fn entries(list: &[(&str, &str)]) -> IndexMap<String, Vec<String>> {
        list.iter()
            .map(|(name, spec)| (name.to_string(), vec![spec.to_string()]))
            .collect()
    }

    #[tokio::test]
    async fn test_bfs_order_and_single_transform() {
        let dir = project(&[
            ("src/index.js", "import './a';\nimport './b';"),
            ("src/a.js", "import './c';"),
            ("src/b.js", "import './c';"),
            ("src/c.js", "export const c = 1;"),
        ]);
        let builder = builder(&dir);
        let graph = builder.build_graph(&entries(&[("app", "./src/index.js")])).await.unwrap();

        let keys: Vec<&str> = graph.modules.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(keys, vec!["src/index.js", "src/a.js", "src/b.js", "src/c.js"]);
        assert_eq!(builder.transform_count(), 4);
        assert_eq!(graph.edges.len(), 4);
        assert_eq!(graph.entries["app"], vec![ModuleId(0)]);
    }

    #[tokio::test]
    async fn test_cycle_builds_with_warning() {
        let dir = project(&[
            ("src/a.js", "import { b } from './b';\nexport const a = () => b;"),
            ("src/b.js", "import { a } from './a';\nexport const b = () => a;"),
        ]);
        let builder = builder(&dir);
        let graph = builder.build_graph(&entries(&[("app", "./src/a.js")])).await.unwrap();

        assert_eq!(graph.len(), 2);
        assert_eq!(graph.edges.len(), 2);
        assert_eq!(builder.transform_count(), 2);

        let warnings = detect_cycles(&graph);
        assert_eq!(warnings.len(), 1);
        assert_eq!(
            warnings[0].to_string(),
            "CycleWarning: circular import between src/a.js -> src/b.js"
        );
    }

    #[tokio::test]
    async fn test_missing_module_names_importer() {
        let dir = project(&[("src/index.js", "import './missing';")]);
        let err = builder(&dir)
            .build_graph(&entries(&[("app", "./src/index.js")]))
            .await
            .unwrap_err();

        match err {
            KilnError::Resolution { specifier, importer } => {
                assert_eq!(specifier, "./missing");
                assert!(importer.unwrap().ends_with("src/index.js"));
            }
            other => panic!("expected resolution error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_url_references_are_linked() {
        let dir = project(&[
            ("src/index.js", "import './app.css';"),
            ("src/app.css", ".logo { background: url(./logo.png); }"),
            ("src/logo.png", "png"),
        ]);
        let graph = builder(&dir)
            .build_graph(&entries(&[("app", "./src/index.js")]))
            .await
            .unwrap();

        let css = graph.modules.iter().find(|m| m.key == "src/app.css").unwrap();
        assert!(!css.code.contains("__KILN_URL_0__"));
        assert!(css.code.contains("data:image/png;base64,"));
    }

    #[tokio::test]
    async fn test_sass_partials_are_inlined_modules() {
        let dir = project(&[
            ("src/index.js", "import './app.scss';"),
            ("src/app.scss", "@import 'vars';\n.a { color: $c; }"),
            ("src/_vars.scss", "$c: red;"),
        ]);
        let builder = builder(&dir);
        let graph = builder.build_graph(&entries(&[("app", "./src/index.js")])).await.unwrap();

        let partial = graph.modules.iter().find(|m| m.key == "src/_vars.scss").unwrap();
        assert!(partial.inlined);
        assert!(partial.code.is_empty());
        assert_eq!(builder.transform_count(), 2);
    }
}
