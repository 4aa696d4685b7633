use super::processors::common::{content_hash, js_string, public_url, render_template, TemplateVars};
use super::processors::source_map::remap;
use super::processors::{minify_css, OxcMinifier};
use crate::core::interfaces::FileSystemService;
use crate::core::models::{
    BuildConfig, Chunk, ChunkGraph, ChunkKind, DependencyKind, EntryAssets, Manifest, ModuleGraph,
    ModuleId, OutputFile, SideFileKind,
};
use crate::utils::{KilnError, Logger, Result, Timer};
use oxc_sourcemap::{ConcatSourceMapBuilder, SourceMap};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Module registry and loader shared by every chunk on a page. Chunks call
/// `define` with their modules; the first definition of a key wins.
const RUNTIME: &str = r#"(function () {
  var modules = {};
  var cache = {};
  var has = Object.prototype.hasOwnProperty;
  function load(key) {
    if (has.call(cache, key)) return cache[key].exports;
    if (!has.call(modules, key)) throw new Error("kiln: module '" + key + "' is not loaded");
    var entry = modules[key];
    var module = (cache[key] = { exports: {} });
    entry[0].call(module.exports, module, module.exports, scoped(entry[1]));
    return module.exports;
  }
  function scoped(map) {
    function require(specifier) {
      return load(has.call(map, specifier) ? map[specifier] : specifier);
    }
    require.d = function (exports, getters) {
      Object.defineProperty(exports, "__esModule", { value: true });
      for (var name in getters) {
        if (!has.call(exports, name)) Object.defineProperty(exports, name, { enumerable: true, get: getters[name] });
      }
    };
    require.s = function (exports, ns) {
      Object.keys(ns).forEach(function (name) {
        if (name === "default" || name === "__esModule" || has.call(exports, name)) return;
        Object.defineProperty(exports, name, { enumerable: true, get: function () { return ns[name]; } });
      });
    };
    require.n = function (m) {
      if (m && m.__esModule) return m;
      if (m !== null && (typeof m === "object" || typeof m === "function")) return Object.create(m, { default: { value: m } });
      return { default: m };
    };
    require.i = function (css) {
      if (typeof document === "undefined") return;
      var style = document.createElement("style");
      style.appendChild(document.createTextNode(css));
      document.head.appendChild(style);
    };
    return require;
  }
  return {
    define: function (definitions) {
      for (var key in definitions) {
        if (!has.call(modules, key)) modules[key] = definitions[key];
      }
    },
    require: load
  };
})()"#;

/// Output settings the emitter needs from a build configuration
#[derive(Debug, Clone)]
pub struct EmitOptions {
    pub dir: PathBuf,
    pub filename: String,
    pub css_filename: String,
    pub public_path: String,
    pub hash_length: usize,
    pub clean: bool,
    pub minify: bool,
    /// Write `<chunk file>.map` next to each script chunk
    pub source_map: bool,
}

impl EmitOptions {
    pub fn from_config(config: &BuildConfig) -> Self {
        Self {
            dir: config.output.dir.clone(),
            filename: config.output.filename.clone(),
            css_filename: config.output.css_filename.clone(),
            public_path: config.output.public_path.clone(),
            hash_length: config.output.hash_length,
            clean: config.output.clean,
            minify: config.optimization.minify,
            source_map: config.output.source_map,
        }
    }

    fn file_name(&self, template: &str, name: &str, ext: &str, content: &[u8]) -> String {
        render_template(
            template,
            &TemplateVars {
                name,
                ext,
                local: "",
                digest: &content_hash(content),
                hash_length: self.hash_length,
            },
        )
    }
}

/// A file ready to be written, relative to the output directory
#[derive(Debug, Clone)]
pub struct RenderedFile {
    pub name: String,
    pub content: Vec<u8>,
}

#[derive(Debug)]
pub struct RenderedBuild {
    pub files: Vec<RenderedFile>,
    pub manifest: Manifest,
}

struct RenderedChunk {
    name: String,
    kind: ChunkKind,
    requires: Vec<String>,
    js: RenderedFile,
    map: Option<RenderedFile>,
    css: Option<RenderedFile>,
}

/// Depth-first post-order over the graph from the entries in order.
/// Stylesheets are concatenated in this order so imported rules come first.
fn style_order(graph: &ModuleGraph) -> HashMap<ModuleId, usize> {
    let mut adjacency = vec![Vec::new(); graph.len()];
    for edge in graph.edges.iter().filter(|e| e.kind != DependencyKind::Implicit) {
        adjacency[edge.from.0].push(edge.to);
    }

    let mut order = HashMap::new();
    let mut visited = HashSet::new();
    for start in graph.entries.values().flatten() {
        if !visited.insert(*start) {
            continue;
        }
        // explicit stack of (module, next child index)
        let mut stack = vec![(*start, 0usize)];
        while let Some((id, child)) = stack.pop() {
            if let Some(next) = adjacency[id.0].get(child) {
                stack.push((id, child + 1));
                if visited.insert(*next) {
                    stack.push((*next, 0));
                }
            } else {
                let position = order.len();
                order.insert(id, position);
            }
        }
    }
    order
}

fn render_module(graph: &ModuleGraph, id: ModuleId) -> String {
    let module = graph.module(id);
    let requires: Vec<String> = graph
        .edges_from(id)
        .filter(|e| e.kind == DependencyKind::Import)
        .map(|e| format!("{}: {}", js_string(&e.specifier), js_string(&graph.module(e.to).key)))
        .collect();

    format!(
        "{}: [function (module, exports, require) {{\n{}\n}}, {{{}}}]",
        js_string(&module.key),
        module.code.trim_end(),
        requires.join(", ")
    )
}

/// Concatenated module maps for a chunk whose module list starts on line 2
fn chunk_source_map(graph: &ModuleGraph, chunk: &Chunk, modules: &[String]) -> SourceMap {
    let mut line = 2u32;
    let mut parts: Vec<(&SourceMap, u32)> = Vec::new();
    for (id, rendered) in chunk.modules.iter().zip(modules) {
        // module code starts below its `"key": [function ...` line
        if let Some(map) = &graph.module(*id).source_map {
            parts.push((map, line + 1));
        }
        line += rendered.matches('\n').count() as u32 + 1;
    }
    ConcatSourceMapBuilder::from_sourcemaps(&parts).into_sourcemap()
}

fn render_chunk(
    options: &EmitOptions,
    graph: &ModuleGraph,
    chunk: &Chunk,
    styles: &HashMap<ModuleId, usize>,
) -> Result<RenderedChunk> {
    let modules: Vec<String> = chunk.modules.iter().map(|id| render_module(graph, *id)).collect();
    let mut source_map = options
        .source_map
        .then(|| chunk_source_map(graph, chunk, &modules));
    let bootstrap: String = chunk
        .entry_modules
        .iter()
        .map(|id| format!("k.require({});\n", js_string(&graph.module(*id).key)))
        .collect();

    let mut js = format!(
        "(function (k) {{\nk.define({{\n{}\n}});\n{}}})(globalThis.__kiln__ || (globalThis.__kiln__ = {}));\n",
        modules.join(",\n"),
        bootstrap,
        RUNTIME
    );
    if options.minify {
        let filename = format!("{}.js", chunk.name);
        match source_map.take() {
            Some(map) => {
                let (code, minified) = OxcMinifier::new().minify_with_map(&js, &filename)?;
                js = code;
                source_map = Some(remap(&minified, &map));
            }
            None => js = OxcMinifier::new().minify(&js, &filename)?,
        }
    }

    let mut styled: Vec<ModuleId> = chunk.modules.clone();
    styled.sort_by_key(|id| styles.get(id).copied().unwrap_or(usize::MAX));
    let mut css = String::new();
    for id in styled {
        for side in graph.module(id).side_files.iter().filter(|s| s.kind == SideFileKind::Style) {
            css.push_str(String::from_utf8_lossy(&side.content).trim_end());
            css.push('\n');
        }
    }
    let css = if css.is_empty() {
        None
    } else {
        if options.minify {
            css = minify_css(&css, &format!("{}.css", chunk.name))?;
        }
        Some(RenderedFile {
            name: options.file_name(&options.css_filename, &chunk.name, "css", css.as_bytes()),
            content: css.into_bytes(),
        })
    };

    // the name hashes the code without the trailing map comment
    let js_name = options.file_name(&options.filename, &chunk.name, "js", js.as_bytes());
    let map = source_map.map(|mut map| {
        let file = Path::new(&js_name)
            .file_name()
            .map_or_else(|| js_name.clone(), |f| f.to_string_lossy().into_owned());
        map.set_file(&file);
        if !js.ends_with('\n') {
            js.push('\n');
        }
        js.push_str(&format!("//# sourceMappingURL={}.map\n", file));
        RenderedFile {
            name: format!("{}.map", js_name),
            content: map.to_json_string().into_bytes(),
        }
    });

    Ok(RenderedChunk {
        name: chunk.name.clone(),
        kind: chunk.kind,
        requires: chunk.requires.clone(),
        js: RenderedFile { name: js_name, content: js.into_bytes() },
        map,
        css,
    })
}

/// Serialize every chunk in memory. Nothing touches the disk here.
pub fn render(options: &EmitOptions, graph: &ModuleGraph, chunks: &ChunkGraph) -> Result<RenderedBuild> {
    let _timer = Timer::start("Rendering chunks");
    let styles = style_order(graph);

    let rendered: Vec<RenderedChunk> = chunks
        .chunks
        .par_iter()
        .map(|chunk| render_chunk(options, graph, chunk, &styles))
        .collect::<Result<Vec<_>>>()?;

    let mut manifest = Manifest::default();
    let mut files = Vec::new();
    let url = |file: &RenderedFile| public_url(&options.public_path, &file.name);

    for chunk in &rendered {
        manifest.assets.insert(format!("{}.js", chunk.name), url(&chunk.js));
        if let Some(map) = &chunk.map {
            manifest.assets.insert(format!("{}.js.map", chunk.name), url(map));
        }
        if let Some(css) = &chunk.css {
            manifest.assets.insert(format!("{}.css", chunk.name), url(css));
        }
    }

    for chunk in rendered.iter().filter(|c| c.kind == ChunkKind::Entry) {
        let mut assets = EntryAssets::default();
        let loaded = chunk
            .requires
            .iter()
            .filter_map(|name| rendered.iter().find(|c| &c.name == name))
            .chain(std::iter::once(chunk));
        for part in loaded {
            assets.js.push(url(&part.js));
            if let Some(css) = &part.css {
                assets.css.push(url(css));
            }
        }
        manifest.entrypoints.insert(chunk.name.clone(), assets);
    }

    let mut side_assets: BTreeMap<String, (String, Vec<u8>)> = BTreeMap::new();
    let mut chunked: Vec<ModuleId> = chunks.module_to_chunk.keys().copied().collect();
    chunked.sort();
    for id in chunked {
        let module = graph.module(id);
        for side in module.side_files.iter().filter(|s| s.kind == SideFileKind::Asset) {
            side_assets
                .entry(side.name.clone())
                .or_insert_with(|| (module.key.clone(), side.content.clone()));
        }
    }
    for (name, (key, content)) in side_assets {
        manifest.assets.insert(key, public_url(&options.public_path, &name));
        files.push(RenderedFile { name, content });
    }

    for chunk in rendered {
        files.push(chunk.js);
        files.extend(chunk.map);
        files.extend(chunk.css);
    }
    files.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(RenderedBuild { files, manifest })
}

/// Writes rendered chunks, stylesheets, assets and the manifest
pub struct Emitter {
    options: EmitOptions,
    file_system: Arc<dyn FileSystemService>,
}

impl Emitter {
    pub fn new(options: EmitOptions, file_system: Arc<dyn FileSystemService>) -> Self {
        Self { options, file_system }
    }

    pub fn options(&self) -> &EmitOptions {
        &self.options
    }

    /// Render on the blocking pool. Nothing is written until [`Emitter::write`].
    pub async fn render(&self, graph: Arc<ModuleGraph>, chunks: Arc<ChunkGraph>) -> Result<RenderedBuild> {
        let options = self.options.clone();
        tokio::task::spawn_blocking(move || render(&options, &graph, &chunks))
            .await
            .map_err(|e| KilnError::Io(std::io::Error::other(format!("render task failed: {}", e))))?
    }

    /// Clean, then write every rendered file in one pass. The manifest is
    /// written last so it never names a file that failed to write.
    pub async fn write(&self, rendered: RenderedBuild) -> Result<(Manifest, Vec<OutputFile>)> {
        let _timer = Timer::start("Writing output files");
        let dir = &self.options.dir;

        if self.options.clean {
            Logger::debug(&format!("Cleaning {}", dir.display()));
            self.file_system.remove_directory(dir).await?;
        }
        self.file_system.create_directory(dir).await?;

        let mut output_files = Vec::new();
        for file in &rendered.files {
            let path = dir.join(&file.name);
            self.file_system.write_file(&path, &file.content).await?;
            Logger::emitted(&file.name, file.content.len());
            output_files.push(OutputFile { path, size: file.content.len() });
        }

        let manifest_json = serde_json::to_string_pretty(&rendered.manifest)
            .map_err(|e| KilnError::Io(std::io::Error::other(e)))?;
        let manifest_path = dir.join(MANIFEST_FILE_NAME);
        self.file_system.write_file(&manifest_path, manifest_json.as_bytes()).await?;
        output_files.push(OutputFile { path: manifest_path, size: manifest_json.len() });

        Ok((rendered.manifest, output_files))
    }
}
