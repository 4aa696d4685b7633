use super::resolver::is_vendor_path;
use crate::core::interfaces::ChunkPolicy;
use crate::core::models::{
    Chunk, ChunkGraph, ChunkKind, DependencyKind, ModuleGraph, ModuleId, OptimizationConfig,
};
use crate::utils::{KilnError, Logger, Result};
use std::collections::{HashMap, HashSet, VecDeque};

pub const VENDOR_CHUNK_NAME: &str = "vendors";

/// One chunk per entry, plus a shared chunk for modules reachable from at
/// least `min_chunks` entries. Single greedy pass over the entries.
pub struct MinChunksPolicy {
    min_chunks: usize,
    shared_name: String,
    vendor_chunk: bool,
}

impl MinChunksPolicy {
    pub fn new(min_chunks: usize, shared_name: &str) -> Self {
        Self {
            min_chunks,
            shared_name: shared_name.to_string(),
            vendor_chunk: false,
        }
    }

    pub fn with_vendor_chunk(mut self, enabled: bool) -> Self {
        self.vendor_chunk = enabled;
        self
    }

    pub fn from_config(config: &OptimizationConfig) -> Self {
        Self::new(config.min_chunks, &config.shared_chunk_name).with_vendor_chunk(config.vendor_chunk)
    }
}

/// Modules reachable from `start`, in breadth-first order. Inlined
/// partials are never part of a chunk.
fn reachable(graph: &ModuleGraph, adjacency: &[Vec<ModuleId>], start: &[ModuleId]) -> Vec<ModuleId> {
    let mut seen = HashSet::new();
    let mut order = Vec::new();
    let mut queue: VecDeque<ModuleId> = start.iter().copied().collect();

    while let Some(id) = queue.pop_front() {
        if graph.module(id).inlined || !seen.insert(id) {
            continue;
        }
        order.push(id);
        queue.extend(adjacency[id.0].iter().copied());
    }
    order
}

fn new_chunk(name: &str, kind: ChunkKind) -> Chunk {
    Chunk {
        name: name.to_string(),
        kind,
        modules: Vec::new(),
        entry_modules: Vec::new(),
        requires: Vec::new(),
    }
}

impl ChunkPolicy for MinChunksPolicy {
    fn name(&self) -> &str {
        "min-chunks"
    }

    fn split(&self, graph: &ModuleGraph) -> Result<ChunkGraph> {
        if graph.entries.contains_key(&self.shared_name)
            || (self.vendor_chunk && graph.entries.contains_key(VENDOR_CHUNK_NAME))
        {
            return Err(KilnError::config(format!(
                "entry name collides with generated chunk '{}'",
                self.shared_name
            )));
        }

        let mut adjacency = vec![Vec::new(); graph.len()];
        for edge in graph.edges.iter().filter(|e| e.kind != DependencyKind::Implicit) {
            adjacency[edge.from.0].push(edge.to);
        }

        let per_entry: Vec<(&String, &Vec<ModuleId>, Vec<ModuleId>)> = graph
            .entries
            .iter()
            .map(|(name, starts)| (name, starts, reachable(graph, &adjacency, starts)))
            .collect();

        let mut reach_count: HashMap<ModuleId, usize> = HashMap::new();
        for (_, _, modules) in &per_entry {
            for id in modules {
                *reach_count.entry(*id).or_default() += 1;
            }
        }

        let mut vendors = new_chunk(VENDOR_CHUNK_NAME, ChunkKind::Shared);
        let mut shared = new_chunk(&self.shared_name, ChunkKind::Shared);
        let mut placed: HashSet<ModuleId> = HashSet::new();
        let mut entry_chunks = Vec::new();

        for (name, starts, modules) in &per_entry {
            let mut chunk = new_chunk(name, ChunkKind::Entry);
            chunk.entry_modules = starts.to_vec();
            let (mut needs_vendors, mut needs_shared) = (false, false);

            for id in modules {
                if self.vendor_chunk && is_vendor_path(&graph.module(*id).path) {
                    needs_vendors = true;
                    if placed.insert(*id) {
                        vendors.modules.push(*id);
                    }
                } else if reach_count[id] >= self.min_chunks {
                    needs_shared = true;
                    if placed.insert(*id) {
                        shared.modules.push(*id);
                    }
                } else {
                    // Below the threshold a module is copied into every entry reaching it
                    placed.insert(*id);
                    chunk.modules.push(*id);
                }
            }

            if needs_vendors {
                chunk.requires.push(VENDOR_CHUNK_NAME.to_string());
            }
            if needs_shared {
                chunk.requires.push(self.shared_name.clone());
            }
            entry_chunks.push(chunk);
        }

        let mut chunk_graph = ChunkGraph {
            chunks: entry_chunks,
            module_to_chunk: HashMap::new(),
        };
        for generated in [shared, vendors] {
            if !generated.modules.is_empty() {
                chunk_graph.chunks.push(generated);
            }
        }

        for (idx, chunk) in chunk_graph.chunks.iter().enumerate() {
            Logger::chunk_created(&chunk.name, chunk.modules.len());
            for id in &chunk.modules {
                chunk_graph.module_to_chunk.entry(*id).or_insert(idx);
            }
        }

        Ok(chunk_graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::{Edge, Module};
    use indexmap::IndexMap;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn module(id: usize, path: &str, inlined: bool) -> Module {
        Module {
            id: ModuleId(id),
            path: PathBuf::from(path),
            key: path.trim_start_matches("/app/").to_string(),
            source: Arc::from(Vec::new()),
            code: String::new(),
            dependencies: Vec::new(),
            side_files: Vec::new(),
            public_url: None,
            source_map: None,
            inlined,
        }
    }

    fn edge(from: usize, to: usize, kind: DependencyKind) -> Edge {
        Edge {
            from: ModuleId(from),
            to: ModuleId(to),
            specifier: format!("./{}", to),
            kind,
        }
    }

    /// index.js and admin.js both import shared.js; admin also pulls in a vendor
    fn graph() -> ModuleGraph {
        let modules = vec![
            module(0, "/app/src/index.js", false),
            module(1, "/app/src/admin.js", false),
            module(2, "/app/src/shared.js", false),
            module(3, "/app/src/home.js", false),
            module(4, "/app/node_modules/lib/index.js", false),
            module(5, "/app/src/_vars.scss", true),
        ];
        let mut entries = IndexMap::new();
        entries.insert("app".to_string(), vec![ModuleId(0)]);
        entries.insert("admin".to_string(), vec![ModuleId(1)]);

        ModuleGraph {
            index: modules.iter().map(|m| (m.path.clone(), m.id)).collect(),
            modules,
            edges: vec![
                edge(0, 2, DependencyKind::Import),
                edge(0, 3, DependencyKind::Import),
                edge(1, 2, DependencyKind::Import),
                edge(1, 4, DependencyKind::Import),
                edge(3, 5, DependencyKind::Implicit),
            ],
            entries,
        }
    }

    #[test]
    fn test_shared_module_lands_in_one_chunk() {
        let chunks = MinChunksPolicy::new(2, "shared").split(&graph()).unwrap();

        let names: Vec<&str> = chunks.chunks.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["app", "admin", "shared"]);

        assert_eq!(chunks.chunk("app").unwrap().modules, vec![ModuleId(0), ModuleId(3)]);
        assert_eq!(chunks.chunk("admin").unwrap().modules, vec![ModuleId(1), ModuleId(4)]);
        assert_eq!(chunks.chunk("shared").unwrap().modules, vec![ModuleId(2)]);
        assert_eq!(chunks.chunk_of(ModuleId(2)).unwrap().name, "shared");
        assert_eq!(chunks.chunk("app").unwrap().requires, vec!["shared"]);
    }

    #[test]
    fn test_inlined_modules_are_not_chunked() {
        let chunks = MinChunksPolicy::new(2, "shared").split(&graph()).unwrap();
        assert!(chunks.chunk_of(ModuleId(5)).is_none());
    }

    #[test]
    fn test_vendor_split() {
        let chunks = MinChunksPolicy::new(2, "shared")
            .with_vendor_chunk(true)
            .split(&graph())
            .unwrap();

        assert_eq!(chunks.chunk("vendors").unwrap().modules, vec![ModuleId(4)]);
        assert_eq!(chunks.chunk("admin").unwrap().requires, vec!["vendors", "shared"]);
        assert_eq!(chunks.chunk("app").unwrap().requires, vec!["shared"]);
    }

    #[test]
    fn test_threshold_above_entry_count_copies_modules() {
        let chunks = MinChunksPolicy::new(3, "shared").split(&graph()).unwrap();
        assert!(chunks.chunk("shared").is_none());
        assert!(chunks.chunk("app").unwrap().modules.contains(&ModuleId(2)));
        assert!(chunks.chunk("admin").unwrap().modules.contains(&ModuleId(2)));
    }

    #[test]
    fn test_entry_named_like_shared_chunk_is_rejected() {
        let mut graph = graph();
        graph.entries.insert("shared".to_string(), vec![ModuleId(2)]);
        let err = MinChunksPolicy::new(2, "shared").split(&graph).unwrap_err();
        assert_eq!(err.kind(), "ConfigError");
    }
}
