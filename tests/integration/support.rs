use kiln::core::models::{BuildConfig, BuildMode};
use std::path::Path;
use tempfile::TempDir;

/// Temporary project with the given files, paths relative to its root
pub fn project(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (rel, content) in files {
        write(dir.path(), rel, content.as_bytes());
    }
    dir
}

pub fn write(root: &Path, rel: &str, content: &[u8]) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

pub fn config(root: &Path, mode: BuildMode, entries: &[(&str, &str)]) -> BuildConfig {
    let mut config = BuildConfig::for_mode(root, mode);
    config.entries = entries
        .iter()
        .map(|(name, spec)| (name.to_string(), vec![spec.to_string()]))
        .collect();
    config
}

/// Every file under `dir` as (relative path, bytes), sorted
pub fn snapshot(dir: &Path) -> Vec<(String, Vec<u8>)> {
    let mut files = Vec::new();
    collect(dir, dir, &mut files);
    files.sort();
    files
}

fn collect(root: &Path, dir: &Path, out: &mut Vec<(String, Vec<u8>)>) {
    for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            collect(root, &path, out);
        } else {
            let rel = path.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/");
            out.push((rel, std::fs::read(&path).unwrap()));
        }
    }
}

pub fn read_output(root: &Path, public_url: &str) -> String {
    std::fs::read_to_string(root.join("dist").join(public_url.trim_start_matches('/'))).unwrap()
}
