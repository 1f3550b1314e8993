use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, info};

use super::workspace::{resolve_relative, Workspace};
use crate::error::CollaboratorError;

/// Files larger than this are not scanned for references.
const MAX_SCAN_BYTES: u64 = 2 * 1024 * 1024;

/// Dependency graph artifact: file -> files it references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyGraph {
    pub generated_at: DateTime<Utc>,
    pub nodes: usize,
    pub edges: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn load(path: &Path) -> Result<Option<Self>, CollaboratorError> {
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CollaboratorError::io(path, e)),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| CollaboratorError::Malformed {
                path: path.to_path_buf(),
                source,
            })
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(BTreeSet::len).sum()
    }
}

pub struct DependencyMapper {
    workspace: Workspace,
    module_patterns: Vec<Regex>,
    link_pattern: Regex,
}

impl DependencyMapper {
    pub fn new(workspace: Workspace) -> Result<Self, CollaboratorError> {
        let module_patterns = vec![
            // import x from './y'  /  export { x } from '../y'
            Regex::new(r#"(?:import|export)\s[^;'"]*?\bfrom\s*['"](\.{1,2}/[^'"]+)['"]"#)?,
            // import './side-effect'
            Regex::new(r#"\bimport\s*['"](\.{1,2}/[^'"]+)['"]"#)?,
            // require('./y')  /  import('./y')
            Regex::new(r#"\b(?:require|import)\s*\(\s*['"](\.{1,2}/[^'"]+)['"]\s*\)"#)?,
        ];
        // [text](relative/path.md#anchor)
        let link_pattern = Regex::new(r"\[[^\]]*\]\(\s*([^)\s#]+)(?:#[^)\s]*)?\s*\)")?;

        Ok(Self {
            workspace,
            module_patterns,
            link_pattern,
        })
    }

    pub fn scan(&self) -> Result<DependencyGraph, CollaboratorError> {
        let files = self.workspace.tracked_files()?;
        let known: HashSet<&str> = files.iter().map(String::as_str).collect();
        let mut edges = BTreeMap::new();

        for key in &files {
            let path = self.workspace.absolute(key);
            let content = match read_for_scan(&path) {
                Some(c) => c,
                None => continue,
            };

            let targets = self.references(key, &content, &known);
            if !targets.is_empty() {
                edges.insert(key.clone(), targets);
            }
        }

        Ok(DependencyGraph {
            generated_at: Utc::now(),
            nodes: files.len(),
            edges,
        })
    }

    pub fn build_graph(&self) -> Result<DependencyGraph, CollaboratorError> {
        let graph = self.scan()?;
        let path = self.workspace.dependency_graph_path();
        let json = serde_json::to_vec_pretty(&graph).map_err(|source| CollaboratorError::Malformed {
            path: path.clone(),
            source,
        })?;
        self.workspace.write_artifact(&path, &json)?;

        info!(
            "Dependency graph rebuilt: {} nodes, {} edges -> {}",
            graph.nodes,
            graph.edge_count(),
            path.display()
        );
        Ok(graph)
    }

    fn references(&self, from: &str, content: &str, known: &HashSet<&str>) -> BTreeSet<String> {
        let mut targets = BTreeSet::new();
        let is_markdown = from.to_ascii_lowercase().ends_with(".md");

        for pattern in &self.module_patterns {
            for caps in pattern.captures_iter(content) {
                if let Some(spec) = caps.get(1) {
                    if let Some(target) = self.resolve_module(from, spec.as_str(), known) {
                        targets.insert(target);
                    }
                }
            }
        }

        if is_markdown {
            for caps in self.link_pattern.captures_iter(content) {
                let Some(link) = caps.get(1).map(|m| m.as_str()) else {
                    continue;
                };
                if link.contains("://") || link.starts_with("mailto:") || link.starts_with('/') {
                    continue;
                }
                if let Some(target) = resolve_relative(from, link) {
                    if known.contains(target.as_str()) {
                        targets.insert(target);
                    }
                }
            }
        }

        targets.remove(from);
        targets
    }

    /// Resolve a module specifier the way bundlers do: exact file, then
    /// with a tracked extension, then `index.<ext>` inside a directory.
    fn resolve_module(&self, from: &str, spec: &str, known: &HashSet<&str>) -> Option<String> {
        let base = resolve_relative(from, spec)?;
        if known.contains(base.as_str()) {
            return Some(base);
        }

        let mut extensions: Vec<&str> = self.workspace.tracked_extensions().collect();
        extensions.sort_unstable();
        for ext in &extensions {
            let candidate = format!("{}.{}", base, ext);
            if known.contains(candidate.as_str()) {
                return Some(candidate);
            }
        }
        for ext in &extensions {
            let candidate = format!("{}/index.{}", base, ext);
            if known.contains(candidate.as_str()) {
                return Some(candidate);
            }
        }

        debug!("Unresolved reference {} -> {}", from, spec);
        None
    }
}

fn read_for_scan(path: &Path) -> Option<String> {
    let meta = fs::metadata(path).ok()?;
    if meta.len() > MAX_SCAN_BYTES {
        debug!("Skipping reference scan of large file {}", path.display());
        return None;
    }
    let bytes = fs::read(path).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DriftConfig;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_scan_finds_module_and_link_edges() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(
            root,
            "src/main.ts",
            "import { api } from './api';\nimport './styles/theme';\nconst cfg = require('../config.json');\nimport React from 'react';\n",
        );
        write(root, "src/api/index.ts", "export const api = 1;");
        write(root, "src/styles/theme.ts", "");
        write(root, "config.json", "{}");
        write(
            root,
            "README.md",
            "See [main](src/main.ts) and [docs](https://example.com) and [missing](nope.md).",
        );

        let mapper = DependencyMapper::new(Workspace::new(root, &DriftConfig::default())).unwrap();
        let graph = mapper.scan().unwrap();

        assert_eq!(graph.nodes, 5);
        let main_edges: Vec<_> = graph.edges["src/main.ts"].iter().cloned().collect();
        assert_eq!(
            main_edges,
            vec!["config.json", "src/api/index.ts", "src/styles/theme.ts"]
        );
        let readme_edges: Vec<_> = graph.edges["README.md"].iter().cloned().collect();
        assert_eq!(readme_edges, vec!["src/main.ts"]);
        assert!(!graph.edges.contains_key("config.json"));
        assert_eq!(graph.edge_count(), 4);
    }

    #[test]
    fn test_build_graph_round_trips_through_artifact() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.js", "const b = require('./b');");
        write(dir.path(), "b.js", "module.exports = 1;");

        let ws = Workspace::new(dir.path(), &DriftConfig::default());
        let mapper = DependencyMapper::new(ws.clone()).unwrap();
        mapper.build_graph().unwrap();

        let loaded = DependencyGraph::load(&ws.dependency_graph_path()).unwrap().unwrap();
        assert_eq!(loaded.edge_count(), 1);
        assert!(loaded.edges["a.js"].contains("b.js"));
    }
}
