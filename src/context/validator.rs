use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use super::graph::DependencyGraph;
use super::summarizer::KnowledgeMap;
use super::workspace::{hash_file, Workspace};
use crate::error::CollaboratorError;

/// Compares the tree against the generated artifacts.
pub struct ContextValidator {
    workspace: Workspace,
}

impl ContextValidator {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }

    /// Files and artifacts that are out of sync with the tree.
    ///
    /// A file is stale when it is missing from the map, its digest changed,
    /// or the map records it but it is gone. Once a map exists, an unusable
    /// map or a dependency graph that is missing, unusable, or older than the
    /// map is reported by its artifact path. Never fails: an unreadable root
    /// yields an empty set.
    pub fn find_stale_files(&self) -> BTreeSet<PathBuf> {
        let files = match self.workspace.tracked_files() {
            Ok(files) => files,
            Err(e) => {
                warn!("Drift scan skipped: {}", e);
                return BTreeSet::new();
            }
        };

        let mut stale = BTreeSet::new();
        let map_path = self.workspace.knowledge_map_path();
        let map = match KnowledgeMap::load(&map_path) {
            Ok(map) => map,
            Err(e) => {
                warn!("Knowledge map unusable, treating every file as stale: {}", e);
                stale.insert(map_path);
                None
            }
        };

        if let Some(map) = &map {
            if let Some(reason) = self.graph_lag(map) {
                debug!("Dependency graph out of sync: {}", reason);
                stale.insert(self.workspace.dependency_graph_path());
            }
        }

        let recorded = map.map(|m| m.files).unwrap_or_default();
        let mut current: HashSet<&str> = HashSet::with_capacity(files.len());

        for key in &files {
            let Some((digest, _)) = hash_file(&self.workspace.absolute(key)) else {
                continue;
            };
            match recorded.get(key) {
                Some(entry) if entry.sha256 == digest => {}
                _ => {
                    stale.insert(self.workspace.absolute(key));
                }
            }
            current.insert(key.as_str());
        }

        for key in recorded.keys() {
            if !current.contains(key.as_str()) && !self.workspace.absolute(key).is_file() {
                stale.insert(self.workspace.absolute(key));
            }
        }

        debug!("Drift scan: {} tracked, {} stale", files.len(), stale.len());
        stale
    }

    /// Why the graph cannot be trusted next to `map`, if it cannot.
    fn graph_lag(&self, map: &KnowledgeMap) -> Option<String> {
        match DependencyGraph::load(&self.workspace.dependency_graph_path()) {
            Ok(Some(graph)) if graph.generated_at < map.generated_at => Some(format!(
                "graph generated at {} predates map generated at {}",
                graph.generated_at, map.generated_at
            )),
            Ok(Some(_)) => None,
            Ok(None) => Some("graph missing".to_string()),
            Err(e) => Some(e.to_string()),
        }
    }

    /// Cross-check the knowledge map and dependency graph against each other
    /// and the tree. Absent artifacts are not corruption.
    pub fn check_integrity(&self) -> Result<(), CollaboratorError> {
        let mut problems = Vec::new();

        let map = match KnowledgeMap::load(&self.workspace.knowledge_map_path()) {
            Ok(map) => map,
            Err(e) => {
                problems.push(e.to_string());
                None
            }
        };
        let graph = match DependencyGraph::load(&self.workspace.dependency_graph_path()) {
            Ok(graph) => graph,
            Err(e) => {
                problems.push(e.to_string());
                None
            }
        };

        if let Some(map) = &map {
            for key in map.files.keys() {
                if !self.workspace.absolute(key).is_file() {
                    problems.push(format!("recorded file missing: {}", key));
                }
            }
        }

        if let (Some(map), Some(graph)) = (&map, &graph) {
            for (from, targets) in &graph.edges {
                if !map.files.contains_key(from) {
                    problems.push(format!("graph node not in knowledge map: {}", from));
                }
                for to in targets {
                    if !map.files.contains_key(to) {
                        problems.push(format!("dangling edge {} -> {}", from, to));
                    }
                }
            }
        }

        if problems.is_empty() {
            info!(
                "Integrity check passed for {} ({} mapped files)",
                self.workspace.root().display(),
                map.as_ref().map(|m| m.files.len()).unwrap_or(0)
            );
            Ok(())
        } else {
            Err(CollaboratorError::Integrity(problems))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DriftConfig;
    use crate::context::graph::DependencyMapper;
    use crate::context::summarizer::ContextSummarizer;
    use std::fs;
    use tempfile::TempDir;

    fn setup(dir: &TempDir) -> (Workspace, ContextSummarizer, DependencyMapper, ContextValidator) {
        let ws = Workspace::new(dir.path(), &DriftConfig::default());
        (
            ws.clone(),
            ContextSummarizer::new(ws.clone()),
            DependencyMapper::new(ws.clone()).unwrap(),
            ContextValidator::new(ws),
        )
    }

    #[test]
    fn test_empty_tree_has_no_stale_files_and_passes_integrity() {
        let dir = TempDir::new().unwrap();
        let (_, _, _, validator) = setup(&dir);
        assert!(validator.find_stale_files().is_empty());
        assert!(validator.find_stale_files().is_empty());
        assert!(validator.check_integrity().is_ok());
    }

    #[test]
    fn test_missing_root_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path().join("gone"), &DriftConfig::default());
        assert!(ContextValidator::new(ws).find_stale_files().is_empty());
    }

    #[test]
    fn test_stale_detection_tracks_new_changed_and_removed_files() {
        let dir = TempDir::new().unwrap();
        let (ws, summarizer, mapper, validator) = setup(&dir);
        fs::write(dir.path().join("a.md"), "alpha").unwrap();
        fs::write(dir.path().join("b.md"), "beta").unwrap();

        let stale = validator.find_stale_files();
        assert_eq!(stale.len(), 2);

        summarizer.generate_map().unwrap();
        mapper.build_graph().unwrap();
        assert!(validator.find_stale_files().is_empty());

        fs::write(dir.path().join("a.md"), "alpha v2").unwrap();
        fs::remove_file(dir.path().join("b.md")).unwrap();
        fs::write(dir.path().join("c.md"), "gamma").unwrap();

        let stale: Vec<_> = validator.find_stale_files().into_iter().collect();
        assert_eq!(
            stale,
            vec![ws.absolute("a.md"), ws.absolute("b.md"), ws.absolute("c.md")]
        );

        summarizer.generate_map().unwrap();
        mapper.build_graph().unwrap();
        assert!(validator.find_stale_files().is_empty());
    }

    #[test]
    fn test_malformed_map_marks_everything_stale_and_fails_integrity() {
        let dir = TempDir::new().unwrap();
        let (ws, _, _, validator) = setup(&dir);
        fs::write(dir.path().join("a.md"), "alpha").unwrap();
        fs::create_dir_all(ws.artifact_dir()).unwrap();
        fs::write(ws.knowledge_map_path(), "garbage").unwrap();

        let stale: Vec<_> = validator.find_stale_files().into_iter().collect();
        assert_eq!(stale, vec![ws.knowledge_map_path(), ws.absolute("a.md")]);
        assert!(matches!(
            validator.check_integrity(),
            Err(CollaboratorError::Integrity(problems)) if problems.len() == 1
        ));
    }

    #[test]
    fn test_integrity_flags_missing_files_and_dangling_edges() {
        let dir = TempDir::new().unwrap();
        let (_, summarizer, mapper, validator) = setup(&dir);
        fs::write(dir.path().join("a.js"), "require('./b')").unwrap();
        fs::write(dir.path().join("b.js"), "1").unwrap();

        summarizer.generate_map().unwrap();
        mapper.build_graph().unwrap();
        assert!(validator.check_integrity().is_ok());

        fs::remove_file(dir.path().join("b.js")).unwrap();
        let err = validator.check_integrity().unwrap_err();
        match err {
            CollaboratorError::Integrity(problems) => {
                assert!(problems.iter().any(|p| p == "recorded file missing: b.js"));
            }
            other => panic!("unexpected error: {}", other),
        }

        summarizer.generate_map().unwrap();
        let err = validator.check_integrity().unwrap_err();
        match err {
            CollaboratorError::Integrity(problems) => {
                assert_eq!(problems, vec!["dangling edge a.js -> b.js".to_string()]);
            }
            other => panic!("unexpected error: {}", other),
        }

        mapper.build_graph().unwrap();
        assert!(validator.check_integrity().is_ok());
    }

    #[test]
    fn test_malformed_map_in_empty_tree_is_still_stale() {
        let dir = TempDir::new().unwrap();
        let (ws, summarizer, mapper, validator) = setup(&dir);
        fs::create_dir_all(ws.artifact_dir()).unwrap();
        fs::write(ws.knowledge_map_path(), "garbage").unwrap();

        let stale: Vec<_> = validator.find_stale_files().into_iter().collect();
        assert_eq!(stale, vec![ws.knowledge_map_path()]);

        summarizer.generate_map().unwrap();
        mapper.build_graph().unwrap();
        assert!(validator.find_stale_files().is_empty());
        assert!(validator.check_integrity().is_ok());
    }

    #[test]
    fn test_graph_older_than_map_is_stale() {
        let dir = TempDir::new().unwrap();
        let (ws, summarizer, mapper, validator) = setup(&dir);
        fs::write(dir.path().join("a.js"), "require('./b')").unwrap();
        fs::write(dir.path().join("b.js"), "1").unwrap();
        fs::write(dir.path().join("c.js"), "2").unwrap();

        summarizer.generate_map().unwrap();
        mapper.build_graph().unwrap();
        assert!(validator.find_stale_files().is_empty());

        // Map refreshed but the graph rebuild never happened.
        fs::write(dir.path().join("a.js"), "require('./b'); require('./c')").unwrap();
        summarizer.generate_map().unwrap();
        let stale: Vec<_> = validator.find_stale_files().into_iter().collect();
        assert_eq!(stale, vec![ws.dependency_graph_path()]);

        fs::remove_file(ws.dependency_graph_path()).unwrap();
        let stale: Vec<_> = validator.find_stale_files().into_iter().collect();
        assert_eq!(stale, vec![ws.dependency_graph_path()]);

        fs::write(ws.dependency_graph_path(), "{ not json").unwrap();
        assert!(validator.find_stale_files().contains(&ws.dependency_graph_path()));

        mapper.build_graph().unwrap();
        assert!(validator.find_stale_files().is_empty());
    }
}
