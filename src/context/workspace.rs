use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::DriftConfig;
use crate::error::CollaboratorError;

pub const KNOWLEDGE_MAP_FILE: &str = "knowledge_map.json";
pub const DEPENDENCY_GRAPH_FILE: &str = "dependency_graph.json";

/// The watched tree plus the rules for which files in it are tracked.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    artifact_dir: String,
    tracked_extensions: HashSet<String>,
    ignored_dirs: HashSet<String>,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>, drift: &DriftConfig) -> Self {
        Self {
            root: root.into(),
            artifact_dir: drift.artifact_dir.clone(),
            tracked_extensions: drift
                .tracked_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            ignored_dirs: drift.ignored_dirs.iter().cloned().collect(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn artifact_dir(&self) -> PathBuf {
        self.root.join(&self.artifact_dir)
    }

    pub fn knowledge_map_path(&self) -> PathBuf {
        self.artifact_dir().join(KNOWLEDGE_MAP_FILE)
    }

    pub fn dependency_graph_path(&self) -> PathBuf {
        self.artifact_dir().join(DEPENDENCY_GRAPH_FILE)
    }

    pub fn tracked_extensions(&self) -> impl Iterator<Item = &str> {
        self.tracked_extensions.iter().map(String::as_str)
    }

    pub fn is_tracked_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.tracked_extensions.contains(&e.to_ascii_lowercase()))
            .unwrap_or(false)
    }

    /// Relative paths (forward-slash keys) of every tracked file, sorted.
    ///
    /// Fails only when the root itself cannot be read. Unreadable entries
    /// below the root are skipped. Symlinks are not followed.
    pub fn tracked_files(&self) -> Result<Vec<String>, CollaboratorError> {
        let meta = fs::metadata(&self.root).map_err(|e| CollaboratorError::io(&self.root, e))?;
        if !meta.is_dir() {
            return Err(CollaboratorError::io(
                &self.root,
                io::Error::new(io::ErrorKind::Other, "watched root is not a directory"),
            ));
        }
        fs::read_dir(&self.root).map_err(|e| CollaboratorError::io(&self.root, e))?;

        let mut files = Vec::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                if entry.depth() == 0 || !entry.file_type().is_dir() {
                    return true;
                }
                let name = entry.file_name().to_string_lossy();
                // Only the artifact directory directly under the root is ours.
                if entry.depth() == 1 && name == self.artifact_dir.as_str() {
                    return false;
                }
                !self.ignored_dirs.contains(name.as_ref())
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Skipping unreadable entry under {}: {}", self.root.display(), e);
                    continue;
                }
            };
            if !entry.file_type().is_file() || !self.is_tracked_extension(entry.path()) {
                continue;
            }
            if let Some(key) = self.relative_key(entry.path()) {
                files.push(key);
            }
        }

        files.sort();
        Ok(files)
    }

    /// Forward-slash path of `path` relative to the root.
    pub fn relative_key(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<_> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("/"))
        }
    }

    pub fn absolute(&self, key: &str) -> PathBuf {
        key.split('/').fold(self.root.clone(), |acc, part| acc.join(part))
    }

    /// Write an artifact through a temp file and rename so readers never see
    /// a half-written file.
    pub fn write_artifact(&self, path: &Path, contents: &[u8]) -> Result<(), CollaboratorError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| CollaboratorError::io(parent, e))?;
        }
        let mut temp = path.as_os_str().to_owned();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);

        fs::write(&temp, contents).map_err(|e| CollaboratorError::io(&temp, e))?;
        fs::rename(&temp, path).map_err(|e| {
            let _ = fs::remove_file(&temp);
            CollaboratorError::io(path, e)
        })
    }
}

/// SHA-256 of a file's contents, or `None` if it cannot be read.
pub fn hash_file(path: &Path) -> Option<(String, u64)> {
    let mut file = match fs::File::open(path) {
        Ok(f) => f,
        Err(e) => {
            warn!("Failed to open {} for hashing: {}", path.display(), e);
            return None;
        }
    };

    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    let mut size = 0u64;
    loop {
        match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => {
                hasher.update(&buffer[..n]);
                size += n as u64;
            }
            Err(e) => {
                warn!("Failed to read {} for hashing: {}", path.display(), e);
                return None;
            }
        }
    }

    Some((hex::encode(hasher.finalize()), size))
}

/// Lexically resolve `reference` against the directory holding `from_key`.
///
/// Returns `None` if the result would escape the root.
pub fn resolve_relative(from_key: &str, reference: &str) -> Option<String> {
    let mut parts: Vec<String> = from_key.split('/').map(str::to_string).collect();
    parts.pop();

    for component in Path::new(reference).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop()?;
            }
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
