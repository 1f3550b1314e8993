use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use tracing::info;

use super::workspace::{hash_file, Workspace};
use crate::error::CollaboratorError;

const SUMMARY_MAX_CHARS: usize = 120;
const SUMMARY_SCAN_LINES: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSummary {
    pub sha256: String,
    pub size: u64,
    pub summary: String,
}

/// Knowledge summary artifact: one entry per tracked file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeMap {
    pub generated_at: DateTime<Utc>,
    pub files: BTreeMap<String, FileSummary>,
}

impl KnowledgeMap {
    /// Load the map, `Ok(None)` when it has never been generated.
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
}

pub struct ContextSummarizer {
    workspace: Workspace,
}

impl ContextSummarizer {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }

    pub fn build_map(&self) -> Result<KnowledgeMap, CollaboratorError> {
        let mut files = BTreeMap::new();

        for key in self.workspace.tracked_files()? {
            let path = self.workspace.absolute(&key);
            let Some((sha256, size)) = hash_file(&path) else {
                continue;
            };
            files.insert(
                key,
                FileSummary {
                    sha256,
                    size,
                    summary: summarize(&path),
                },
            );
        }

        Ok(KnowledgeMap {
            generated_at: Utc::now(),
            files,
        })
    }

    pub fn generate_map(&self) -> Result<KnowledgeMap, CollaboratorError> {
        let map = self.build_map()?;
        let path = self.workspace.knowledge_map_path();
        let json = serde_json::to_vec_pretty(&map).map_err(|source| CollaboratorError::Malformed {
            path: path.clone(),
            source,
        })?;
        self.workspace.write_artifact(&path, &json)?;

        info!(
            "Knowledge map regenerated: {} files -> {}",
            map.files.len(),
            path.display()
        );
        Ok(map)
    }
}

/// First heading, else first non-empty line, trimmed to a display length.
fn summarize(path: &Path) -> String {
    let Ok(file) = fs::File::open(path) else {
        return String::new();
    };

    let mut first_line: Option<String> = None;
    for line in BufReader::new(file)
        .lines()
        .take(SUMMARY_SCAN_LINES)
        .map_while(Result::ok)
    {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(heading) = trimmed.strip_prefix('#') {
            let heading = heading.trim_start_matches('#').trim();
            if !heading.is_empty() && !trimmed.starts_with("#!") {
                return truncate(heading);
            }
        }
        if first_line.is_none() {
            first_line = Some(trimmed.to_string());
        }
    }

    first_line.map(|l| truncate(&l)).unwrap_or_default()
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= SUMMARY_MAX_CHARS {
        return text.to_string();
    }
    let mut out: String = text.chars().take(SUMMARY_MAX_CHARS - 3).collect();
    out.push_str("...");
    out
}
