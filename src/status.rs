use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::health::{HealthSnapshot, ServiceStatus};

/// On-disk form of the latest health snapshot. Overwritten every cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatusFile {
    pub timestamp: DateTime<Utc>,
    pub watch_root: String,
    pub status: String,
    pub targets: Vec<TargetStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetStatus {
    pub name: String,
    pub port: u16,
    pub status: ServiceStatus,
}

impl HealthStatusFile {
    pub fn from_snapshot(watch_root: &Path, snapshot: &HealthSnapshot) -> Self {
        let status = if snapshot.all_up() { "operational" } else { "degraded" };
        Self {
            timestamp: snapshot.taken_at,
            watch_root: watch_root.display().to_string(),
            status: status.to_string(),
            targets: snapshot
                .entries
                .iter()
                .map(|e| TargetStatus {
                    name: e.target.name.clone(),
                    port: e.target.port,
                    status: e.status,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StatusFileWriter {
    watch_root: PathBuf,
    path: PathBuf,
}

impl StatusFileWriter {
    pub fn new(watch_root: impl Into<PathBuf>, path: impl Into<PathBuf>) -> Self {
        Self {
            watch_root: watch_root.into(),
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, snapshot: &HealthSnapshot) -> Result<()> {
        let record = HealthStatusFile::from_snapshot(&self.watch_root, snapshot);
        let json = serde_json::to_vec_pretty(&record).context("Failed to serialize health status")?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        // Write to temp file first, then rename over the previous snapshot
        let mut temp = self.path.as_os_str().to_owned();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);
        fs::write(&temp, json)
            .with_context(|| format!("Failed to write temp status file: {}", temp.display()))?;
        fs::rename(&temp, &self.path)
            .with_context(|| format!("Failed to rename temp file to {}", self.path.display()))?;

        Ok(())
    }

    pub fn read(&self) -> Result<HealthStatusFile> {
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read status file {}", self.path.display()))?;
        serde_json::from_str(&content).context("Failed to parse status file")
    }
}
