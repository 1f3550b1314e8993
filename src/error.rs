use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure reported by a drift/regeneration/integrity collaborator.
///
/// These are expected, recoverable failures: the daemon logs them and carries
/// on with the next scheduled cycle.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed artifact {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid reference pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("integrity check found {} problem(s): {}", .0.len(), .0.join("; "))]
    Integrity(Vec<String>),

    #[error("{0}")]
    Other(String),
}

impl CollaboratorError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        CollaboratorError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Step of a drift/integrity cycle, used to label failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    DriftScan,
    GenerateMap,
    BuildGraph,
    IntegrityCheck,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::DriftScan => "drift scan",
            Stage::GenerateMap => "knowledge map generation",
            Stage::BuildGraph => "dependency graph build",
            Stage::IntegrityCheck => "integrity check",
        };
        f.write_str(name)
    }
}

/// Outcome classes for work done inside a drift/integrity cycle.
#[derive(Debug, Error)]
pub enum CycleError {
    /// A collaborator returned an error. Logged; the loop continues.
    #[error("{stage} failed: {source}")]
    Collaborator {
        stage: Stage,
        #[source]
        source: CollaboratorError,
    },

    /// Work died in a way nobody anticipated (panic, lost task). Escalates to shutdown.
    #[error("unexpected failure during {stage}: {reason}")]
    Unexpected { stage: Stage, reason: String },
}

impl CycleError {
    pub fn stage(&self) -> Stage {
        match self {
            CycleError::Collaborator { stage, .. } | CycleError::Unexpected { stage, .. } => *stage,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, CycleError::Unexpected { .. })
    }
}

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("sentinel daemon was already started; the run state is terminal")]
    AlreadyStarted,

    #[error(transparent)]
    Cycle(#[from] CycleError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integrity_error_lists_problems() {
        let err = CollaboratorError::Integrity(vec![
            "recorded file missing: a.md".to_string(),
            "dangling edge b.ts -> c.ts".to_string(),
        ]);
        assert_eq!(
            err.to_string(),
            "integrity check found 2 problem(s): recorded file missing: a.md; dangling edge b.ts -> c.ts"
        );
    }

    #[test]
    fn test_cycle_error_kinds() {
        let recoverable = CycleError::Collaborator {
            stage: Stage::IntegrityCheck,
            source: CollaboratorError::Other("corrupt".to_string()),
        };
        assert!(!recoverable.is_fatal());
        assert_eq!(recoverable.stage(), Stage::IntegrityCheck);
        assert_eq!(recoverable.to_string(), "integrity check failed: corrupt");

        let fatal = CycleError::Unexpected {
            stage: Stage::DriftScan,
            reason: "panicked".to_string(),
        };
        assert!(fatal.is_fatal());
        assert_eq!(fatal.to_string(), "unexpected failure during drift scan: panicked");
    }
}
