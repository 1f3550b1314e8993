//! Knowledge-artifact collaborators for the watched tree.
//!
//! The daemon only talks to the three traits below. The filesystem
//! implementations keep a knowledge map and a dependency graph under the
//! artifact directory of the watched root.

pub mod graph;
pub mod summarizer;
pub mod validator;
pub mod workspace;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::CollaboratorError;

pub use graph::{DependencyGraph, DependencyMapper};
pub use summarizer::{ContextSummarizer, FileSummary, KnowledgeMap};
pub use validator::ContextValidator;
pub use workspace::Workspace;

/// Paths flagged as out of sync at one point in time.
pub type StaleFileSet = BTreeSet<PathBuf>;

pub trait DriftDetector: Send + Sync {
    /// Must not fail: an empty or unreadable tree yields an empty set.
    fn find_stale_files(&self) -> StaleFileSet;
}

pub trait KnowledgeRegenerator: Send + Sync {
    fn generate_map(&self) -> Result<(), CollaboratorError>;
    fn build_graph(&self) -> Result<(), CollaboratorError>;
}

pub trait IntegrityChecker: Send + Sync {
    fn check_integrity(&self) -> Result<(), CollaboratorError>;
}

impl DriftDetector for ContextValidator {
    fn find_stale_files(&self) -> StaleFileSet {
        ContextValidator::find_stale_files(self)
    }
}

impl IntegrityChecker for ContextValidator {
    fn check_integrity(&self) -> Result<(), CollaboratorError> {
        ContextValidator::check_integrity(self)
    }
}

/// Summarizer and mapper behind one regeneration interface.
pub struct ContextRegenerator {
    summarizer: ContextSummarizer,
    mapper: DependencyMapper,
}

impl ContextRegenerator {
    pub fn new(summarizer: ContextSummarizer, mapper: DependencyMapper) -> Self {
        Self { summarizer, mapper }
    }
}

impl KnowledgeRegenerator for ContextRegenerator {
    fn generate_map(&self) -> Result<(), CollaboratorError> {
        self.summarizer.generate_map().map(|_| ())
    }

    fn build_graph(&self) -> Result<(), CollaboratorError> {
        self.mapper.build_graph().map(|_| ())
    }
}

/// The three collaborators a sentinel daemon drives.
#[derive(Clone)]
pub struct Collaborators {
    pub detector: Arc<dyn DriftDetector>,
    pub regenerator: Arc<dyn KnowledgeRegenerator>,
    pub integrity: Arc<dyn IntegrityChecker>,
}

impl Collaborators {
    pub fn new(
        detector: Arc<dyn DriftDetector>,
        regenerator: Arc<dyn KnowledgeRegenerator>,
        integrity: Arc<dyn IntegrityChecker>,
    ) -> Self {
        Self {
            detector,
            regenerator,
            integrity,
        }
    }

    /// Filesystem-backed collaborators over `workspace`.
    pub fn filesystem(workspace: Workspace) -> Result<Self, CollaboratorError> {
        let validator = Arc::new(ContextValidator::new(workspace.clone()));
        let regenerator = ContextRegenerator::new(
            ContextSummarizer::new(workspace.clone()),
            DependencyMapper::new(workspace)?,
        );

        Ok(Self {
            detector: validator.clone(),
            regenerator: Arc::new(regenerator),
            integrity: validator,
        })
    }
}
