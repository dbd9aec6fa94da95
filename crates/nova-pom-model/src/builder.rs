use std::io::{self, Read};
use std::path::{Path, PathBuf};

use nova_scheduler::{is_cancellation, Cancelled, RequestContext, TaskError};

use crate::{
    Coordinate, DependencyOutcome, GroupArtifact, Problem, ProjectModel, SnapshotId, SourceKey,
};

/// What a build reads: the document identity plus its snapshot.
#[derive(Debug, Clone)]
pub struct BuildInput {
    pub key: SourceKey,
    pub snapshot: SnapshotId,
}

impl BuildInput {
    /// Directory containing the document, used to resolve relative parents.
    pub fn base_dir(&self) -> Option<&Path> {
        self.key.as_path()?.parent()
    }
}

#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub active_profiles: Vec<String>,
    pub resolve_dependencies: bool,
    /// Where resolution metadata may be written instead of the shared store.
    pub scratch_repository: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct BuildOutput {
    pub model: ProjectModel,
    pub problems: Vec<Problem>,
    pub dependency_outcome: Option<DependencyOutcome>,
}

/// Categorized builder failure.
#[derive(Debug, thiserror::Error)]
pub enum BuildFailure {
    /// The document is not well-formed.
    #[error("document is not well-formed ({} problems)", .problems.len())]
    Structural { problems: Vec<Problem> },

    /// The document is well-formed but dependencies, parents or plugins did
    /// not resolve. `partial` is whatever the builder produced anyway.
    #[error("resolution failed ({} problems)", .problems.len())]
    Resolution {
        partial: Option<Box<BuildOutput>>,
        problems: Vec<Problem>,
    },

    #[error("internal builder error: {0:#}")]
    Internal(#[source] anyhow::Error),

    #[error("build cancelled")]
    Cancelled,
}

impl BuildFailure {
    pub fn internal(err: impl Into<anyhow::Error>) -> Self {
        BuildFailure::Internal(err.into())
    }
}

impl From<Cancelled> for BuildFailure {
    fn from(_: Cancelled) -> Self {
        BuildFailure::Cancelled
    }
}

impl From<io::Error> for BuildFailure {
    fn from(err: io::Error) -> Self {
        if is_cancellation(&err) {
            BuildFailure::Cancelled
        } else {
            BuildFailure::Internal(err.into())
        }
    }
}

/// Services available to a builder while it runs.
///
/// Lookups go through the workspace and local store indices. When the
/// context is marked as running inside a build, workspace lookups answer from
/// what is already known instead of waiting for discovery.
pub trait BuildEnvironment: Send + Sync {
    fn context(&self) -> &RequestContext;

    /// Source file of a workspace member with this coordinate.
    fn find_workspace(&self, coordinate: &Coordinate) -> Option<PathBuf>;

    fn workspace_versions(&self, group_artifact: &GroupArtifact) -> Vec<String>;

    /// Installed POM of this coordinate in the local store.
    fn find_local(&self, coordinate: &Coordinate) -> Option<PathBuf>;

    fn local_versions(&self, group_artifact: &GroupArtifact) -> Vec<String>;

    /// Versions published remotely. Bounded by a timeout since the remote
    /// client cannot observe cancellation.
    fn remote_versions(&self, group_artifact: &GroupArtifact) -> Result<Vec<String>, TaskError>;

    /// Opens another file the build depends on (a parent POM). Open editor
    /// buffers win over disk, and reads observe cancellation.
    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>>;
}

/// The external builder: turns one POM document into a project model.
///
/// `source` must be consumed through the provided reader; it aborts with a
/// cancellation error once the build is superseded, which converts into
/// [`BuildFailure::Cancelled`] via `?`.
pub trait PomBuilder: Send + Sync {
    fn build(
        &self,
        source: &mut dyn Read,
        input: &BuildInput,
        options: &BuildOptions,
        env: &dyn BuildEnvironment,
    ) -> Result<BuildOutput, BuildFailure>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use nova_scheduler::{CancellableReader, CancellationToken};

    #[test]
    fn cancelled_reads_become_cancelled_failures() {
        let token = CancellationToken::new();
        token.cancel();
        let mut reader = CancellableReader::new(&b"<project/>"[..], token);
        let mut text = String::new();
        let err = reader.read_to_string(&mut text).unwrap_err();
        assert!(matches!(BuildFailure::from(err), BuildFailure::Cancelled));

        let err = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert!(matches!(BuildFailure::from(err), BuildFailure::Internal(_)));
    }
}
