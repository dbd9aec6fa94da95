use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use nova_core::Range;
use serde::{Deserialize, Serialize};

use crate::{Coordinate, EditVersion, GroupArtifact, PartialCoordinate, SnapshotId, SourceKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// A structural or semantic problem found while building a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    pub severity: Severity,
    pub range: Option<Range>,
    pub message: String,
}

impl Problem {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            range: None,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            range: None,
            message: message.into(),
        }
    }

    pub fn with_range(mut self, range: Range) -> Self {
        self.range = Some(range);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dependency {
    pub group_id: Option<String>,
    pub artifact_id: Option<String>,
    pub version: Option<String>,
    pub scope: Option<String>,
    pub classifier: Option<String>,
    pub type_: Option<String>,
    pub optional: bool,
    pub range: Option<Range>,
}

impl Dependency {
    pub fn group_artifact(&self) -> Option<GroupArtifact> {
        Some(GroupArtifact::new(
            self.group_id.clone()?,
            self.artifact_id.clone()?,
        ))
    }

    pub fn coordinate(&self) -> Option<Coordinate> {
        PartialCoordinate {
            group_id: self.group_id.clone(),
            artifact_id: self.artifact_id.clone(),
            version: self.version.clone(),
        }
        .complete()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Plugin {
    pub group_id: Option<String>,
    pub artifact_id: Option<String>,
    pub version: Option<String>,
    pub range: Option<Range>,
}

impl Plugin {
    pub const DEFAULT_GROUP_ID: &'static str = "org.apache.maven.plugins";

    pub fn effective_group_id(&self) -> &str {
        self.group_id.as_deref().unwrap_or(Self::DEFAULT_GROUP_ID)
    }
}

/// The `<parent>` reference of a POM.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParentRef {
    pub coordinate: PartialCoordinate,
    /// `<relativePath>`, defaulting to `../pom.xml` when absent.
    pub relative_path: Option<String>,
}

impl ParentRef {
    pub const DEFAULT_RELATIVE_PATH: &'static str = "../pom.xml";

    pub fn effective_relative_path(&self) -> &str {
        self.relative_path
            .as_deref()
            .unwrap_or(Self::DEFAULT_RELATIVE_PATH)
    }
}

/// One link in the inheritance chain: the project itself, then each ancestor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LineageEntry {
    pub coordinate: PartialCoordinate,
    /// Source file, when the ancestor was found on disk or in the workspace.
    pub file: Option<PathBuf>,
}

/// Builder-owned payload attached to a model. Opaque to the resolution core.
#[derive(Clone)]
pub struct Extension(pub Arc<dyn Any + Send + Sync>);

impl Extension {
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }
}

impl fmt::Debug for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Extension(..)")
    }
}

/// Effective project model as far as the builder got.
#[derive(Debug, Clone, Default)]
pub struct ProjectModel {
    pub coordinate: PartialCoordinate,
    pub parent: Option<ParentRef>,
    pub packaging: Option<String>,
    pub properties: BTreeMap<String, String>,
    pub dependencies: Vec<Dependency>,
    pub dependency_management: Vec<Dependency>,
    pub plugins: Vec<Plugin>,
    pub modules: Vec<String>,
    pub lineage: Vec<LineageEntry>,
    /// Where the build installed this artifact's POM in the local store, if it did.
    pub installed_pom: Option<PathBuf>,
    pub extension: Option<Extension>,
}

impl ProjectModel {
    pub fn packaging(&self) -> &str {
        self.packaging.as_deref().unwrap_or("jar")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyFailure {
    pub dependency: PartialCoordinate,
    pub reason: String,
}

/// Which dependencies could not be resolved, and why.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyOutcome {
    pub failures: Vec<DependencyFailure>,
}

impl DependencyOutcome {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Result of a finished build for one input snapshot. Immutable once created.
#[derive(Debug, Clone)]
pub struct ResolvedProject {
    pub key: SourceKey,
    pub snapshot: SnapshotId,
    pub model: ProjectModel,
    pub problems: Vec<Problem>,
    pub dependency_outcome: Option<DependencyOutcome>,
    /// Produced by the tolerant fallback scan instead of a real build.
    pub degraded: bool,
}

impl ResolvedProject {
    pub fn edit_version(&self) -> EditVersion {
        self.snapshot.version()
    }

    pub fn has_errors(&self) -> bool {
        self.problems
            .iter()
            .any(|problem| problem.severity == Severity::Error)
    }
}

/// Lifecycle of a scheduled build. Terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BuildState {
    Queued,
    Running,
    Completed,
    Degraded,
    Cancelled,
    /// Internal failure: no result was produced.
    Failed,
}

impl BuildState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, BuildState::Queued | BuildState::Running)
    }
}
