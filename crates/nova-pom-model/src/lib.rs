//! Shared data model for live POM resolution.
//!
//! Identity types ([`SourceKey`], [`EditVersion`], [`SnapshotId`]), Maven
//! coordinates and version ordering, the resolved project model, and the
//! contract for the external builder that turns a POM document into a
//! [`ProjectModel`].

mod builder;
mod coordinate;
mod key;
mod project;
mod version;

pub use builder::{
    BuildEnvironment, BuildFailure, BuildInput, BuildOptions, BuildOutput, PomBuilder,
};
pub use coordinate::{Coordinate, GroupArtifact, PartialCoordinate};
pub use key::{EditVersion, SnapshotId, SourceKey};
pub use project::{
    BuildState, Dependency, DependencyFailure, DependencyOutcome, Extension, LineageEntry,
    ParentRef, Plugin, Problem, ProjectModel, ResolvedProject, Severity,
};
pub use version::MavenVersion;

/// File name of a Maven build description.
pub const POM_FILE_NAME: &str = "pom.xml";

/// Extension of POM files installed in a local package store.
pub const POM_EXTENSION: &str = "pom";
