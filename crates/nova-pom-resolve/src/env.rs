use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use nova_pom_index::{LocalStoreIndex, WorkspaceIndex};
use nova_pom_model::{BuildEnvironment, Coordinate, GroupArtifact, PomBuilder, SourceKey};
use nova_scheduler::{run_with_timeout, RequestContext, TaskError};

use crate::documents::{BuildSource, DocumentStore};

/// Remote package registry search. Calls may block on the network and offer
/// no cancellation hook, so they are always run under a timeout.
pub trait RemoteRegistry: Send + Sync {
    fn versions(&self, group_artifact: &GroupArtifact) -> anyhow::Result<Vec<String>>;
}

/// Everything a build needs, shared by the scheduler workers and synchronous
/// snapshot requests.
pub struct Services {
    pub builder: Arc<dyn PomBuilder>,
    pub documents: Arc<dyn DocumentStore>,
    pub workspace: Arc<WorkspaceIndex>,
    pub local_store: Arc<LocalStoreIndex>,
    pub remote: Option<Arc<dyn RemoteRegistry>>,
    pub remote_timeout: Duration,
}

/// [`BuildEnvironment`] backed by the indices, for one build.
pub struct ResolverEnv<'a> {
    services: &'a Services,
    ctx: RequestContext,
}

impl<'a> ResolverEnv<'a> {
    /// Workspace lookups wait for pending discovery unless `ctx` is marked as
    /// running inside a build.
    pub fn new(services: &'a Services, ctx: RequestContext) -> Self {
        Self { services, ctx }
    }
}

impl BuildEnvironment for ResolverEnv<'_> {
    fn context(&self) -> &RequestContext {
        &self.ctx
    }

    fn find_workspace(&self, coordinate: &Coordinate) -> Option<PathBuf> {
        self.services
            .workspace
            .find_by_coordinate(coordinate, &self.ctx)
    }

    fn workspace_versions(&self, group_artifact: &GroupArtifact) -> Vec<String> {
        self.services
            .workspace
            .find_versions(group_artifact, &self.ctx)
    }

    fn find_local(&self, coordinate: &Coordinate) -> Option<PathBuf> {
        self.services.local_store.find_path(coordinate)
    }

    fn local_versions(&self, group_artifact: &GroupArtifact) -> Vec<String> {
        self.services.local_store.versions(group_artifact)
    }

    fn remote_versions(&self, group_artifact: &GroupArtifact) -> Result<Vec<String>, TaskError> {
        let Some(remote) = self.services.remote.clone() else {
            return Ok(Vec::new());
        };
        let group_artifact = group_artifact.clone();
        let target = group_artifact.to_string();
        let result = run_with_timeout(
            self.services.remote_timeout,
            self.ctx.token().clone(),
            move |_token| remote.versions(&group_artifact),
        )?;
        match result {
            Ok(versions) => Ok(versions),
            Err(err) => {
                tracing::debug!(
                    target: "nova.pom.resolve",
                    artifact = %target,
                    error = %format!("{err:#}"),
                    "remote version lookup failed"
                );
                Ok(Vec::new())
            }
        }
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        let key = SourceKey::from_path(path);
        let source = match self.services.documents.text(&key) {
            Some(text) => BuildSource::Text(text),
            None => BuildSource::File(path.to_path_buf()),
        };
        source.open(self.ctx.token())
    }
}

