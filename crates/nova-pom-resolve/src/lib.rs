//! Live resolution of POM documents while they are being edited.
//!
//! [`PomResolver`] ties the pieces together: the [`ResolutionCache`] decides
//! when a document needs a new build, the [`BuildScheduler`] runs builds on a
//! bounded pool with deduplication and priority promotion, and finished builds
//! feed the workspace and local store indices.

mod build;
mod cache;
mod documents;
mod env;
mod scheduler;
mod structural;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use nova_config::{ConfigError, NovaPomConfig};
use nova_pom_index::{sort_parent_first, DiscoverySnapshots, LocalStoreIndex, WorkspaceIndex};
use nova_pom_model::{BuildOptions, EditVersion, LineageEntry, PomBuilder, ResolvedProject, SourceKey};
use nova_scheduler::RequestContext;

pub use build::BuildOutcome;
pub use cache::ResolutionCache;
pub use documents::{capture, BuildSource, CapturedInput, DocumentStore, OpenDocuments};
pub use env::{RemoteRegistry, ResolverEnv, Services};
pub use scheduler::{BuildHandle, BuildScheduler, SchedulerStatus};
pub use structural::StructuralPomBuilder;

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to create scratch repository {}: {source}", .path.display())]
    ScratchDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Entry point for editor features.
pub struct PomResolver {
    services: Arc<Services>,
    scheduler: Arc<BuildScheduler>,
    cache: ResolutionCache,
    options: BuildOptions,
    scratch_dir: PathBuf,
}

impl PomResolver {
    /// Builds the indices and the scheduler from `config`.
    ///
    /// The returned resolver also serves project snapshots to workspace
    /// discovery.
    pub fn new(
        config: &NovaPomConfig,
        builder: Arc<dyn PomBuilder>,
        documents: Arc<dyn DocumentStore>,
        remote: Option<Arc<dyn RemoteRegistry>>,
    ) -> Result<Arc<Self>, ResolveError> {
        let scratch_dir = config.resolver.scratch_dir.clone().unwrap_or_else(|| {
            std::env::temp_dir().join(format!("nova-pom-scratch-{}", std::process::id()))
        });
        std::fs::create_dir_all(&scratch_dir).map_err(|source| ResolveError::ScratchDir {
            path: scratch_dir.clone(),
            source,
        })?;

        let services = Arc::new(Services {
            builder,
            documents: Arc::clone(&documents),
            workspace: Arc::new(WorkspaceIndex::new(config.workspace.skip_dirs.clone())),
            local_store: Arc::new(LocalStoreIndex::from_config(&config.local_store)),
            remote,
            remote_timeout: config.resolver.remote_timeout(),
        });
        let scheduler = Arc::new(BuildScheduler::new(
            Arc::clone(&services),
            config.resolver.workers,
        ));
        let options = BuildOptions {
            active_profiles: Vec::new(),
            resolve_dependencies: true,
            scratch_repository: Some(scratch_dir.clone()),
        };
        let cache = ResolutionCache::new(Arc::clone(&scheduler), documents, options.clone());

        let resolver = Arc::new(Self {
            services,
            scheduler,
            cache,
            options,
            scratch_dir,
        });
        let snapshots = Arc::downgrade(&resolver) as Weak<dyn DiscoverySnapshots>;
        resolver.services.workspace.set_snapshots(snapshots);

        tracing::debug!(
            target: "nova.pom.resolve",
            workers = config.resolver.workers,
            scratch = %resolver.scratch_dir.display(),
            "resolver started"
        );
        Ok(resolver)
    }

    /// [`PomResolver::new`] with configuration read from a TOML file.
    pub fn from_config_path(
        path: &Path,
        builder: Arc<dyn PomBuilder>,
        documents: Arc<dyn DocumentStore>,
    ) -> Result<Arc<Self>, ResolveError> {
        let config = NovaPomConfig::load_from_path(path)?;
        Self::new(&config, builder, documents, None)
    }

    pub fn scheduler(&self) -> &BuildScheduler {
        &self.scheduler
    }

    pub fn cache(&self) -> &ResolutionCache {
        &self.cache
    }

    pub fn workspace(&self) -> &WorkspaceIndex {
        &self.services.workspace
    }

    pub fn local_store(&self) -> &LocalStoreIndex {
        &self.services.local_store
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Handle to the build of `key` at `version`; see [`ResolutionCache::resolve`].
    pub fn resolve(&self, key: &SourceKey, version: EditVersion) -> BuildHandle {
        self.cache.resolve(key, version)
    }

    /// [`PomResolver::resolve`] at the version currently held by the document
    /// store, or the on-disk version when the document is not open.
    pub fn resolve_current(&self, key: &SourceKey) -> BuildHandle {
        let version = self
            .services
            .documents
            .edit_version(key)
            .unwrap_or(EditVersion::ON_DISK);
        self.cache.resolve(key, version)
    }

    pub fn get_last_successful(&self, key: &SourceKey) -> Option<Arc<ResolvedProject>> {
        self.cache.get_last_successful(key)
    }

    /// Builds `key` synchronously on the calling thread, bypassing the cache
    /// and the scheduler. For what-if queries; nothing is recorded.
    pub fn get_snapshot(
        &self,
        key: &SourceKey,
        active_profile: Option<&str>,
        resolve_dependencies: bool,
    ) -> Option<Arc<ResolvedProject>> {
        self.snapshot_with(key, active_profile, resolve_dependencies, &RequestContext::default())
    }

    /// A file changed on disk; its next resolve rebuilds.
    pub fn on_file_changed(&self, path: &Path) {
        self.cache.invalidate(&SourceKey::from_path(path));
    }

    /// Queues new workspace roots for discovery, parents first.
    pub fn on_roots_added(&self, roots: &[PathBuf]) {
        let sorted = sort_parent_first(roots);
        tracing::debug!(target: "nova.pom.resolve", roots = sorted.len(), "workspace roots added");
        self.services.workspace.add_roots(sorted);
    }

    pub fn on_roots_removed(&self, roots: &[PathBuf]) {
        for root in roots {
            self.services.workspace.remove(root);
            self.cache.remove_under(root);
        }
    }

    /// Cancels outstanding builds, stops background workers and removes the
    /// scratch repository.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
        self.services.workspace.shutdown();
        if let Err(err) = std::fs::remove_dir_all(&self.scratch_dir) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!(
                    target: "nova.pom.resolve",
                    path = %self.scratch_dir.display(),
                    error = %err,
                    "failed to remove scratch repository"
                );
            }
        }
    }

    fn snapshot_with(
        &self,
        key: &SourceKey,
        active_profile: Option<&str>,
        resolve_dependencies: bool,
        ctx: &RequestContext,
    ) -> Option<Arc<ResolvedProject>> {
        let version = self
            .services
            .documents
            .edit_version(key)
            .unwrap_or(EditVersion::ON_DISK);
        let input = capture(&*self.services.documents, key, version);
        let options = BuildOptions {
            active_profiles: active_profile.map(str::to_owned).into_iter().collect(),
            resolve_dependencies,
            ..self.options.clone()
        };
        build::execute(&self.services, key, &input, &options, ctx).into_project()
    }
}

impl DiscoverySnapshots for PomResolver {
    fn lineage(&self, pom: &Path, ctx: &RequestContext) -> Option<Vec<LineageEntry>> {
        let project = self.snapshot_with(&SourceKey::from_path(pom), None, false, ctx)?;
        Some(project.model.lineage.clone())
    }
}
