//! Configuration for Nova's POM resolution service.
//!
//! Configuration is read from TOML. Every field has a default so an empty file
//! (or no file at all) yields a working setup:
//!
//! ```toml
//! [resolver]
//! workers = 10
//! remote_timeout_ms = 5000
//!
//! [local_store]
//! roots = ["/home/me/.m2/repository"]
//! rescan_interval_secs = 1800
//! scan = "async"
//!
//! [workspace]
//! skip_dirs = ["target"]
//!
//! [logging]
//! level = "nova.pom=debug,info"
//! ```

mod logging;

pub use logging::{init_tracing, LoggingConfig};

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NovaPomConfig {
    #[serde(default)]
    pub resolver: ResolverConfig,

    #[serde(default)]
    pub local_store: LocalStoreConfig,

    #[serde(default)]
    pub workspace: WorkspaceConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Build scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Number of concurrent builds. `0` queues work until the pool is resized.
    #[serde(default = "ResolverConfig::default_workers")]
    pub workers: usize,

    /// Directory builds may write resolution metadata to instead of the shared
    /// local store. Defaults to a per-process directory under the system temp dir.
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,

    /// Upper bound for remote registry lookups made while building.
    #[serde(default = "ResolverConfig::default_remote_timeout_ms")]
    pub remote_timeout_ms: u64,
}

impl ResolverConfig {
    fn default_workers() -> usize {
        10
    }

    fn default_remote_timeout_ms() -> u64 {
        5_000
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            workers: Self::default_workers(),
            scratch_dir: None,
            remote_timeout_ms: Self::default_remote_timeout_ms(),
        }
    }
}

/// How the local store index is populated on startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Scan before the index is handed out, so first queries are accurate.
    #[default]
    Sync,
    /// Scan on a background thread; early queries may see a partial index.
    Async,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalStoreConfig {
    /// Local package store roots. Empty means the default `~/.m2/repository`.
    #[serde(default)]
    pub roots: Vec<PathBuf>,

    /// Interval between full rescans. `0` disables periodic rescans.
    #[serde(default = "LocalStoreConfig::default_rescan_interval_secs")]
    pub rescan_interval_secs: u64,

    #[serde(default)]
    pub scan: ScanMode,
}

impl LocalStoreConfig {
    fn default_rescan_interval_secs() -> u64 {
        30 * 60
    }

    pub fn rescan_interval(&self) -> Option<Duration> {
        (self.rescan_interval_secs > 0).then(|| Duration::from_secs(self.rescan_interval_secs))
    }

    /// Configured roots, falling back to the user's default local repository.
    pub fn effective_roots(&self) -> Vec<PathBuf> {
        if !self.roots.is_empty() {
            return self.roots.clone();
        }
        default_local_repository().into_iter().collect()
    }
}

impl Default for LocalStoreConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            rescan_interval_secs: Self::default_rescan_interval_secs(),
            scan: ScanMode::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Directory names never descended into during discovery (build outputs).
    /// Hidden directories are always skipped.
    #[serde(default = "WorkspaceConfig::default_skip_dirs")]
    pub skip_dirs: Vec<String>,
}

impl WorkspaceConfig {
    fn default_skip_dirs() -> Vec<String> {
        vec!["target".to_owned()]
    }
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            skip_dirs: Self::default_skip_dirs(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        // `Display` includes a snippet of the input; keep only the message,
        // on one line.
        let message = err
            .message()
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("; ");
        ConfigError::Toml(message)
    }
}

impl NovaPomConfig {
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Ok(Self::load_from_path_with_diagnostics(path)?.0)
    }

    /// Loads a config file and returns the keys that were not recognized.
    pub fn load_from_path_with_diagnostics(
        path: impl AsRef<Path>,
    ) -> Result<(Self, Vec<String>), ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::load_from_str_with_diagnostics(&text)
    }

    pub fn load_from_str_with_diagnostics(text: &str) -> Result<(Self, Vec<String>), ConfigError> {
        let mut unknown = Vec::<String>::new();
        let deserializer = toml::de::Deserializer::new(text);
        let config: NovaPomConfig = serde_ignored::deserialize(deserializer, |path| {
            unknown.push(path.to_string().trim_start_matches('.').to_owned());
        })?;
        unknown.sort();
        unknown.dedup();
        for key in &unknown {
            tracing::warn!(target: "nova.config", key = %key, "ignoring unknown config key");
        }
        Ok((config, unknown))
    }
}

fn default_local_repository() -> Option<PathBuf> {
    let home = std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)?;
    Some(home.join(".m2").join("repository"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let (config, unknown) = NovaPomConfig::load_from_str_with_diagnostics("").unwrap();
        assert_eq!(config, NovaPomConfig::default());
        assert!(unknown.is_empty());
        assert_eq!(config.resolver.workers, 10);
        assert_eq!(
            config.local_store.rescan_interval(),
            Some(Duration::from_secs(1800))
        );
        assert_eq!(config.workspace.skip_dirs, vec!["target".to_owned()]);
    }

    #[test]
    fn zero_interval_disables_rescans() {
        let (config, _) = NovaPomConfig::load_from_str_with_diagnostics(
            "[local_store]\nrescan_interval_secs = 0\n",
        )
        .unwrap();
        assert_eq!(config.local_store.rescan_interval(), None);
    }
}
