//! Indices consulted while resolving POMs.
//!
//! - [`WorkspaceIndex`] maps coordinates of in-workspace POMs to source files.
//! - [`LocalStoreIndex`] maps installed artifacts in local package stores.
//!
//! Both own their tables and accept updates pushed by finished builds.

mod discover;
mod local_store;
mod pom;
mod workspace;

pub use discover::{discover_pom_files, root_pom, sort_parent_first};
pub use local_store::LocalStoreIndex;
pub use pom::{
    effective_model, parse_pom, read_pom, resolve_placeholders, scan_pom_lenient, PomError,
    RawPom, RawProfile,
};
pub use workspace::{DiscoverySnapshots, WorkspaceIndex};
