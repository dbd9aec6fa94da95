use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use nova_core::{file_uri_to_path, key_is_under, normalize_path, path_key};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Normalized, case-insensitive identity of a document.
///
/// Built from either an editor URI or a file system path; `file:` URIs and
/// paths denoting the same location produce equal keys. Non-file URIs (such as
/// untitled buffers) are keyed by their lowercased text.
#[derive(Clone)]
pub struct SourceKey {
    inner: Arc<KeyInner>,
}

struct KeyInner {
    key: String,
    path: Option<PathBuf>,
    uri: Option<String>,
}

impl SourceKey {
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = normalize_path(path.as_ref());
        Self {
            inner: Arc::new(KeyInner {
                key: path_key(&path),
                path: Some(path),
                uri: None,
            }),
        }
    }

    pub fn from_uri(uri: &str) -> Self {
        match file_uri_to_path(uri) {
            Some(path) => {
                let mut key = Self::from_path(path);
                if let Some(inner) = Arc::get_mut(&mut key.inner) {
                    inner.uri = Some(uri.to_owned());
                }
                key
            }
            None => Self {
                inner: Arc::new(KeyInner {
                    key: uri.trim_end_matches('/').to_lowercase(),
                    path: None,
                    uri: Some(uri.to_owned()),
                }),
            },
        }
    }

    /// The normalized identity string used for equality and ordering.
    pub fn as_str(&self) -> &str {
        &self.inner.key
    }

    /// Local file backing this key, if any.
    pub fn as_path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    pub fn uri(&self) -> Option<&str> {
        self.inner.uri.as_deref()
    }

    /// Whether this key's file lives at or below `root`.
    pub fn is_under(&self, root: &Path) -> bool {
        if self.inner.path.is_none() {
            return false;
        }
        key_is_under(self.as_str(), &path_key(root))
    }
}

impl PartialEq for SourceKey {
    fn eq(&self, other: &Self) -> bool {
        self.inner.key == other.inner.key
    }
}

impl Eq for SourceKey {}

impl Hash for SourceKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.key.hash(state);
    }
}

impl PartialOrd for SourceKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SourceKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.inner.key.cmp(&other.inner.key)
    }
}

impl fmt::Debug for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SourceKey({})", self)
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.inner.path, &self.inner.uri) {
            (Some(path), _) => write!(f, "{}", path.display()),
            (None, Some(uri)) => f.write_str(uri),
            (None, None) => f.write_str(&self.inner.key),
        }
    }
}

/// Version of an editor buffer. Editing sessions count upwards from zero;
/// [`EditVersion::ON_DISK`] marks content read from the file system.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct EditVersion(pub i32);

impl EditVersion {
    pub const ON_DISK: EditVersion = EditVersion(-1);

    pub fn is_on_disk(self) -> bool {
        self == Self::ON_DISK
    }
}

impl fmt::Display for EditVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_on_disk() {
            f.write_str("disk")
        } else {
            write!(f, "v{}", self.0)
        }
    }
}

/// Identity of the exact input a build reads.
///
/// Buffers are fingerprinted by content; files on disk by path, length and
/// modification time, so unchanged files are not re-read just to hash them.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SnapshotId {
    version: EditVersion,
    digest: [u8; 32],
}

impl SnapshotId {
    pub fn for_text(version: EditVersion, text: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"text\0");
        hasher.update(text);
        Self {
            version,
            digest: hasher.finalize().into(),
        }
    }

    pub fn for_file(path: &Path, len: u64, modified: Option<SystemTime>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"file\0");
        hasher.update(path_key(path).as_bytes());
        hasher.update(len.to_le_bytes());
        let nanos = modified
            .and_then(|time| time.duration_since(SystemTime::UNIX_EPOCH).ok())
            .map(|elapsed| elapsed.as_nanos())
            .unwrap_or_default();
        hasher.update(nanos.to_le_bytes());
        Self {
            version: EditVersion::ON_DISK,
            digest: hasher.finalize().into(),
        }
    }

    pub fn version(&self) -> EditVersion {
        self.version
    }

    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest)
    }
}

impl fmt::Debug for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digest = self.digest_hex();
        write!(f, "SnapshotId({}, {})", self.version, &digest[..12])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_and_path_keys_agree() {
        let from_uri = SourceKey::from_uri("file:///WS/App/pom.xml");
        let from_path = SourceKey::from_path("/ws/app/./pom.xml");
        assert_eq!(from_uri, from_path);
        assert_eq!(from_uri.uri(), Some("file:///WS/App/pom.xml"));
        assert_eq!(from_path.as_path(), Some(Path::new("/ws/app/pom.xml")));
    }

    #[test]
    fn untitled_buffers_have_no_path() {
        let key = SourceKey::from_uri("untitled:Untitled-1");
        assert_eq!(key.as_path(), None);
        assert!(!key.is_under(Path::new("/")));
        assert_eq!(key, SourceKey::from_uri("UNTITLED:untitled-1"));
    }

    #[test]
    fn containment_respects_segment_boundaries() {
        let key = SourceKey::from_path("/ws/app/pom.xml");
        assert!(key.is_under(Path::new("/ws")));
        assert!(key.is_under(Path::new("/WS/app/")));
        assert!(!key.is_under(Path::new("/ws/ap")));
        assert!(key.is_under(Path::new("/")));
    }

    #[test]
    fn snapshots_distinguish_content_and_version() {
        let a = SnapshotId::for_text(EditVersion(3), b"<project/>");
        assert_eq!(a, SnapshotId::for_text(EditVersion(3), b"<project/>"));
        assert_ne!(a, SnapshotId::for_text(EditVersion(4), b"<project/>"));
        assert_ne!(a, SnapshotId::for_text(EditVersion(3), b"<project></project>"));

        let file = SnapshotId::for_file(Path::new("/ws/pom.xml"), 10, None);
        assert!(file.version().is_on_disk());
        assert_ne!(file, SnapshotId::for_file(Path::new("/ws/pom.xml"), 11, None));
    }
}
