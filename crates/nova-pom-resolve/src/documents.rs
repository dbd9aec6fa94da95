use std::collections::HashMap;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;

use nova_pom_model::{EditVersion, SnapshotId, SourceKey};
use nova_scheduler::{CancellableReader, CancellationToken};
use parking_lot::RwLock;

/// Text of documents open in an editing session.
///
/// Keys that are not open are read from disk.
pub trait DocumentStore: Send + Sync {
    fn text(&self, key: &SourceKey) -> Option<Arc<str>>;

    fn edit_version(&self, key: &SourceKey) -> Option<EditVersion>;
}

/// In-memory [`DocumentStore`] fed by open/change/close notifications.
#[derive(Default)]
pub struct OpenDocuments {
    docs: RwLock<HashMap<SourceKey, (EditVersion, Arc<str>)>>,
}

impl OpenDocuments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, key: SourceKey, version: EditVersion, text: impl Into<Arc<str>>) {
        self.docs.write().insert(key, (version, text.into()));
    }

    /// Replaces the text of an open document. Changes older than the stored
    /// version are ignored.
    pub fn change(&self, key: &SourceKey, version: EditVersion, text: impl Into<Arc<str>>) {
        let mut docs = self.docs.write();
        match docs.get_mut(key) {
            Some(entry) if entry.0 > version => {}
            Some(entry) => *entry = (version, text.into()),
            None => {
                docs.insert(key.clone(), (version, text.into()));
            }
        }
    }

    pub fn close(&self, key: &SourceKey) {
        self.docs.write().remove(key);
    }

    pub fn is_open(&self, key: &SourceKey) -> bool {
        self.docs.read().contains_key(key)
    }
}

impl DocumentStore for OpenDocuments {
    fn text(&self, key: &SourceKey) -> Option<Arc<str>> {
        self.docs.read().get(key).map(|(_, text)| Arc::clone(text))
    }

    fn edit_version(&self, key: &SourceKey) -> Option<EditVersion> {
        self.docs.read().get(key).map(|(version, _)| *version)
    }
}

/// Where a build reads its document from.
#[derive(Debug, Clone)]
pub enum BuildSource {
    /// Editor buffer captured at submission time.
    Text(Arc<str>),
    File(PathBuf),
    /// Not open and not backed by a file.
    Unavailable,
}

impl BuildSource {
    /// Opens the source behind a reader that stops once `token` is cancelled.
    pub fn open(&self, token: &CancellationToken) -> io::Result<Box<dyn Read + Send>> {
        let reader: Box<dyn Read + Send> = match self {
            BuildSource::Text(text) => Box::new(io::Cursor::new(TextBytes(Arc::clone(text)))),
            BuildSource::File(path) => Box::new(std::fs::File::open(path)?),
            BuildSource::Unavailable => {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    "document is not open and has no backing file",
                ))
            }
        };
        Ok(Box::new(CancellableReader::new(reader, token.clone())))
    }

    /// Reads the whole source as text, replacing invalid UTF-8.
    pub fn read_text(&self, token: &CancellationToken) -> io::Result<String> {
        let mut bytes = Vec::new();
        self.open(token)?.read_to_end(&mut bytes)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

struct TextBytes(Arc<str>);

impl AsRef<[u8]> for TextBytes {
    fn as_ref(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

/// Snapshot identity plus the source to build it from.
#[derive(Debug, Clone)]
pub struct CapturedInput {
    pub snapshot: SnapshotId,
    pub source: BuildSource,
}

/// Captures what a build of `key` at `version` would read.
///
/// Open documents are fingerprinted by content; on-disk files by path,
/// length and modification time.
pub fn capture(documents: &dyn DocumentStore, key: &SourceKey, version: EditVersion) -> CapturedInput {
    if let Some(text) = documents.text(key) {
        return CapturedInput {
            snapshot: SnapshotId::for_text(version, text.as_bytes()),
            source: BuildSource::Text(text),
        };
    }
    match key.as_path() {
        Some(path) => {
            let metadata = std::fs::metadata(path).ok();
            CapturedInput {
                snapshot: SnapshotId::for_file(
                    path,
                    metadata.as_ref().map_or(0, |meta| meta.len()),
                    metadata.and_then(|meta| meta.modified().ok()),
                ),
                source: BuildSource::File(path.to_path_buf()),
            }
        }
        None => CapturedInput {
            snapshot: SnapshotId::for_text(version, &[]),
            source: BuildSource::Unavailable,
        },
    }
}
