use std::sync::Arc;

use super::source::{ArchiveSource, ReadError};

/// Where an indexed entry lives: one entry of one archive source.
///
/// Cloning is cheap. `read` can be called any number of times and returns
/// the same bytes each time for as long as the owning loader is open.
#[derive(Clone)]
pub struct Location {
    source: Arc<ArchiveSource>,
    index: usize,
    name: Arc<str>,
    size: u64,
}

impl Location {
    pub(crate) fn new(source: Arc<ArchiveSource>, index: usize, name: &str, size: u64) -> Self {
        Self {
            source,
            index,
            name: Arc::from(name),
            size,
        }
    }

    /// Read the entry's bytes.
    pub fn read(&self) -> Result<Vec<u8>, ReadError> {
        self.source.read_entry(self.index, &self.name)
    }

    /// Entry path inside its archive.
    pub fn entry_name(&self) -> &str {
        &self.name
    }

    /// Uncompressed size recorded in the archive directory.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Archive label, e.g. `plugin.jar` or `plugin.jar!/META-INF/lib/dep.jar`.
    pub fn origin(&self) -> &str {
        self.source.label()
    }
}

impl std::fmt::Debug for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Location")
            .field("origin", &self.source.label())
            .field("entry", &self.name)
            .field("size", &self.size)
            .finish()
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}!/{}", self.source.label(), self.name)
    }
}
