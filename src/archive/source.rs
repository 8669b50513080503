//! Open archive handles.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use parking_lot::Mutex;
use thiserror::Error;
use zip::result::ZipError;
use zip::ZipArchive;

use super::ArchiveError;

/// Errors reading an entry that was found in the index.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("archive {archive} is closed")]
    Closed { archive: String },
    #[error("IO error while reading {entry} from {archive}: {source}")]
    Io {
        archive: String,
        entry: String,
        #[source]
        source: io::Error,
    },
    #[error("ZIP error while reading {entry} from {archive}: {source}")]
    Zip {
        archive: String,
        entry: String,
        #[source]
        source: ZipError,
    },
    #[error("{entry} in {archive} is {actual} bytes but the archive declares {declared}")]
    SizeMismatch {
        archive: String,
        entry: String,
        declared: u64,
        actual: u64,
    },
}

/// Largest buffer reserved up front from a declared entry size.
const PREALLOC_LIMIT: u64 = 1 << 20;

pub(crate) type ZipHandle = ZipArchive<BufReader<File>>;

/// One open archive: the outer module archive or an extracted bundled one.
///
/// Reads are serialized through the handle mutex. Closing drops the handle;
/// later reads fail with [`ReadError::Closed`].
pub(crate) struct ArchiveSource {
    label: String,
    handle: Mutex<Option<ZipHandle>>,
}

impl ArchiveSource {
    /// Open an archive file.
    ///
    /// `label` names the archive in logs and errors, e.g.
    /// `plugin.jar!/META-INF/lib/dep.jar` for a bundled archive.
    pub(crate) fn open(path: &Path, label: String) -> Result<Self, ArchiveError> {
        let file = File::open(path).map_err(|source| ArchiveError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let archive = ZipArchive::new(BufReader::new(file)).map_err(|source| ArchiveError::Zip {
            archive: label.clone(),
            source,
        })?;
        Ok(Self {
            label,
            handle: Mutex::new(Some(archive)),
        })
    }

    pub(crate) fn label(&self) -> &str {
        &self.label
    }

    /// Run `f` against the open handle, or `None` if closed.
    pub(crate) fn with_handle<T>(&self, f: impl FnOnce(&mut ZipHandle) -> T) -> Option<T> {
        let mut guard = self.handle.lock();
        guard.as_mut().map(f)
    }

    /// Read the full contents of entry `index`.
    ///
    /// At most one byte past the declared size is read, so a size recorded
    /// wrongly in the archive fails with [`ReadError::SizeMismatch`].
    pub(crate) fn read_entry(&self, index: usize, name: &str) -> Result<Vec<u8>, ReadError> {
        let result = self.with_handle(|archive| -> Result<Vec<u8>, ReadError> {
            let entry = archive.by_index(index).map_err(|source| ReadError::Zip {
                archive: self.label.clone(),
                entry: name.to_string(),
                source,
            })?;
            let declared = entry.size();
            let mut buffer = Vec::with_capacity(declared.min(PREALLOC_LIMIT) as usize);
            entry
                .take(declared.saturating_add(1))
                .read_to_end(&mut buffer)
                .map_err(|source| ReadError::Io {
                    archive: self.label.clone(),
                    entry: name.to_string(),
                    source,
                })?;
            let actual = buffer.len() as u64;
            if actual != declared {
                return Err(ReadError::SizeMismatch {
                    archive: self.label.clone(),
                    entry: name.to_string(),
                    declared,
                    actual,
                });
            }
            Ok(buffer)
        });
        result.unwrap_or_else(|| {
            Err(ReadError::Closed {
                archive: self.label.clone(),
            })
        })
    }

    /// Drop the handle. Returns `true` if it was still open.
    pub(crate) fn close(&self) -> bool {
        self.handle.lock().take().is_some()
    }

    pub(crate) fn is_open(&self) -> bool {
        self.handle.lock().is_some()
    }
}

impl std::fmt::Debug for ArchiveSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveSource")
            .field("label", &self.label)
            .field("open", &self.is_open())
            .finish()
    }
}
