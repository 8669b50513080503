//! Archive Indexing
//!
//! This module reads a module's packaged archive, and the archives bundled
//! inside it, into a single flat map from entry path to [`Location`]:
//! - `ArchiveIndex` - the flattened, immutable entry map
//! - `Location` - a repeatable handle for reading one entry's bytes
//! - `ArchiveError` - construction failures
//! - `ReadError` - failures reading an already indexed entry
//!
//! # Precedence
//!
//! The outer archive is indexed first, then bundled archives breadth-first
//! in the order their containing archive lists them. The first source to
//! provide an entry path keeps it, so outer content always shadows nested
//! content.

mod index;
mod location;
mod source;

use std::io;
use std::path::PathBuf;

use thiserror::Error;
use zip::result::ZipError;

pub use index::ArchiveIndex;
pub use location::Location;
pub use source::ReadError;

/// Errors that can occur while building an archive index.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("IO error while opening {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("ZIP error while scanning {archive}: {source}")]
    Zip {
        archive: String,
        #[source]
        source: ZipError,
    },
    #[error("Failed to extract bundled archive {entry} from {archive}: {source}")]
    Extract {
        archive: String,
        entry: String,
        #[source]
        source: io::Error,
    },
    #[error("Bundled archive {entry} in {archive} is unreadable: {source}")]
    Nested {
        archive: String,
        entry: String,
        #[source]
        source: Box<ArchiveError>,
    },
}
