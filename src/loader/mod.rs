//! Module Loader
//!
//! A `ModuleLoader` answers "does this module provide symbol S, and if so
//! give me its bytes" for exactly one module, without consulting any other
//! module.
//!
//! - `find_local` - O(1) lookup in the module's own flattened index
//! - `load` - `find_local` plus read; registers the package of loaded classes
//! - `resolve` - child-first: the module's index, then the host fallback
//! - `close` - idempotent release of archive handles and extraction storage

mod chain;
mod host;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, trace};

pub use chain::{HostSource, IndexSource, LookupChain, Origin, SymbolSource};
pub use host::{EmptyHost, HostResolver, StaticHost};

use crate::archive::{ArchiveError, ArchiveIndex, Location, ReadError};
use crate::config::LoaderConfig;
use crate::symbol::{package_of_entry, Symbol};

/// Errors loading a symbol from one module.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("{symbol} not found")]
    NotFound { symbol: String },
    #[error("loader for {module} is closed")]
    Closed { module: String },
    #[error(transparent)]
    Read(#[from] ReadError),
}

impl LoadError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, LoadError::NotFound { .. })
    }

    /// The loader, or the archive behind a location, was closed.
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            LoadError::Closed { .. } | LoadError::Read(ReadError::Closed { .. })
        )
    }
}

/// Per-module loader over one flattened archive index.
pub struct ModuleLoader {
    archive: PathBuf,
    index: Arc<ArchiveIndex>,
    chain: LookupChain,
    packages: Mutex<HashSet<String>>,
    closed: AtomicBool,
}

impl ModuleLoader {
    /// Index the archive at `path` with no host fallback.
    pub fn open(path: &Path, config: &LoaderConfig) -> Result<Self, ArchiveError> {
        Self::open_with_host(path, config, Arc::new(EmptyHost))
    }

    /// Index the archive at `path`, falling back to `host` in `resolve`.
    pub fn open_with_host(
        path: &Path,
        config: &LoaderConfig,
        host: Arc<dyn HostResolver>,
    ) -> Result<Self, ArchiveError> {
        let index = Arc::new(ArchiveIndex::build(path, &config.nested, &config.extraction)?);
        let chain = LookupChain::new()
            .then(Arc::new(IndexSource::new(
                path.display().to_string(),
                Arc::clone(&index),
            )))
            .then(Arc::new(HostSource::new(host)));

        Ok(Self {
            archive: path.to_path_buf(),
            index,
            chain,
            packages: Mutex::new(HashSet::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Path of the module archive.
    pub fn archive(&self) -> &Path {
        &self.archive
    }

    /// Look up a symbol in this module only. Never consults the host.
    ///
    /// A closed loader finds nothing.
    pub fn find_local(&self, symbol: &Symbol) -> Option<Location> {
        self.find_entry(&symbol.entry_path())
    }

    /// Look up a raw entry path in this module only.
    pub fn find_entry(&self, entry: &str) -> Option<Location> {
        if self.is_closed() {
            return None;
        }
        self.index.get(entry).cloned()
    }

    /// Load a symbol's bytes from this module only.
    pub fn load(&self, symbol: &Symbol) -> Result<Vec<u8>, LoadError> {
        self.ensure_open()?;
        let location = self.find_local(symbol).ok_or_else(|| LoadError::NotFound {
            symbol: symbol.to_string(),
        })?;
        let bytes = location.read()?;
        if let Some(package) = symbol.package() {
            self.register_package(package);
        }
        Ok(bytes)
    }

    /// Read an already located entry, registering its package for classes.
    pub fn load_location(&self, location: &Location) -> Result<Vec<u8>, LoadError> {
        self.ensure_open()?;
        let bytes = location.read()?;
        if let Some(package) = package_of_entry(location.entry_name()) {
            self.register_package(&package);
        }
        Ok(bytes)
    }

    /// Child-first resolution: this module's archive, then the host.
    pub fn resolve(&self, symbol: &Symbol) -> Result<Vec<u8>, LoadError> {
        self.ensure_open()?;
        let entry = symbol.entry_path();
        match self.chain.resolve(&entry) {
            Some((origin, result)) => {
                let bytes = result?;
                trace!(target: "modfed::loader", module = %self.archive.display(), %symbol, ?origin, "Resolved");
                if origin == Origin::Module {
                    if let Some(package) = symbol.package() {
                        self.register_package(package);
                    }
                }
                Ok(bytes)
            }
            None => Err(LoadError::NotFound {
                symbol: symbol.to_string(),
            }),
        }
    }

    /// Record that `package` has been defined by this module.
    ///
    /// Returns `true` the first time; repeated registration is a no-op.
    pub fn register_package(&self, package: &str) -> bool {
        let mut packages = self.packages.lock();
        if packages.contains(package) {
            return false;
        }
        trace!(target: "modfed::loader", module = %self.archive.display(), package, "Registered package");
        packages.insert(package.to_string())
    }

    /// Packages registered so far, sorted.
    pub fn defined_packages(&self) -> Vec<String> {
        let mut packages: Vec<String> = self.packages.lock().iter().cloned().collect();
        packages.sort_unstable();
        packages
    }

    pub fn entry_count(&self) -> usize {
        self.index.len()
    }

    /// Indexed entry paths, sorted.
    pub fn entries(&self) -> Vec<&str> {
        self.index.entry_names()
    }

    pub fn nested_archive_count(&self) -> usize {
        self.index.nested_archive_count()
    }

    /// Release archive handles and delete extraction storage.
    ///
    /// Safe to call more than once; only the first call does anything.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.index.close();
        debug!(target: "modfed::loader", module = %self.archive.display(), "Closed module loader");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), LoadError> {
        if self.is_closed() {
            return Err(LoadError::Closed {
                module: self.archive.display().to_string(),
            });
        }
        Ok(())
    }
}

impl Drop for ModuleLoader {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ModuleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleLoader")
            .field("archive", &self.archive)
            .field("entries", &self.index.len())
            .field("chain", &self.chain)
            .field("closed", &self.is_closed())
            .finish()
    }
}
