//! Lookup Chains
//!
//! A `LookupChain` is an ordered list of symbol sources. Resolution asks
//! each source in turn and stops at the first one that has the entry, even
//! if reading it then fails: a later source never masks an earlier one.
//!
//! A module loader's chain is `[module index, host]`, which gives
//! child-first resolution.

use std::sync::Arc;

use super::host::HostResolver;
use super::LoadError;
use crate::archive::ArchiveIndex;

/// Where a resolved entry came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    /// The module's own archive (outer or bundled).
    Module,
    /// The host fallback.
    Host,
}

/// One link of a lookup chain.
pub trait SymbolSource: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    fn origin(&self) -> Origin;

    /// `None` if this source does not have `entry`.
    fn lookup(&self, entry: &str) -> Option<Result<Vec<u8>, LoadError>>;
}

/// The module's flattened archive index as a chain link.
pub struct IndexSource {
    name: String,
    index: Arc<ArchiveIndex>,
}

impl IndexSource {
    pub fn new(name: impl Into<String>, index: Arc<ArchiveIndex>) -> Self {
        Self {
            name: name.into(),
            index,
        }
    }
}

impl SymbolSource for IndexSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn origin(&self) -> Origin {
        Origin::Module
    }

    fn lookup(&self, entry: &str) -> Option<Result<Vec<u8>, LoadError>> {
        self.index
            .get(entry)
            .map(|location| location.read().map_err(LoadError::from))
    }
}

/// A host resolver as a chain link.
pub struct HostSource {
    host: Arc<dyn HostResolver>,
}

impl HostSource {
    pub fn new(host: Arc<dyn HostResolver>) -> Self {
        Self { host }
    }
}

impl SymbolSource for HostSource {
    fn name(&self) -> &str {
        "host"
    }

    fn origin(&self) -> Origin {
        Origin::Host
    }

    fn lookup(&self, entry: &str) -> Option<Result<Vec<u8>, LoadError>> {
        self.host.find(entry).map(Ok)
    }
}

/// Ordered list of sources.
#[derive(Default)]
pub struct LookupChain {
    links: Vec<Arc<dyn SymbolSource>>,
}

impl LookupChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a source; it is consulted after every source already present.
    pub fn then(mut self, source: Arc<dyn SymbolSource>) -> Self {
        self.links.push(source);
        self
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Resolve `entry` against the first source that has it.
    pub fn resolve(&self, entry: &str) -> Option<(Origin, Result<Vec<u8>, LoadError>)> {
        self.links
            .iter()
            .find_map(|link| link.lookup(entry).map(|result| (link.origin(), result)))
    }

    /// Names of the sources in order.
    pub fn names(&self) -> Vec<&str> {
        self.links.iter().map(|link| link.name()).collect()
    }
}

impl std::fmt::Debug for LookupChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
