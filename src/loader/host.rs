//! Host fallback.
//!
//! The host is what a module falls back to when its own archive does not
//! have an entry. `StaticHost` is a fixed registry of entries known ahead of
//! time, keyed by entry path.

use std::collections::HashMap;
use std::sync::Arc;

use crate::symbol::Symbol;

/// Parent resolution consulted after a module's own archive.
pub trait HostResolver: Send + Sync {
    /// Bytes for `entry`, if the host provides it.
    fn find(&self, entry: &str) -> Option<Vec<u8>>;
}

/// Host that provides nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmptyHost;

impl HostResolver for EmptyHost {
    fn find(&self, _entry: &str) -> Option<Vec<u8>> {
        None
    }
}

/// Host backed by a fixed table of entries.
#[derive(Clone, Debug, Default)]
pub struct StaticHost {
    entries: HashMap<String, Arc<[u8]>>,
}

impl StaticHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class by dotted name. Invalid names are ignored.
    pub fn with_class(mut self, name: &str, bytes: Vec<u8>) -> Self {
        if let Ok(symbol) = Symbol::class(name) {
            self.entries.insert(symbol.entry_path(), Arc::from(bytes));
        }
        self
    }

    /// Register a resource by path.
    pub fn with_resource(mut self, path: &str, bytes: Vec<u8>) -> Self {
        let path = path.strip_prefix('/').unwrap_or(path);
        self.entries.insert(path.to_string(), Arc::from(bytes));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl HostResolver for StaticHost {
    fn find(&self, entry: &str) -> Option<Vec<u8>> {
        self.entries.get(entry).map(|bytes| bytes.to_vec())
    }
}
