//! Module Structure
//!
//! A `Module` is one installed plugin: a unique key plus the single loader
//! it owns for its whole lifetime.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use crate::loader::ModuleLoader;

/// Unique identifier of an installed module.
///
/// Keys are cheap to clone; caches store keys rather than module
/// references, so a cache entry never keeps a module alive.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModKey(Arc<str>);

impl ModKey {
    /// Create a new key.
    pub fn new(key: &str) -> Self {
        Self(Arc::from(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for ModKey {
    fn from(key: String) -> Self {
        Self(Arc::from(key))
    }
}

impl Borrow<str> for ModKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Enabled state of an installed module.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModuleState {
    /// Installed but not eligible for resolution.
    Disabled,
    /// Installed and eligible for resolution.
    Enabled,
}

/// An installed module and its loader.
pub struct Module {
    key: ModKey,
    loader: ModuleLoader,
}

impl Module {
    pub fn new(key: ModKey, loader: ModuleLoader) -> Self {
        Self { key, loader }
    }

    /// Get the module's unique key.
    pub fn key(&self) -> &ModKey {
        &self.key
    }

    /// Get the module's loader.
    pub fn loader(&self) -> &ModuleLoader {
        &self.loader
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("key", &self.key)
            .field("archive", &self.loader.archive())
            .field("entries", &self.loader.entry_count())
            .finish()
    }
}
