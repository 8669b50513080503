//! modfed - Federated Symbol Resolution for Plugin Modules
//!
//! This library resolves class and resource symbols across a dynamically
//! changing set of independently packaged, independently enabled plugin
//! modules.
//!
//! # Architecture
//!
//! 1. **Archive indexing** (`archive` module)
//!    - Flattens a module archive and the archives bundled inside it into
//!      one entry map
//!    - Outer entries shadow bundled ones
//!
//! 2. **Module loading** (`loader` module)
//!    - One loader per module over its flattened index
//!    - Child-first lookup chain: module archive, then host fallback
//!
//! 3. **Module set** (`modules` module)
//!    - Owning registry of modules by key with enabled/disabled state
//!    - Lifecycle notifications to listeners
//!
//! 4. **Aggregate resolution** (`resolver` module)
//!    - Finds the enabled module that owns a symbol
//!    - Positive and negative caches, invalidated on module set changes
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use modfed::{AggregateResolver, ModKey, ModuleRegistry};
//!
//! let registry = Arc::new(ModuleRegistry::new());
//! let resolver = AggregateResolver::attach(&registry);
//!
//! let key = ModKey::new("com.acme.reports");
//! registry.install(key.clone(), Path::new("plugins/reports.jar")).unwrap();
//! registry.enable(&key).unwrap();
//!
//! let bytes = resolver.resolve_class("com.acme.reports.Report").unwrap();
//! println!("{} bytes", bytes.len());
//! ```

pub mod archive;
pub mod config;
pub mod loader;
pub mod modules;
pub mod resolver;
pub mod symbol;

#[cfg(test)]
pub(crate) mod testing;

pub use archive::{ArchiveError, ArchiveIndex, Location, ReadError};
pub use config::{ConfigError, LoaderConfig, NestedArchivePolicy};
pub use loader::{HostResolver, LoadError, LookupChain, ModuleLoader, StaticHost};
pub use modules::{
    InstallError, LifecycleListener, ModKey, Module, ModuleAccessor, ModuleRegistry, ModuleState,
};
pub use resolver::{AggregateResolver, ResolveError, Resolved, ResolverStats};
pub use symbol::{Symbol, SymbolError};
