//! Aggregate Resolver
//!
//! Resolves a symbol against the currently enabled module set:
//!
//! 1. Positive cache hit with an enabled owner: delegate to that owner.
//! 2. Hit with an owner that is no longer enabled: ignore the entry.
//! 3. Negative cache hit: not found, no scan.
//! 4. Otherwise scan the enabled modules in enumeration order and cache the
//!    first module that has the entry, or cache the miss.
//!
//! The scan holds no lock while it talks to module loaders; the cache lock
//! is taken only to write one entry. Lifecycle notifications invalidate the
//! caches through [`LifecycleListener`].

mod cache;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::archive::Location;
use crate::config::CacheConfig;
use crate::loader::LoadError;
use crate::modules::{LifecycleListener, ModKey, Module, ModuleAccessor, ModuleRegistry};
use crate::symbol::{Symbol, SymbolError};

use cache::SymbolCache;

/// Errors resolving a symbol across modules.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("{symbol} not found in any enabled module")]
    NotFound { symbol: String },
    #[error("failed to load {symbol} from module {module}: {source}")]
    Load {
        symbol: String,
        module: ModKey,
        #[source]
        source: LoadError,
    },
    #[error(transparent)]
    Symbol(#[from] SymbolError),
}

impl ResolveError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ResolveError::NotFound { .. })
    }
}

/// A symbol resolved to its owning module.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub owner: ModKey,
    pub location: Location,
    pub bytes: Vec<u8>,
}

/// Snapshot of resolver counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolverStats {
    /// Lookups answered by an enabled cached owner.
    pub positive_hits: u64,
    /// Cached owners ignored because they were no longer enabled.
    pub stale_owners: u64,
    /// Lookups answered by the negative cache.
    pub negative_hits: u64,
    /// Full scans of the enabled module set.
    pub scans: u64,
    /// Scans that found no provider.
    pub misses: u64,
    /// Invalidation notifications received.
    pub invalidations: u64,
}

#[derive(Default)]
struct Counters {
    positive_hits: AtomicU64,
    stale_owners: AtomicU64,
    negative_hits: AtomicU64,
    scans: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ResolverStats {
        ResolverStats {
            positive_hits: self.positive_hits.load(Ordering::Relaxed),
            stale_owners: self.stale_owners.load(Ordering::Relaxed),
            negative_hits: self.negative_hits.load(Ordering::Relaxed),
            scans: self.scans.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

/// Whether a lookup reads the entry's bytes or only locates it.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Fetch {
    Locate,
    Read,
}

struct Found {
    owner: ModKey,
    location: Location,
    bytes: Option<Vec<u8>>,
}

/// Resolver over the enabled modules of a [`ModuleAccessor`].
pub struct AggregateResolver {
    accessor: Arc<dyn ModuleAccessor>,
    cache: SymbolCache,
    counters: Counters,
}

impl AggregateResolver {
    pub fn new(accessor: Arc<dyn ModuleAccessor>, config: &CacheConfig) -> Self {
        Self {
            accessor,
            cache: SymbolCache::new(config.miss_capacity()),
            counters: Counters::default(),
        }
    }

    /// Create a resolver over `registry` and subscribe it to the
    /// registry's lifecycle notifications.
    pub fn attach(registry: &Arc<ModuleRegistry>) -> Arc<Self> {
        let accessor: Arc<dyn ModuleAccessor> = registry.clone();
        let resolver = Arc::new(Self::new(accessor, &registry.config().cache));
        registry.subscribe(&resolver);
        resolver
    }

    /// Resolve a symbol to its owner and bytes.
    pub fn resolve(&self, symbol: &Symbol) -> Result<Resolved, ResolveError> {
        let found = self.lookup(symbol, Fetch::Read)?;
        Ok(Resolved {
            owner: found.owner,
            location: found.location,
            bytes: found.bytes.unwrap_or_default(),
        })
    }

    /// Resolve a dotted class name to its bytes.
    pub fn resolve_class(&self, name: &str) -> Result<Vec<u8>, ResolveError> {
        let symbol = Symbol::class(name)?;
        self.resolve(&symbol).map(|resolved| resolved.bytes)
    }

    /// Resolve a resource path to its location without reading it.
    pub fn resolve_resource(&self, path: &str) -> Result<Location, ResolveError> {
        let symbol = Symbol::resource(path)?;
        self.lookup(&symbol, Fetch::Locate).map(|found| found.location)
    }

    /// Key of the module that owns `symbol`, resolving it if needed.
    pub fn owner_of(&self, symbol: &Symbol) -> Option<ModKey> {
        self.lookup(symbol, Fetch::Locate).ok().map(|found| found.owner)
    }

    /// Every enabled module that contains `path`, in enumeration order.
    ///
    /// Not cached.
    pub fn resolve_all_resources(
        &self,
        path: &str,
    ) -> Result<Vec<(ModKey, Location)>, ResolveError> {
        let entry = Symbol::resource(path)?.entry_path();
        Ok(self
            .accessor
            .list_enabled_modules()
            .iter()
            .filter_map(|module| {
                module
                    .loader()
                    .find_entry(&entry)
                    .map(|location| (module.key().clone(), location))
            })
            .collect())
    }

    /// Invalidate after `key` was uninstalled.
    pub fn on_uninstall(&self, key: &ModKey) {
        Counters::bump(&self.counters.invalidations);
        let purged = self.cache.purge_owner(key);
        debug!(target: "modfed::resolver", module = %key, purged, "Invalidated caches after uninstall");
    }

    /// Invalidate after the enabled set changed.
    pub fn on_enabled_set_changed(&self) {
        Counters::bump(&self.counters.invalidations);
        self.cache.clear_misses();
        debug!(target: "modfed::resolver", "Cleared miss cache after module set change");
    }

    pub fn stats(&self) -> ResolverStats {
        self.counters.snapshot()
    }

    /// Number of cached owners (including stale ones not yet revalidated).
    pub fn cached_owner_count(&self) -> usize {
        self.cache.owner_count()
    }

    /// Number of cached misses.
    pub fn cached_miss_count(&self) -> usize {
        self.cache.miss_count()
    }

    fn lookup(&self, symbol: &Symbol, fetch: Fetch) -> Result<Found, ResolveError> {
        let entry = symbol.entry_path();

        if let Some(found) = self.cached(symbol, &entry, fetch)? {
            return Ok(found);
        }

        if self.cache.is_miss(&entry) {
            Counters::bump(&self.counters.negative_hits);
            trace!(target: "modfed::resolver", %symbol, "Negative cache hit");
            return Err(not_found(symbol));
        }

        self.scan(symbol, &entry, fetch)
    }

    /// Fast path through a cached owner that is still enabled.
    fn cached(
        &self,
        symbol: &Symbol,
        entry: &str,
        fetch: Fetch,
    ) -> Result<Option<Found>, ResolveError> {
        let Some(owner) = self.cache.owner(entry) else {
            return Ok(None);
        };

        let module = match self.accessor.get_module(&owner) {
            Some(module) if self.accessor.is_enabled(&owner) => module,
            _ => {
                Counters::bump(&self.counters.stale_owners);
                trace!(target: "modfed::resolver", %symbol, module = %owner, "Ignoring cached owner that is not enabled");
                return Ok(None);
            }
        };

        let Some(location) = module.loader().find_entry(entry) else {
            Counters::bump(&self.counters.stale_owners);
            return Ok(None);
        };

        let bytes = match fetch {
            Fetch::Locate => None,
            Fetch::Read => match module.loader().load_location(&location) {
                Ok(bytes) => Some(bytes),
                // Uninstalled after the entry was found.
                Err(e) if e.is_closed() => {
                    Counters::bump(&self.counters.stale_owners);
                    trace!(target: "modfed::resolver", %symbol, module = %owner, "Cached owner closed during read");
                    return Ok(None);
                }
                Err(source) => {
                    return Err(ResolveError::Load {
                        symbol: symbol.to_string(),
                        module: owner,
                        source,
                    })
                }
            },
        };
        Counters::bump(&self.counters.positive_hits);
        trace!(target: "modfed::resolver", %symbol, module = %owner, "Positive cache hit");
        Ok(Some(Found {
            owner,
            location,
            bytes,
        }))
    }

    /// One linear pass over the enabled modules.
    fn scan(&self, symbol: &Symbol, entry: &str, fetch: Fetch) -> Result<Found, ResolveError> {
        let seen = self.cache.generation();
        Counters::bump(&self.counters.scans);

        let modules = self.accessor.list_enabled_modules();
        trace!(target: "modfed::resolver", %symbol, candidates = modules.len(), "Scanning enabled modules");

        let mut failure: Option<ResolveError> = None;
        for module in &modules {
            match self.try_module(module, symbol, entry, fetch) {
                Ok(Some(found)) => {
                    if !self.cache.record_owner(entry, &found.owner, seen) {
                        trace!(target: "modfed::resolver", %symbol, "Module set changed during scan; owner not cached");
                    }
                    return Ok(found);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(target: "modfed::resolver", %symbol, module = %module.key(), error = %e, "Module failed to load symbol; continuing scan");
                    failure.get_or_insert(e);
                }
            }
        }

        // The symbol exists somewhere but could not be read: report that
        // rather than caching a miss.
        if let Some(e) = failure {
            return Err(e);
        }

        Counters::bump(&self.counters.misses);
        if !self.cache.record_miss(entry, seen) {
            trace!(target: "modfed::resolver", %symbol, "Module set changed during scan; miss not cached");
        }
        Err(not_found(symbol))
    }

    fn try_module(
        &self,
        module: &Module,
        symbol: &Symbol,
        entry: &str,
        fetch: Fetch,
    ) -> Result<Option<Found>, ResolveError> {
        let Some(location) = module.loader().find_entry(entry) else {
            return Ok(None);
        };
        let bytes = match fetch {
            Fetch::Locate => None,
            Fetch::Read => match module.loader().load_location(&location) {
                Ok(bytes) => Some(bytes),
                Err(e) if e.is_closed() => return Ok(None),
                Err(source) => {
                    return Err(ResolveError::Load {
                        symbol: symbol.to_string(),
                        module: module.key().clone(),
                        source,
                    })
                }
            },
        };
        Ok(Some(Found {
            owner: module.key().clone(),
            location,
            bytes,
        }))
    }
}

impl LifecycleListener for AggregateResolver {
    fn on_uninstall(&self, key: &ModKey) {
        AggregateResolver::on_uninstall(self, key);
    }

    fn on_enabled_set_changed(&self) {
        AggregateResolver::on_enabled_set_changed(self);
    }
}

impl std::fmt::Debug for AggregateResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateResolver")
            .field("cache", &self.cache)
            .field("stats", &self.stats())
            .finish()
    }
}

fn not_found(symbol: &Symbol) -> ResolveError {
    ResolveError::NotFound {
        symbol: symbol.to_string(),
    }
}
