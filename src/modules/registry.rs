//! Module Registry
//!
//! An owning arena of installed modules keyed by `ModKey`. The registry:
//! - Builds each module's loader at install time (failures install nothing)
//! - Tracks enabled/disabled state per module
//! - Enumerates modules in install order, which is stable for a fixed set
//! - Notifies lifecycle listeners after every change to the module set
//!
//! Listeners are held weakly, so a resolver that reads through the registry
//! can also subscribe to it without a reference cycle.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::accessor::{LifecycleListener, ModuleAccessor};
use super::module::{ModKey, Module, ModuleState};
use crate::archive::ArchiveError;
use crate::config::LoaderConfig;
use crate::loader::{EmptyHost, HostResolver, ModuleLoader};

/// Errors changing the module set.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("Failed to load module {key}: {source}")]
    Archive {
        key: ModKey,
        #[source]
        source: ArchiveError,
    },
    #[error("Module {0} is already installed")]
    DuplicateKey(ModKey),
    #[error("Module {0} is not installed")]
    UnknownModule(ModKey),
}

struct Slot {
    module: Arc<Module>,
    state: ModuleState,
}

#[derive(Default)]
struct Installed {
    /// Modules by key.
    modules: HashMap<ModKey, Slot>,
    /// Install order.
    order: Vec<ModKey>,
}

/// Registry of installed modules.
pub struct ModuleRegistry {
    installed: RwLock<Installed>,
    listeners: RwLock<Vec<Weak<dyn LifecycleListener>>>,
    config: LoaderConfig,
    host: Arc<dyn HostResolver>,
}

impl ModuleRegistry {
    /// Create an empty registry with default configuration and no host.
    pub fn new() -> Self {
        Self::with_config(LoaderConfig::default())
    }

    pub fn with_config(config: LoaderConfig) -> Self {
        Self::with_host(config, Arc::new(EmptyHost))
    }

    /// Create a registry whose loaders fall back to `host`.
    pub fn with_host(config: LoaderConfig, host: Arc<dyn HostResolver>) -> Self {
        Self {
            installed: RwLock::new(Installed::default()),
            listeners: RwLock::new(Vec::new()),
            config,
            host,
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Register a listener for module set changes.
    pub fn subscribe<L: LifecycleListener + 'static>(&self, listener: &Arc<L>) {
        let listener: Arc<dyn LifecycleListener> = listener.clone();
        self.listeners.write().push(Arc::downgrade(&listener));
    }

    /// Install the archive at `archive` under `key`. New modules start disabled.
    pub fn install(&self, key: ModKey, archive: &Path) -> Result<Arc<Module>, InstallError> {
        if self.contains(&key) {
            return Err(InstallError::DuplicateKey(key));
        }
        let loader = self.open_loader(&key, archive)?;
        let module = self.insert(key, loader)?;
        self.notify_enabled_set_changed();
        Ok(module)
    }

    /// Install many archives, building their loaders in parallel.
    ///
    /// Successful modules are inserted in the order given; one result is
    /// returned per entry.
    pub fn install_all(
        &self,
        entries: Vec<(ModKey, PathBuf)>,
    ) -> Vec<Result<Arc<Module>, InstallError>> {
        let built: Vec<(ModKey, Result<ModuleLoader, InstallError>)> = entries
            .into_par_iter()
            .map(|(key, path)| {
                let loader = self.open_loader(&key, &path);
                (key, loader)
            })
            .collect();

        let mut changed = false;
        let results = built
            .into_iter()
            .map(|(key, loader)| -> Result<Arc<Module>, InstallError> {
                let module = self.insert(key, loader?)?;
                changed = true;
                Ok(module)
            })
            .collect();

        if changed {
            self.notify_enabled_set_changed();
        }
        results
    }

    /// Enable a module. Returns `true` if its state changed.
    pub fn enable(&self, key: &ModKey) -> Result<bool, InstallError> {
        self.set_state(key, ModuleState::Enabled)
    }

    /// Disable a module. Returns `true` if its state changed.
    pub fn disable(&self, key: &ModKey) -> Result<bool, InstallError> {
        self.set_state(key, ModuleState::Disabled)
    }

    /// Remove a module, notify listeners, then close its loader.
    pub fn uninstall(&self, key: &ModKey) -> Result<Arc<Module>, InstallError> {
        let slot = {
            let mut installed = self.installed.write();
            let slot = installed
                .modules
                .remove(key)
                .ok_or_else(|| InstallError::UnknownModule(key.clone()))?;
            installed.order.retain(|k| k != key);
            slot
        };

        info!(target: "modfed::registry", module = %key, "Uninstalled module");
        for listener in self.live_listeners() {
            listener.on_uninstall(key);
        }
        slot.module.loader().close();
        Ok(slot.module)
    }

    pub fn state(&self, key: &ModKey) -> Option<ModuleState> {
        self.installed.read().modules.get(key).map(|slot| slot.state)
    }

    pub fn contains(&self, key: &ModKey) -> bool {
        self.installed.read().modules.contains_key(key)
    }

    /// Get the number of installed modules.
    pub fn module_count(&self) -> usize {
        self.installed.read().order.len()
    }

    /// Keys of all installed modules in install order.
    pub fn keys(&self) -> Vec<ModKey> {
        self.installed.read().order.clone()
    }

    fn open_loader(&self, key: &ModKey, archive: &Path) -> Result<ModuleLoader, InstallError> {
        ModuleLoader::open_with_host(archive, &self.config, Arc::clone(&self.host)).map_err(
            |source| {
                warn!(target: "modfed::registry", module = %key, archive = %archive.display(), error = %source, "Module archive could not be loaded");
                InstallError::Archive {
                    key: key.clone(),
                    source,
                }
            },
        )
    }

    fn insert(&self, key: ModKey, loader: ModuleLoader) -> Result<Arc<Module>, InstallError> {
        let mut installed = self.installed.write();
        if installed.modules.contains_key(&key) {
            drop(installed);
            loader.close();
            return Err(InstallError::DuplicateKey(key));
        }

        info!(target: "modfed::registry", module = %key, archive = %loader.archive().display(), entries = loader.entry_count(), "Installed module");
        let module = Arc::new(Module::new(key.clone(), loader));
        installed.order.push(key.clone());
        installed.modules.insert(
            key,
            Slot {
                module: Arc::clone(&module),
                state: ModuleState::Disabled,
            },
        );
        Ok(module)
    }

    fn set_state(&self, key: &ModKey, state: ModuleState) -> Result<bool, InstallError> {
        let changed = {
            let mut installed = self.installed.write();
            let slot = installed
                .modules
                .get_mut(key)
                .ok_or_else(|| InstallError::UnknownModule(key.clone()))?;
            let changed = slot.state != state;
            slot.state = state;
            changed
        };

        if changed {
            debug!(target: "modfed::registry", module = %key, ?state, "Module state changed");
            self.notify_enabled_set_changed();
        }
        Ok(changed)
    }

    fn notify_enabled_set_changed(&self) {
        for listener in self.live_listeners() {
            listener.on_enabled_set_changed();
        }
    }

    /// Upgrade listeners, pruning the ones that have been dropped.
    fn live_listeners(&self) -> Vec<Arc<dyn LifecycleListener>> {
        let mut listeners = self.listeners.write();
        let mut live = Vec::with_capacity(listeners.len());
        listeners.retain(|weak| match weak.upgrade() {
            Some(listener) => {
                live.push(listener);
                true
            }
            None => false,
        });
        live
    }
}

impl ModuleAccessor for ModuleRegistry {
    fn list_enabled_modules(&self) -> Vec<Arc<Module>> {
        let installed = self.installed.read();
        installed
            .order
            .iter()
            .filter_map(|key| installed.modules.get(key))
            .filter(|slot| slot.state == ModuleState::Enabled)
            .map(|slot| Arc::clone(&slot.module))
            .collect()
    }

    fn is_enabled(&self, key: &ModKey) -> bool {
        self.state(key) == Some(ModuleState::Enabled)
    }

    fn get_module(&self, key: &ModKey) -> Option<Arc<Module>> {
        self.installed
            .read()
            .modules
            .get(key)
            .map(|slot| Arc::clone(&slot.module))
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let installed = self.installed.read();
        let enabled = installed
            .modules
            .values()
            .filter(|slot| slot.state == ModuleState::Enabled)
            .count();
        f.debug_struct("ModuleRegistry")
            .field("module_count", &installed.order.len())
            .field("enabled_count", &enabled)
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}
