use std::sync::Arc;

use super::module::{ModKey, Module};

/// Source of the current module set.
///
/// Implemented by whatever owns install/enable/disable state. The resolver
/// only reads through this trait.
pub trait ModuleAccessor: Send + Sync {
    /// Enabled modules in a stable order for a fixed set.
    fn list_enabled_modules(&self) -> Vec<Arc<Module>>;

    fn is_enabled(&self, key: &ModKey) -> bool;

    fn get_module(&self, key: &ModKey) -> Option<Arc<Module>>;
}

/// Receiver of module set changes.
pub trait LifecycleListener: Send + Sync {
    /// `key` has been uninstalled; its loader is about to be closed.
    fn on_uninstall(&self, key: &ModKey);

    /// A module was installed, enabled or disabled.
    fn on_enabled_set_changed(&self);
}
