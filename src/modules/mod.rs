//! Module Set
//!
//! This module provides the types describing installed modules:
//! - `ModKey` - Unique module key
//! - `Module` - An installed module and the loader it owns
//! - `ModuleState` - Enabled/disabled state
//! - `ModuleAccessor` - Read access to the current module set
//! - `LifecycleListener` - Receiver of module set changes
//! - `ModuleRegistry` - Owning registry implementing `ModuleAccessor`

mod accessor;
mod module;
mod registry;

pub use accessor::{LifecycleListener, ModuleAccessor};
pub use module::{ModKey, Module, ModuleState};
pub use registry::{InstallError, ModuleRegistry};
