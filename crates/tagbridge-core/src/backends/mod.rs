//! Engine backends.
//!
//! Every backend, whatever its runtime or binary interface, is consumed
//! through [`EngineBackend`]. The loader returns nothing more specific.

pub mod component;
#[cfg(feature = "wasmer")]
pub mod wasmer_host;
pub mod wasmtime_host;

use crate::adapter::MemoryBridge;
use crate::error::AdapterResult;
use crate::handle::HandleDriver;
use crate::selector::BackendChoice;

/// File name of the system-interface module.
pub const SYSTEM_INTERFACE_MODULE: &str = "taglib-wasi.wasm";
/// File name of the object-capability component.
pub const OBJECT_CAPABILITY_MODULE: &str = "taglib-component.wasm";

pub trait EngineBackend: Send + Sync {
    /// Binary interface this backend speaks.
    fn kind(&self) -> BackendChoice;

    /// Hosting runtime, for diagnostics.
    fn runtime(&self) -> &'static str;

    fn memory(&self) -> &MemoryBridge;

    fn version(&self) -> AdapterResult<String>;

    /// Fresh per-file driver for a new handle.
    fn open_handle(&self) -> AdapterResult<Box<dyn HandleDriver>>;
}

/// File the loader looks for in each module directory.
pub fn module_file(choice: BackendChoice) -> &'static str {
    match choice {
        BackendChoice::SystemInterface => SYSTEM_INTERFACE_MODULE,
        BackendChoice::ObjectCapability => OBJECT_CAPABILITY_MODULE,
    }
}
