//! tagbridge-core — one interface over both builds of the tag engine.
//!
//! The engine ships as a WASI core module and as a component. Callers get a
//! [`UnifiedModule`] either way and never branch on which one loaded.
//!
//! # Pipeline
//!
//! ```text
//! detect()  -> CapabilityDescriptor
//! select()  -> BackendChoice
//! ModuleLoader::load() -> Arc<dyn EngineBackend>   (ordered fallback)
//! UnifiedModule::wrap() -> UnifiedModule
//! ```

pub mod adapter;
pub mod backends;
pub mod cache;
pub mod error;
pub mod handle;
pub mod loader;
pub mod models;
pub mod module;
pub mod options;
pub mod runtime;
pub mod selector;

use std::time::Instant;

pub use cache::{CacheKey, ModuleCache};
pub use error::{AdapterError, AdapterResult, CodecError, ModuleLoadError, StrategyError};
pub use handle::FileHandle;
pub use loader::ModuleLoader;
pub use models::*;
pub use module::{PerformanceMetrics, UnifiedModule};
pub use options::LoaderOptions;
pub use runtime::{detect, CapabilityDescriptor, Environment};
pub use selector::{select, BackendChoice};

/// Detect, select, load with fallback, wrap.
pub fn load(options: &LoaderOptions) -> Result<UnifiedModule, ModuleLoadError> {
    let started = Instant::now();
    let descriptor = detect();
    let requested = select(&descriptor, options);
    log::info!(
        "tagbridge: selected {} backend ({}, tier {})",
        requested,
        descriptor.environment,
        descriptor.performance_tier
    );

    let (backend, actual) = ModuleLoader::new(descriptor).load(requested, options)?;
    if actual != requested {
        log::info!("tagbridge: fell back from {} to {}", requested, actual);
    }

    Ok(UnifiedModule::wrap(backend, descriptor, actual, started, options.collect_metrics))
}

/// Log and swallow a failure where nothing else can be done with it.
pub(crate) fn log_err<T, E: std::fmt::Display>(result: Result<T, E>, context: &str) -> bool {
    match result {
        Ok(_) => true,
        Err(e) => {
            log::warn!("tagbridge: {} failed: {}", context, e);
            false
        }
    }
}
