//! Explicit module cache, owned by whoever composes the application.
//!
//! Two option sets share a cached module only when they would load the
//! same engine the same way.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::ModuleLoadError;
use crate::module::UnifiedModule;
use crate::options::LoaderOptions;
use crate::selector::BackendChoice;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    binary: Option<u64>,
    inline: Option<u64>,
    wasm_url: Option<String>,
    module_dir: PathBuf,
    fallback_dir: Option<PathBuf>,
    forced_backend: Option<BackendChoice>,
    disable_optimizations: bool,
    collect_metrics: bool,
}

impl CacheKey {
    pub fn from_options(options: &LoaderOptions) -> Self {
        let inline = if options.use_inline_wasm {
            options.inline_wasm.as_deref().map(|s| fingerprint(s.trim().as_bytes()))
        } else {
            None
        };
        Self {
            binary: options.wasm_binary.as_deref().map(fingerprint),
            inline,
            wasm_url: options.wasm_url.clone(),
            module_dir: options.primary_dir(),
            fallback_dir: options.secondary_dir(),
            forced_backend: options.forced_backend,
            disable_optimizations: options.disable_optimizations,
            collect_metrics: options.collect_metrics,
        }
    }
}

/// FNV-1a.
fn fingerprint(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[derive(Default)]
pub struct ModuleCache {
    modules: Mutex<HashMap<CacheKey, Arc<UnifiedModule>>>,
}

impl ModuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached module for `options`, loading it on first use.
    pub fn get_or_load(&self, options: &LoaderOptions) -> Result<Arc<UnifiedModule>, ModuleLoadError> {
        self.get_or_load_with(options, crate::load)
    }

    /// Like [`get_or_load`](Self::get_or_load) with a custom load function.
    /// Failed loads are not cached.
    pub fn get_or_load_with(
        &self,
        options: &LoaderOptions,
        load: impl FnOnce(&LoaderOptions) -> Result<UnifiedModule, ModuleLoadError>,
    ) -> Result<Arc<UnifiedModule>, ModuleLoadError> {
        let key = CacheKey::from_options(options);
        let mut modules = self.modules.lock();
        if let Some(module) = modules.get(&key) {
            log::debug!("tagbridge: module cache hit ({})", module.backend_choice());
            return Ok(module.clone());
        }
        let module = Arc::new(load(options)?);
        modules.insert(key, module.clone());
        Ok(module)
    }

    /// Drop the cached module for `options`; returns whether one existed.
    pub fn evict(&self, options: &LoaderOptions) -> bool {
        self.modules.lock().remove(&CacheKey::from_options(options)).is_some()
    }

    pub fn clear(&self) {
        self.modules.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.modules.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.lock().is_empty()
    }
}
