//! Loader configuration.
//!
//! Built in code, from environment variables (`from_env`), or from a JSON
//! document (`from_json`). Everything is optional; defaults load from `dist/`.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::runtime::env_flag;
use crate::selector::BackendChoice;

pub const ENV_BACKEND: &str = "TAGBRIDGE_BACKEND";
pub const ENV_DISABLE_OPTIMIZATIONS: &str = "TAGBRIDGE_DISABLE_OPTIMIZATIONS";
pub const ENV_WASM_URL: &str = "TAGBRIDGE_WASM_URL";
pub const ENV_MODULE_DIR: &str = "TAGBRIDGE_MODULE_DIR";
pub const ENV_FALLBACK_DIR: &str = "TAGBRIDGE_FALLBACK_DIR";
pub const ENV_DEBUG: &str = "TAGBRIDGE_DEBUG";
pub const ENV_INLINE_WASM: &str = "TAGBRIDGE_INLINE_WASM";

/// Default primary module directory, relative to the working directory.
pub const DEFAULT_MODULE_DIR: &str = "dist";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderOptions {
    /// Skip selection and request this backend.
    pub forced_backend: Option<BackendChoice>,
    /// Never pick the system-interface backend on its own.
    pub disable_optimizations: bool,
    /// Module bytes supplied by the caller; tried before any location.
    #[serde(skip)]
    pub wasm_binary: Option<Arc<[u8]>>,
    /// Remote location override (requires the `http` feature).
    pub wasm_url: Option<String>,
    /// Log discarded strategy failures.
    pub debug: bool,
    /// Load from `inline_wasm` instead of touching the filesystem.
    pub use_inline_wasm: bool,
    /// Base64-encoded module bytes.
    pub inline_wasm: Option<String>,
    pub module_dir: Option<PathBuf>,
    pub fallback_dir: Option<PathBuf>,
    pub collect_metrics: bool,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            forced_backend: None,
            disable_optimizations: false,
            wasm_binary: None,
            wasm_url: None,
            debug: false,
            use_inline_wasm: false,
            inline_wasm: None,
            module_dir: None,
            fallback_dir: None,
            collect_metrics: true,
        }
    }
}

impl LoaderOptions {
    /// Defaults overridden by `TAGBRIDGE_*` environment variables.
    ///
    /// An unparseable `TAGBRIDGE_BACKEND` is logged and ignored.
    pub fn from_env() -> Self {
        let mut options = Self::default();

        if let Ok(v) = std::env::var(ENV_BACKEND) {
            match v.parse::<BackendChoice>() {
                Ok(choice) => options.forced_backend = Some(choice),
                Err(e) => log::warn!("tagbridge: ignoring {}: {}", ENV_BACKEND, e),
            }
        }
        options.disable_optimizations = env_flag(ENV_DISABLE_OPTIMIZATIONS);
        options.debug = env_flag(ENV_DEBUG);
        options.wasm_url = non_empty_var(ENV_WASM_URL);
        options.module_dir = non_empty_var(ENV_MODULE_DIR).map(PathBuf::from);
        options.fallback_dir = non_empty_var(ENV_FALLBACK_DIR).map(PathBuf::from);
        if let Some(inline) = non_empty_var(ENV_INLINE_WASM) {
            options.inline_wasm = Some(inline);
            options.use_inline_wasm = true;
        }
        options
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_binary(mut self, bytes: impl Into<Arc<[u8]>>) -> Self {
        self.wasm_binary = Some(bytes.into());
        self
    }

    pub fn forced(mut self, backend: BackendChoice) -> Self {
        self.forced_backend = Some(backend);
        self
    }

    /// Primary module location.
    pub fn primary_dir(&self) -> PathBuf {
        self.module_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MODULE_DIR))
    }

    /// Secondary module location: `fallback_dir`, else `wasm/` beside the
    /// running executable.
    pub fn secondary_dir(&self) -> Option<PathBuf> {
        if let Some(dir) = &self.fallback_dir {
            return Some(dir.clone());
        }
        let exe = std::env::current_exe().ok()?;
        Some(exe.parent()?.join("wasm"))
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
