//! Where module bytes come from.
//!
//! Overrides first (caller bytes, inline base64, remote URL), then files in
//! the configured directories.

use std::path::PathBuf;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::backends::module_file;
use crate::error::StrategyError;
use crate::options::LoaderOptions;
use crate::selector::BackendChoice;

/// Module bytes plus a human-readable origin for logs.
#[derive(Debug, Clone)]
pub struct ModuleBytes {
    pub bytes: Arc<[u8]>,
    pub origin: String,
}

/// Bytes from an override, if the options configure one.
pub fn from_override(options: &LoaderOptions) -> Result<Option<ModuleBytes>, StrategyError> {
    if let Some(bytes) = &options.wasm_binary {
        return Ok(Some(ModuleBytes { bytes: bytes.clone(), origin: "caller-supplied binary".into() }));
    }

    if options.use_inline_wasm {
        let payload = options
            .inline_wasm
            .as_deref()
            .ok_or_else(|| StrategyError::Unavailable("inline module requested but no payload configured".into()))?;
        let bytes = STANDARD.decode(payload.trim())?;
        return Ok(Some(ModuleBytes { bytes: bytes.into(), origin: "inline payload".into() }));
    }

    if let Some(url) = &options.wasm_url {
        return fetch_remote(url).map(Some);
    }

    Ok(None)
}

#[cfg(feature = "http")]
fn fetch_remote(url: &str) -> Result<ModuleBytes, StrategyError> {
    let bytes = super::http::fetch(url)?;
    Ok(ModuleBytes { bytes: bytes.into(), origin: url.to_string() })
}

#[cfg(not(feature = "http"))]
fn fetch_remote(url: &str) -> Result<ModuleBytes, StrategyError> {
    Err(StrategyError::Unavailable(format!(
        "cannot fetch {}: remote loading requires the `http` feature",
        url
    )))
}

/// First `dir/file` that exists, in order.
pub fn from_dirs(dirs: &[PathBuf], file: &str) -> Result<ModuleBytes, StrategyError> {
    let mut searched = Vec::new();
    for dir in dirs {
        let path = dir.join(file);
        match std::fs::read(&path) {
            Ok(bytes) => return Ok(ModuleBytes { bytes: bytes.into(), origin: path.display().to_string() }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => searched.push(path),
            Err(source) => return Err(StrategyError::Io { path, source }),
        }
    }
    Err(StrategyError::NotFound { searched })
}

/// Binary interface of a module: the component layer byte after the wasm
/// magic, or a core module (text format included).
pub fn binary_kind(bytes: &[u8]) -> BackendChoice {
    match bytes {
        [0x00, b'a', b's', b'm', _, _, 0x01, 0x00, ..] => BackendChoice::ObjectCapability,
        _ => BackendChoice::SystemInterface,
    }
}

/// Override if configured and built for `kind`, else `kind`'s file in the
/// directories.
pub fn resolve(options: &LoaderOptions, dirs: &[PathBuf], kind: BackendChoice) -> Result<ModuleBytes, StrategyError> {
    if let Some(module) = from_override(options)? {
        if binary_kind(&module.bytes) == kind {
            return Ok(module);
        }
        log::debug!("tagbridge: {} is not a {} module, searching directories", module.origin, kind);
    }
    from_dirs(dirs, module_file(kind))
}

pub(crate) fn dir_list(first: PathBuf, second: Option<PathBuf>) -> Vec<PathBuf> {
    let mut dirs = vec![first];
    if let Some(second) = second {
        if !dirs.contains(&second) {
            dirs.push(second);
        }
    }
    dirs
}
