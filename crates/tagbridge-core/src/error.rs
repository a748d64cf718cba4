//! Error taxonomy.
//!
//! Two families with different propagation rules:
//! - [`ModuleLoadError`] / [`StrategyError`]: load-time failures. Individual
//!   strategy failures are absorbed by the fallback chain; only exhaustion
//!   reaches the caller.
//! - [`AdapterError`]: operational misuse or missing native support. Never
//!   retried, always propagated immediately.

use std::path::PathBuf;

use thiserror::Error;

use crate::selector::BackendChoice;

// ---------------------------------------------------------------------------
// Load time
// ---------------------------------------------------------------------------

/// Every strategy for `backend` failed.
#[derive(Error, Debug)]
#[error("failed to load {backend} backend: {cause}")]
pub struct ModuleLoadError {
    /// The backend the caller asked for (not the last one attempted).
    pub backend: BackendChoice,
    /// Failure of the last strategy tried.
    #[source]
    pub cause: StrategyError,
    /// Earlier failed attempts in execution order; the last one is `cause`.
    pub attempts: Vec<Attempt>,
}

/// One failed strategy, kept for diagnostics.
#[derive(Debug)]
pub struct Attempt {
    pub strategy: &'static str,
    pub error: StrategyError,
}

/// Why a single loading strategy gave up.
#[derive(Error, Debug)]
pub enum StrategyError {
    #[error("{0}")]
    Unavailable(String),

    #[error("module not found (searched: {})", display_paths(.searched))]
    NotFound { searched: Vec<PathBuf> },

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("inline module payload is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("failed to fetch {url}: {message}")]
    Http { url: String, message: String },

    #[error("{stage} failed: {message}")]
    Runtime { stage: &'static str, message: String },

    #[error("module does not export `{0}`")]
    MissingExport(&'static str),

    #[error("no strategies configured")]
    Empty,
}

impl StrategyError {
    pub(crate) fn runtime(stage: &'static str, err: impl std::fmt::Display) -> Self {
        StrategyError::Runtime { stage, message: err.to_string() }
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "nothing".into();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

// ---------------------------------------------------------------------------
// Adapter / handle operations
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("handle destroyed")]
    HandleDestroyed,

    /// Named after the capability the active backend lacks.
    #[error("{0} not implemented for this backend")]
    Unsupported(&'static str),

    #[error("memory access out of bounds: offset {offset} + {len} exceeds {capacity}")]
    OutOfBounds { offset: u64, len: u64, capacity: u64 },

    #[error("no terminating zero byte after offset {offset}")]
    UnterminatedString { offset: u32 },

    #[error("string at offset {offset} is not valid UTF-8")]
    InvalidUtf8 { offset: u32 },

    #[error("string has an interior zero byte at position {0}")]
    InteriorNul(usize),

    #[error("pointer {0:#x} was not allocated through this bridge")]
    UnknownAllocation(u32),

    #[error("allocation of {0} bytes failed")]
    AllocationFailed(u32),

    #[error("`{0}` is an audio property and cannot be set as a tag")]
    ReservedKey(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("{op} failed: {message}")]
    Engine { op: &'static str, message: String },

    #[error("engine trapped: {0}")]
    Trap(String),
}

impl AdapterError {
    pub(crate) fn trap(err: impl std::fmt::Display) -> Self {
        AdapterError::Trap(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("malformed tag document: {0}")]
    Decode(String),

    #[error("failed to encode tag document: {0}")]
    Encode(String),

    #[error("tag document must be a map")]
    NotAMap,

    #[error("field `{key}`: expected {expected}")]
    UnexpectedType { key: String, expected: &'static str },

    #[error("{0} trailing bytes after tag document")]
    TrailingBytes(usize),
}

pub type AdapterResult<T> = Result<T, AdapterError>;
