//! Host capability detection.
//!
//! Pure inspection of ambient facts: the compile target and a couple of
//! environment variables. No filesystem probing, no network, never fails.

use serde::{Deserialize, Serialize};

/// Forces the sandboxed environment even on a native target.
pub const ENV_SANDBOXED: &str = "TAGBRIDGE_SANDBOXED";
/// Declares that the host filesystem must not be used.
pub const ENV_NO_FILESYSTEM: &str = "TAGBRIDGE_NO_FILESYSTEM";

/// Where the loader is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Environment {
    Browser,
    ServerWithFilesystem,
    ServerSandboxed,
    Unknown,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Browser => "browser",
            Environment::ServerWithFilesystem => "server-with-filesystem",
            Environment::ServerSandboxed => "server-sandboxed",
            Environment::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable snapshot of what the host can do. Recomputed per load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub environment: Environment,
    pub supports_filesystem: bool,
    pub supports_streaming: bool,
    /// A WASI-capable in-process runtime can be hosted here.
    pub supports_system_interface: bool,
    pub performance_tier: u8,
}

/// The raw ambient facts detection is computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostProbe {
    pub target_family_wasm: bool,
    pub target_os_wasi: bool,
    pub target_os_unknown: bool,
    pub sandbox_requested: bool,
    pub filesystem_disabled: bool,
}

impl HostProbe {
    /// Snapshot the current process.
    pub fn current() -> Self {
        Self {
            target_family_wasm: cfg!(target_family = "wasm"),
            target_os_wasi: cfg!(target_os = "wasi"),
            target_os_unknown: cfg!(target_os = "unknown"),
            sandbox_requested: env_flag(ENV_SANDBOXED),
            filesystem_disabled: env_flag(ENV_NO_FILESYSTEM),
        }
    }
}

/// Detect capabilities of the current host.
pub fn detect() -> CapabilityDescriptor {
    detect_with(&HostProbe::current())
}

/// Deterministic mapping from probe to descriptor.
pub fn detect_with(probe: &HostProbe) -> CapabilityDescriptor {
    let environment = if probe.target_family_wasm && probe.target_os_unknown {
        Environment::Browser
    } else if probe.target_os_wasi || probe.sandbox_requested {
        Environment::ServerSandboxed
    } else if !probe.target_family_wasm {
        Environment::ServerWithFilesystem
    } else {
        Environment::Unknown
    };

    let (supports_filesystem, supports_streaming, supports_system_interface, performance_tier) =
        match environment {
            Environment::ServerWithFilesystem => (true, true, true, 3),
            // Sandboxed natives can still host a runtime, just not touch disk.
            Environment::ServerSandboxed => (false, true, !probe.target_family_wasm, 2),
            Environment::Browser => (false, true, false, 1),
            Environment::Unknown => (false, false, false, 0),
        };

    CapabilityDescriptor {
        environment,
        supports_filesystem: supports_filesystem && !probe.filesystem_disabled,
        supports_streaming,
        supports_system_interface,
        performance_tier,
    }
}

pub(crate) fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}
