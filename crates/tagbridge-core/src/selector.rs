//! Backend selection policy.
//!
//! `select` is a pure function of descriptor + options. The precedence is
//! fixed: forced backend, then the optimization kill switch, then the
//! capability check, then the default.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::options::LoaderOptions;
use crate::runtime::CapabilityDescriptor;

/// Which engine binary interface to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendChoice {
    #[serde(alias = "wasi")]
    SystemInterface,
    #[serde(alias = "component")]
    ObjectCapability,
}

impl BackendChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendChoice::SystemInterface => "system-interface",
            BackendChoice::ObjectCapability => "object-capability",
        }
    }
}

impl std::fmt::Display for BackendChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "system-interface" | "wasi" => Ok(BackendChoice::SystemInterface),
            "object-capability" | "component" => Ok(BackendChoice::ObjectCapability),
            other => Err(format!("unknown backend: {}", other)),
        }
    }
}

/// Decide which backend to request.
pub fn select(descriptor: &CapabilityDescriptor, options: &LoaderOptions) -> BackendChoice {
    if let Some(forced) = options.forced_backend {
        return forced;
    }
    if options.disable_optimizations {
        return BackendChoice::ObjectCapability;
    }
    if descriptor.supports_system_interface && descriptor.supports_filesystem {
        return BackendChoice::SystemInterface;
    }
    BackendChoice::ObjectCapability
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Environment;

    fn descriptor(system_interface: bool, filesystem: bool) -> CapabilityDescriptor {
        CapabilityDescriptor {
            environment: Environment::ServerWithFilesystem,
            supports_filesystem: filesystem,
            supports_streaming: true,
            supports_system_interface: system_interface,
            performance_tier: 3,
        }
    }

    fn all_descriptors() -> Vec<CapabilityDescriptor> {
        vec![
            descriptor(true, true),
            descriptor(true, false),
            descriptor(false, true),
            descriptor(false, false),
        ]
    }

    #[test]
    fn forced_backend_always_wins() {
        for d in all_descriptors() {
            for forced in [BackendChoice::SystemInterface, BackendChoice::ObjectCapability] {
                let options = LoaderOptions {
                    forced_backend: Some(forced),
                    disable_optimizations: true,
                    ..LoaderOptions::default()
                };
                assert_eq!(select(&d, &options), forced);
            }
        }
    }

    #[test]
    fn disable_optimizations_yields_object_capability() {
        for d in all_descriptors() {
            let options = LoaderOptions {
                disable_optimizations: true,
                ..LoaderOptions::default()
            };
            assert_eq!(select(&d, &options), BackendChoice::ObjectCapability);
        }
    }

    #[test]
    fn system_interface_iff_wasi_and_filesystem() {
        let options = LoaderOptions::default();
        for d in all_descriptors() {
            let expected = if d.supports_system_interface && d.supports_filesystem {
                BackendChoice::SystemInterface
            } else {
                BackendChoice::ObjectCapability
            };
            assert_eq!(select(&d, &options), expected);
        }
    }

    #[test]
    fn parse_aliases() {
        assert_eq!("wasi".parse::<BackendChoice>(), Ok(BackendChoice::SystemInterface));
        assert_eq!(
            "Object-Capability".parse::<BackendChoice>(),
            Ok(BackendChoice::ObjectCapability)
        );
        assert!("emscripten".parse::<BackendChoice>().is_err());
    }

    #[test]
    fn serde_names() {
        let json = serde_json::to_string(&BackendChoice::SystemInterface).unwrap();
        assert_eq!(json, "\"system-interface\"");
        let back: BackendChoice = serde_json::from_str("\"component\"").unwrap();
        assert_eq!(back, BackendChoice::ObjectCapability);
    }
}
