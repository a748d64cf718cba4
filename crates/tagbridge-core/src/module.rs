//! The single value handed to callers once loading succeeds.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::adapter::MemoryBridge;
use crate::backends::EngineBackend;
use crate::error::AdapterResult;
use crate::handle::FileHandle;
use crate::runtime::{CapabilityDescriptor, Environment};
use crate::selector::BackendChoice;

/// Snapshot of load cost and memory use.
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceMetrics {
    #[serde(with = "millis")]
    pub init_time: Duration,
    pub backend: BackendChoice,
    pub runtime: &'static str,
    pub environment: Environment,
    pub memory_bytes: u64,
    pub live_allocation_bytes: u64,
}

mod millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64() * 1000.0)
    }
}

/// One loaded engine. Callers never branch on which backend is inside.
pub struct UnifiedModule {
    backend: Arc<dyn EngineBackend>,
    descriptor: CapabilityDescriptor,
    actual: BackendChoice,
    init_time: Duration,
    collect_metrics: bool,
}

impl UnifiedModule {
    /// Flags follow `actual`, the backend that really loaded.
    pub fn wrap(
        backend: Arc<dyn EngineBackend>,
        descriptor: CapabilityDescriptor,
        actual: BackendChoice,
        started: Instant,
        collect_metrics: bool,
    ) -> Self {
        Self {
            backend,
            descriptor,
            actual,
            init_time: started.elapsed(),
            collect_metrics,
        }
    }

    pub fn is_system_interface(&self) -> bool {
        self.actual == BackendChoice::SystemInterface
    }

    pub fn is_object_capability(&self) -> bool {
        self.actual == BackendChoice::ObjectCapability
    }

    pub fn backend_choice(&self) -> BackendChoice {
        self.actual
    }

    pub fn runtime(&self) -> &'static str {
        self.backend.runtime()
    }

    pub fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    /// Heap access, allocation and string conversion.
    pub fn memory(&self) -> &MemoryBridge {
        self.backend.memory()
    }

    pub fn version(&self) -> AdapterResult<String> {
        self.backend.version()
    }

    pub fn create_file_handle(&self) -> AdapterResult<FileHandle> {
        Ok(FileHandle::new(self.backend.open_handle()?))
    }

    pub fn init_time(&self) -> Duration {
        self.init_time
    }

    /// `None` when metrics collection was turned off in the options.
    pub fn metrics(&self) -> Option<PerformanceMetrics> {
        if !self.collect_metrics {
            return None;
        }
        let footprint = self.memory().footprint();
        Some(PerformanceMetrics {
            init_time: self.init_time,
            backend: self.actual,
            runtime: self.backend.runtime(),
            environment: self.descriptor.environment,
            memory_bytes: footprint.memory_bytes,
            live_allocation_bytes: footprint.live_allocation_bytes,
        })
    }
}

impl std::fmt::Debug for UnifiedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnifiedModule")
            .field("backend", &self.actual)
            .field("runtime", &self.backend.runtime())
            .field("environment", &self.descriptor.environment)
            .field("init_time", &self.init_time)
            .finish()
    }
}
