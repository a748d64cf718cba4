//! Ordered fallback loading.
//!
//! Each backend has a fixed chain of strategies, tried one at a time; the
//! first success wins and later strategies never run.
//!
//! ```text
//! system-interface:  wasmtime-wasi -> wasmer-sandboxed -> [object-capability chain]
//! object-capability: primary-location -> secondary-location
//! ```

#[cfg(feature = "http")]
pub mod http;
pub mod source;

use std::sync::Arc;

use crate::backends::component::{ComponentBackend, ComponentExports};
use crate::backends::wasmtime_host::WasmtimeExports;
use crate::backends::{module_file, EngineBackend};
use crate::adapter::SystemInterfaceAdapter;
use crate::error::{Attempt, ModuleLoadError, StrategyError};
use crate::options::LoaderOptions;
use crate::runtime::CapabilityDescriptor;
use crate::selector::BackendChoice;

pub type StrategyResult = Result<Arc<dyn EngineBackend>, StrategyError>;

type RunFn = dyn Fn(&LoaderOptions) -> StrategyResult + Send + Sync;

/// A named way of producing a backend.
pub struct Strategy {
    name: &'static str,
    run: Box<RunFn>,
}

impl Strategy {
    pub fn new(
        name: &'static str,
        run: impl Fn(&LoaderOptions) -> StrategyResult + Send + Sync + 'static,
    ) -> Self {
        Self { name, run: Box::new(run) }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Why a chain gave up: the last strategy's error and every earlier one.
#[derive(Debug)]
pub struct ChainFailure {
    pub cause: StrategyError,
    pub attempts: Vec<Attempt>,
}

#[derive(Clone, Default)]
pub struct StrategyChain {
    strategies: Vec<Arc<Strategy>>,
}

impl StrategyChain {
    pub fn new(strategies: Vec<Strategy>) -> Self {
        Self { strategies: strategies.into_iter().map(Arc::new).collect() }
    }

    /// This chain followed by `next`.
    pub fn then(&self, next: &StrategyChain) -> Self {
        let mut strategies = self.strategies.clone();
        strategies.extend(next.strategies.iter().cloned());
        Self { strategies }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name).collect()
    }

    /// Run strategies in order until one succeeds.
    pub fn run(&self, options: &LoaderOptions) -> Result<Arc<dyn EngineBackend>, ChainFailure> {
        let mut attempts: Vec<Attempt> = Vec::new();
        for strategy in &self.strategies {
            match (strategy.run)(options) {
                Ok(backend) => {
                    log::debug!(
                        "tagbridge: strategy {} succeeded ({} on {})",
                        strategy.name,
                        backend.kind(),
                        backend.runtime()
                    );
                    return Ok(backend);
                }
                Err(error) => {
                    if options.debug {
                        log::debug!("tagbridge: strategy {} failed: {}", strategy.name, error);
                    }
                    attempts.push(Attempt { strategy: strategy.name, error });
                }
            }
        }
        match attempts.pop() {
            Some(last) => Err(ChainFailure { cause: last.error, attempts }),
            None => Err(ChainFailure { cause: StrategyError::Empty, attempts }),
        }
    }
}

pub struct ModuleLoader {
    system_interface: StrategyChain,
    object_capability: StrategyChain,
}

impl ModuleLoader {
    /// The standard chains for a host described by `descriptor`.
    pub fn new(descriptor: CapabilityDescriptor) -> Self {
        let system = StrategyChain::new(vec![
            Strategy::new("wasmtime-wasi", move |options| load_wasmtime_wasi(&descriptor, options)),
            Strategy::new("wasmer-sandboxed", load_wasmer_sandboxed),
        ]);
        let object = StrategyChain::new(vec![
            Strategy::new("primary-location", load_component_primary),
            Strategy::new("secondary-location", load_component_secondary),
        ]);

        Self::with_chains(system, object)
    }

    /// Custom chains. The system-interface chain always falls back to the
    /// object-capability one.
    pub fn with_chains(system_interface: StrategyChain, object_capability: StrategyChain) -> Self {
        Self { system_interface, object_capability }
    }

    pub fn chain(&self, choice: BackendChoice) -> StrategyChain {
        match choice {
            BackendChoice::SystemInterface => self.system_interface.then(&self.object_capability),
            BackendChoice::ObjectCapability => self.object_capability.clone(),
        }
    }

    /// Load `choice`, falling back as the chains allow. The returned
    /// backend choice is what actually loaded, which may differ from `choice`.
    pub fn load(
        &self,
        choice: BackendChoice,
        options: &LoaderOptions,
    ) -> Result<(Arc<dyn EngineBackend>, BackendChoice), ModuleLoadError> {
        match self.chain(choice).run(options) {
            Ok(backend) => {
                let actual = backend.kind();
                if actual != choice {
                    log::debug!("tagbridge: requested {} but loaded {}", choice, actual);
                }
                Ok((backend, actual))
            }
            Err(failure) => Err(ModuleLoadError {
                backend: choice,
                cause: failure.cause,
                attempts: failure.attempts,
            }),
        }
    }
}

fn load_wasmtime_wasi(descriptor: &CapabilityDescriptor, options: &LoaderOptions) -> StrategyResult {
    if !descriptor.supports_filesystem {
        return Err(StrategyError::Unavailable("wasmtime-wasi host needs filesystem access".into()));
    }
    let dirs = source::dir_list(options.primary_dir(), options.secondary_dir());
    let module = source::resolve(options, &dirs, BackendChoice::SystemInterface)?;
    let cwd = std::env::current_dir().ok();
    let exports = WasmtimeExports::instantiate(&module.bytes, cwd.as_deref())?;
    log::debug!("tagbridge: system-interface module from {}", module.origin);
    Ok(Arc::new(SystemInterfaceAdapter::new(Arc::new(exports), "wasmtime")))
}

#[cfg(feature = "wasmer")]
fn load_wasmer_sandboxed(options: &LoaderOptions) -> StrategyResult {
    use crate::backends::wasmer_host::WasmerExports;

    let dirs = source::dir_list(options.primary_dir(), options.secondary_dir());
    let module = source::resolve(options, &dirs, BackendChoice::SystemInterface)?;
    let exports = WasmerExports::instantiate(&module.bytes)?;
    log::debug!("tagbridge: sandboxed system-interface module from {}", module.origin);
    Ok(Arc::new(SystemInterfaceAdapter::new(Arc::new(exports), "wasmer")))
}

#[cfg(not(feature = "wasmer"))]
fn load_wasmer_sandboxed(_options: &LoaderOptions) -> StrategyResult {
    Err(StrategyError::Unavailable("sandboxed runtime not compiled in (enable the `wasmer` feature)".into()))
}

fn load_component_primary(options: &LoaderOptions) -> StrategyResult {
    let module = source::resolve(options, &[options.primary_dir()], BackendChoice::ObjectCapability)?;
    instantiate_component(&module)
}

fn load_component_secondary(options: &LoaderOptions) -> StrategyResult {
    let dir = options
        .secondary_dir()
        .ok_or_else(|| StrategyError::Unavailable("no secondary module location".into()))?;
    let module = source::from_dirs(&[dir], module_file(BackendChoice::ObjectCapability))?;
    instantiate_component(&module)
}

fn instantiate_component(module: &source::ModuleBytes) -> StrategyResult {
    let exports = ComponentExports::instantiate(&module.bytes)?;
    log::debug!("tagbridge: object-capability component from {}", module.origin);
    Ok(Arc::new(ComponentBackend::new(exports)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::testing::FakeEngine;
    use crate::error::AdapterResult;
    use crate::adapter::MemoryBridge;
    use crate::backends::OBJECT_CAPABILITY_MODULE;
    use crate::handle::HandleDriver;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Fake backend that claims to be an object-capability engine.
    struct FakeObjectBackend {
        inner: SystemInterfaceAdapter,
    }

    impl EngineBackend for FakeObjectBackend {
        fn kind(&self) -> BackendChoice {
            BackendChoice::ObjectCapability
        }
        fn runtime(&self) -> &'static str {
            "fake"
        }
        fn memory(&self) -> &MemoryBridge {
            self.inner.memory()
        }
        fn version(&self) -> AdapterResult<String> {
            self.inner.version()
        }
        fn open_handle(&self) -> AdapterResult<Box<dyn HandleDriver>> {
            self.inner.open_handle()
        }
    }

    fn fake_system() -> StrategyResult {
        Ok(Arc::new(SystemInterfaceAdapter::new(Arc::new(FakeEngine::new()), "fake")))
    }

    fn fake_object() -> StrategyResult {
        Ok(Arc::new(FakeObjectBackend {
            inner: SystemInterfaceAdapter::new(Arc::new(FakeEngine::new()), "fake"),
        }))
    }

    fn failing(name: &'static str) -> Strategy {
        Strategy::new(name, move |_| Err(StrategyError::Unavailable(format!("{name} disabled"))))
    }

    fn empty_dirs(a: &TempDir, b: &TempDir) -> LoaderOptions {
        LoaderOptions {
            module_dir: Some(a.path().to_path_buf()),
            fallback_dir: Some(b.path().to_path_buf()),
            ..LoaderOptions::default()
        }
    }

    #[test]
    fn default_chain_order() {
        let descriptor = crate::runtime::detect();
        let loader = ModuleLoader::new(descriptor);
        assert_eq!(
            loader.chain(BackendChoice::SystemInterface).names(),
            vec!["wasmtime-wasi", "wasmer-sandboxed", "primary-location", "secondary-location"]
        );
        assert_eq!(
            loader.chain(BackendChoice::ObjectCapability).names(),
            vec!["primary-location", "secondary-location"]
        );
    }

    #[test]
    fn first_success_short_circuits() {
        let later = Arc::new(AtomicUsize::new(0));
        let counter = later.clone();
        let chain = StrategyChain::new(vec![
            failing("a"),
            Strategy::new("b", |_| fake_system()),
            Strategy::new("c", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                fake_system()
            }),
        ]);
        let options = LoaderOptions { debug: true, ..LoaderOptions::default() };
        assert!(chain.run(&options).is_ok());
        assert_eq!(later.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn exhausted_system_interface_falls_back_to_object_capability() {
        let loader = ModuleLoader::with_chains(
            StrategyChain::new(vec![failing("wasmtime-wasi"), failing("wasmer-sandboxed")]),
            StrategyChain::new(vec![Strategy::new("primary-location", |_| fake_object())]),
        );
        let (backend, actual) = loader.load(BackendChoice::SystemInterface, &LoaderOptions::default()).unwrap();
        assert_eq!(actual, BackendChoice::ObjectCapability);
        assert_eq!(backend.kind(), BackendChoice::ObjectCapability);
    }

    #[test]
    fn exhaustion_reports_requested_backend_and_attempts() {
        let loader = ModuleLoader::with_chains(
            StrategyChain::new(vec![failing("wasmtime-wasi"), failing("wasmer-sandboxed")]),
            StrategyChain::new(vec![failing("primary-location"), failing("secondary-location")]),
        );
        let err = loader
            .load(BackendChoice::SystemInterface, &LoaderOptions::default())
            .err()
            .unwrap();
        assert_eq!(err.backend, BackendChoice::SystemInterface);
        let names: Vec<_> = err.attempts.iter().map(|a| a.strategy).collect();
        assert_eq!(names, vec!["wasmtime-wasi", "wasmer-sandboxed", "primary-location"]);
        assert!(err.cause.to_string().contains("secondary-location"));
    }

    #[test]
    fn empty_chain_is_an_error() {
        let failure = StrategyChain::default().run(&LoaderOptions::default()).err().unwrap();
        assert!(matches!(failure.cause, StrategyError::Empty));
    }

    #[test]
    fn missing_component_reports_object_capability() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        let loader = ModuleLoader::new(crate::runtime::detect());
        let err = loader
            .load(BackendChoice::ObjectCapability, &empty_dirs(&a, &b))
            .err()
            .unwrap();
        assert_eq!(err.backend, BackendChoice::ObjectCapability);
        match err.cause {
            StrategyError::NotFound { searched } => {
                assert_eq!(searched, vec![b.path().join(OBJECT_CAPABILITY_MODULE)]);
            }
            other => panic!("unexpected cause: {other}"),
        }
    }

    #[test]
    fn core_module_override_does_not_shadow_component_dirs() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        let options = empty_dirs(&a, &b).with_binary(b"\0asm\x01\0\0\0".to_vec());
        let loader = ModuleLoader::new(crate::runtime::detect());
        let err = loader
            .load(BackendChoice::ObjectCapability, &options)
            .err()
            .unwrap();

        assert_eq!(err.attempts.len(), 1);
        assert_eq!(err.attempts[0].strategy, "primary-location");
        match &err.attempts[0].error {
            StrategyError::NotFound { searched } => {
                assert_eq!(searched, &vec![a.path().join(OBJECT_CAPABILITY_MODULE)]);
            }
            other => panic!("unexpected primary failure: {other}"),
        }
    }

    #[test]
    fn wasmtime_strategy_loads_system_interface_module() {
        let dist = TempDir::new().unwrap();
        let options = LoaderOptions {
            module_dir: Some(dist.path().to_path_buf()),
            fallback_dir: Some(PathBuf::from("/nonexistent/tagbridge")),
            ..LoaderOptions::default()
        }
        .with_binary(crate::backends::wasmtime_host::tests::MINIMAL_ENGINE.as_bytes().to_vec());

        let descriptor = crate::runtime::detect_with(&crate::runtime::HostProbe {
            target_family_wasm: false,
            target_os_wasi: false,
            target_os_unknown: false,
            sandbox_requested: false,
            filesystem_disabled: false,
        });
        let loader = ModuleLoader::new(descriptor);
        let (backend, actual) = loader.load(BackendChoice::SystemInterface, &options).unwrap();
        assert_eq!(actual, BackendChoice::SystemInterface);
        assert_eq!(backend.runtime(), "wasmtime");
        assert_eq!(backend.version().unwrap(), "wat-engine 0.1");
    }

    #[test]
    fn wasmtime_strategy_requires_filesystem() {
        let descriptor = crate::runtime::detect_with(&crate::runtime::HostProbe {
            target_family_wasm: false,
            target_os_wasi: false,
            target_os_unknown: false,
            sandbox_requested: true,
            filesystem_disabled: false,
        });
        let options = LoaderOptions::default()
            .with_binary(crate::backends::wasmtime_host::tests::MINIMAL_ENGINE.as_bytes().to_vec());
        assert!(matches!(
            load_wasmtime_wasi(&descriptor, &options),
            Err(StrategyError::Unavailable(_))
        ));
    }
}
