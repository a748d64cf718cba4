//! Portable sandboxed host for the system-interface module on wasmer.
//!
//! No WASI implementation is linked. Every function import is satisfied by
//! a stub that returns `ENOSYS`, so the engine can run its buffer paths but
//! any attempt to touch the host fails inside the guest.

use parking_lot::Mutex;
use wasmer::{ExternType, Function, Imports, Instance, Memory, Module, Store, Type, TypedFunction, Value};

use crate::adapter::{LinearMemory, RawExports, WriteCall};
use crate::error::{AdapterError, AdapterResult, StrategyError};

/// WASI errno for "function not implemented".
const ENOSYS: i32 = 52;

type WriteTagsFn = TypedFunction<(i32, i32, i32, i32, i32, i32, i32), i32>;

pub struct WasmerExports {
    inner: Mutex<Inner>,
}

struct Inner {
    store: Store,
    memory: Memory,
    malloc: TypedFunction<i32, i32>,
    free: TypedFunction<i32, ()>,
    read_tags: TypedFunction<(i32, i32, i32, i32), i32>,
    write_tags: Option<WriteTagsFn>,
    version: Option<TypedFunction<(), i32>>,
    last_error: Option<TypedFunction<(), i32>>,
}

impl WasmerExports {
    pub fn instantiate(bytes: &[u8]) -> Result<Self, StrategyError> {
        let mut store = Store::default();
        let module = Module::new(&store, bytes).map_err(|e| StrategyError::runtime("compile", e))?;

        let mut imports = Imports::new();
        let mut stubbed = 0usize;
        for import in module.imports() {
            let ty = match import.ty() {
                ExternType::Function(ty) => ty.clone(),
                other => {
                    return Err(StrategyError::Unavailable(format!(
                        "cannot satisfy non-function import {}::{} ({:?})",
                        import.module(),
                        import.name(),
                        other
                    )))
                }
            };
            let results = stub_results(ty.results()).ok_or_else(|| {
                StrategyError::Unavailable(format!(
                    "unsupported result types for import {}::{}",
                    import.module(),
                    import.name()
                ))
            })?;
            let stub = Function::new(&mut store, ty, move |_args| Ok(results.clone()));
            imports.define(import.module(), import.name(), stub);
            stubbed += 1;
        }

        let instance = Instance::new(&mut store, &module, &imports)
            .map_err(|e| StrategyError::runtime("instantiate", e))?;
        log::debug!("tagbridge: wasmer instance ready ({} imports stubbed)", stubbed);

        if let Ok(init) = instance.exports.get_typed_function::<(), ()>(&store, "_initialize") {
            init.call(&mut store).map_err(|e| StrategyError::runtime("_initialize", e))?;
        }

        let memory = instance
            .exports
            .get_memory("memory")
            .map_err(|_| StrategyError::MissingExport("memory"))?
            .clone();
        let exports = &instance.exports;
        let malloc = exports
            .get_typed_function(&store, "malloc")
            .map_err(|_| StrategyError::MissingExport("malloc"))?;
        let free = exports
            .get_typed_function(&store, "free")
            .map_err(|_| StrategyError::MissingExport("free"))?;
        let read_tags = exports
            .get_typed_function(&store, "tl_read_tags")
            .map_err(|_| StrategyError::MissingExport("tl_read_tags"))?;
        let write_tags = exports.get_typed_function(&store, "tl_write_tags").ok();
        let version = exports.get_typed_function(&store, "tl_version").ok();
        let last_error = exports.get_typed_function(&store, "tl_get_last_error").ok();

        Ok(Self {
            inner: Mutex::new(Inner {
                store,
                memory,
                malloc,
                free,
                read_tags,
                write_tags,
                version,
                last_error,
            }),
        })
    }
}

fn stub_results(types: &[Type]) -> Option<Vec<Value>> {
    types
        .iter()
        .map(|t| match t {
            Type::I32 => Some(Value::I32(ENOSYS)),
            Type::I64 => Some(Value::I64(ENOSYS as i64)),
            Type::F32 => Some(Value::F32(0.0)),
            Type::F64 => Some(Value::F64(0.0)),
            _ => None,
        })
        .collect()
}

impl LinearMemory for WasmerExports {
    fn malloc(&self, size: u32) -> AdapterResult<u32> {
        let mut inner = self.inner.lock();
        let f = inner.malloc.clone();
        f.call(&mut inner.store, size as i32)
            .map(|p| p as u32)
            .map_err(AdapterError::trap)
    }

    fn free(&self, ptr: u32) -> AdapterResult<()> {
        let mut inner = self.inner.lock();
        let f = inner.free.clone();
        f.call(&mut inner.store, ptr as i32).map_err(AdapterError::trap)
    }

    fn byte_len(&self) -> AdapterResult<u64> {
        let inner = self.inner.lock();
        Ok(inner.memory.view(&inner.store).data_size())
    }

    fn read(&self, offset: u32, buf: &mut [u8]) -> AdapterResult<()> {
        let inner = self.inner.lock();
        let view = inner.memory.view(&inner.store);
        let capacity = view.data_size();
        view.read(offset as u64, buf)
            .map_err(|_| AdapterError::OutOfBounds { offset: offset as u64, len: buf.len() as u64, capacity })
    }

    fn write(&self, offset: u32, bytes: &[u8]) -> AdapterResult<()> {
        let inner = self.inner.lock();
        let view = inner.memory.view(&inner.store);
        let capacity = view.data_size();
        view.write(offset as u64, bytes)
            .map_err(|_| AdapterError::OutOfBounds { offset: offset as u64, len: bytes.len() as u64, capacity })
    }
}

impl RawExports for WasmerExports {
    fn read_tags(&self, path_ptr: u32, buf_ptr: u32, len: u32, out_size_ptr: u32) -> AdapterResult<u32> {
        let mut inner = self.inner.lock();
        let f = inner.read_tags.clone();
        f.call(
            &mut inner.store,
            path_ptr as i32,
            buf_ptr as i32,
            len as i32,
            out_size_ptr as i32,
        )
        .map(|p| p as u32)
        .map_err(AdapterError::trap)
    }

    fn write_tags(&self, call: WriteCall) -> AdapterResult<i32> {
        let mut inner = self.inner.lock();
        let f = inner.write_tags.clone().ok_or(AdapterError::Unsupported("tag writing"))?;
        f.call(
            &mut inner.store,
            call.path_ptr as i32,
            call.buf_ptr as i32,
            call.buf_len as i32,
            call.tags_ptr as i32,
            call.tags_len as i32,
            call.out_buf_ptr as i32,
            call.out_size_ptr as i32,
        )
        .map_err(AdapterError::trap)
    }

    fn version(&self) -> AdapterResult<u32> {
        let mut inner = self.inner.lock();
        let f = inner.version.clone().ok_or(AdapterError::Unsupported("version query"))?;
        f.call(&mut inner.store).map(|p| p as u32).map_err(AdapterError::trap)
    }

    fn last_error(&self) -> AdapterResult<u32> {
        let mut inner = self.inner.lock();
        let f = inner.last_error.clone().ok_or(AdapterError::Unsupported("error reporting"))?;
        f.call(&mut inner.store).map(|p| p as u32).map_err(AdapterError::trap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::adapter::SystemInterfaceAdapter;
    use crate::backends::wasmtime_host::tests::MINIMAL_ENGINE;
    use crate::backends::EngineBackend;

    #[test]
    fn stubs_every_import() {
        let wat = r#"
            (module
              (import "wasi_snapshot_preview1" "fd_write" (func $fd_write (param i32 i32 i32 i32) (result i32)))
              (memory (export "memory") 1)
              (func (export "malloc") (param i32) (result i32) i32.const 1024)
              (func (export "free") (param i32))
              (func (export "tl_read_tags") (param i32 i32 i32 i32) (result i32)
                (call $fd_write (i32.const 0) (i32.const 0) (i32.const 0) (i32.const 0))))
        "#;
        let exports = WasmerExports::instantiate(wat.as_bytes()).unwrap();
        assert_eq!(exports.read_tags(0, 0, 0, 0).unwrap(), ENOSYS as u32);
    }

    #[test]
    fn runs_minimal_engine() {
        let exports = WasmerExports::instantiate(MINIMAL_ENGINE.as_bytes()).unwrap();
        let adapter = SystemInterfaceAdapter::new(Arc::new(exports), "wasmer");
        assert_eq!(adapter.version().unwrap(), "wat-engine 0.1");
    }
}
