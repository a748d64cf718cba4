//! In-process wasmtime host for the system-interface module.
//!
//! WASI preview 1 with inherited stdio and, when the host has a usable
//! filesystem, the working directory preopened as `.`.

use std::path::Path;

use parking_lot::Mutex;
use wasmtime::{Engine, Instance, Linker, Memory, Module, Store, TypedFunc};
use wasmtime_wasi::preview1::{self, WasiP1Ctx};
use wasmtime_wasi::{DirPerms, FilePerms, WasiCtxBuilder};

use crate::adapter::{LinearMemory, RawExports, WriteCall};
use crate::error::{AdapterError, AdapterResult, StrategyError};

type WriteTagsFn = TypedFunc<(u32, u32, u32, u32, u32, u32, u32), i32>;

pub struct WasmtimeExports {
    inner: Mutex<Inner>,
}

struct Inner {
    store: Store<WasiP1Ctx>,
    memory: Memory,
    malloc: TypedFunc<u32, u32>,
    free: TypedFunc<u32, ()>,
    read_tags: TypedFunc<(u32, u32, u32, u32), u32>,
    write_tags: Option<WriteTagsFn>,
    version: Option<TypedFunc<(), u32>>,
    last_error: Option<TypedFunc<(), u32>>,
}

impl WasmtimeExports {
    /// Compile, link WASI and instantiate. Runs `_initialize` when exported.
    pub fn instantiate(bytes: &[u8], preopen: Option<&Path>) -> Result<Self, StrategyError> {
        let engine = Engine::default();
        let module = Module::new(&engine, bytes).map_err(|e| StrategyError::runtime("compile", e))?;

        let mut linker: Linker<WasiP1Ctx> = Linker::new(&engine);
        preview1::add_to_linker_sync(&mut linker, |ctx| ctx)
            .map_err(|e| StrategyError::runtime("link", e))?;

        let mut builder = WasiCtxBuilder::new();
        builder.inherit_stdio();
        if let Some(dir) = preopen {
            builder
                .preopened_dir(dir, ".", DirPerms::all(), FilePerms::all())
                .map_err(|e| StrategyError::runtime("preopen", e))?;
        }
        let mut store = Store::new(&engine, builder.build_p1());

        let instance = linker
            .instantiate(&mut store, &module)
            .map_err(|e| StrategyError::runtime("instantiate", e))?;

        if let Ok(init) = instance.get_typed_func::<(), ()>(&mut store, "_initialize") {
            init.call(&mut store, ()).map_err(|e| StrategyError::runtime("_initialize", e))?;
        }

        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or(StrategyError::MissingExport("memory"))?;
        let malloc = required(&instance, &mut store, "malloc")?;
        let free = required(&instance, &mut store, "free")?;
        let read_tags = required(&instance, &mut store, "tl_read_tags")?;
        let write_tags = instance.get_typed_func(&mut store, "tl_write_tags").ok();
        let version = instance.get_typed_func(&mut store, "tl_version").ok();
        let last_error = instance.get_typed_func(&mut store, "tl_get_last_error").ok();

        log::debug!("tagbridge: wasmtime instance ready ({} bytes of linear memory)", memory.data_size(&store));

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

fn required<P, R>(
    instance: &Instance,
    store: &mut Store<WasiP1Ctx>,
    name: &'static str,
) -> Result<TypedFunc<P, R>, StrategyError>
where
    P: wasmtime::WasmParams,
    R: wasmtime::WasmResults,
{
    instance
        .get_typed_func::<P, R>(store, name)
        .map_err(|_| StrategyError::MissingExport(name))
}

impl LinearMemory for WasmtimeExports {
    fn malloc(&self, size: u32) -> AdapterResult<u32> {
        let mut inner = self.inner.lock();
        let f = inner.malloc.clone();
        f.call(&mut inner.store, size).map_err(AdapterError::trap)
    }

    fn free(&self, ptr: u32) -> AdapterResult<()> {
        let mut inner = self.inner.lock();
        let f = inner.free.clone();
        f.call(&mut inner.store, ptr).map_err(AdapterError::trap)
    }

    fn byte_len(&self) -> AdapterResult<u64> {
        let inner = self.inner.lock();
        Ok(inner.memory.data_size(&inner.store) as u64)
    }

    fn read(&self, offset: u32, buf: &mut [u8]) -> AdapterResult<()> {
        let inner = self.inner.lock();
        let capacity = inner.memory.data_size(&inner.store) as u64;
        inner
            .memory
            .read(&inner.store, offset as usize, buf)
            .map_err(|_| AdapterError::OutOfBounds { offset: offset as u64, len: buf.len() as u64, capacity })
    }

    fn write(&self, offset: u32, bytes: &[u8]) -> AdapterResult<()> {
        let mut inner = self.inner.lock();
        let memory = inner.memory;
        let capacity = memory.data_size(&inner.store) as u64;
        memory
            .write(&mut inner.store, offset as usize, bytes)
            .map_err(|_| AdapterError::OutOfBounds { offset: offset as u64, len: bytes.len() as u64, capacity })
    }
}

impl RawExports for WasmtimeExports {
    fn read_tags(&self, path_ptr: u32, buf_ptr: u32, len: u32, out_size_ptr: u32) -> AdapterResult<u32> {
        let mut inner = self.inner.lock();
        let f = inner.read_tags.clone();
        f.call(&mut inner.store, (path_ptr, buf_ptr, len, out_size_ptr))
            .map_err(AdapterError::trap)
    }

    fn write_tags(&self, call: WriteCall) -> AdapterResult<i32> {
        let mut inner = self.inner.lock();
        let f = inner.write_tags.clone().ok_or(AdapterError::Unsupported("tag writing"))?;
        f.call(
            &mut inner.store,
            (
                call.path_ptr,
                call.buf_ptr,
                call.buf_len,
                call.tags_ptr,
                call.tags_len,
                call.out_buf_ptr,
                call.out_size_ptr,
            ),
        )
        .map_err(AdapterError::trap)
    }

    fn version(&self) -> AdapterResult<u32> {
        let mut inner = self.inner.lock();
        let f = inner.version.clone().ok_or(AdapterError::Unsupported("version query"))?;
        f.call(&mut inner.store, ()).map_err(AdapterError::trap)
    }

    fn last_error(&self) -> AdapterResult<u32> {
        let mut inner = self.inner.lock();
        let f = inner.last_error.clone().ok_or(AdapterError::Unsupported("error reporting"))?;
        f.call(&mut inner.store, ()).map_err(AdapterError::trap)
    }
}
