//! Object-capability backend: the engine as a WebAssembly component.
//!
//! The component already exposes a stateful `audio-file` resource, so each
//! handle driver is a thin forwarding layer. The `heap` interface backs the
//! memory bridge for callers that marshal their own buffers.

use std::sync::Arc;

use parking_lot::Mutex;
use wasmtime::component::{Component, Linker, ResourceAny, ResourceTable};
use wasmtime::{Engine, Store};
use wasmtime_wasi::{WasiCtx, WasiCtxBuilder, WasiView};

use crate::adapter::{keys, LinearMemory, MemoryBridge};
use crate::backends::EngineBackend;
use crate::error::{AdapterError, AdapterResult, StrategyError};
use crate::handle::HandleDriver;
use crate::models::{AudioProperties, FormatLabel, Picture, Rating, TagData};
use crate::selector::BackendChoice;

wasmtime::component::bindgen!({
    path: "wit",
    world: "tag-engine",
});

use exports::tagbridge::engine::files;

struct ComponentHost {
    ctx: WasiCtx,
    table: ResourceTable,
}

impl WasiView for ComponentHost {
    fn table(&mut self) -> &mut ResourceTable {
        &mut self.table
    }

    fn ctx(&mut self) -> &mut WasiCtx {
        &mut self.ctx
    }
}

struct Inner {
    store: Store<ComponentHost>,
    bindings: TagEngine,
}

/// One instantiated component. All calls serialize on the store.
pub struct ComponentExports {
    inner: Mutex<Inner>,
}

impl ComponentExports {
    pub fn instantiate(bytes: &[u8]) -> Result<Self, StrategyError> {
        let engine = Engine::default();
        let component =
            Component::new(&engine, bytes).map_err(|e| StrategyError::runtime("compile", e))?;

        let mut linker: Linker<ComponentHost> = Linker::new(&engine);
        wasmtime_wasi::add_to_linker_sync(&mut linker).map_err(|e| StrategyError::runtime("link", e))?;

        // No preopens: the component gets buffers, never ambient paths.
        let host = ComponentHost {
            ctx: WasiCtxBuilder::new().inherit_stdio().build(),
            table: ResourceTable::new(),
        };
        let mut store = Store::new(&engine, host);
        let bindings = TagEngine::instantiate(&mut store, &component, &linker)
            .map_err(|e| StrategyError::runtime("instantiate", e))?;

        Ok(Self { inner: Mutex::new(Inner { store, bindings }) })
    }

    fn call<R>(&self, f: impl FnOnce(&mut Store<ComponentHost>, &TagEngine) -> wasmtime::Result<R>) -> AdapterResult<R> {
        let mut guard = self.inner.lock();
        let Inner { store, bindings } = &mut *guard;
        f(store, bindings).map_err(AdapterError::trap)
    }
}

impl LinearMemory for ComponentExports {
    fn malloc(&self, size: u32) -> AdapterResult<u32> {
        self.call(|store, b| b.tagbridge_engine_heap().call_alloc(store, size))
    }

    fn free(&self, ptr: u32) -> AdapterResult<()> {
        self.call(|store, b| b.tagbridge_engine_heap().call_free(store, ptr))
    }

    fn byte_len(&self) -> AdapterResult<u64> {
        self.call(|store, b| b.tagbridge_engine_heap().call_size(store))
    }

    fn read(&self, offset: u32, buf: &mut [u8]) -> AdapterResult<()> {
        let len = u32::try_from(buf.len()).map_err(|_| AdapterError::OutOfBounds {
            offset: offset as u64,
            len: buf.len() as u64,
            capacity: u32::MAX as u64,
        })?;
        let bytes = self.call(|store, b| b.tagbridge_engine_heap().call_read(store, offset, len))?;
        if bytes.len() != buf.len() {
            return Err(AdapterError::OutOfBounds {
                offset: offset as u64,
                len: buf.len() as u64,
                capacity: offset as u64 + bytes.len() as u64,
            });
        }
        buf.copy_from_slice(&bytes);
        Ok(())
    }

    fn write(&self, offset: u32, bytes: &[u8]) -> AdapterResult<()> {
        self.call(|store, b| b.tagbridge_engine_heap().call_write(store, offset, bytes))
    }
}

pub struct ComponentBackend {
    exports: Arc<ComponentExports>,
    memory: MemoryBridge,
}

impl ComponentBackend {
    pub fn new(exports: ComponentExports) -> Self {
        let exports = Arc::new(exports);
        let memory = MemoryBridge::new(exports.clone());
        Self { exports, memory }
    }
}

impl EngineBackend for ComponentBackend {
    fn kind(&self) -> BackendChoice {
        BackendChoice::ObjectCapability
    }

    fn runtime(&self) -> &'static str {
        "wasmtime-component"
    }

    fn memory(&self) -> &MemoryBridge {
        &self.memory
    }

    fn version(&self) -> AdapterResult<String> {
        self.exports.call(|store, b| b.tagbridge_engine_files().call_version(store))
    }

    fn open_handle(&self) -> AdapterResult<Box<dyn HandleDriver>> {
        let file = self
            .exports
            .call(|store, b| b.tagbridge_engine_files().audio_file().call_constructor(store))?;
        Ok(Box::new(ComponentHandleDriver { exports: self.exports.clone(), file: Some(file) }))
    }
}

struct ComponentHandleDriver {
    exports: Arc<ComponentExports>,
    file: Option<ResourceAny>,
}

impl ComponentHandleDriver {
    fn file(&self) -> AdapterResult<ResourceAny> {
        self.file.ok_or(AdapterError::HandleDestroyed)
    }
}

impl HandleDriver for ComponentHandleDriver {
    fn attach(&mut self, buffer: &Arc<[u8]>) -> AdapterResult<bool> {
        let file = self.file()?;
        self.exports
            .call(|store, b| b.tagbridge_engine_files().audio_file().call_load_from_buffer(store, file, buffer))
    }

    fn read_tags(&mut self, _buffer: &[u8]) -> AdapterResult<TagData> {
        let file = self.file()?;
        let (properties, pictures, ratings, audio) = self.exports.call(|store, b| {
            let api = b.tagbridge_engine_files().audio_file();
            let properties = api.call_properties(&mut *store, file)?;
            let pictures = api.call_pictures(&mut *store, file)?;
            let ratings = api.call_ratings(&mut *store, file)?;
            let audio = api.call_audio_properties(&mut *store, file)?;
            Ok((properties, pictures, ratings, audio))
        })?;

        let mut data = properties_to_data(properties);
        data.pictures = pictures.into_iter().map(picture_from_wit).collect();
        data.ratings = ratings.into_iter().map(rating_from_wit).collect();
        data.audio = audio.map(audio_from_wit);
        Ok(data)
    }

    fn write_tags(&mut self, _buffer: &[u8], tags: &TagData) -> AdapterResult<Vec<u8>> {
        let file = self.file()?;
        let properties = data_to_properties(tags);
        let pictures: Vec<files::Picture> = tags.pictures.iter().map(picture_to_wit).collect();
        let ratings: Vec<files::Rating> = tags.ratings.iter().map(rating_to_wit).collect();

        let (saved, buffer) = self.exports.call(|store, b| {
            let api = b.tagbridge_engine_files().audio_file();
            api.call_set_properties(&mut *store, file, &properties)?;
            api.call_set_pictures(&mut *store, file, &pictures)?;
            api.call_set_ratings(&mut *store, file, &ratings)?;
            let saved = api.call_save(&mut *store, file)?;
            let buffer = if saved { api.call_buffer(&mut *store, file)? } else { Vec::new() };
            Ok((saved, buffer))
        })?;

        if !saved {
            return Err(AdapterError::Engine { op: "tag writing", message: "engine refused to save".into() });
        }
        Ok(buffer)
    }

    fn format(&mut self, _buffer: &[u8]) -> AdapterResult<FormatLabel> {
        let file = self.file()?;
        let name = self
            .exports
            .call(|store, b| b.tagbridge_engine_files().audio_file().call_format(store, file))?;
        Ok(FormatLabel::from_name(&name))
    }

    fn is_mp4(&mut self, _buffer: &[u8]) -> AdapterResult<bool> {
        let file = self.file()?;
        self.exports
            .call(|store, b| b.tagbridge_engine_files().audio_file().call_is_mp4(store, file))
    }

    fn mp4_item(&mut self, key: &str) -> AdapterResult<Option<String>> {
        let file = self.file()?;
        self.exports
            .call(|store, b| b.tagbridge_engine_files().audio_file().call_mp4_item(store, file, key))
    }

    fn set_mp4_item(&mut self, key: &str, value: &str) -> AdapterResult<()> {
        let file = self.file()?;
        self.exports.call(|store, b| {
            b.tagbridge_engine_files().audio_file().call_set_mp4_item(store, file, key, value)
        })
    }

    fn remove_mp4_item(&mut self, key: &str) -> AdapterResult<()> {
        let file = self.file()?;
        self.exports
            .call(|store, b| b.tagbridge_engine_files().audio_file().call_remove_mp4_item(store, file, key))
    }

    fn release(&mut self) -> AdapterResult<()> {
        match self.file.take() {
            Some(file) => self.exports.call(|store, _| file.resource_drop(store)),
            None => Ok(()),
        }
    }
}

/// Engine property list → canonical document. Reserved keys are dropped.
fn properties_to_data(properties: Vec<(String, Vec<String>)>) -> TagData {
    let mut data = TagData::default();
    for (key, values) in properties {
        if keys::is_reserved(&key) {
            continue;
        }
        let key = keys::canonicalize(&key);
        let values: Vec<_> = values
            .iter()
            .filter(|v| !v.is_empty())
            .map(|v| keys::value_for(&key, v))
            .collect();
        if !values.is_empty() {
            data.properties.entry(key).or_default().extend(values);
        }
    }
    data
}

fn data_to_properties(data: &TagData) -> Vec<(String, Vec<String>)> {
    data.text_properties()
        .into_iter()
        .filter(|(key, _)| !keys::is_reserved(key))
        .collect()
}

fn picture_from_wit(p: files::Picture) -> Picture {
    Picture {
        mime_type: p.mime_type,
        data: p.data,
        picture_type: p.picture_type,
        description: p.description,
    }
}

fn picture_to_wit(p: &Picture) -> files::Picture {
    files::Picture {
        mime_type: p.mime_type.clone(),
        data: p.data.clone(),
        picture_type: p.picture_type,
        description: p.description.clone(),
    }
}

fn rating_from_wit(r: files::Rating) -> Rating {
    Rating { value: r.value, email: r.email.filter(|e| !e.is_empty()), counter: r.counter }
}

fn rating_to_wit(r: &Rating) -> files::Rating {
    files::Rating { value: r.value, email: r.email.clone(), counter: r.counter }
}

fn audio_from_wit(a: files::AudioProperties) -> AudioProperties {
    AudioProperties {
        length: a.length,
        length_ms: a.length_ms,
        bitrate: a.bitrate,
        sample_rate: a.sample_rate,
        channels: a.channels,
        bits_per_sample: a.bits_per_sample,
        // The component interface carries no frame count.
        sample_frames: None,
        codec: a.codec,
        container_format: a.container_format,
        is_lossless: a.is_lossless,
    }
}
