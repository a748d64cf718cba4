//! Compatibility adapter for the system-interface engine.
//!
//! The raw engine speaks pointers and byte counts. The adapter marshals
//! buffers through the [`MemoryBridge`], carries tag documents through the
//! [`codec`], and exposes the result as an [`EngineBackend`] whose handles
//! behave like the object-capability ones.

pub mod codec;
pub mod keys;
pub mod memory;
pub mod sniff;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use crate::backends::EngineBackend;
use crate::error::{AdapterError, AdapterResult};
use crate::handle::HandleDriver;
use crate::models::{FormatLabel, TagData};
use crate::selector::BackendChoice;

pub use memory::{Allocation, HeapView, LinearMemory, MemoryBridge, MemoryFootprint};

/// Pointer arguments of `tl_write_tags`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteCall {
    pub path_ptr: u32,
    pub buf_ptr: u32,
    pub buf_len: u32,
    pub tags_ptr: u32,
    pub tags_len: u32,
    /// Receives the engine-allocated output buffer pointer.
    pub out_buf_ptr: u32,
    /// Receives the output buffer length.
    pub out_size_ptr: u32,
}

/// The system-interface engine's exports, as seen by the adapter.
///
/// `memory`, `malloc`, `free` and `tl_read_tags` are mandatory. The rest may
/// be missing from a given build; the defaults report that by name.
pub trait RawExports: LinearMemory {
    /// `tl_read_tags`: pointer to an engine-allocated document, 0 on failure.
    /// The document length is stored at `out_size_ptr`.
    fn read_tags(&self, path_ptr: u32, buf_ptr: u32, len: u32, out_size_ptr: u32) -> AdapterResult<u32>;

    /// `tl_write_tags`: 0 on success.
    fn write_tags(&self, _call: WriteCall) -> AdapterResult<i32> {
        Err(AdapterError::Unsupported("tag writing"))
    }

    /// `tl_version`: pointer to a C string.
    fn version(&self) -> AdapterResult<u32> {
        Err(AdapterError::Unsupported("version query"))
    }

    /// `tl_get_last_error`: pointer to a C string, 0 when there is none.
    fn last_error(&self) -> AdapterResult<u32> {
        Err(AdapterError::Unsupported("error reporting"))
    }
}

/// Lets a `RawExports` object back a `MemoryBridge`.
struct ExportMemory(Arc<dyn RawExports>);

impl LinearMemory for ExportMemory {
    fn malloc(&self, size: u32) -> AdapterResult<u32> {
        self.0.malloc(size)
    }
    fn free(&self, ptr: u32) -> AdapterResult<()> {
        self.0.free(ptr)
    }
    fn byte_len(&self) -> AdapterResult<u64> {
        self.0.byte_len()
    }
    fn read(&self, offset: u32, buf: &mut [u8]) -> AdapterResult<()> {
        self.0.read(offset, buf)
    }
    fn write(&self, offset: u32, bytes: &[u8]) -> AdapterResult<()> {
        self.0.write(offset, bytes)
    }
}

/// System-interface engine behind the uniform backend surface.
pub struct SystemInterfaceAdapter {
    exports: Arc<dyn RawExports>,
    memory: Arc<MemoryBridge>,
    runtime: &'static str,
}

impl SystemInterfaceAdapter {
    pub fn new(exports: Arc<dyn RawExports>, runtime: &'static str) -> Self {
        let memory = Arc::new(MemoryBridge::new(Arc::new(ExportMemory(exports.clone()))));
        Self { exports, memory, runtime }
    }
}

impl EngineBackend for SystemInterfaceAdapter {
    fn kind(&self) -> BackendChoice {
        BackendChoice::SystemInterface
    }

    fn runtime(&self) -> &'static str {
        self.runtime
    }

    fn memory(&self) -> &MemoryBridge {
        &self.memory
    }

    fn version(&self) -> AdapterResult<String> {
        let ptr = self.exports.version()?;
        if ptr == 0 {
            return Err(AdapterError::Engine {
                op: "version query",
                message: "engine returned a null string".into(),
            });
        }
        self.memory.read_cstring(ptr)
    }

    fn open_handle(&self) -> AdapterResult<Box<dyn HandleDriver>> {
        Ok(Box::new(RawHandleDriver {
            exports: self.exports.clone(),
            memory: self.memory.clone(),
        }))
    }
}

/// Per-handle driver. Stateless on the engine side: every call passes the
/// whole buffer, and every allocation is released before returning.
struct RawHandleDriver {
    exports: Arc<dyn RawExports>,
    memory: Arc<MemoryBridge>,
}

impl RawHandleDriver {
    fn failure(&self, op: &'static str) -> AdapterError {
        let message = match self.exports.last_error() {
            Ok(ptr) if ptr != 0 => self
                .memory
                .read_cstring(ptr)
                .unwrap_or_else(|e| format!("unreadable error message: {}", e)),
            _ => "engine reported failure".to_string(),
        };
        AdapterError::Engine { op, message }
    }
}

impl HandleDriver for RawHandleDriver {
    fn attach(&mut self, _buffer: &Arc<[u8]>) -> AdapterResult<bool> {
        Ok(true)
    }

    fn read_tags(&mut self, buffer: &[u8]) -> AdapterResult<TagData> {
        let input = self.memory.alloc_bytes(buffer)?;
        let out_size = self.memory.alloc_bytes(&0u32.to_le_bytes())?;

        // Path pointer 0 selects the in-memory buffer.
        let doc_ptr = self.exports.read_tags(0, input.ptr(), input.size(), out_size.ptr())?;
        if doc_ptr == 0 {
            return Err(self.failure("tag reading"));
        }
        // Owned before the size is read, so a trap there still frees it.
        let mut doc = self.memory.adopt(doc_ptr, 0);
        doc.set_size(self.memory.view().u32_at(out_size.ptr())?);
        let bytes = doc.read()?;
        Ok(codec::decode(&bytes)?)
    }

    fn write_tags(&mut self, buffer: &[u8], tags: &TagData) -> AdapterResult<Vec<u8>> {
        let encoded = codec::encode(tags)?;
        let input = self.memory.alloc_bytes(buffer)?;
        let doc = self.memory.alloc_bytes(&encoded)?;
        let out_buf = self.memory.alloc_bytes(&0u32.to_le_bytes())?;
        let out_size = self.memory.alloc_bytes(&0u32.to_le_bytes())?;

        let status = self.exports.write_tags(WriteCall {
            path_ptr: 0,
            buf_ptr: input.ptr(),
            buf_len: input.size(),
            tags_ptr: doc.ptr(),
            tags_len: doc.size(),
            out_buf_ptr: out_buf.ptr(),
            out_size_ptr: out_size.ptr(),
        })?;
        if status != 0 {
            return Err(self.failure("tag writing"));
        }

        let view = self.memory.view();
        let new_ptr = view.u32_at(out_buf.ptr())?;
        if new_ptr == 0 {
            // Staged edits stay pending; the caller still holds them.
            return Err(AdapterError::Unsupported("buffer writing"));
        }
        let mut block = self.memory.adopt(new_ptr, 0);
        block.set_size(view.u32_at(out_size.ptr())?);
        block.read()
    }

    fn format(&mut self, buffer: &[u8]) -> AdapterResult<FormatLabel> {
        Ok(sniff::sniff(buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::testing::FakeEngine;
    use crate::models::TagValue;

    fn adapter(engine: FakeEngine) -> (Arc<FakeEngine>, SystemInterfaceAdapter) {
        let engine = Arc::new(engine);
        let adapter = SystemInterfaceAdapter::new(engine.clone(), "fake");
        (engine, adapter)
    }

    #[test]
    fn version_is_read_as_cstring() {
        let (_engine, adapter) = adapter(FakeEngine::new());
        assert_eq!(adapter.version().unwrap(), FakeEngine::VERSION);
        assert_eq!(adapter.kind(), BackendChoice::SystemInterface);
    }

    #[test]
    fn read_releases_every_allocation() {
        let (engine, adapter) = adapter(FakeEngine::new());
        let buffer = FakeEngine::container(&TagData::default());
        let mut driver = adapter.open_handle().unwrap();
        driver.read_tags(&buffer).unwrap();
        assert_eq!(adapter.memory().footprint().live_allocations, 0);
        assert_eq!(engine.live_blocks(), 0);
    }

    #[test]
    fn read_failure_carries_engine_message() {
        let (engine, adapter) = adapter(FakeEngine::new());
        let mut driver = adapter.open_handle().unwrap();
        let err = driver.read_tags(b"definitely not audio").unwrap_err();
        match err {
            AdapterError::Engine { op, message } => {
                assert_eq!(op, "tag reading");
                assert_eq!(message, FakeEngine::INVALID_MESSAGE);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(engine.live_blocks(), 0);
    }

    #[test]
    fn write_round_trips_through_engine() {
        let (engine, adapter) = adapter(FakeEngine::new());
        let buffer = FakeEngine::container(&TagData::default());
        let mut driver = adapter.open_handle().unwrap();

        let mut tags = TagData::default();
        tags.set_values("TITLE", vec![TagValue::from("Written")]);
        let rewritten = driver.write_tags(&buffer, &tags).unwrap();
        assert_ne!(rewritten, buffer);

        let back = driver.read_tags(&rewritten).unwrap();
        assert_eq!(back.first_text("TITLE").as_deref(), Some("Written"));
        assert_eq!(engine.live_blocks(), 0);
    }

    #[test]
    fn null_output_buffer_is_not_success() {
        let (engine, adapter) = adapter(FakeEngine::new().with_null_output());
        let buffer = FakeEngine::container(&TagData::default());
        let mut driver = adapter.open_handle().unwrap();

        let mut tags = TagData::default();
        tags.set_values("TITLE", vec![TagValue::from("Lost")]);
        assert!(matches!(
            driver.write_tags(&buffer, &tags),
            Err(AdapterError::Unsupported("buffer writing"))
        ));
        assert_eq!(engine.live_blocks(), 0);
    }

    #[test]
    fn document_is_freed_when_size_read_traps() {
        let (engine, adapter) = adapter(FakeEngine::new().with_trap_on_size_read());
        let buffer = FakeEngine::container(&TagData::default());
        let mut driver = adapter.open_handle().unwrap();

        assert!(matches!(driver.read_tags(&buffer), Err(AdapterError::Trap(_))));
        assert_eq!(adapter.memory().footprint().live_allocations, 0);
        assert_eq!(engine.live_blocks(), 0);
    }

    #[test]
    fn missing_write_export_is_named() {
        let (_engine, adapter) = adapter(FakeEngine::new().without_write());
        let buffer = FakeEngine::container(&TagData::default());
        let mut driver = adapter.open_handle().unwrap();
        let err = driver.write_tags(&buffer, &TagData::default()).unwrap_err();
        assert_eq!(err.to_string(), "tag writing not implemented for this backend");
    }

    #[test]
    fn format_is_sniffed() {
        let (_engine, adapter) = adapter(FakeEngine::new());
        let mut driver = adapter.open_handle().unwrap();
        let flac = [b"fLaC".as_slice(), &[0u8; 12]].concat();
        assert_eq!(driver.format(&flac).unwrap(), FormatLabel::FLAC);
    }

    #[test]
    fn mp4_items_are_unsupported() {
        let (_engine, adapter) = adapter(FakeEngine::new());
        let mut driver = adapter.open_handle().unwrap();
        assert!(matches!(
            driver.mp4_item("----:com.apple.iTunes:iTunNORM"),
            Err(AdapterError::Unsupported("MP4 item access"))
        ));
    }
}
