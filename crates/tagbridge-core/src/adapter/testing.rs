//! In-process stand-in for the system-interface engine.
//!
//! A `Vec<u8>` heap with a bump allocator and a toy container format:
//!
//! ```text
//! "ID3\x04" | doc_len: u32 LE | 4 zero bytes | MessagePack document
//! ```
//!
//! The leading `ID3` makes sniffing report MP3.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::adapter::codec;
use crate::adapter::memory::LinearMemory;
use crate::adapter::{RawExports, WriteCall};
use crate::error::{AdapterError, AdapterResult};
use crate::models::TagData;

const HEAP_SIZE: usize = 64 * 1024;
const VERSION_AT: u32 = 16;
const ERROR_AT: u32 = 256;
const HEAP_START: u32 = 1024;
const MAGIC: &[u8] = b"ID3\x04";

pub(crate) struct FakeEngine {
    heap: Mutex<Vec<u8>>,
    state: Mutex<AllocState>,
    writable: bool,
    null_output: bool,
    trap_size_reads: bool,
}

#[derive(Default)]
struct AllocState {
    next: u32,
    live: HashMap<u32, u32>,
    frees: HashMap<u32, usize>,
    has_error: bool,
    trapping: bool,
}

impl FakeEngine {
    pub(crate) const VERSION: &'static str = "fake-engine 1.0";
    pub(crate) const INVALID_MESSAGE: &'static str = "Invalid audio file format";

    pub(crate) fn new() -> Self {
        let mut heap = vec![0u8; HEAP_SIZE];
        let at = VERSION_AT as usize;
        heap[at..at + Self::VERSION.len()].copy_from_slice(Self::VERSION.as_bytes());
        Self {
            heap: Mutex::new(heap),
            state: Mutex::new(AllocState { next: HEAP_START, ..AllocState::default() }),
            writable: true,
            null_output: false,
            trap_size_reads: false,
        }
    }

    pub(crate) fn without_write(mut self) -> Self {
        self.writable = false;
        self
    }

    /// `tl_write_tags` reports success but never fills in the output buffer.
    pub(crate) fn with_null_output(mut self) -> Self {
        self.null_output = true;
        self
    }

    /// After `tl_read_tags` hands out a document, 4-byte reads trap.
    pub(crate) fn with_trap_on_size_read(mut self) -> Self {
        self.trap_size_reads = true;
        self
    }

    /// A buffer the fake engine accepts, carrying `tags`.
    pub(crate) fn container(tags: &TagData) -> Vec<u8> {
        let doc = codec::encode(tags).unwrap_or_default();
        Self::wrap_doc(&doc)
    }

    fn wrap_doc(doc: &[u8]) -> Vec<u8> {
        let mut out = MAGIC.to_vec();
        out.extend_from_slice(&(doc.len() as u32).to_le_bytes());
        out.extend_from_slice(&[0u8; 4]);
        out.extend_from_slice(doc);
        out
    }

    fn unwrap_doc(buffer: &[u8]) -> Option<&[u8]> {
        if buffer.len() < 12 || !buffer.starts_with(MAGIC) {
            return None;
        }
        let len = u32::from_le_bytes([buffer[4], buffer[5], buffer[6], buffer[7]]) as usize;
        buffer.get(12..12 + len)
    }

    pub(crate) fn heap_len(&self) -> usize {
        HEAP_SIZE
    }

    pub(crate) fn free_count(&self, ptr: u32) -> usize {
        self.state.lock().frees.get(&ptr).copied().unwrap_or(0)
    }

    /// Blocks handed out by `malloc` and not yet freed.
    pub(crate) fn live_blocks(&self) -> usize {
        self.state.lock().live.len()
    }

    fn set_error(&self, message: &str) -> AdapterResult<()> {
        let mut bytes = message.as_bytes().to_vec();
        bytes.push(0);
        self.write(ERROR_AT, &bytes)?;
        self.state.lock().has_error = true;
        Ok(())
    }

    fn heap_slice(&self, ptr: u32, len: u32) -> AdapterResult<Vec<u8>> {
        let mut buf = vec![0u8; len as usize];
        self.read(ptr, &mut buf)?;
        Ok(buf)
    }

    fn store_u32(&self, ptr: u32, value: u32) -> AdapterResult<()> {
        self.write(ptr, &value.to_le_bytes())
    }

    fn check(offset: u32, len: usize) -> AdapterResult<()> {
        if offset as u64 + len as u64 > HEAP_SIZE as u64 {
            return Err(AdapterError::OutOfBounds {
                offset: offset as u64,
                len: len as u64,
                capacity: HEAP_SIZE as u64,
            });
        }
        Ok(())
    }
}

impl LinearMemory for FakeEngine {
    fn malloc(&self, size: u32) -> AdapterResult<u32> {
        let mut state = self.state.lock();
        let ptr = state.next;
        let end = ptr as u64 + size as u64;
        if end > HEAP_SIZE as u64 {
            return Ok(0);
        }
        // 8-byte alignment like dlmalloc.
        state.next = ((end + 7) & !7) as u32;
        state.live.insert(ptr, size);
        Ok(ptr)
    }

    fn free(&self, ptr: u32) -> AdapterResult<()> {
        let mut state = self.state.lock();
        state.live.remove(&ptr);
        *state.frees.entry(ptr).or_insert(0) += 1;
        Ok(())
    }

    fn byte_len(&self) -> AdapterResult<u64> {
        Ok(HEAP_SIZE as u64)
    }

    fn read(&self, offset: u32, buf: &mut [u8]) -> AdapterResult<()> {
        Self::check(offset, buf.len())?;
        if buf.len() == 4 && self.state.lock().trapping {
            return Err(AdapterError::trap("out of bounds memory access"));
        }
        let heap = self.heap.lock();
        let start = offset as usize;
        buf.copy_from_slice(&heap[start..start + buf.len()]);
        Ok(())
    }

    fn write(&self, offset: u32, bytes: &[u8]) -> AdapterResult<()> {
        Self::check(offset, bytes.len())?;
        let mut heap = self.heap.lock();
        let start = offset as usize;
        heap[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

impl RawExports for FakeEngine {
    fn read_tags(&self, _path_ptr: u32, buf_ptr: u32, len: u32, out_size_ptr: u32) -> AdapterResult<u32> {
        self.state.lock().has_error = false;
        let buffer = self.heap_slice(buf_ptr, len)?;
        let Some(doc) = Self::unwrap_doc(&buffer) else {
            self.set_error(Self::INVALID_MESSAGE)?;
            return Ok(0);
        };
        let ptr = self.malloc(doc.len() as u32)?;
        self.write(ptr, doc)?;
        self.store_u32(out_size_ptr, doc.len() as u32)?;
        if self.trap_size_reads {
            self.state.lock().trapping = true;
        }
        Ok(ptr)
    }

    fn write_tags(&self, call: WriteCall) -> AdapterResult<i32> {
        if !self.writable {
            return Err(AdapterError::Unsupported("tag writing"));
        }
        self.state.lock().has_error = false;
        let buffer = self.heap_slice(call.buf_ptr, call.buf_len)?;
        if Self::unwrap_doc(&buffer).is_none() {
            self.set_error(Self::INVALID_MESSAGE)?;
            return Ok(-1);
        }
        let doc = self.heap_slice(call.tags_ptr, call.tags_len)?;
        if codec::decode(&doc).is_err() {
            self.set_error("Malformed tag document")?;
            return Ok(-1);
        }
        if self.null_output {
            return Ok(0);
        }
        let rewritten = Self::wrap_doc(&doc);
        let ptr = self.malloc(rewritten.len() as u32)?;
        self.write(ptr, &rewritten)?;
        self.store_u32(call.out_buf_ptr, ptr)?;
        self.store_u32(call.out_size_ptr, rewritten.len() as u32)?;
        Ok(0)
    }

    fn version(&self) -> AdapterResult<u32> {
        Ok(VERSION_AT)
    }

    fn last_error(&self) -> AdapterResult<u32> {
        Ok(if self.state.lock().has_error { ERROR_AT } else { 0 })
    }
}
