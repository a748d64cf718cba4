//! Memory bridge over an engine's linear memory.
//!
//! The engine exposes only `malloc`/`free` and a flat byte array. Everything
//! else (realloc, C strings, scoped release) lives here, on the host side.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::{AdapterError, AdapterResult};

/// Raw access to one instance's linear memory and allocator.
pub trait LinearMemory: Send + Sync {
    /// Engine `malloc`. Returns 0 on exhaustion, like C.
    fn malloc(&self, size: u32) -> AdapterResult<u32>;
    fn free(&self, ptr: u32) -> AdapterResult<()>;
    /// Current size in bytes.
    fn byte_len(&self) -> AdapterResult<u64>;
    fn read(&self, offset: u32, buf: &mut [u8]) -> AdapterResult<()>;
    fn write(&self, offset: u32, bytes: &[u8]) -> AdapterResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemoryFootprint {
    pub memory_bytes: u64,
    pub live_allocations: usize,
    pub live_allocation_bytes: u64,
}

const SCAN_CHUNK: u32 = 256;

pub struct MemoryBridge {
    memory: Arc<dyn LinearMemory>,
    /// ptr → size of every block this bridge knows is live.
    ledger: Mutex<HashMap<u32, u32>>,
}

impl MemoryBridge {
    pub fn new(memory: Arc<dyn LinearMemory>) -> Self {
        Self { memory, ledger: Mutex::new(HashMap::new()) }
    }

    pub fn alloc(&self, size: u32) -> AdapterResult<u32> {
        let ptr = self.memory.malloc(size.max(1))?;
        if ptr == 0 {
            return Err(AdapterError::AllocationFailed(size));
        }
        self.ledger.lock().insert(ptr, size);
        Ok(ptr)
    }

    /// Free a block. `free(0)` is a no-op; unknown or already-freed pointers
    /// are rejected before reaching the engine.
    pub fn free(&self, ptr: u32) -> AdapterResult<()> {
        if ptr == 0 {
            return Ok(());
        }
        if self.ledger.lock().remove(&ptr).is_none() {
            return Err(AdapterError::UnknownAllocation(ptr));
        }
        self.memory.free(ptr)
    }

    /// Emulated realloc: allocate, copy `min(old, new)` bytes, free the old
    /// block. On failure the old block is left untouched.
    pub fn realloc(&self, ptr: u32, new_size: u32) -> AdapterResult<u32> {
        if ptr == 0 {
            return self.alloc(new_size);
        }
        let old_size = self
            .ledger
            .lock()
            .get(&ptr)
            .copied()
            .ok_or(AdapterError::UnknownAllocation(ptr))?;

        let new_ptr = self.alloc(new_size)?;
        let keep = old_size.min(new_size);
        let copied = self
            .read_bytes(ptr, keep)
            .and_then(|bytes| self.write_bytes(new_ptr, &bytes));
        if let Err(e) = copied {
            crate::log_err(self.free(new_ptr), "realloc rollback");
            return Err(e);
        }
        self.free(ptr)?;
        Ok(new_ptr)
    }

    /// Record an engine-allocated block so it can be released through `free`.
    pub(crate) fn adopt(&self, ptr: u32, size: u32) -> Allocation<'_> {
        self.ledger.lock().insert(ptr, size);
        Allocation { bridge: self, ptr, size, live: true }
    }

    pub fn alloc_scoped(&self, size: u32) -> AdapterResult<Allocation<'_>> {
        let ptr = self.alloc(size)?;
        Ok(Allocation { bridge: self, ptr, size, live: true })
    }

    /// Allocate and fill with `bytes`.
    pub fn alloc_bytes(&self, bytes: &[u8]) -> AdapterResult<Allocation<'_>> {
        let len = to_u32(bytes.len())?;
        let block = self.alloc_scoped(len)?;
        self.write_bytes(block.ptr, bytes)?;
        Ok(block)
    }

    /// Allocate a NUL-terminated copy of `s`.
    pub fn alloc_cstring(&self, s: &str) -> AdapterResult<Allocation<'_>> {
        let capacity = to_u32(s.len() + 1)?;
        let block = self.alloc_scoped(capacity)?;
        self.write_cstring(s, block.ptr, capacity)?;
        Ok(block)
    }

    pub fn view(&self) -> HeapView<'_> {
        HeapView { bridge: self }
    }

    pub fn byte_len(&self) -> AdapterResult<u64> {
        self.memory.byte_len()
    }

    pub fn read_bytes(&self, offset: u32, len: u32) -> AdapterResult<Vec<u8>> {
        self.check_range(offset, len as u64)?;
        let mut buf = vec![0u8; len as usize];
        self.memory.read(offset, &mut buf)?;
        Ok(buf)
    }

    pub fn write_bytes(&self, offset: u32, bytes: &[u8]) -> AdapterResult<()> {
        self.check_range(offset, bytes.len() as u64)?;
        self.memory.write(offset, bytes)
    }

    /// Decode the NUL-terminated UTF-8 string starting at `offset`.
    pub fn read_cstring(&self, offset: u32) -> AdapterResult<String> {
        let capacity = self.memory.byte_len()?;
        if offset as u64 >= capacity {
            return Err(AdapterError::OutOfBounds { offset: offset as u64, len: 1, capacity });
        }

        let mut collected = Vec::new();
        let mut pos = offset as u64;
        while pos < capacity {
            let chunk = (capacity - pos).min(SCAN_CHUNK as u64) as usize;
            let mut buf = vec![0u8; chunk];
            self.memory.read(pos as u32, &mut buf)?;
            if let Some(nul) = buf.iter().position(|b| *b == 0) {
                collected.extend_from_slice(&buf[..nul]);
                return String::from_utf8(collected)
                    .map_err(|_| AdapterError::InvalidUtf8 { offset });
            }
            collected.extend_from_slice(&buf);
            pos += chunk as u64;
        }
        Err(AdapterError::UnterminatedString { offset })
    }

    /// Write `s` plus a terminating zero at `offset`, within `capacity`
    /// bytes. Returns the length written, terminator excluded.
    pub fn write_cstring(&self, s: &str, offset: u32, capacity: u32) -> AdapterResult<u32> {
        if let Some(pos) = s.bytes().position(|b| b == 0) {
            return Err(AdapterError::InteriorNul(pos));
        }
        let needed = s.len() as u64 + 1;
        if needed > capacity as u64 {
            return Err(AdapterError::OutOfBounds { offset: offset as u64, len: needed, capacity: capacity as u64 });
        }
        self.check_range(offset, needed)?;

        let mut bytes = Vec::with_capacity(needed as usize);
        bytes.extend_from_slice(s.as_bytes());
        bytes.push(0);
        self.memory.write(offset, &bytes)?;
        Ok(s.len() as u32)
    }

    pub fn footprint(&self) -> MemoryFootprint {
        let ledger = self.ledger.lock();
        MemoryFootprint {
            memory_bytes: self.memory.byte_len().unwrap_or(0),
            live_allocations: ledger.len(),
            live_allocation_bytes: ledger.values().map(|s| *s as u64).sum(),
        }
    }

    fn check_range(&self, offset: u32, len: u64) -> AdapterResult<()> {
        let capacity = self.memory.byte_len()?;
        if offset as u64 + len > capacity {
            return Err(AdapterError::OutOfBounds { offset: offset as u64, len, capacity });
        }
        Ok(())
    }
}

fn to_u32(len: usize) -> AdapterResult<u32> {
    u32::try_from(len).map_err(|_| AdapterError::AllocationFailed(u32::MAX))
}

/// Bounds-checked reads. Borrows the bridge, so it cannot outlive it.
pub struct HeapView<'a> {
    bridge: &'a MemoryBridge,
}

impl HeapView<'_> {
    pub fn len(&self) -> AdapterResult<u64> {
        self.bridge.byte_len()
    }

    pub fn is_empty(&self) -> AdapterResult<bool> {
        Ok(self.len()? == 0)
    }

    pub fn u8_at(&self, offset: u32) -> AdapterResult<u8> {
        Ok(self.bridge.read_bytes(offset, 1)?[0])
    }

    /// Little-endian, as wasm32 stores it.
    pub fn u32_at(&self, offset: u32) -> AdapterResult<u32> {
        let bytes = self.bridge.read_bytes(offset, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn bytes(&self, offset: u32, len: u32) -> AdapterResult<Vec<u8>> {
        self.bridge.read_bytes(offset, len)
    }
}

/// A live block that is freed when dropped.
pub struct Allocation<'a> {
    bridge: &'a MemoryBridge,
    ptr: u32,
    size: u32,
    live: bool,
}

impl Allocation<'_> {
    pub fn ptr(&self) -> u32 {
        self.ptr
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn read(&self) -> AdapterResult<Vec<u8>> {
        self.bridge.read_bytes(self.ptr, self.size)
    }

    /// Write at the start of the block. Refuses to spill past `size`.
    pub fn write(&self, bytes: &[u8]) -> AdapterResult<()> {
        if bytes.len() as u64 > self.size as u64 {
            return Err(AdapterError::OutOfBounds {
                offset: self.ptr as u64,
                len: bytes.len() as u64,
                capacity: self.size as u64,
            });
        }
        self.bridge.write_bytes(self.ptr, bytes)
    }

    /// Record the size the engine reported for an adopted block.
    pub(crate) fn set_size(&mut self, size: u32) {
        self.bridge.ledger.lock().insert(self.ptr, size);
        self.size = size;
    }

    /// Give up ownership without freeing.
    pub fn into_raw(mut self) -> u32 {
        self.live = false;
        self.ptr
    }
}

impl Drop for Allocation<'_> {
    fn drop(&mut self) {
        if self.live {
            crate::log_err(self.bridge.free(self.ptr), "scoped free");
        }
    }
}
