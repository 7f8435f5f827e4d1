//! Linear memory arena
//!
//! The engine owns one flat byte buffer and addresses everything in it by
//! u32 offset. Layout of an allocation:
//!
//! ```text
//! [size: u32][state: u32][payload ...]
//! ```
//!
//! `malloc` returns the payload offset, rounded to 8 bytes so struct fields
//! stay naturally aligned. Offset 0 is reserved as the null address; the
//! first 8 bytes of the buffer are a permanently-zero guard region. Freed
//! payloads are filled with a poison byte so a stale pointer reads as an
//! obviously-invalid struct instead of the node that used to live there.

use std::collections::HashMap;

use memchr::memchr;

/// Header word marking a live allocation.
const STATE_LIVE: u32 = 0xA110_CA7E;
/// Header word marking a freed allocation.
const STATE_FREE: u32 = 0xDEAD_F8EE;
/// Byte written over freed payloads.
const POISON: u8 = 0xDE;

const HEADER: u32 = 8;

/// The engine's linear memory.
pub struct Arena {
    bytes: Vec<u8>,
    /// Freed payload offsets keyed by rounded payload size.
    free: HashMap<u32, Vec<u32>>,
    live: usize,
}

impl Arena {
    pub fn new() -> Self {
        Arena {
            bytes: vec![0u8; HEADER as usize],
            free: HashMap::new(),
            live: 0,
        }
    }

    /// Number of live allocations, used to observe leaks in tests.
    pub fn live_allocations(&self) -> usize {
        self.live
    }

    // ========================================================================
    // Allocation
    // ========================================================================

    /// Allocate `size` bytes and return the payload offset. Never returns 0.
    pub fn malloc(&mut self, size: u32) -> u32 {
        let rounded = round_up(size.max(1));

        let addr = match self.free.get_mut(&rounded).and_then(Vec::pop) {
            Some(addr) => {
                self.write_u32(addr - 4, STATE_LIVE);
                addr
            }
            None => {
                let header_at = self.bytes.len() as u32;
                self.bytes
                    .resize((header_at + HEADER + rounded) as usize, 0);
                self.write_u32(header_at, rounded);
                self.write_u32(header_at + 4, STATE_LIVE);
                header_at + HEADER
            }
        };

        self.live += 1;
        tracing::trace!(addr, size = rounded, "arena malloc");
        addr
    }

    /// Allocate and zero-fill. Reused blocks still carry poison otherwise.
    pub fn malloc_zeroed(&mut self, size: u32) -> u32 {
        let addr = self.malloc(size);
        let rounded = self.block_size(addr);
        self.bytes[addr as usize..(addr + rounded) as usize].fill(0);
        addr
    }

    /// Release an allocation. Freeing 0 is a no-op; freeing an already-freed
    /// or never-allocated offset is ignored after a trace event, matching the
    /// tolerance callers of a C allocator shim expect from a debug build.
    pub fn free(&mut self, addr: u32) {
        if addr == 0 {
            return;
        }
        if addr < HEADER + 4 || (addr as usize) > self.bytes.len() {
            tracing::trace!(addr, "arena free of foreign offset ignored");
            return;
        }
        if self.read_u32(addr - 4) != STATE_LIVE {
            tracing::trace!(addr, "arena double free ignored");
            return;
        }

        let size = self.block_size(addr);
        self.write_u32(addr - 4, STATE_FREE);
        self.bytes[addr as usize..(addr + size) as usize].fill(POISON);
        self.free.entry(size).or_default().push(addr);
        self.live -= 1;
        tracing::trace!(addr, size, "arena free");
    }

    fn block_size(&self, addr: u32) -> u32 {
        self.read_u32(addr - HEADER)
    }

    // ========================================================================
    // Typed reads and writes
    // ========================================================================

    /// Read a little-endian u32. Reading past the arena is an engine bug and
    /// traps, the same way an unmapped load would.
    pub fn read_u32(&self, addr: u32) -> u32 {
        match self.bytes.get(addr as usize..addr as usize + 4) {
            Some(b) => u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            None => panic!("arena read out of bounds at {addr:#x}"),
        }
    }

    /// Read a little-endian f64.
    pub fn read_f64(&self, addr: u32) -> f64 {
        match self.bytes.get(addr as usize..addr as usize + 8) {
            Some(b) => f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]),
            None => panic!("arena read out of bounds at {addr:#x}"),
        }
    }

    pub fn write_u32(&mut self, addr: u32, value: u32) {
        match self.bytes.get_mut(addr as usize..addr as usize + 4) {
            Some(b) => b.copy_from_slice(&value.to_le_bytes()),
            None => panic!("arena write out of bounds at {addr:#x}"),
        }
    }

    pub fn write_f64(&mut self, addr: u32, value: f64) {
        match self.bytes.get_mut(addr as usize..addr as usize + 8) {
            Some(b) => b.copy_from_slice(&value.to_le_bytes()),
            None => panic!("arena write out of bounds at {addr:#x}"),
        }
    }

    /// Raw byte view of `[addr, addr + len)`.
    pub fn bytes(&self, addr: u32, len: u32) -> &[u8] {
        match self.bytes.get(addr as usize..(addr + len) as usize) {
            Some(b) => b,
            None => panic!("arena read out of bounds at {addr:#x}"),
        }
    }

    pub fn write_bytes(&mut self, addr: u32, data: &[u8]) {
        match self
            .bytes
            .get_mut(addr as usize..addr as usize + data.len())
        {
            Some(b) => b.copy_from_slice(data),
            None => panic!("arena write out of bounds at {addr:#x}"),
        }
    }

    // ========================================================================
    // C strings
    // ========================================================================

    /// Allocate a NUL-terminated copy of `s` and return its offset.
    pub fn alloc_cstr(&mut self, s: &str) -> u32 {
        let addr = self.malloc(s.len() as u32 + 1);
        self.write_bytes(addr, s.as_bytes());
        self.bytes[addr as usize + s.len()] = 0;
        addr
    }

    /// Bytes of the NUL-terminated string at `addr`, terminator excluded.
    pub fn cstr_bytes(&self, addr: u32) -> &[u8] {
        let start = addr as usize;
        let tail = match self.bytes.get(start..) {
            Some(t) => t,
            None => panic!("arena read out of bounds at {addr:#x}"),
        };
        match memchr(0, tail) {
            Some(end) => &tail[..end],
            None => panic!("unterminated string at {addr:#x}"),
        }
    }

    /// Decode the NUL-terminated string at `addr` as UTF-8, lossily.
    pub fn read_cstr(&self, addr: u32) -> String {
        String::from_utf8_lossy(self.cstr_bytes(addr)).into_owned()
    }
}

impl Default for Arena {
    fn default() -> Self {
        Arena::new()
    }
}

fn round_up(size: u32) -> u32 {
    (size + 7) & !7
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_region_stays_zero() {
        let mut mem = Arena::new();
        let a = mem.malloc(16);
        assert!(a >= HEADER);
        assert_eq!(mem.read_u32(0), 0);
    }

    #[test]
    fn test_round_trip_u32_f64() {
        let mut mem = Arena::new();
        let a = mem.malloc(16);
        mem.write_u32(a, 0xCAFE);
        mem.write_f64(a + 8, 2.5);
        assert_eq!(mem.read_u32(a), 0xCAFE);
        assert_eq!(mem.read_f64(a + 8), 2.5);
    }

    #[test]
    fn test_free_poisons_and_reuses() {
        let mut mem = Arena::new();
        let a = mem.malloc(24);
        mem.write_u32(a, 42);
        mem.free(a);
        // Poisoned, not stale.
        assert_eq!(mem.read_u32(a), u32::from_le_bytes([POISON; 4]));
        // Same-size allocation reuses the block.
        let b = mem.malloc(24);
        assert_eq!(a, b);
    }

    #[test]
    fn test_double_free_is_ignored() {
        let mut mem = Arena::new();
        let a = mem.malloc(8);
        mem.free(a);
        mem.free(a);
        mem.free(0);
        assert_eq!(mem.live_allocations(), 0);
        let b = mem.malloc(8);
        let c = mem.malloc(8);
        assert_eq!(a, b);
        assert_ne!(b, c);
    }

    #[test]
    fn test_cstr_round_trip() {
        let mut mem = Arena::new();
        let a = mem.alloc_cstr("hello");
        assert_eq!(mem.read_cstr(a), "hello");
        assert_eq!(mem.cstr_bytes(a), b"hello");
        let empty = mem.alloc_cstr("");
        assert_eq!(mem.read_cstr(empty), "");
    }

    #[test]
    fn test_zeroed_allocation_after_reuse() {
        let mut mem = Arena::new();
        let a = mem.malloc(32);
        mem.write_u32(a, 0xFFFF_FFFF);
        mem.free(a);
        let b = mem.malloc_zeroed(32);
        assert_eq!(a, b);
        assert_eq!(mem.read_u32(b), 0);
        assert_eq!(mem.read_u32(b + 28), 0);
    }
}
