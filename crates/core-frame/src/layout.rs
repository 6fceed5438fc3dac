//! Fixed on-disk/in-memory layout of a frame pool region.
//!
//! The same layout backs both the heap and the shared-memory variants so a
//! second process can reconstruct slot pointers from the header alone:
//!
//! ```text
//! [ PoolHeader | SlotMeta × slot_count | data: slot_count × slot_size ]
//! ```
//!
//! All metadata records are cache-line sized and aligned; refcount and
//! generation are atomics with acquire/release ordering.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::PoolError;

pub const POOL_MAGIC: u32 = 0x5346_504C;
pub const POOL_VERSION: u32 = 1;

pub const DEFAULT_SLOT_COUNT: usize = 8;
pub const DEFAULT_SLOT_SIZE: usize = 2 * 1024 * 1024;

/// Region header. Plain integers written once at pool creation and treated
/// as read-only afterwards; `#[repr(C)]` so both sides agree on offsets.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolHeader {
    pub magic: u32,
    pub version: u32,
    pub slot_count: u32,
    pub slot_size: u32,
    pub meta_offset: u64,
    pub data_offset: u64,
}

pub const HEADER_SPAN: usize = 64;
pub const META_SPAN: usize = 64;

impl PoolHeader {
    pub fn new(slot_count: usize, slot_size: usize) -> Self {
        let meta_offset = HEADER_SPAN as u64;
        let data_offset = meta_offset + (slot_count * META_SPAN) as u64;
        Self {
            magic: POOL_MAGIC,
            version: POOL_VERSION,
            slot_count: slot_count as u32,
            slot_size: slot_size as u32,
            meta_offset,
            data_offset,
        }
    }

    /// Total region length for this geometry.
    pub fn region_len(&self) -> usize {
        self.data_offset as usize + self.slot_count as usize * self.slot_size as usize
    }

    /// Validate a header read from a foreign region against `region_len`.
    pub fn validate(&self, region_len: usize) -> Result<(), PoolError> {
        if self.magic != POOL_MAGIC {
            return Err(PoolError::BadRegion("magic mismatch"));
        }
        if self.version != POOL_VERSION {
            return Err(PoolError::BadRegion("unsupported version"));
        }
        if self.slot_count == 0 || self.slot_size == 0 {
            return Err(PoolError::BadRegion("empty geometry"));
        }
        if self.region_len() > region_len {
            return Err(PoolError::BadRegion("region shorter than declared geometry"));
        }
        Ok(())
    }
}

/// Per-slot metadata record, exactly one cache line.
///
/// `refcount > 0` means the slot is held by at least one consumer and the
/// producer must not reuse it. `generation` is strictly monotonic across all
/// writes to the pool; `generation == 0` or `len == 0` means never written.
#[repr(C, align(64))]
pub struct SlotMeta {
    pub refcount: AtomicU32,
    pub len: AtomicU32,
    pub session_id: AtomicU32,
    pub device_width: AtomicU32,
    pub device_height: AtomicU32,
    _pad: u32,
    pub generation: AtomicU64,
    pub browser_ts_ms: AtomicU64,
    pub recv_ts_ms: AtomicU64,
}

const _: () = assert!(std::mem::size_of::<SlotMeta>() == META_SPAN);
const _: () = assert!(std::mem::size_of::<PoolHeader>() <= HEADER_SPAN);

impl SlotMeta {
    /// Reset to the never-written state. Used only at pool creation.
    pub fn clear(&self) {
        self.refcount.store(0, Ordering::Relaxed);
        self.len.store(0, Ordering::Relaxed);
        self.session_id.store(0, Ordering::Relaxed);
        self.device_width.store(0, Ordering::Relaxed);
        self.device_height.store(0, Ordering::Relaxed);
        self.generation.store(0, Ordering::Release);
        self.browser_ts_ms.store(0, Ordering::Relaxed);
        self.recv_ts_ms.store(0, Ordering::Relaxed);
    }
}
