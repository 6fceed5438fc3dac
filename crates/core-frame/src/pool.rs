//! Single-producer / multi-consumer ring of fixed-size frame slots.
//!
//! The only producer is the RPC reader handling screencast events; consumers
//! call [`FramePool::acquire_latest`] from the render path. A held slot
//! (refcount > 0) is never reused; a full ring drops the incoming frame and
//! bumps the diagnostic counter instead of blocking the reader.

use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use core_events::FRAMES_DROPPED;

use crate::layout::{DEFAULT_SLOT_COUNT, DEFAULT_SLOT_SIZE, PoolHeader, SlotMeta};
use crate::PoolError;

/// Frame metadata supplied by the screencast producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    /// Screencast session id to be echoed in the ack.
    pub session_id: u32,
    pub device_width: u32,
    pub device_height: u32,
    /// Browser-side capture timestamp, unix milliseconds.
    pub browser_ts_ms: u64,
}

enum Backing {
    Heap { ptr: NonNull<u8>, layout: Layout },
    #[cfg(unix)]
    Shm(crate::shm::ShmRegion),
}

// The raw pointer is only dereferenced through the slot protocol below.
unsafe impl Send for Backing {}
unsafe impl Sync for Backing {}

impl Backing {
    fn as_ptr(&self) -> *mut u8 {
        match self {
            Backing::Heap { ptr, .. } => ptr.as_ptr(),
            #[cfg(unix)]
            Backing::Shm(region) => region.as_ptr(),
        }
    }
}

impl Drop for Backing {
    fn drop(&mut self) {
        if let Backing::Heap { ptr, layout } = self {
            unsafe { dealloc(ptr.as_ptr(), *layout) };
        }
    }
}

pub struct FramePool {
    backing: Backing,
    header: PoolHeader,
    /// Producer-local cursor; consumers never read it.
    write_idx: AtomicUsize,
    next_generation: AtomicU64,
}

impl FramePool {
    /// In-process pool with the default geometry (8 slots × 2 MiB).
    pub fn new_heap() -> Result<Arc<Self>, PoolError> {
        Self::heap_with_geometry(DEFAULT_SLOT_COUNT, DEFAULT_SLOT_SIZE)
    }

    pub fn heap_with_geometry(slot_count: usize, slot_size: usize) -> Result<Arc<Self>, PoolError> {
        let header = PoolHeader::new(slot_count, slot_size);
        let layout = Layout::from_size_align(header.region_len(), crate::layout::META_SPAN)
            .map_err(|_| PoolError::BadRegion("unrepresentable geometry"))?;
        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(PoolError::BadRegion("allocation failed"))?;
        let pool = Self {
            backing: Backing::Heap { ptr, layout },
            header,
            write_idx: AtomicUsize::new(0),
            next_generation: AtomicU64::new(0),
        };
        pool.init_region();
        Ok(Arc::new(pool))
    }

    /// Pool backed by a fresh anonymous shared-memory region.
    #[cfg(unix)]
    pub fn new_shm() -> Result<Arc<Self>, PoolError> {
        Self::shm_with_geometry(DEFAULT_SLOT_COUNT, DEFAULT_SLOT_SIZE)
    }

    #[cfg(unix)]
    pub fn shm_with_geometry(slot_count: usize, slot_size: usize) -> Result<Arc<Self>, PoolError> {
        let header = PoolHeader::new(slot_count, slot_size);
        let region = crate::shm::ShmRegion::create(header.region_len())?;
        let pool = Self {
            backing: Backing::Shm(region),
            header,
            write_idx: AtomicUsize::new(0),
            next_generation: AtomicU64::new(0),
        };
        pool.init_region();
        Ok(Arc::new(pool))
    }

    /// Reconstruct a consumer-side view from a descriptor received
    /// out-of-band. The region header is read and validated; slots are left
    /// untouched so the producer's state survives.
    #[cfg(unix)]
    pub fn open_shm(fd: std::os::fd::OwnedFd, region_len: usize) -> Result<Arc<Self>, PoolError> {
        let region = crate::shm::ShmRegion::open(fd, region_len)?;
        let header = unsafe { std::ptr::read(region.as_ptr() as *const PoolHeader) };
        header.validate(region.len())?;
        Ok(Arc::new(Self {
            backing: Backing::Shm(region),
            header,
            write_idx: AtomicUsize::new(0),
            next_generation: AtomicU64::new(0),
        }))
    }

    /// The descriptor naming the shared region, if this pool has one.
    #[cfg(unix)]
    pub fn shm_fd(&self) -> Option<std::os::fd::RawFd> {
        match &self.backing {
            Backing::Shm(region) => Some(region.raw_fd()),
            _ => None,
        }
    }

    pub fn region_len(&self) -> usize {
        self.header.region_len()
    }

    pub fn slot_count(&self) -> usize {
        self.header.slot_count as usize
    }

    pub fn slot_size(&self) -> usize {
        self.header.slot_size as usize
    }

    fn init_region(&self) {
        unsafe {
            std::ptr::write(self.backing.as_ptr() as *mut PoolHeader, self.header);
        }
        for slot in 0..self.slot_count() {
            self.meta(slot).clear();
        }
    }

    fn meta(&self, slot: usize) -> &SlotMeta {
        debug_assert!(slot < self.slot_count());
        unsafe {
            &*(self
                .backing
                .as_ptr()
                .add(self.header.meta_offset as usize + slot * crate::layout::META_SPAN)
                as *const SlotMeta)
        }
    }

    fn data_ptr(&self, slot: usize) -> *mut u8 {
        unsafe {
            self.backing
                .as_ptr()
                .add(self.header.data_offset as usize + slot * self.slot_size())
        }
    }

    /// Byte offset of a slot's payload within the region (for consumers that
    /// address the shared region directly).
    pub fn data_offset(&self, slot: usize) -> usize {
        self.header.data_offset as usize + slot * self.slot_size()
    }

    /// Producer path: claim the next free slot, copy the payload, publish.
    ///
    /// Returns the generation assigned to the frame. `PoolError::Full` and
    /// `PoolError::Oversize` are diagnostic, not fatal; both bump
    /// `FRAMES_DROPPED`.
    pub fn push_frame(&self, payload: &[u8], info: FrameInfo) -> Result<u64, PoolError> {
        if payload.len() > self.slot_size() {
            FRAMES_DROPPED.fetch_add(1, Ordering::Relaxed);
            return Err(PoolError::Oversize {
                len: payload.len(),
                cap: self.slot_size(),
            });
        }
        let n = self.slot_count();
        let mut idx = self.write_idx.load(Ordering::Relaxed);
        for _ in 0..n {
            let slot = idx % n;
            let meta = self.meta(slot);
            if meta.refcount.load(Ordering::Acquire) == 0 {
                // Unpublish before touching the payload, then re-check the
                // pin: a consumer that raced in between the first check and
                // the invalidation still holds the old bytes and this slot
                // must be left alone.
                meta.generation.store(0, Ordering::Release);
                if meta.refcount.load(Ordering::Acquire) != 0 {
                    idx += 1;
                    continue;
                }
                unsafe {
                    std::ptr::copy_nonoverlapping(payload.as_ptr(), self.data_ptr(slot), payload.len());
                }
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
                meta.len.store(payload.len() as u32, Ordering::Relaxed);
                meta.session_id.store(info.session_id, Ordering::Relaxed);
                meta.device_width.store(info.device_width, Ordering::Relaxed);
                meta.device_height.store(info.device_height, Ordering::Relaxed);
                meta.browser_ts_ms.store(info.browser_ts_ms, Ordering::Relaxed);
                meta.recv_ts_ms.store(now_unix_ms(), Ordering::Relaxed);
                // Publish: consumers observe the payload only through an
                // acquire load of the generation.
                meta.generation.store(generation, Ordering::Release);
                self.write_idx.store(idx + 1, Ordering::Relaxed);
                return Ok(generation);
            }
            idx += 1;
        }
        FRAMES_DROPPED.fetch_add(1, Ordering::Relaxed);
        Err(PoolError::Full)
    }

    /// Non-blocking: pin the newest published frame, if any.
    ///
    /// Callers must compare [`FrameHandle::generation`] against their own
    /// `last_rendered_generation` and skip non-increasing frames.
    pub fn acquire_latest(self: &Arc<Self>) -> Option<FrameHandle> {
        // Two passes cover the race where the producer recycles the chosen
        // slot between the generation read and the refcount pin.
        for _ in 0..2 {
            let mut best: Option<(usize, u64)> = None;
            for slot in 0..self.slot_count() {
                let meta = self.meta(slot);
                let generation = meta.generation.load(Ordering::Acquire);
                if generation == 0 || meta.len.load(Ordering::Relaxed) == 0 {
                    continue;
                }
                if best.map(|(_, g)| generation > g).unwrap_or(true) {
                    best = Some((slot, generation));
                }
            }
            let (slot, generation) = best?;
            let meta = self.meta(slot);
            meta.refcount.fetch_add(1, Ordering::AcqRel);
            if meta.generation.load(Ordering::Acquire) == generation {
                return Some(FrameHandle {
                    pool: Arc::clone(self),
                    slot,
                    generation,
                    len: meta.len.load(Ordering::Relaxed) as usize,
                    session_id: meta.session_id.load(Ordering::Relaxed),
                    device_width: meta.device_width.load(Ordering::Relaxed),
                    device_height: meta.device_height.load(Ordering::Relaxed),
                    browser_ts_ms: meta.browser_ts_ms.load(Ordering::Relaxed),
                    recv_ts_ms: meta.recv_ts_ms.load(Ordering::Relaxed),
                });
            }
            // Lost the race; release and rescan.
            meta.refcount.fetch_sub(1, Ordering::Release);
        }
        None
    }

    /// Newest published generation (0 when nothing has been written). Lets
    /// the render tick skip the acquire when there is nothing new.
    pub fn latest_generation(&self) -> u64 {
        (0..self.slot_count())
            .map(|s| self.meta(s).generation.load(Ordering::Acquire))
            .max()
            .unwrap_or(0)
    }

    #[cfg(test)]
    fn refcount(&self, slot: usize) -> u32 {
        self.meta(slot).refcount.load(Ordering::Acquire)
    }
}

/// A pinned view into one frame slot. Dropping the handle releases the
/// slot's refcount; the view must not outlive a single render pass.
pub struct FrameHandle {
    pool: Arc<FramePool>,
    slot: usize,
    pub generation: u64,
    pub len: usize,
    pub session_id: u32,
    pub device_width: u32,
    pub device_height: u32,
    pub browser_ts_ms: u64,
    pub recv_ts_ms: u64,
}

impl FrameHandle {
    pub fn data(&self) -> &[u8] {
        // Valid while the refcount pin is held.
        unsafe { std::slice::from_raw_parts(self.pool.data_ptr(self.slot), self.len) }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Offset of this frame's payload within the pool region.
    pub fn region_offset(&self) -> usize {
        self.pool.data_offset(self.slot)
    }
}

impl Drop for FrameHandle {
    fn drop(&mut self) {
        self.pool.meta(self.slot).refcount.fetch_sub(1, Ordering::Release);
    }
}

pub fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    #[cfg(unix)]
    use std::os::fd::FromRawFd;

    fn info(session_id: u32) -> FrameInfo {
        FrameInfo {
            session_id,
            device_width: 1280,
            device_height: 720,
            browser_ts_ms: now_unix_ms(),
        }
    }

    fn small_pool() -> Arc<FramePool> {
        FramePool::heap_with_geometry(4, 1024).expect("pool")
    }

    #[test]
    fn generations_are_strictly_monotonic() {
        let pool = small_pool();
        let mut last = 0;
        for i in 0..16 {
            let generation = pool.push_frame(&[i as u8; 64], info(1)).expect("push");
            assert!(generation > last, "generation must strictly increase");
            last = generation;
        }
    }

    #[test]
    fn acquire_latest_pins_newest_frame() {
        let pool = small_pool();
        pool.push_frame(b"old", info(1)).expect("push");
        pool.push_frame(b"newer", info(2)).expect("push");
        let frame = pool.acquire_latest().expect("frame");
        assert_eq!(frame.generation, 2);
        assert_eq!(frame.data(), b"newer");
        assert_eq!(frame.session_id, 2);
    }

    #[test]
    fn held_slot_is_not_reused() {
        let pool = small_pool();
        pool.push_frame(b"pinned", info(1)).expect("push");
        let frame = pool.acquire_latest().expect("frame");
        let slot = frame.slot();

        // Fill the rest of the ring; the pinned slot must be skipped.
        for i in 0..8u8 {
            let _ = pool.push_frame(&[i; 8], info(2));
        }
        assert_eq!(frame.data(), b"pinned", "payload stable while held");
        assert!(pool.refcount(slot) > 0);
        drop(frame);
        assert_eq!(pool.refcount(slot), 0, "drop releases the slot");
    }

    #[test]
    fn full_ring_drops_the_frame() {
        let pool = small_pool();
        // Pin every slot.
        let mut held = Vec::new();
        for i in 0..4u8 {
            pool.push_frame(&[i; 8], info(1)).expect("push");
            held.push(pool.acquire_latest().expect("frame"));
        }
        // All four slots pinned (each acquire grabbed a distinct newest).
        // If acquire_latest pinned duplicates, refcounts still block reuse
        // only on those slots, so force-fill the rest first.
        let mut dropped = false;
        for i in 0..8u8 {
            if matches!(pool.push_frame(&[i; 8], info(2)), Err(PoolError::Full)) {
                dropped = true;
                break;
            }
        }
        assert!(dropped, "a fully held ring must drop frames");
    }

    #[test]
    fn oversize_payload_is_rejected() {
        let pool = small_pool();
        let err = pool.push_frame(&[0u8; 4096], info(1)).expect_err("oversize");
        assert!(matches!(err, PoolError::Oversize { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn shm_pool_round_trips_through_fd() {
        let pool = FramePool::shm_with_geometry(4, 1024).expect("shm pool");
        pool.push_frame(b"shared bytes", info(9)).expect("push");

        let raw = pool.shm_fd().expect("fd");
        let dup = unsafe { libc::fcntl(raw, libc::F_DUPFD_CLOEXEC, 0) };
        assert!(dup >= 0);
        let fd = unsafe { std::os::fd::OwnedFd::from_raw_fd(dup) };

        let consumer = FramePool::open_shm(fd, pool.region_len()).expect("open");
        let frame = consumer.acquire_latest().expect("frame");
        assert_eq!(frame.data(), b"shared bytes");
        assert_eq!(frame.session_id, 9);
        assert_eq!(frame.generation, 1);
    }
}
