//! Screencast frame plumbing: the slot-ring frame pool (heap or shared
//! memory backed) and the adaptive quality controller.

mod adaptive;
mod layout;
mod pool;
#[cfg(unix)]
pub mod shm;

pub use adaptive::{AdaptiveController, TIERS, Tier};
pub use layout::{DEFAULT_SLOT_COUNT, DEFAULT_SLOT_SIZE, POOL_MAGIC, POOL_VERSION, PoolHeader};
pub use pool::{FrameHandle, FrameInfo, FramePool, now_unix_ms};

/// Frame-pool failure kinds. `Full` and `Oversize` are diagnostic; the
/// producer drops the frame and carries on.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("all slots held; frame dropped")]
    Full,
    #[error("payload of {len} bytes exceeds slot capacity {cap}")]
    Oversize { len: usize, cap: usize },
    #[error("invalid pool region: {0}")]
    BadRegion(&'static str),
    #[error("shared memory: {0}")]
    Io(#[from] std::io::Error),
}
