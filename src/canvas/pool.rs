use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::canvas::block::{BLOCK_BYTES, Block};

/// Free buffers kept around before extra releases are actually freed.
pub const DEFAULT_POOL_CAPACITY: usize = 1000;

/// Counters describing how the pool has been used.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Fresh buffers allocated because the free list was empty.
    pub allocated: u64,
    /// Buffers handed out from the free list.
    pub reused: u64,
    /// Buffers returned to the free list.
    pub recycled: u64,
    /// Buffers freed because the free list was full.
    pub discarded: u64,
}

struct PoolInner {
    free: Vec<Box<[u8]>>,
    capacity: usize,
    stats: PoolStats,
}

/// Free-list allocator for block buffers.
///
/// Editing repeatedly allocates and releases same-sized blocks, so released
/// buffers are parked here and handed out again instead of going back to the
/// system allocator. The handle is cheap to clone; every grid, history and
/// block holds one. Access is serialized by an internal mutex so the rayon
/// workers slicing an image can allocate concurrently.
#[derive(Clone)]
pub struct BlockPool {
    inner: Arc<Mutex<PoolInner>>,
}

impl BlockPool {
    /// Create a pool that retains at most `capacity` free buffers.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PoolInner {
                free: Vec::new(),
                capacity,
                stats: PoolStats::default(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand out a zero-filled block, reusing a parked buffer when possible.
    pub fn allocate(&self) -> Block {
        Block::from_parts(self.take_buffer(true), self.clone())
    }

    /// Return a block's buffer to this pool.
    pub fn recycle(&self, mut block: Block) {
        let pixels = block.take_pixels();
        self.recycle_buffer(pixels);
    }

    /// Pop a buffer; recycled buffers are only cleared when `zeroed` is set
    /// since clones overwrite every byte anyway.
    pub(crate) fn take_buffer(&self, zeroed: bool) -> Box<[u8]> {
        let recycled = {
            let mut inner = self.lock();
            let buffer = inner.free.pop();
            if buffer.is_some() {
                inner.stats.reused += 1;
            } else {
                inner.stats.allocated += 1;
            }
            buffer
        };

        match recycled {
            Some(mut buffer) => {
                if zeroed {
                    buffer.fill(0);
                }
                buffer
            }
            None => vec![0u8; BLOCK_BYTES].into_boxed_slice(),
        }
    }

    pub(crate) fn recycle_buffer(&self, buffer: Box<[u8]>) {
        if buffer.len() != BLOCK_BYTES {
            return;
        }
        let mut inner = self.lock();
        if inner.free.len() < inner.capacity {
            inner.free.push(buffer);
            inner.stats.recycled += 1;
        } else {
            inner.stats.discarded += 1;
        }
    }

    /// Free every parked buffer.
    pub fn clear(&self) {
        let freed = {
            let mut inner = self.lock();
            std::mem::take(&mut inner.free)
        };
        log::debug!("[BlockPool] cleared {} cached blocks", freed.len());
    }

    /// Number of buffers currently parked.
    pub fn free_count(&self) -> usize {
        self.lock().free.len()
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    pub fn stats(&self) -> PoolStats {
        self.lock().stats
    }
}

impl Default for BlockPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY)
    }
}

impl fmt::Debug for BlockPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("BlockPool")
            .field("free", &inner.free.len())
            .field("capacity", &inner.capacity)
            .field("stats", &inner.stats)
            .finish()
    }
}
