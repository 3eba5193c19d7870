use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::canvas::pool::BlockPool;

/// Edge length of a block in pixels.
pub const BLOCK_SIZE: usize = 64;
/// Channels stored per pixel (RGBA).
pub const BLOCK_CHANNELS: usize = 4;
/// Bytes in one block buffer.
pub const BLOCK_BYTES: usize = BLOCK_SIZE * BLOCK_SIZE * BLOCK_CHANNELS;

/// Fixed 64×64 RGBA pixel buffer, the unit of sharing and copy-on-write.
///
/// A block never frees its buffer directly: dropping it hands the bytes back to
/// the [`BlockPool`] it was allocated from, and cloning it takes a buffer from
/// that same pool.
pub struct Block {
    pixels: Box<[u8]>,
    pool: BlockPool,
}

impl Block {
    /// Allocate a zero-filled (fully transparent) block from `pool`.
    pub fn new(pool: &BlockPool) -> Self {
        pool.allocate()
    }

    pub(crate) fn from_parts(pixels: Box<[u8]>, pool: BlockPool) -> Self {
        debug_assert_eq!(pixels.len(), BLOCK_BYTES);
        Self { pixels, pool }
    }

    /// Byte offset of `(x, y, channel)`, or `None` when any part is out of range.
    #[inline]
    fn index(x: usize, y: usize, channel: usize) -> Option<usize> {
        if x >= BLOCK_SIZE || y >= BLOCK_SIZE || channel >= BLOCK_CHANNELS {
            return None;
        }
        Some((y * BLOCK_SIZE + x) * BLOCK_CHANNELS + channel)
    }

    /// Read one channel; out-of-range coordinates read as 0.
    #[inline]
    pub fn get_pixel(&self, x: usize, y: usize, channel: usize) -> u8 {
        Self::index(x, y, channel).map_or(0, |i| self.pixels[i])
    }

    /// Write one channel; out-of-range coordinates are ignored.
    #[inline]
    pub fn set_pixel(&mut self, x: usize, y: usize, channel: usize, value: u8) {
        if let Some(i) = Self::index(x, y, channel) {
            self.pixels[i] = value;
        }
    }

    pub fn get_rgba(&self, x: usize, y: usize) -> [u8; 4] {
        match Self::index(x, y, 0) {
            Some(i) => [
                self.pixels[i],
                self.pixels[i + 1],
                self.pixels[i + 2],
                self.pixels[i + 3],
            ],
            None => [0; 4],
        }
    }

    pub fn set_rgba(&mut self, x: usize, y: usize, rgba: [u8; 4]) {
        if let Some(i) = Self::index(x, y, 0) {
            self.pixels[i..i + BLOCK_CHANNELS].copy_from_slice(&rgba);
        }
    }

    /// Fill every pixel with `rgba`.
    pub fn fill(&mut self, rgba: [u8; 4]) {
        for px in self.pixels.chunks_exact_mut(BLOCK_CHANNELS) {
            px.copy_from_slice(&rgba);
        }
    }

    /// Raw row-major RGBA bytes (`BLOCK_SIZE * 4` bytes per row).
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    /// True when every alpha byte is zero.
    pub fn is_transparent(&self) -> bool {
        self.pixels
            .chunks_exact(BLOCK_CHANNELS)
            .all(|px| px[3] == 0)
    }

    /// Detach the buffer; the block drops without recycling afterwards.
    pub(crate) fn take_pixels(&mut self) -> Box<[u8]> {
        std::mem::take(&mut self.pixels)
    }
}

impl Clone for Block {
    /// Exclusive copy backed by a pool buffer.
    fn clone(&self) -> Self {
        let mut pixels = self.pool.take_buffer(false);
        pixels.copy_from_slice(&self.pixels);
        Self {
            pixels,
            pool: self.pool.clone(),
        }
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        let pixels = self.take_pixels();
        if !pixels.is_empty() {
            self.pool.recycle_buffer(pixels);
        }
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("bytes", &self.pixels.len())
            .field("transparent", &self.is_transparent())
            .finish()
    }
}

/// Shared handle to a [`Block`].
///
/// Cloning the handle retains the block, dropping it releases it. A block whose
/// handle count is above one must not be written in place; [`BlockRef::make_mut`]
/// enforces this by copying first.
#[derive(Clone)]
pub struct BlockRef(Arc<Block>);

impl BlockRef {
    pub fn new(block: Block) -> Self {
        Self(Arc::new(block))
    }

    /// Number of live handles (grid slots, history entries) on this block.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    pub fn is_shared(&self) -> bool {
        self.ref_count() > 1
    }

    /// Exclusive access, cloning the block through its pool when shared.
    pub fn make_mut(&mut self) -> &mut Block {
        Arc::make_mut(&mut self.0)
    }

    /// Exclusive access only if no other handle exists.
    pub fn get_mut(&mut self) -> Option<&mut Block> {
        Arc::get_mut(&mut self.0)
    }

    /// Whether both handles point at the same block.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }
}

impl Deref for BlockRef {
    type Target = Block;

    fn deref(&self) -> &Block {
        &self.0
    }
}

impl From<Block> for BlockRef {
    fn from(block: Block) -> Self {
        Self::new(block)
    }
}

impl fmt::Debug for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockRef")
            .field("ref_count", &self.ref_count())
            .finish()
    }
}
