use std::fmt;

use rayon::prelude::*;

use crate::canvas::block::{BLOCK_CHANNELS, BLOCK_SIZE, Block, BlockRef};
use crate::canvas::pool::BlockPool;
use crate::utils::profiler::ScopeTimer;

const BS: u32 = BLOCK_SIZE as u32;

/// Flat image as exchanged with the I/O collaborator.
///
/// `channels` is 4 (RGBA), 3 (RGB) or 1 (gray); [`BlockGrid::to_pixel_buffer`]
/// always produces RGBA.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub pixels: Vec<u8>,
}

impl PixelBuffer {
    pub fn new(width: u32, height: u32, channels: u8, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            channels,
            pixels,
        }
    }

    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self::new(width, height, 4, pixels)
    }

    /// Byte length implied by the dimensions and channel count.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.channels as usize
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0
            && self.height > 0
            && matches!(self.channels, 1 | 3 | 4)
            && self.pixels.len() == self.expected_len()
    }

    /// Opaque red/green gradient with a constant blue channel.
    pub fn gradient(width: u32, height: u32) -> Self {
        let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
        for y in 0..height {
            for x in 0..width {
                pixels.extend_from_slice(&[
                    (x as u64 * 255 / width.max(1) as u64) as u8,
                    (y as u64 * 255 / height.max(1) as u64) as u8,
                    128,
                    255,
                ]);
            }
        }
        Self::from_rgba(width, height, pixels)
    }

    /// RGBA value of `(x, y)`, expanding gray and RGB sources to opaque RGBA.
    /// Caller guarantees the coordinates are inside the image.
    fn rgba_at(&self, x: u32, y: u32) -> [u8; 4] {
        let c = self.channels as usize;
        let i = (y as usize * self.width as usize + x as usize) * c;
        match self.channels {
            4 => [
                self.pixels[i],
                self.pixels[i + 1],
                self.pixels[i + 2],
                self.pixels[i + 3],
            ],
            3 => [self.pixels[i], self.pixels[i + 1], self.pixels[i + 2], 255],
            _ => {
                let gray = self.pixels[i];
                [gray, gray, gray, 255]
            }
        }
    }
}

/// Inclusive range of block indices touched by a pixel region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockRange {
    pub start_bx: u32,
    pub start_by: u32,
    pub end_bx: u32,
    pub end_by: u32,
}

impl BlockRange {
    pub fn block_count(&self) -> usize {
        (self.end_bx - self.start_bx + 1) as usize * (self.end_by - self.start_by + 1) as usize
    }

    pub fn contains(&self, bx: u32, by: u32) -> bool {
        (self.start_bx..=self.end_bx).contains(&bx) && (self.start_by..=self.end_by).contains(&by)
    }

    /// Row-major `(bx, by)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + use<> {
        let (sx, ex) = (self.start_bx, self.end_bx);
        (self.start_by..=self.end_by).flat_map(move |by| (sx..=ex).map(move |bx| (bx, by)))
    }
}

/// Clipped pixel rectangle, half-open on both axes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct PixelRect {
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
}

/// Logical image stored as a row-major grid of shared 64×64 blocks.
///
/// Slot `(bx, by)` covers pixels `[bx*64, bx*64+64) × [by*64, by*64+64)`;
/// the part of an edge block lying past the image is kept fully transparent.
///
/// `Clone` shares every block (copy-on-write, O(slots) pointer copies), while
/// [`BlockGrid::clone_deep`] copies every block's pixels. All writes go
/// through [`BlockGrid::block_for_write`], which un-shares a block before it
/// is mutated.
#[derive(Clone)]
pub struct BlockGrid {
    width: u32,
    height: u32,
    blocks_x: u32,
    blocks_y: u32,
    blocks: Vec<BlockRef>,
    pool: BlockPool,
}

impl BlockGrid {
    /// Grid with no pixels; `is_valid()` is false.
    pub fn empty(pool: &BlockPool) -> Self {
        Self {
            width: 0,
            height: 0,
            blocks_x: 0,
            blocks_y: 0,
            blocks: Vec::new(),
            pool: pool.clone(),
        }
    }

    /// Slice `buffer` into blocks. An invalid buffer yields an empty grid.
    pub fn from_pixel_buffer(buffer: &PixelBuffer, pool: &BlockPool) -> Self {
        if !buffer.is_valid() {
            log::error!(
                "[BlockGrid] invalid pixel buffer {}x{}x{} ({} bytes)",
                buffer.width,
                buffer.height,
                buffer.channels,
                buffer.pixels.len()
            );
            return Self::empty(pool);
        }

        let _timer = ScopeTimer::new("grid_from_pixel_buffer");
        let width = buffer.width;
        let height = buffer.height;
        let blocks_x = width.div_ceil(BS);
        let blocks_y = height.div_ceil(BS);
        let total = blocks_x as usize * blocks_y as usize;

        log::info!(
            "[BlockGrid] slicing {}x{} image into {}x{} blocks ({} total)",
            width,
            height,
            blocks_x,
            blocks_y,
            total
        );

        let blocks: Vec<BlockRef> = (0..total)
            .into_par_iter()
            .map(|flat| {
                let bx = flat as u32 % blocks_x;
                let by = flat as u32 / blocks_x;
                BlockRef::new(Self::slice_block(buffer, bx, by, pool))
            })
            .collect();

        Self {
            width,
            height,
            blocks_x,
            blocks_y,
            blocks,
            pool: pool.clone(),
        }
    }

    fn slice_block(buffer: &PixelBuffer, bx: u32, by: u32, pool: &BlockPool) -> Block {
        let mut block = pool.allocate();
        let base_x = bx * BS;
        let base_y = by * BS;
        let cw = BS.min(buffer.width - base_x);
        let ch = BS.min(buffer.height - base_y);

        if buffer.channels == 4 {
            let src_stride = buffer.width as usize * 4;
            let dst_stride = BLOCK_SIZE * BLOCK_CHANNELS;
            let byte_len = cw as usize * 4;
            let dst = block.pixels_mut();
            for ly in 0..ch as usize {
                let src_start = (base_y as usize + ly) * src_stride + base_x as usize * 4;
                let dst_start = ly * dst_stride;
                dst[dst_start..dst_start + byte_len]
                    .copy_from_slice(&buffer.pixels[src_start..src_start + byte_len]);
            }
        } else {
            for ly in 0..ch {
                for lx in 0..cw {
                    let rgba = buffer.rgba_at(base_x + lx, base_y + ly);
                    block.set_rgba(lx as usize, ly as usize, rgba);
                }
            }
        }
        block
    }

    /// Flatten back to a contiguous RGBA buffer.
    pub fn to_pixel_buffer(&self) -> PixelBuffer {
        if !self.is_valid() {
            return PixelBuffer::default();
        }

        let _timer = ScopeTimer::new("grid_to_pixel_buffer");
        let stride = self.width as usize * 4;
        let mut out = vec![0u8; stride * self.height as usize];
        let block_stride = BLOCK_SIZE * BLOCK_CHANNELS;

        out.par_chunks_mut(stride * BLOCK_SIZE)
            .enumerate()
            .for_each(|(by, band)| {
                let rows = band.len() / stride;
                for bx in 0..self.blocks_x as usize {
                    let block = &self.blocks[by * self.blocks_x as usize + bx];
                    let base_x = bx * BLOCK_SIZE;
                    let cw = BLOCK_SIZE.min(self.width as usize - base_x);
                    let src = block.pixels();
                    for ly in 0..rows {
                        let src_start = ly * block_stride;
                        let dst_start = ly * stride + base_x * 4;
                        band[dst_start..dst_start + cw * 4]
                            .copy_from_slice(&src[src_start..src_start + cw * 4]);
                    }
                }
            });

        PixelBuffer::from_rgba(self.width, self.height, out)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Blocks per row.
    pub fn blocks_x(&self) -> u32 {
        self.blocks_x
    }

    /// Blocks per column.
    pub fn blocks_y(&self) -> u32 {
        self.blocks_y
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0 && !self.blocks.is_empty()
    }

    pub fn pool(&self) -> &BlockPool {
        &self.pool
    }

    /// Flat slot index of block `(bx, by)`.
    pub fn block_index(&self, bx: u32, by: u32) -> Option<usize> {
        if bx >= self.blocks_x || by >= self.blocks_y {
            return None;
        }
        Some(by as usize * self.blocks_x as usize + bx as usize)
    }

    /// Block coordinates owning pixel `(x, y)`.
    pub fn pixel_to_block(&self, x: i32, y: i32) -> Option<(u32, u32)> {
        self.locate(x, y).map(|(x, y)| (x / BS, y / BS))
    }

    /// In-image pixel coordinates, or `None` when `(x, y)` is out of range.
    #[inline]
    fn locate(&self, x: i32, y: i32) -> Option<(u32, u32)> {
        if x < 0 || y < 0 || x as u32 >= self.width || y as u32 >= self.height {
            return None;
        }
        Some((x as u32, y as u32))
    }

    pub fn block(&self, bx: u32, by: u32) -> Option<&BlockRef> {
        self.block_index(bx, by).and_then(|i| self.blocks.get(i))
    }

    pub fn block_at(&self, index: usize) -> Option<&BlockRef> {
        self.blocks.get(index)
    }

    /// Exclusive access to block `(bx, by)`.
    ///
    /// A block still shared with a snapshot or history entry is cloned from the
    /// pool and the clone installed in the slot before it is handed out.
    pub fn block_for_write(&mut self, bx: u32, by: u32) -> Option<&mut Block> {
        let index = self.block_index(bx, by)?;
        let slot = self.blocks.get_mut(index)?;
        Some(slot.make_mut())
    }

    /// Exchange the block in slot `index` with `block`. Used to reinstall
    /// recorded blocks on undo/redo; returns false when the slot does not exist.
    pub fn swap_block(&mut self, index: usize, block: &mut BlockRef) -> bool {
        match self.blocks.get_mut(index) {
            Some(slot) => {
                std::mem::swap(slot, block);
                true
            }
            None => false,
        }
    }

    pub fn get_pixel(&self, x: i32, y: i32, channel: usize) -> u8 {
        let Some((x, y)) = self.locate(x, y) else {
            return 0;
        };
        match self.block(x / BS, y / BS) {
            Some(block) => block.get_pixel((x % BS) as usize, (y % BS) as usize, channel),
            None => 0,
        }
    }

    pub fn get_rgba(&self, x: i32, y: i32) -> [u8; 4] {
        let Some((x, y)) = self.locate(x, y) else {
            return [0; 4];
        };
        match self.block(x / BS, y / BS) {
            Some(block) => block.get_rgba((x % BS) as usize, (y % BS) as usize),
            None => [0; 4],
        }
    }

    /// Write one channel, copying the owning block first if it is shared.
    pub fn set_pixel(&mut self, x: i32, y: i32, channel: usize, value: u8) {
        if channel >= BLOCK_CHANNELS {
            return;
        }
        let Some((x, y)) = self.locate(x, y) else {
            return;
        };
        if let Some(block) = self.block_for_write(x / BS, y / BS) {
            block.set_pixel((x % BS) as usize, (y % BS) as usize, channel, value);
        }
    }

    pub fn set_rgba(&mut self, x: i32, y: i32, rgba: [u8; 4]) {
        let Some((x, y)) = self.locate(x, y) else {
            return;
        };
        if let Some(block) = self.block_for_write(x / BS, y / BS) {
            block.set_rgba((x % BS) as usize, (y % BS) as usize, rgba);
        }
    }

    fn clip(&self, x: i32, y: i32, w: i32, h: i32) -> Option<PixelRect> {
        if !self.is_valid() || w <= 0 || h <= 0 {
            return None;
        }
        let x0 = i64::from(x).max(0);
        let y0 = i64::from(y).max(0);
        let x1 = (i64::from(x) + i64::from(w)).min(i64::from(self.width));
        let y1 = (i64::from(y) + i64::from(h)).min(i64::from(self.height));
        if x0 >= x1 || y0 >= y1 {
            return None;
        }
        Some(PixelRect {
            x0: x0 as u32,
            y0: y0 as u32,
            x1: x1 as u32,
            y1: y1 as u32,
        })
    }

    /// Blocks overlapped by the region after clipping it to the image, or
    /// `None` when nothing of the region lies inside.
    pub fn affected_block_range(&self, x: i32, y: i32, w: i32, h: i32) -> Option<BlockRange> {
        let rect = self.clip(x, y, w, h)?;
        Some(BlockRange {
            start_bx: rect.x0 / BS,
            start_by: rect.y0 / BS,
            end_bx: (rect.x1 - 1) / BS,
            end_by: (rect.y1 - 1) / BS,
        })
    }

    /// Set `channel` to `value` for every pixel of the clipped region,
    /// un-sharing each touched block once. Returns the number of pixels written.
    pub fn fill_channel(
        &mut self,
        x: i32,
        y: i32,
        w: i32,
        h: i32,
        channel: usize,
        value: u8,
    ) -> usize {
        if channel >= BLOCK_CHANNELS {
            return 0;
        }
        let Some(rect) = self.clip(x, y, w, h) else {
            return 0;
        };
        let Some(range) = self.affected_block_range(x, y, w, h) else {
            return 0;
        };

        let mut written = 0;
        for (bx, by) in range.iter() {
            let base_x = bx * BS;
            let base_y = by * BS;
            let lx0 = rect.x0.max(base_x) - base_x;
            let lx1 = rect.x1.min(base_x + BS) - base_x;
            let ly0 = rect.y0.max(base_y) - base_y;
            let ly1 = rect.y1.min(base_y + BS) - base_y;

            let Some(block) = self.block_for_write(bx, by) else {
                continue;
            };
            for ly in ly0..ly1 {
                for lx in lx0..lx1 {
                    block.set_pixel(lx as usize, ly as usize, channel, value);
                }
            }
            written += ((lx1 - lx0) * (ly1 - ly0)) as usize;
        }
        written
    }

    /// Copy of the grid in which every slot holds a freshly cloned block.
    /// Costs O(total blocks) regardless of what later diverges.
    pub fn clone_deep(&self) -> BlockGrid {
        let _timer = ScopeTimer::new("grid_clone_deep");
        let blocks = self
            .blocks
            .par_iter()
            .map(|block| BlockRef::new(Block::clone(block)))
            .collect();
        Self {
            width: self.width,
            height: self.height,
            blocks_x: self.blocks_x,
            blocks_y: self.blocks_y,
            blocks,
            pool: self.pool.clone(),
        }
    }

    /// Release every block and reset to the empty state.
    pub fn clear(&mut self) {
        self.blocks.clear();
        self.width = 0;
        self.height = 0;
        self.blocks_x = 0;
        self.blocks_y = 0;
    }

    /// Slots whose block is also referenced elsewhere (history, snapshots, clones).
    pub fn shared_block_count(&self) -> usize {
        self.blocks.iter().filter(|b| b.is_shared()).count()
    }
}

impl fmt::Debug for BlockGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockGrid")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("blocks_x", &self.blocks_x)
            .field("blocks_y", &self.blocks_y)
            .finish()
    }
}
