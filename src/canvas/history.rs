use std::collections::{HashSet, VecDeque};

use crate::canvas::block::{BLOCK_BYTES, BlockRef};
use crate::canvas::grid::BlockGrid;
use crate::utils::profiler::ScopeTimer;

/// Default number of transactions kept before the oldest is evicted.
pub const DEFAULT_MAX_HISTORY: usize = 50;

/// Aggregate numbers for the presentation layer.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PerformanceStats {
    /// Duration of the last successful undo, in milliseconds.
    pub last_undo_ms: f64,
    /// Duration of the last successful redo, in milliseconds.
    pub last_redo_ms: f64,
    /// Bytes held by recorded blocks.
    pub total_memory_bytes: usize,
    /// Mean number of blocks touched per stored transaction.
    pub average_blocks_per_edit: usize,
}

/// One recorded block: the slot it belongs to and the block to put back there.
#[derive(Debug)]
struct BlockDelta {
    index: usize,
    block: BlockRef,
}

/// Blocks touched by one transaction, held as the state they had before it.
///
/// Applying an entry swaps its blocks with the grid's, so after an undo the
/// entry holds the post-edit blocks and the same call performs the redo.
#[derive(Debug)]
pub struct HistoryEntry {
    label: String,
    deltas: Vec<BlockDelta>,
}

impl HistoryEntry {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn block_count(&self) -> usize {
        self.deltas.len()
    }

    /// Slot indices touched by this transaction, in first-touch order.
    pub fn block_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.deltas.iter().map(|d| d.index)
    }

    fn apply(&mut self, grid: &mut BlockGrid) -> usize {
        let mut restored = 0;
        for delta in &mut self.deltas {
            if grid.swap_block(delta.index, &mut delta.block) {
                restored += 1;
            } else {
                log::warn!(
                    "[DeltaHistory] block {} missing from grid while applying '{}'",
                    delta.index,
                    self.label
                );
            }
        }
        restored
    }
}

/// Transaction being recorded between `begin_edit` and `end_edit`.
struct PendingEdit {
    label: String,
    deltas: Vec<BlockDelta>,
    touched: HashSet<usize>,
    blocks_x: u32,
    blocks_y: u32,
}

/// Undo/redo log that keeps only the blocks each transaction touched.
///
/// Recording a block retains the block currently in the slot instead of
/// copying it; the grid's copy-on-write then gives the edit its own copy on the
/// first write. Undo and redo cost O(touched blocks).
///
/// `applied` counts the entries currently reflected in the grid, so entries at
/// `applied..` are the redo branch.
pub struct DeltaHistory {
    entries: VecDeque<HistoryEntry>,
    applied: usize,
    max_entries: usize,
    pending: Option<PendingEdit>,
    stats: PerformanceStats,
}

impl DeltaHistory {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            applied: 0,
            max_entries: max_entries.max(1),
            pending: None,
            stats: PerformanceStats::default(),
        }
    }

    /// Open a transaction against `grid`. An edit that is still open is
    /// closed first. Returns false if the grid holds no image.
    pub fn begin_edit(&mut self, grid: &BlockGrid, label: impl Into<String>) -> bool {
        let label = label.into();
        if !grid.is_valid() {
            log::error!("[DeltaHistory] begin_edit '{}': grid holds no image", label);
            return false;
        }
        if let Some(open) = &self.pending {
            log::warn!(
                "[DeltaHistory] begin_edit '{}': '{}' was never ended, closing it",
                label,
                open.label
            );
            self.end_edit();
        }

        log::debug!("[DeltaHistory] begin_edit: {}", label);
        self.pending = Some(PendingEdit {
            label,
            deltas: Vec::new(),
            touched: HashSet::new(),
            blocks_x: grid.blocks_x(),
            blocks_y: grid.blocks_y(),
        });
        true
    }

    /// Remember the current state of block `(bx, by)` before it is written.
    /// Repeated calls for the same block within a transaction keep the first.
    pub fn record_modification(&mut self, grid: &BlockGrid, bx: u32, by: u32) -> bool {
        let Some(pending) = self.pending.as_mut() else {
            log::error!(
                "[DeltaHistory] record_modification({}, {}): no active edit",
                bx,
                by
            );
            return false;
        };
        if grid.blocks_x() != pending.blocks_x || grid.blocks_y() != pending.blocks_y {
            log::error!(
                "[DeltaHistory] record_modification: grid changed shape during '{}'",
                pending.label
            );
            return false;
        }
        let Some(index) = grid.block_index(bx, by) else {
            log::warn!(
                "[DeltaHistory] record_modification: block ({}, {}) out of range",
                bx,
                by
            );
            return false;
        };
        if !pending.touched.insert(index) {
            return true;
        }
        let Some(block) = grid.block_at(index) else {
            return false;
        };

        pending.deltas.push(BlockDelta {
            index,
            block: block.clone(),
        });
        log::trace!("[DeltaHistory] recorded block ({}, {})", bx, by);
        true
    }

    /// Close the transaction. Nothing is stored when no block was recorded;
    /// otherwise the redo branch is dropped, the entry pushed, and the oldest
    /// entry evicted past the ceiling. Returns whether an entry was stored.
    pub fn end_edit(&mut self) -> bool {
        let Some(pending) = self.pending.take() else {
            log::warn!("[DeltaHistory] end_edit: no active edit");
            return false;
        };
        if pending.deltas.is_empty() {
            log::debug!(
                "[DeltaHistory] end_edit '{}': no blocks modified, discarding",
                pending.label
            );
            return false;
        }

        self.entries.truncate(self.applied);
        let touched = pending.deltas.len();
        self.entries.push_back(HistoryEntry {
            label: pending.label,
            deltas: pending.deltas,
        });
        self.applied = self.entries.len();

        while self.entries.len() > self.max_entries {
            if let Some(evicted) = self.entries.pop_front() {
                log::debug!("[DeltaHistory] evicted '{}'", evicted.label);
            }
            self.applied -= 1;
        }
        self.refresh_stats();

        log::info!(
            "[DeltaHistory] end_edit: saved {} blocks (index={}, total={})",
            touched,
            self.applied - 1,
            self.entries.len()
        );
        true
    }

    /// Restore the grid to the state before the latest applied transaction.
    pub fn undo(&mut self, grid: &mut BlockGrid) -> bool {
        self.close_pending("undo");
        if !self.can_undo() {
            log::debug!("[DeltaHistory] undo: no history available");
            return false;
        }

        let timer = ScopeTimer::new("delta_undo");
        let entry = &mut self.entries[self.applied - 1];
        let restored = entry.apply(grid);
        self.applied -= 1;
        self.stats.last_undo_ms = timer.elapsed_ms();

        log::info!(
            "[DeltaHistory] undo: '{}' (time={:.3}ms, blocks={})",
            entry.label,
            self.stats.last_undo_ms,
            restored
        );
        true
    }

    /// Re-apply the next transaction on the redo branch.
    pub fn redo(&mut self, grid: &mut BlockGrid) -> bool {
        self.close_pending("redo");
        if !self.can_redo() {
            log::debug!("[DeltaHistory] redo: no redo available");
            return false;
        }

        let timer = ScopeTimer::new("delta_redo");
        let entry = &mut self.entries[self.applied];
        let restored = entry.apply(grid);
        self.applied += 1;
        self.stats.last_redo_ms = timer.elapsed_ms();

        log::info!(
            "[DeltaHistory] redo: '{}' (time={:.3}ms, blocks={})",
            entry.label,
            self.stats.last_redo_ms,
            restored
        );
        true
    }

    fn close_pending(&mut self, op: &str) {
        if self.pending.is_some() {
            log::warn!("[DeltaHistory] {}: edit still open, closing it first", op);
            self.end_edit();
        }
    }

    fn refresh_stats(&mut self) {
        let retained = self.retained_block_count();
        self.stats.total_memory_bytes = retained * BLOCK_BYTES;
        self.stats.average_blocks_per_edit = if self.entries.is_empty() {
            0
        } else {
            retained / self.entries.len()
        };
    }

    pub fn can_undo(&self) -> bool {
        self.applied > 0
    }

    pub fn can_redo(&self) -> bool {
        self.applied < self.entries.len()
    }

    /// Drop every entry and any open transaction, releasing recorded blocks.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.applied = 0;
        self.pending = None;
        self.stats = PerformanceStats::default();
        log::info!("[DeltaHistory] cleared all history");
    }

    /// Number of stored transactions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Index of the latest applied transaction, `None` at the initial state.
    pub fn current_index(&self) -> Option<usize> {
        self.applied.checked_sub(1)
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn is_recording(&self) -> bool {
        self.pending.is_some()
    }

    /// Blocks recorded so far in the open transaction.
    pub fn pending_block_count(&self) -> usize {
        self.pending.as_ref().map_or(0, |p| p.deltas.len())
    }

    pub fn entry(&self, index: usize) -> Option<&HistoryEntry> {
        self.entries.get(index)
    }

    pub fn labels(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.label.as_str()).collect()
    }

    /// Blocks kept alive by stored entries.
    pub fn retained_block_count(&self) -> usize {
        self.entries.iter().map(HistoryEntry::block_count).sum()
    }

    pub fn stats(&self) -> PerformanceStats {
        self.stats
    }
}

impl Default for DeltaHistory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::grid::PixelBuffer;
    use crate::canvas::pool::BlockPool;

    fn grid(pool: &BlockPool) -> BlockGrid {
        BlockGrid::from_pixel_buffer(&PixelBuffer::gradient(256, 256), pool)
    }

    /// Record then write every channel-0 pixel of the given blocks' first row.
    fn paint(
        history: &mut DeltaHistory,
        grid: &mut BlockGrid,
        label: &str,
        value: u8,
        blocks: &[(u32, u32)],
    ) {
        assert!(history.begin_edit(grid, label));
        for &(bx, by) in blocks {
            for x in 0..64 {
                history.record_modification(grid, bx, by);
                grid.set_pixel((bx * 64 + x) as i32, (by * 64) as i32, 0, value);
            }
        }
        history.end_edit();
    }

    #[test]
    fn records_each_block_once() {
        let pool = BlockPool::new(64);
        let mut grid = grid(&pool);
        let mut history = DeltaHistory::new(10);

        paint(&mut history, &mut grid, "stroke", 1, &[(0, 0), (1, 0), (0, 0)]);
        assert_eq!(history.len(), 1);
        let entry = history.entry(0).unwrap();
        assert_eq!(entry.block_count(), 2);
        assert_eq!(entry.label(), "stroke");
        assert_eq!(entry.block_indices().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(history.retained_block_count(), 2);
        assert_eq!(history.stats().total_memory_bytes, 2 * BLOCK_BYTES);
        assert_eq!(history.stats().average_blocks_per_edit, 2);
    }

    #[test]
    fn first_touch_keeps_the_pre_transaction_state() {
        let pool = BlockPool::new(64);
        let mut grid = grid(&pool);
        let before = grid.to_pixel_buffer();
        let mut history = DeltaHistory::new(10);

        history.begin_edit(&grid, "two writes");
        history.record_modification(&grid, 0, 0);
        grid.set_pixel(3, 3, 1, 11);
        history.record_modification(&grid, 0, 0);
        grid.set_pixel(3, 3, 1, 22);
        history.end_edit();

        assert!(history.undo(&mut grid));
        assert_eq!(grid.to_pixel_buffer(), before);
    }

    #[test]
    fn empty_transaction_is_discarded() {
        let pool = BlockPool::new(64);
        let grid = grid(&pool);
        let mut history = DeltaHistory::new(10);
        assert!(history.begin_edit(&grid, "nothing"));
        assert!(!history.end_edit());
        assert!(history.is_empty());
        assert!(!history.can_undo());
    }

    #[test]
    fn undo_redo_swap_blocks() {
        let pool = BlockPool::new(64);
        let mut grid = grid(&pool);
        let original = grid.to_pixel_buffer();
        let mut history = DeltaHistory::new(10);

        paint(&mut history, &mut grid, "a", 7, &[(1, 1)]);
        let edited = grid.to_pixel_buffer();
        assert_ne!(edited, original);

        assert!(history.undo(&mut grid));
        assert_eq!(grid.to_pixel_buffer(), original);
        assert!(!history.undo(&mut grid));

        assert!(history.redo(&mut grid));
        assert_eq!(grid.to_pixel_buffer(), edited);
        assert!(!history.redo(&mut grid));
        assert_eq!(history.current_index(), Some(0));
    }

    #[test]
    fn new_edit_truncates_redo_branch() {
        let pool = BlockPool::new(64);
        let mut grid = grid(&pool);
        let mut history = DeltaHistory::new(10);

        paint(&mut history, &mut grid, "a", 1, &[(0, 0)]);
        paint(&mut history, &mut grid, "b", 2, &[(1, 0)]);
        assert!(history.undo(&mut grid));
        paint(&mut history, &mut grid, "c", 3, &[(2, 0)]);

        assert!(!history.can_redo());
        assert!(!history.redo(&mut grid));
        assert_eq!(history.labels(), vec!["a", "c"]);
    }

    #[test]
    fn ceiling_evicts_oldest() {
        let pool = BlockPool::new(64);
        let mut grid = grid(&pool);
        let mut history = DeltaHistory::new(3);
        assert_eq!(history.max_entries(), 3);
        assert_eq!(DeltaHistory::new(0).max_entries(), 1);

        for (i, label) in ["a", "b", "c", "d"].iter().enumerate() {
            paint(&mut history, &mut grid, label, i as u8 + 1, &[(i as u32, 0)]);
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.current_index(), Some(2));
        assert_eq!(history.labels(), vec!["b", "c", "d"]);
        assert_eq!(history.retained_block_count(), 3);
    }

    #[test]
    fn misuse_is_a_recoverable_no_op() {
        let pool = BlockPool::new(64);
        let mut grid = grid(&pool);
        let mut history = DeltaHistory::new(10);

        assert!(!history.record_modification(&grid, 0, 0));
        assert!(!history.end_edit());
        assert!(!history.undo(&mut grid));

        assert!(!history.begin_edit(&BlockGrid::empty(&pool), "invalid"));
        assert!(!history.is_recording());

        history.begin_edit(&grid, "first");
        history.record_modification(&grid, 0, 0);
        grid.set_pixel(0, 0, 0, 9);
        // opening a second edit closes the first
        history.begin_edit(&grid, "second");
        assert_eq!(history.len(), 1);
        assert!(!history.record_modification(&grid, 99, 0));
        assert_eq!(history.pending_block_count(), 0);
        history.end_edit();
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn clear_releases_recorded_blocks() {
        let pool = BlockPool::new(64);
        let mut grid = grid(&pool);
        let mut history = DeltaHistory::new(10);
        paint(&mut history, &mut grid, "a", 1, &[(0, 0), (1, 0)]);

        let free_before = pool.free_count();
        history.clear();
        assert_eq!(pool.free_count(), free_before + 2);
        assert_eq!(history.stats(), PerformanceStats::default());
    }
}
