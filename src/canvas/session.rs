use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;

use crate::canvas::block::{BLOCK_BYTES, BLOCK_CHANNELS};
use crate::canvas::grid::{BlockGrid, PixelBuffer};
use crate::canvas::history::{DeltaHistory, PerformanceStats};
use crate::canvas::pool::BlockPool;
use crate::utils::config::HistoryConfig;
use crate::utils::profiler::ScopeTimer;

/// How [`EditHistory`] stores its undo states.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HistoryBackend {
    /// Per-transaction block deltas; cost follows the edit size.
    #[default]
    Delta,
    /// Full grid copy per transaction; cost follows the image size.
    Snapshot,
}

impl HistoryBackend {
    pub fn label(&self) -> &'static str {
        match self {
            HistoryBackend::Delta => "delta",
            HistoryBackend::Snapshot => "snapshot",
        }
    }
}

impl fmt::Display for HistoryBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for HistoryBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("delta") {
            Ok(HistoryBackend::Delta)
        } else if s.eq_ignore_ascii_case("snapshot") {
            Ok(HistoryBackend::Snapshot)
        } else {
            Err(format!("unknown history backend '{s}' (expected delta or snapshot)"))
        }
    }
}

struct Snapshot {
    grid: BlockGrid,
    label: String,
}

/// Stack of whole-grid copies taken at `begin_edit`.
///
/// Each snapshot holds the grid as it was before its transaction. Undo and redo
/// swap the snapshot with the live grid, so after an undo the slot holds the
/// post-edit grid that the matching redo puts back.
struct SnapshotStack {
    snapshots: VecDeque<Snapshot>,
    applied: usize,
    max_entries: usize,
}

impl SnapshotStack {
    fn new(max_entries: usize) -> Self {
        Self {
            snapshots: VecDeque::new(),
            applied: 0,
            max_entries: max_entries.max(1),
        }
    }

    fn push(&mut self, grid: &BlockGrid, label: String) {
        self.snapshots.truncate(self.applied);
        self.snapshots.push_back(Snapshot {
            grid: grid.clone_deep(),
            label,
        });
        self.applied = self.snapshots.len();
        while self.snapshots.len() > self.max_entries {
            self.snapshots.pop_front();
            self.applied -= 1;
        }
    }

    fn undo(&mut self, live: &mut BlockGrid) -> Option<&str> {
        if self.applied == 0 {
            return None;
        }
        self.applied -= 1;
        let snapshot = &mut self.snapshots[self.applied];
        std::mem::swap(live, &mut snapshot.grid);
        Some(&snapshot.label)
    }

    fn redo(&mut self, live: &mut BlockGrid) -> Option<&str> {
        if self.applied >= self.snapshots.len() {
            return None;
        }
        let snapshot = &mut self.snapshots[self.applied];
        std::mem::swap(live, &mut snapshot.grid);
        self.applied += 1;
        Some(&snapshot.label)
    }

    fn clear(&mut self) {
        self.snapshots.clear();
        self.applied = 0;
    }

    fn memory_bytes(&self) -> usize {
        self.snapshots
            .iter()
            .map(|s| s.grid.block_count() * BLOCK_BYTES)
            .sum()
    }
}

enum Backend {
    Delta(DeltaHistory),
    Snapshot(SnapshotStack),
}

/// Live image plus its undo history, the entry point for editing tools.
///
/// Tools bracket their writes with [`begin_edit`](Self::begin_edit) and
/// [`end_edit`](Self::end_edit); `set_pixel` and `delete_selection_region`
/// never push history on their own. With the default delta backend every
/// write first records the owning block, so a transaction costs what it
/// touches. The snapshot backend copies the whole grid at `begin_edit` and is
/// kept for comparison.
pub struct EditHistory {
    grid: BlockGrid,
    pool: BlockPool,
    backend: Backend,
    config: HistoryConfig,
    editing: bool,
    touched: HashSet<usize>,
    touched_total: usize,
    edits: usize,
    last_undo_ms: f64,
    last_redo_ms: f64,
}

impl EditHistory {
    pub fn new() -> Self {
        Self::with_config(HistoryConfig::default())
    }

    pub fn with_config(config: HistoryConfig) -> Self {
        let pool = BlockPool::new(config.pool_capacity);
        Self::with_pool(config, pool)
    }

    /// Share an existing pool, e.g. between several open documents.
    pub fn with_pool(config: HistoryConfig, pool: BlockPool) -> Self {
        let backend = match config.backend {
            HistoryBackend::Delta => Backend::Delta(DeltaHistory::new(config.max_entries)),
            HistoryBackend::Snapshot => Backend::Snapshot(SnapshotStack::new(config.max_entries)),
        };
        Self {
            grid: BlockGrid::empty(&pool),
            pool,
            backend,
            config,
            editing: false,
            touched: HashSet::new(),
            touched_total: 0,
            edits: 0,
            last_undo_ms: 0.0,
            last_redo_ms: 0.0,
        }
    }

    /// Replace the live image and forget all history. An invalid image leaves
    /// the current state untouched and returns false.
    pub fn create_from_image(&mut self, image: &PixelBuffer) -> bool {
        let grid = BlockGrid::from_pixel_buffer(image, &self.pool);
        if !grid.is_valid() {
            log::error!("[EditHistory] failed to build grid from image");
            return false;
        }
        self.grid = grid;
        self.clear();
        log::info!("[EditHistory] created from image: {}x{}", image.width, image.height);
        true
    }

    /// Flatten the live image for display or export.
    pub fn to_pixel_buffer(&self) -> PixelBuffer {
        self.grid.to_pixel_buffer()
    }

    /// Open a transaction. An edit that is still open is closed first.
    pub fn begin_edit(&mut self, label: impl Into<String>) {
        let label = label.into();
        if !self.grid.is_valid() {
            log::warn!("[EditHistory] begin_edit '{}': no image loaded", label);
            return;
        }
        if self.editing {
            log::warn!(
                "[EditHistory] begin_edit '{}': previous edit not ended, ending it",
                label
            );
            self.end_edit();
        }

        match &mut self.backend {
            Backend::Delta(history) => {
                history.begin_edit(&self.grid, label.as_str());
            }
            Backend::Snapshot(stack) => {
                let _timer = ScopeTimer::new("snapshot_begin_edit");
                stack.push(&self.grid, label.clone());
                log::debug!(
                    "[EditHistory] begin_edit: {} (snapshot index={})",
                    label,
                    stack.applied - 1
                );
            }
        }
        self.editing = true;
        self.touched.clear();
    }

    /// Close the transaction. The snapshot backend already captured its state
    /// at `begin_edit`, so only the delta backend commits here.
    pub fn end_edit(&mut self) {
        if !self.editing {
            log::warn!("[EditHistory] end_edit: no active edit");
            return;
        }
        match &mut self.backend {
            Backend::Delta(history) => {
                history.end_edit();
            }
            Backend::Snapshot(_) => log::debug!("[EditHistory] end_edit"),
        }
        if !self.touched.is_empty() {
            self.touched_total += self.touched.len();
            self.edits += 1;
        }
        self.touched.clear();
        self.editing = false;
    }

    /// Note that block `(bx, by)` is about to be written.
    fn touch_block(&mut self, bx: u32, by: u32) {
        if !self.editing {
            return;
        }
        if let Some(index) = self.grid.block_index(bx, by) {
            self.touched.insert(index);
        }
        if let Backend::Delta(history) = &mut self.backend {
            history.record_modification(&self.grid, bx, by);
        }
    }

    pub fn set_pixel(&mut self, x: i32, y: i32, channel: usize, value: u8) {
        if channel >= BLOCK_CHANNELS {
            return;
        }
        let Some((bx, by)) = self.grid.pixel_to_block(x, y) else {
            return;
        };
        self.touch_block(bx, by);
        self.grid.set_pixel(x, y, channel, value);
    }

    pub fn get_pixel(&self, x: i32, y: i32, channel: usize) -> u8 {
        self.grid.get_pixel(x, y, channel)
    }

    /// Make the clipped region fully transparent (alpha = 0). Returns the
    /// number of pixels written.
    pub fn delete_selection_region(&mut self, x: i32, y: i32, w: i32, h: i32) -> usize {
        let Some(range) = self.grid.affected_block_range(x, y, w, h) else {
            log::debug!("[EditHistory] delete_selection_region: empty region");
            return 0;
        };

        let timer = ScopeTimer::new("delete_selection_region");
        log::info!(
            "[EditHistory] delete_selection_region: affecting {} blocks (from ({},{}) to ({},{}))",
            range.block_count(),
            range.start_bx,
            range.start_by,
            range.end_bx,
            range.end_by
        );

        for (bx, by) in range.iter() {
            self.touch_block(bx, by);
        }
        let written = self.grid.fill_channel(x, y, w, h, 3, 0);

        log::info!(
            "[EditHistory] delete_selection_region: {} pixels in {:.3}ms",
            written,
            timer.elapsed_ms()
        );
        written
    }

    pub fn undo(&mut self) -> bool {
        if self.editing {
            log::warn!("[EditHistory] undo: edit still open, ending it");
            self.end_edit();
        }
        let timer = ScopeTimer::new("history_undo");
        let undone = match &mut self.backend {
            Backend::Delta(history) => history.undo(&mut self.grid),
            Backend::Snapshot(stack) => match stack.undo(&mut self.grid) {
                Some(label) => {
                    log::info!("[EditHistory] undo: '{}'", label);
                    true
                }
                None => false,
            },
        };
        if undone {
            self.last_undo_ms = timer.elapsed_ms();
        } else {
            log::debug!("[EditHistory] undo: no history available");
        }
        undone
    }

    pub fn redo(&mut self) -> bool {
        if self.editing {
            log::warn!("[EditHistory] redo: edit still open, ending it");
            self.end_edit();
        }
        let timer = ScopeTimer::new("history_redo");
        let redone = match &mut self.backend {
            Backend::Delta(history) => history.redo(&mut self.grid),
            Backend::Snapshot(stack) => match stack.redo(&mut self.grid) {
                Some(label) => {
                    log::info!("[EditHistory] redo: '{}'", label);
                    true
                }
                None => false,
            },
        };
        if redone {
            self.last_redo_ms = timer.elapsed_ms();
        } else {
            log::debug!("[EditHistory] redo: no redo available");
        }
        redone
    }

    pub fn can_undo(&self) -> bool {
        match &self.backend {
            Backend::Delta(history) => history.can_undo(),
            Backend::Snapshot(stack) => stack.applied > 0,
        }
    }

    pub fn can_redo(&self) -> bool {
        match &self.backend {
            Backend::Delta(history) => history.can_redo(),
            Backend::Snapshot(stack) => stack.applied < stack.snapshots.len(),
        }
    }

    /// Forget all history; the live image is kept.
    pub fn clear(&mut self) {
        match &mut self.backend {
            Backend::Delta(history) => history.clear(),
            Backend::Snapshot(stack) => stack.clear(),
        }
        self.editing = false;
        self.touched.clear();
        self.touched_total = 0;
        self.edits = 0;
        self.last_undo_ms = 0.0;
        self.last_redo_ms = 0.0;
    }

    pub fn width(&self) -> u32 {
        self.grid.width()
    }

    pub fn height(&self) -> u32 {
        self.grid.height()
    }

    pub fn is_valid(&self) -> bool {
        self.grid.is_valid()
    }

    /// Read-only view of the live grid.
    pub fn grid(&self) -> &BlockGrid {
        &self.grid
    }

    pub fn pool(&self) -> &BlockPool {
        &self.pool
    }

    pub fn backend(&self) -> HistoryBackend {
        self.config.backend
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    pub fn is_editing(&self) -> bool {
        self.editing
    }

    /// Number of stored transactions.
    pub fn history_len(&self) -> usize {
        match &self.backend {
            Backend::Delta(history) => history.len(),
            Backend::Snapshot(stack) => stack.snapshots.len(),
        }
    }

    /// Index of the latest applied transaction, `None` at the initial state.
    pub fn current_index(&self) -> Option<usize> {
        match &self.backend {
            Backend::Delta(history) => history.current_index(),
            Backend::Snapshot(stack) => stack.applied.checked_sub(1),
        }
    }

    pub fn labels(&self) -> Vec<&str> {
        match &self.backend {
            Backend::Delta(history) => history.labels(),
            Backend::Snapshot(stack) => stack
                .snapshots
                .iter()
                .map(|s| s.label.as_str())
                .collect(),
        }
    }

    pub fn stats(&self) -> PerformanceStats {
        let total_memory_bytes = match &self.backend {
            Backend::Delta(history) => history.stats().total_memory_bytes,
            Backend::Snapshot(stack) => stack.memory_bytes(),
        };
        PerformanceStats {
            last_undo_ms: self.last_undo_ms,
            last_redo_ms: self.last_redo_ms,
            total_memory_bytes,
            average_blocks_per_edit: self.touched_total.checked_div(self.edits).unwrap_or(0),
        }
    }
}

impl Default for EditHistory {
    fn default() -> Self {
        Self::new()
    }
}
