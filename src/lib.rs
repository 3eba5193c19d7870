pub mod canvas;
pub mod utils;

pub use canvas::block::{BLOCK_BYTES, BLOCK_SIZE, Block, BlockRef};
pub use canvas::grid::{BlockGrid, BlockRange, PixelBuffer};
pub use canvas::history::{DeltaHistory, HistoryEntry, PerformanceStats};
pub use canvas::pool::{BlockPool, PoolStats};
pub use canvas::session::{EditHistory, HistoryBackend};
pub use utils::config::HistoryConfig;
