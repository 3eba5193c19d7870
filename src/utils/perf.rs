//! Side-by-side timing of the two history backends.
//!
//! Runs the same workload (a series of rectangular deletes, then undo and redo
//! of all of them) against each backend on a synthetic gradient image.

use std::time::Instant;

use rand::Rng;

use crate::canvas::grid::PixelBuffer;
use crate::canvas::session::{EditHistory, HistoryBackend};
use crate::utils::config::HistoryConfig;

/// Workload shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Workload {
    pub width: u32,
    pub height: u32,
    pub selection_width: u32,
    pub selection_height: u32,
    pub operations: usize,
}

impl Workload {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            selection_width: 100,
            selection_height: 100,
            operations: 20,
        }
    }
}

/// Timings for one backend.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackendReport {
    pub backend: HistoryBackend,
    pub edit_ms: f64,
    pub undo_ms: f64,
    pub redo_ms: f64,
    pub memory_bytes: usize,
    pub average_blocks_per_edit: usize,
    /// Undo-all then redo-all reproduced the edited image exactly.
    pub consistent: bool,
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Top-left corners for the workload's deletes, shared by every backend.
pub fn selection_origins(workload: &Workload, rng: &mut impl Rng) -> Vec<(i32, i32)> {
    let max_x = workload.width.saturating_sub(workload.selection_width).max(1);
    let max_y = workload.height.saturating_sub(workload.selection_height).max(1);
    (0..workload.operations)
        .map(|_| {
            (
                rng.random_range(0..max_x) as i32,
                rng.random_range(0..max_y) as i32,
            )
        })
        .collect()
}

/// Run the workload against one backend.
pub fn run_backend(
    backend: HistoryBackend,
    workload: &Workload,
    origins: &[(i32, i32)],
) -> BackendReport {
    let config = HistoryConfig::default()
        .with_backend(backend)
        .with_max_entries(workload.operations + 10);
    let mut history = EditHistory::with_config(config);
    history.create_from_image(&PixelBuffer::gradient(workload.width, workload.height));

    let start = Instant::now();
    for (i, &(x, y)) in origins.iter().enumerate() {
        history.begin_edit(format!("Delete selection {}", i + 1));
        history.delete_selection_region(
            x,
            y,
            workload.selection_width as i32,
            workload.selection_height as i32,
        );
        history.end_edit();
    }
    let edit_ms = elapsed_ms(start);
    let edited = history.to_pixel_buffer();
    let stats = history.stats();

    let start = Instant::now();
    while history.undo() {}
    let undo_ms = elapsed_ms(start);

    let start = Instant::now();
    while history.redo() {}
    let redo_ms = elapsed_ms(start);

    BackendReport {
        backend,
        edit_ms,
        undo_ms,
        redo_ms,
        memory_bytes: stats.total_memory_bytes,
        average_blocks_per_edit: stats.average_blocks_per_edit,
        consistent: history.to_pixel_buffer() == edited,
    }
}

/// Run the workload against both backends with identical selections.
pub fn compare_backends(workload: &Workload) -> Vec<BackendReport> {
    let origins = selection_origins(workload, &mut rand::rng());
    log::info!(
        "=== Performance comparison: {}x{} image, {}x{} selection, {} operations ===",
        workload.width,
        workload.height,
        workload.selection_width,
        workload.selection_height,
        workload.operations
    );
    [HistoryBackend::Snapshot, HistoryBackend::Delta]
        .into_iter()
        .map(|backend| run_backend(backend, workload, &origins))
        .collect()
}

/// Human-readable table of a comparison run.
pub fn format_reports(reports: &[BackendReport]) -> String {
    let mut out = format!(
        "{:<10} {:>10} {:>10} {:>10} {:>12} {:>8}\n",
        "backend", "edit ms", "undo ms", "redo ms", "memory KB", "blocks"
    );
    for r in reports {
        out.push_str(&format!(
            "{:<10} {:>10.2} {:>10.2} {:>10.2} {:>12} {:>8}{}\n",
            r.backend.label(),
            r.edit_ms,
            r.undo_ms,
            r.redo_ms,
            r.memory_bytes / 1024,
            r.average_blocks_per_edit,
            if r.consistent { "" } else { "  MISMATCH" }
        ));
    }
    out
}
