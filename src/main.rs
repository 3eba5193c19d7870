use anyhow::{Context, bail};
use rand::Rng;

use rusty_tilestore::utils::config::{RunOptions, parse_args};
use rusty_tilestore::utils::exporter::{ExportFormat, export_history, load_pixel_buffer};
use rusty_tilestore::utils::perf::{Workload, compare_backends, format_reports};
use rusty_tilestore::{EditHistory, PixelBuffer};

const DEFAULT_SIZE: u32 = 1024;
const STROKE_PIXELS: usize = 64;

/// Scatter short random strokes, one transaction each.
fn random_edits(history: &mut EditHistory, count: usize) {
    let mut rng = rand::rng();
    let (w, h) = (history.width() as i32, history.height() as i32);
    for i in 0..count {
        history.begin_edit(format!("Random stroke {}", i + 1));
        let (mut x, mut y) = (rng.random_range(0..w), rng.random_range(0..h));
        let color: [u8; 3] = rng.random();
        for _ in 0..STROKE_PIXELS {
            for (channel, value) in color.iter().enumerate() {
                history.set_pixel(x, y, channel, *value);
            }
            x += rng.random_range(-2..=2);
            y += rng.random_range(-2..=2);
        }
        history.end_edit();
    }
}

fn run(options: RunOptions) -> anyhow::Result<()> {
    if let Some((width, height)) = options.compare {
        let reports = compare_backends(&Workload::new(width, height));
        print!("{}", format_reports(&reports));
        return Ok(());
    }

    let image = match &options.input {
        Some(path) => load_pixel_buffer(path)?,
        None => {
            log::info!("no input given, using a {DEFAULT_SIZE}x{DEFAULT_SIZE} gradient");
            PixelBuffer::gradient(DEFAULT_SIZE, DEFAULT_SIZE)
        }
    };

    let mut history = EditHistory::with_config(options.config.clone());
    if !history.create_from_image(&image) {
        bail!("image could not be loaded into the block store");
    }

    for (i, region) in options.deletes.iter().enumerate() {
        history.begin_edit(format!("Delete selection {}", i + 1));
        history.delete_selection_region(region.x, region.y, region.w, region.h);
        history.end_edit();
    }
    random_edits(&mut history, options.random_edits);

    for _ in 0..options.undo {
        if !history.undo() {
            log::warn!("nothing left to undo");
            break;
        }
    }
    for _ in 0..options.redo {
        if !history.redo() {
            log::warn!("nothing left to redo");
            break;
        }
    }

    let stats = history.stats();
    println!(
        "{} backend: {} entries (current {:?}), {} KB retained, {} blocks/edit, pool {:?}",
        history.backend(),
        history.history_len(),
        history.current_index(),
        stats.total_memory_bytes / 1024,
        stats.average_blocks_per_edit,
        history.pool().stats()
    );
    for (i, label) in history.labels().iter().enumerate() {
        println!("  [{i}] {label}");
    }

    if let Some(path) = &options.output {
        let format = ExportFormat::from_path(path)
            .with_context(|| format!("cannot tell image format of {}", path.display()))?;
        export_history(&history, path, format)?;
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let options = parse_args(std::env::args().skip(1))?;
    run(options)
}
