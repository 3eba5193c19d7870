use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use rusty_tilestore::{
    BlockGrid, BlockPool, DeltaHistory, EditHistory, HistoryBackend, HistoryConfig, PixelBuffer,
};

const BACKENDS: [HistoryBackend; 2] = [HistoryBackend::Delta, HistoryBackend::Snapshot];

fn noise(width: u32, height: u32, seed: u64) -> PixelBuffer {
    let mut rng = StdRng::seed_from_u64(seed);
    let pixels = (0..width * height * 4).map(|_| rng.random()).collect();
    PixelBuffer::from_rgba(width, height, pixels)
}

fn history(backend: HistoryBackend, max_entries: usize, image: &PixelBuffer) -> EditHistory {
    let config = HistoryConfig::default()
        .with_backend(backend)
        .with_max_entries(max_entries);
    let mut history = EditHistory::with_config(config);
    assert!(history.create_from_image(image));
    history
}

#[test]
fn flatten_inverts_slicing_for_ragged_sizes() {
    let pool = BlockPool::default();
    for (w, h) in [(1, 1), (63, 65), (129, 1), (200, 77)] {
        let buffer = noise(w, h, u64::from(w * h));
        let grid = BlockGrid::from_pixel_buffer(&buffer, &pool);
        assert_eq!(grid.to_pixel_buffer(), buffer, "{w}x{h}");
    }
}

#[test]
fn deep_clone_diverges_both_ways() {
    let pool = BlockPool::default();
    let buffer = noise(150, 90, 1);
    let mut original = BlockGrid::from_pixel_buffer(&buffer, &pool);
    let mut copy = original.clone_deep();

    let before = original.get_pixel(10, 10, 0);
    copy.set_pixel(10, 10, 0, before.wrapping_add(1));
    assert_eq!(original.get_pixel(10, 10, 0), before);

    let before = copy.get_pixel(140, 80, 2);
    original.set_pixel(140, 80, 2, before.wrapping_add(1));
    assert_eq!(copy.get_pixel(140, 80, 2), before);
}

#[test]
fn shallow_clone_diverges_through_copy_on_write() {
    let pool = BlockPool::default();
    let buffer = noise(128, 128, 2);
    let mut live = BlockGrid::from_pixel_buffer(&buffer, &pool);
    let snapshot = live.clone();

    live.set_pixel(0, 0, 3, 0);
    live.set_pixel(127, 127, 3, 0);
    assert_eq!(snapshot.to_pixel_buffer(), buffer);
    assert_eq!(live.shared_block_count(), 2);
}

#[test]
fn delta_keeps_one_block_per_touched_block() {
    let pool = BlockPool::default();
    let mut grid = BlockGrid::from_pixel_buffer(&noise(256, 256, 3), &pool);
    let mut history = DeltaHistory::default();

    // 3 distinct blocks, thousands of writes
    history.begin_edit(&grid, "scribble");
    for _ in 0..10 {
        for y in 0..64 {
            for x in 0..64 {
                for (ox, oy) in [(0, 0), (64, 0), (128, 192)] {
                    let (px, py) = (x + ox, y + oy);
                    if let Some((bx, by)) = grid.pixel_to_block(px, py) {
                        history.record_modification(&grid, bx, by);
                    }
                    grid.set_pixel(px, py, 1, 0);
                }
            }
        }
    }
    assert!(history.end_edit());
    assert_eq!(history.retained_block_count(), 3);
    assert_eq!(history.entry(0).map(|e| e.block_count()), Some(3));
}

#[test]
fn empty_transactions_leave_no_entry() {
    let image = noise(100, 100, 4);
    let mut history = history(HistoryBackend::Delta, 10, &image);
    for _ in 0..5 {
        history.begin_edit("noop");
        history.end_edit();
    }
    assert_eq!(history.history_len(), 0);
    assert!(!history.can_undo());
}

#[test]
fn undo_all_then_redo_all_restores_final_image() {
    for backend in BACKENDS {
        let image = noise(300, 220, 5);
        let mut history = history(backend, 100, &image);
        let mut rng = StdRng::seed_from_u64(99);

        let edits = 12;
        for i in 0..edits {
            history.begin_edit(format!("edit {i}"));
            if i % 2 == 0 {
                // partly off-image, never fully
                let (x, y) = (rng.random_range(-50..250), rng.random_range(-50..170));
                let (w, h) = (rng.random_range(60..120), rng.random_range(60..120));
                assert!(history.delete_selection_region(x, y, w, h) > 0);
            } else {
                for _ in 0..200 {
                    let (x, y) = (rng.random_range(0..300), rng.random_range(0..220));
                    history.set_pixel(x, y, rng.random_range(0..4), rng.random());
                }
            }
            history.end_edit();
        }
        let final_image = history.to_pixel_buffer();
        let applied = history.history_len();
        assert_eq!(applied, edits, "{backend}");

        for _ in 0..applied {
            assert!(history.undo(), "{backend}");
        }
        assert!(!history.undo(), "{backend}");
        assert_eq!(history.to_pixel_buffer(), image, "{backend}");

        for _ in 0..applied {
            assert!(history.redo(), "{backend}");
        }
        assert!(!history.redo(), "{backend}");
        assert_eq!(history.to_pixel_buffer(), final_image, "{backend}");
    }
}

#[test]
fn new_edit_after_undo_drops_redo_branch() {
    for backend in BACKENDS {
        let image = noise(128, 128, 6);
        let mut history = history(backend, 10, &image);

        for label in ["first", "second"] {
            history.begin_edit(label);
            history.delete_selection_region(0, 0, 10, 10);
            history.set_pixel(100, 100, 0, 1);
            history.end_edit();
        }
        assert!(history.undo());
        assert!(history.can_redo());

        history.begin_edit("branch");
        history.set_pixel(5, 5, 0, 42);
        history.end_edit();

        assert!(!history.redo(), "{backend}");
        assert_eq!(history.labels(), vec!["first", "branch"], "{backend}");
    }
}

#[test]
fn ceiling_drops_the_oldest_entry() {
    for backend in BACKENDS {
        let ceiling = 4;
        let image = noise(128, 128, 7);
        let mut history = history(backend, ceiling, &image);

        for i in 0..=ceiling {
            history.begin_edit(format!("edit {i}"));
            history.set_pixel(i as i32, 0, 0, 0);
            history.end_edit();
        }
        assert_eq!(history.history_len(), ceiling, "{backend}");
        assert_eq!(history.current_index(), Some(ceiling - 1), "{backend}");
        assert_eq!(history.labels()[0], "edit 1", "{backend}");

        let mut undone = 0;
        while history.undo() {
            undone += 1;
        }
        assert_eq!(undone, ceiling, "{backend}");
        // the evicted first edit is baked in
        assert_eq!(history.get_pixel(0, 0, 0), 0, "{backend}");
    }
}

#[test]
fn delete_selection_on_large_image_then_undo() {
    for backend in BACKENDS {
        let image = noise(1024, 1024, 8);
        let mut history = history(backend, 50, &image);

        history.begin_edit("Delete selection");
        assert_eq!(history.delete_selection_region(500, 500, 100, 100), 10_000);
        history.end_edit();

        let deleted = history.to_pixel_buffer();
        for y in 0..1024usize {
            for x in 0..1024usize {
                let i = (y * 1024 + x) * 4;
                let inside = (500..600).contains(&x) && (500..600).contains(&y);
                if inside {
                    assert_eq!(deleted.pixels[i + 3], 0);
                    assert_eq!(deleted.pixels[i..i + 3], image.pixels[i..i + 3]);
                } else {
                    assert_eq!(deleted.pixels[i..i + 4], image.pixels[i..i + 4]);
                }
            }
        }

        assert!(history.undo(), "{backend}");
        assert_eq!(history.to_pixel_buffer(), image, "{backend}");
    }
}

#[test]
fn delta_backend_only_stores_touched_blocks() {
    let image = noise(1024, 1024, 9);
    let mut delta = history(HistoryBackend::Delta, 50, &image);
    let mut snapshot = history(HistoryBackend::Snapshot, 50, &image);

    for history in [&mut delta, &mut snapshot] {
        history.begin_edit("Delete selection");
        history.delete_selection_region(500, 500, 100, 100);
        history.end_edit();
    }

    // 500..600 spans blocks 7..=9 on both axes
    assert_eq!(delta.stats().average_blocks_per_edit, 9);
    assert_eq!(delta.stats().total_memory_bytes, 9 * rusty_tilestore::BLOCK_BYTES);
    assert_eq!(snapshot.stats().total_memory_bytes, 256 * rusty_tilestore::BLOCK_BYTES);
}

#[test]
fn undo_history_releases_blocks_to_the_pool() {
    let pool = BlockPool::new(10_000);
    let config = HistoryConfig::default().with_max_entries(1);
    let mut history = EditHistory::with_pool(config, pool.clone());
    assert!(history.create_from_image(&noise(256, 256, 10)));

    for i in 0..3 {
        history.begin_edit(format!("edit {i}"));
        history.delete_selection_region(0, 0, 64, 64);
        history.end_edit();
    }
    // evicted entries handed their blocks back
    assert!(pool.free_count() >= 1);
    assert_eq!(history.history_len(), 1);
}
