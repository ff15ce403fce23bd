//! Spatial index correctness: sorted keys, start table and padding behaviour.

use glam::Vec2;
use kernel::{
    BufferId, CommandQueue, ExecBackend, GridLayout, ParticleArrays, ParticleSeed, SpatialHashSorter, EMPTY_START,
    SENTINEL_KEY,
};
use proptest::prelude::*;

fn queue(backend: ExecBackend) -> CommandQueue {
    let mut q = CommandQueue::new(backend);
    q.mark_valid(BufferId::Particles);
    q
}

fn particles(points: &[Vec2], capacity: usize) -> ParticleArrays {
    let mut pa = ParticleArrays::with_capacity(capacity);
    let seeds: Vec<_> = points.iter().copied().map(ParticleSeed::at).collect();
    assert_eq!(pa.admit(&seeds), points.len());
    pa
}

/// Check every property the downstream kernels rely on.
fn check_index(sorter: &SpatialHashSorter, pa: &ParticleArrays) {
    let layout = sorter.layout();
    let lookup = sorter.lookup();
    let n = pa.len();

    // non-decreasing keys, sentinels exactly at the tail
    assert!(lookup.windows(2).all(|w| w[0].key <= w[1].key), "lookup not sorted");
    assert!(lookup[..n].iter().all(|e| e.key != SENTINEL_KEY), "sentinel before a real entry");
    assert!(lookup[n..].iter().all(|e| e.key == SENTINEL_KEY), "real entry in the padding");

    // each active particle appears once, under its own cell key
    let mut seen = vec![false; n];
    for e in &lookup[..n] {
        let i = e.index as usize;
        assert!(i < n, "padding index {i} among real entries");
        assert!(!seen[i], "particle {i} listed twice");
        seen[i] = true;
        assert_eq!(e.key, layout.key_of(pa.pos[i]));
    }

    // start table points at the first entry of each key
    let starts = sorter.start_indices();
    for (key, &start) in starts.iter().enumerate() {
        let first = lookup.iter().position(|e| e.key == key as u32);
        match first {
            Some(f) => assert_eq!(start as usize, f, "start of cell {key}"),
            None => assert_eq!(start, EMPTY_START, "cell {key} should be empty"),
        }
    }
}

#[test]
fn thirty_seven_particles_in_six_cells() {
    let layout = GridLayout::new(Vec2::new(20.0, 20.0), 2.0).unwrap();
    assert_eq!((layout.width(), layout.height()), (10, 10));

    let cells = [(0, 0, 7), (3, 4, 6), (9, 9, 6), (5, 5, 6), (2, 7, 6), (8, 1, 6)];
    let mut points = Vec::new();
    for &(cx, cy, count) in &cells {
        for k in 0..count {
            let o = 0.1 + 0.25 * k as f32;
            points.push(Vec2::new(cx as f32 * 2.0 + o, cy as f32 * 2.0 + 1.9 - o));
        }
    }
    assert_eq!(points.len(), 37);

    let mut sorter = SpatialHashSorter::new(layout, 1024).unwrap();
    let mut pa = particles(&points, 1024);
    let mut q = queue(ExecBackend::Serial);
    assert!(sorter.run(&mut q, &mut pa).unwrap());
    check_index(&sorter, &pa);

    let starts = sorter.start_indices();
    let mut occupied: Vec<(usize, u32)> = starts
        .iter()
        .enumerate()
        .filter(|(_, &s)| s != EMPTY_START)
        .map(|(k, &s)| (k, s))
        .collect();
    assert_eq!(occupied.len(), 6);

    // (next start or end) - start, summed over the occupied cells
    occupied.sort_by_key(|&(_, s)| s);
    let total: u32 = occupied
        .iter()
        .enumerate()
        .map(|(i, &(_, s))| occupied.get(i + 1).map_or(37, |&(_, next)| next) - s)
        .sum();
    assert_eq!(total, 37);

    for &(cx, cy, count) in &cells {
        let key = cx + cy * 10;
        assert_eq!(sorter.cell_range(key).len(), count as usize, "cell ({cx}, {cy})");
    }
}

#[test]
fn parallel_backend_matches_serial_keys() {
    let layout = GridLayout::with_dims(16, 16, 1.0).unwrap();
    let points: Vec<Vec2> = (0..500)
        .map(|i| {
            let t = i as f32 * 0.618_034;
            Vec2::new((t * 7.3).rem_euclid(16.0), (t * 3.1).rem_euclid(16.0))
        })
        .collect();

    let mut serial = SpatialHashSorter::new(layout, 600).unwrap();
    let mut pa_s = particles(&points, 600);
    serial.run(&mut queue(ExecBackend::Serial), &mut pa_s).unwrap();

    let mut parallel = SpatialHashSorter::new(layout, 600).unwrap();
    let mut pa_p = particles(&points, 600);
    parallel.run(&mut queue(ExecBackend::parallel(4).unwrap()), &mut pa_p).unwrap();

    check_index(&parallel, &pa_p);
    let keys = |s: &SpatialHashSorter| s.lookup().iter().map(|e| e.key).collect::<Vec<_>>();
    assert_eq!(keys(&serial), keys(&parallel));
    assert_eq!(serial.start_indices(), parallel.start_indices());
}

#[test]
fn positions_outside_grid_clamp_to_edge_cells() {
    let layout = GridLayout::with_dims(4, 4, 1.0).unwrap();
    let mut sorter = SpatialHashSorter::new(layout, 4).unwrap();
    let mut pa = particles(&[Vec2::new(-3.0, -3.0), Vec2::new(100.0, 100.0), Vec2::new(2.5, -1.0)], 4);
    sorter.run(&mut queue(ExecBackend::Serial), &mut pa).unwrap();
    check_index(&sorter, &pa);
    assert_eq!(sorter.start_index(0), Some(0));
    assert_eq!(sorter.start_index(2), Some(1));
    assert_eq!(sorter.start_index(15), Some(2));
}

#[test]
fn shrinking_population_leaves_no_stale_entries() {
    let layout = GridLayout::with_dims(4, 4, 1.0).unwrap();
    let mut sorter = SpatialHashSorter::new(layout, 8).unwrap();
    let points: Vec<Vec2> = (0..8).map(|i| Vec2::new(i as f32 * 0.5, 3.5)).collect();
    let mut pa = particles(&points, 8);
    let mut q = queue(ExecBackend::Serial);
    sorter.run(&mut q, &mut pa).unwrap();
    check_index(&sorter, &pa);

    pa.truncate(3);
    sorter.run(&mut q, &mut pa).unwrap();
    check_index(&sorter, &pa);
    assert_eq!(sorter.occupied_cells(), 2);
}

proptest! {
    #[test]
    fn any_population_is_indexed(
        points in prop::collection::vec((-2.0f32..22.0, -2.0f32..12.0), 0..=64),
        parallel in any::<bool>(),
    ) {
        let layout = GridLayout::new(Vec2::new(20.0, 10.0), 2.5).unwrap();
        let mut sorter = SpatialHashSorter::new(layout, 64).unwrap();
        let points: Vec<Vec2> = points.into_iter().map(|(x, y)| Vec2::new(x, y)).collect();
        let mut pa = particles(&points, 64);
        let backend = if parallel { ExecBackend::parallel(2).unwrap() } else { ExecBackend::Serial };
        let mut q = queue(backend);

        let ran = sorter.run(&mut q, &mut pa).unwrap();
        prop_assert_eq!(ran, !points.is_empty());
        if ran {
            check_index(&sorter, &pa);
            prop_assert!(q.is_valid(BufferId::StartIndices));
        } else {
            prop_assert!(!q.is_valid(BufferId::StartIndices));
        }
    }
}
