//! # Kindred Performance Benchmarks
//!
//! - **Distance**: the weighted metric on its own
//! - **Nearest neighbours**: k-nearest queries against stores of growing size
//! - **Lottery**: drawing a whole seed pool
//!
//! ```bash
//! cargo bench
//! cargo bench nearest
//! ```

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use kindred::db::FeatureStore;
use kindred::features::{weighted_distance, AudioProfile, FeatureVector};
use kindred::lottery::{ArtistWeight, SelectionLottery};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::hint::black_box;

fn random_profile(rng: &mut StdRng) -> AudioProfile {
    AudioProfile {
        tempo_bpm: rng.gen_range(60.0..180.0),
        musical_key: rng.gen_range(0..12),
        beat_regularity: rng.gen(),
        brightness_hz: rng.gen_range(500.0..5000.0),
        treble_hz: rng.gen_range(1000.0..10000.0),
        fullness_hz: rng.gen_range(500.0..5000.0),
        dynamic_range_db: rng.gen_range(5.0..40.0),
        percussiveness: rng.gen(),
        loudness: rng.gen(),
        warmth: rng.gen(),
        punch: rng.gen(),
        texture: rng.gen_range(-20.0..20.0),
        energy: rng.gen(),
        danceability: rng.gen(),
        mood_positive: rng.gen(),
        acousticness: rng.gen(),
        instrumentalness: rng.gen(),
    }
}

/// In-memory store with `rows` random tracks
fn populated_store(rows: usize) -> FeatureStore {
    let store = FeatureStore::open_in_memory().expect("Failed to open store");
    let mut rng = StdRng::seed_from_u64(42);
    for i in 0..rows {
        store
            .upsert(&FeatureVector {
                track_id: format!("track-{i}"),
                artist_name: format!("Artist {}", i % 97),
                track_name: format!("Track {i}"),
                source_uri: format!("spotify:track:{i}"),
                profile: random_profile(&mut rng),
                popularity: (i % 100) as i64,
                match_title: String::new(),
            })
            .expect("Failed to insert row");
    }
    store
}

fn benchmark_distance(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(7);
    let a = random_profile(&mut rng);
    let b = random_profile(&mut rng);
    c.bench_function("weighted_distance", |bench| {
        bench.iter(|| weighted_distance(black_box(&a), black_box(&b)));
    });
}

fn benchmark_nearest(c: &mut Criterion) {
    let mut group = c.benchmark_group("nearest");
    let mut rng = StdRng::seed_from_u64(9);
    let query = random_profile(&mut rng);

    for rows in [100, 1_000, 10_000] {
        let store = populated_store(rows);
        let exclude: HashSet<String> = (0..50).map(|i| format!("track-{i}")).collect();
        group.bench_with_input(BenchmarkId::new("k_nearest_20", rows), &rows, |bench, _| {
            bench.iter(|| store.k_nearest(black_box(&query), &exclude, 20).expect("query failed"));
        });
    }
    group.finish();
}

fn benchmark_lottery(c: &mut Criterion) {
    let members: Vec<ArtistWeight> = (0..500)
        .map(|i| ArtistWeight {
            artist_id: format!("artist-{i}"),
            display_name: format!("Artist {i}"),
            liked_count: i % 5 + 1,
            weight: f64::from(i % 10 + 1),
        })
        .collect();

    c.bench_function("lottery_drain_500", |bench| {
        bench.iter_batched(
            || SelectionLottery::new(members.clone(), StdRng::seed_from_u64(3)),
            |mut lottery| {
                while let Some(drawn) = lottery.draw_next() {
                    black_box(drawn);
                }
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, benchmark_distance, benchmark_nearest, benchmark_lottery);
criterion_main!(benches);
