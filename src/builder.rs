//! # Batch Feature Builder
//!
//! Fills the feature store for many tracks at once. A fixed number of
//! workers pull tracks, in order, from a shared cursor; each worker runs the
//! blocking resolve-or-extract pipeline for its track.
//!
//! ## Shared state
//!
//! - the [`FeatureStore`] (its own lock serialises reads and writes)
//! - a progress lock guarding the counters and the progress log lines
//! - an abort flag
//!
//! ## Rate limits
//!
//! When any worker sees [`Error::RateLimited`] it raises the abort flag.
//! Workers finish what they are doing but take no new track; every track not
//! yet dispatched is reported as cancelled.

use crate::db::FeatureStore;
use crate::error::{Error, Result};
use crate::oracle::MediaOracle;
use crate::provider::{self, ArtistRef, MetadataProvider, Track};
use crate::resolver::{FeatureResolver, Source};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Worker count bounds.
pub const MIN_WORKERS: usize = 1;
pub const MAX_WORKERS: usize = 10;

/// Which tracks to build features for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchSource {
    LikedSongs,
    Playlist(String),
    /// Every public playlist of a user
    UserPlaylists(String),
    /// Every release of an artist
    Artist(String),
    Album(String),
    Tracks(Vec<String>),
}

/// How far to widen a source and where to stop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectOptions {
    /// Also take in the discography of each track's primary artist
    pub extensive: bool,
    pub max_tracks: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub stored: usize,
    pub skipped_existing: usize,
    pub unresolvable: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Set when a rate limit stopped the batch
    pub aborted: Option<String>,
}

#[derive(Debug)]
enum ItemOutcome {
    Stored,
    SkippedExisting,
    Unresolvable(String),
    Failed(String),
    RateLimited(String),
}

/// Shared cursor over the batch plus the abort flag.
#[derive(Debug, Default)]
struct Dispatch {
    cursor: AtomicUsize,
    aborted: AtomicBool,
    /// Indices claimed after the abort was raised; never processed
    late_claims: AtomicUsize,
}

impl Dispatch {
    fn claim<'t>(&self, tracks: &'t [Track]) -> Option<&'t Track> {
        let index = self.cursor.fetch_add(1, Ordering::SeqCst);
        let track = tracks.get(index)?;
        if self.aborted.load(Ordering::SeqCst) {
            self.late_claims.fetch_add(1, Ordering::SeqCst);
            return None;
        }
        Some(track)
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    fn cancelled(&self, total: usize) -> usize {
        let claimed = self.cursor.load(Ordering::SeqCst).min(total);
        total - claimed + self.late_claims.load(Ordering::SeqCst)
    }
}

struct Progress {
    report: BatchReport,
    done: usize,
}

fn skip_missing<T>(label: &str, result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(Error::NotFound(_)) => {
            warn!("{label} not found, skipping");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn source_tracks(provider: &dyn MetadataProvider, source: &BatchSource) -> Result<Vec<Track>> {
    match source {
        BatchSource::LikedSongs => provider::all_liked_tracks(provider),
        BatchSource::Playlist(id) => provider::all_playlist_tracks(provider, id),
        BatchSource::UserPlaylists(user) => {
            let playlists = provider::all_user_playlists(provider, user)?;
            info!("{} public playlists for {user}", playlists.len());
            let mut tracks = Vec::new();
            for id in &playlists {
                let label = format!("Playlist {id}");
                tracks.extend(skip_missing(&label, provider::all_playlist_tracks(provider, id))?.unwrap_or_default());
            }
            Ok(tracks)
        }
        BatchSource::Artist(id) => provider::artist_discography(provider, id),
        BatchSource::Album(id) => provider::all_album_tracks(provider, id),
        BatchSource::Tracks(ids) => {
            let mut tracks = Vec::with_capacity(ids.len());
            for id in ids {
                tracks.extend(skip_missing(&format!("Track {id}"), provider.track(id))?);
            }
            Ok(tracks)
        }
    }
}

/// Resolve the tracks named by `source`, without duplicates and in source
/// order. Unknown explicit ids and vanished playlists are skipped.
///
/// In extensive mode the discography of every primary artist among the
/// source tracks is appended; each artist is expanded once, and only the
/// source tracks are expanded.
pub fn collect_tracks(
    provider: &dyn MetadataProvider,
    source: &BatchSource,
    options: CollectOptions,
) -> Result<Vec<Track>> {
    let cap = options.max_tracks.unwrap_or(usize::MAX);
    let mut seen = HashSet::new();
    let mut tracks: Vec<Track> = source_tracks(provider, source)?
        .into_iter()
        .filter(|t| seen.insert(t.id.clone()))
        .collect();

    if options.extensive {
        let mut expanded: HashSet<String> = HashSet::new();
        if let BatchSource::Artist(id) = source {
            expanded.insert(id.clone());
        }
        let primaries: Vec<ArtistRef> = tracks.iter().filter_map(|t| t.primary_artist().cloned()).collect();
        for artist in primaries {
            if tracks.len() >= cap {
                break;
            }
            if !expanded.insert(artist.id.clone()) {
                continue;
            }
            match provider::artist_discography(provider, &artist.id) {
                Ok(more) => {
                    let before = tracks.len();
                    tracks.extend(more.into_iter().filter(|t| seen.insert(t.id.clone())));
                    debug!("{} more tracks from {}", tracks.len() - before, artist.name);
                }
                Err(e) => warn!("Discography of {} skipped: {e}", artist.name),
            }
        }
    }

    if tracks.len() > cap {
        info!("Keeping the first {cap} of {} tracks", tracks.len());
        tracks.truncate(cap);
    }
    Ok(tracks)
}

pub struct BatchBuilder<'a> {
    store: &'a FeatureStore,
    oracle: &'a dyn MediaOracle,
    workers: usize,
}

impl<'a> BatchBuilder<'a> {
    pub fn new(store: &'a FeatureStore, oracle: &'a dyn MediaOracle, workers: usize) -> Self {
        Self {
            store,
            oracle,
            workers: workers.clamp(MIN_WORKERS, MAX_WORKERS),
        }
    }

    #[must_use]
    pub const fn workers(&self) -> usize {
        self.workers
    }

    /// Build features for `tracks`. Per-track failures are counted, not
    /// returned; only a failure to start the worker pool is an error.
    pub fn build(&self, tracks: &[Track]) -> Result<BatchReport> {
        let total = tracks.len();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("kindred-worker-{i}"))
            .build()
            .map_err(|e| Error::Config(format!("cannot start worker pool: {e}")))?;

        info!("Building features for {total} tracks with {} workers", self.workers);

        let dispatch = Dispatch::default();
        let progress = Mutex::new(Progress {
            report: BatchReport { total, ..BatchReport::default() },
            done: 0,
        });

        pool.scope(|scope| {
            for _ in 0..self.workers {
                scope.spawn(|_| {
                    while let Some(track) = dispatch.claim(tracks) {
                        let outcome = self.process(track);
                        if matches!(outcome, ItemOutcome::RateLimited(_)) {
                            dispatch.abort();
                        }
                        self.record(&progress, track, outcome);
                    }
                });
            }
        });

        let mut report = progress
            .into_inner()
            .map_err(|_| Error::Config("progress lock poisoned".to_string()))?
            .report;
        report.cancelled = dispatch.cancelled(total);

        if let Some(reason) = &report.aborted {
            warn!("Batch aborted ({reason}); {} tracks never started", report.cancelled);
        }
        info!(
            "Batch done: {} stored, {} already present, {} unresolvable, {} failed, {} cancelled",
            report.stored, report.skipped_existing, report.unresolvable, report.failed, report.cancelled
        );
        Ok(report)
    }

    fn process(&self, track: &Track) -> ItemOutcome {
        match self.store.is_complete(&track.id) {
            Ok(true) => return ItemOutcome::SkippedExisting,
            Ok(false) => {}
            Err(e) => return ItemOutcome::Failed(e.to_string()),
        }

        match FeatureResolver::new(self.store, self.oracle).resolve(track) {
            Ok(resolution) => match resolution.source {
                Source::Extracted => ItemOutcome::Stored,
                Source::Unsaved => ItemOutcome::Failed("write failed".to_string()),
                Source::Cached | Source::StoredElsewhere => ItemOutcome::SkippedExisting,
            },
            Err(Error::RateLimited(msg)) => ItemOutcome::RateLimited(msg),
            Err(Error::Unresolvable { reason, .. }) => ItemOutcome::Unresolvable(reason),
            Err(e) => ItemOutcome::Failed(e.to_string()),
        }
    }

    fn record(&self, progress: &Mutex<Progress>, track: &Track, outcome: ItemOutcome) {
        let Ok(mut guard) = progress.lock() else {
            warn!("Progress lock poisoned; result for {} lost", track.id);
            return;
        };
        guard.done += 1;
        let done = guard.done;
        let total = guard.report.total;
        let label = format!("'{}' by {}", track.name, track.artist_line());
        let report = &mut guard.report;

        match outcome {
            ItemOutcome::Stored => {
                report.stored += 1;
                info!("[{done}/{total}] stored {label}");
            }
            ItemOutcome::SkippedExisting => {
                report.skipped_existing += 1;
                debug!("[{done}/{total}] already present {label}");
            }
            ItemOutcome::Unresolvable(reason) => {
                report.unresolvable += 1;
                info!("[{done}/{total}] unresolvable {label}: {reason}");
            }
            ItemOutcome::Failed(reason) => {
                report.failed += 1;
                warn!("[{done}/{total}] failed {label}: {reason}");
            }
            ItemOutcome::RateLimited(reason) => {
                report.failed += 1;
                warn!("[{done}/{total}] rate limited on {label}: {reason}");
                report.aborted.get_or_insert(reason);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{AudioProfile, FeatureVector, RawFeatures};
    use crate::oracle::{MediaHit, MockMediaOracle};
    use crate::provider::{MockMetadataProvider, Page};

    fn track(id: &str) -> Track {
        Track {
            id: id.into(),
            name: format!("Song {id}"),
            artists: vec![ArtistRef { id: "a".into(), name: "Band".into() }],
            uri: format!("spotify:track:{id}"),
            popularity: 1,
        }
    }

    fn raw_features() -> RawFeatures {
        RawFeatures {
            tempo: 100.0,
            key_estimate: 0,
            beat_strength: 0.5,
            spectral_centroid: 2000.0,
            spectral_rolloff: 4000.0,
            spectral_bandwidth: 1800.0,
            spectral_contrast: 20.0,
            zero_crossing_rate: 0.07,
            rms_energy: 0.2,
            harmonic_mean: 0.04,
            percussive_mean: 0.03,
            mfcc_mean: -10.0,
            energy: 0.5,
            danceability: 0.5,
            valence: 0.5,
            acousticness: 0.5,
            instrumentalness: 0.1,
        }
    }

    #[test]
    fn test_worker_count_is_clamped() {
        let store = FeatureStore::open_in_memory().unwrap();
        let oracle = MockMediaOracle::new();
        assert_eq!(BatchBuilder::new(&store, &oracle, 0).workers(), 1);
        assert_eq!(BatchBuilder::new(&store, &oracle, 64).workers(), 10);
        assert_eq!(BatchBuilder::new(&store, &oracle, 4).workers(), 4);
    }

    #[test]
    fn test_existing_rows_need_no_oracle() {
        let store = FeatureStore::open_in_memory().unwrap();
        store
            .upsert(&FeatureVector {
                track_id: "t1".into(),
                artist_name: "Band".into(),
                track_name: "Song t1".into(),
                source_uri: "spotify:track:t1".into(),
                profile: AudioProfile { tempo_bpm: 100.0, ..AudioProfile::default() },
                popularity: 1,
                match_title: String::new(),
            })
            .unwrap();
        let mut oracle = MockMediaOracle::new();
        oracle.expect_search().never();

        let report = BatchBuilder::new(&store, &oracle, 2).build(&[track("t1")]).unwrap();
        assert_eq!(report.skipped_existing, 1);
        assert_eq!(report.stored, 0);
        assert!(report.aborted.is_none());
    }

    #[test]
    fn test_unresolvable_tracks_are_counted() {
        let store = FeatureStore::open_in_memory().unwrap();
        let mut oracle = MockMediaOracle::new();
        oracle.expect_search().returning(|_, _| {
            Ok(vec![MediaHit { id: "v".into(), title: "nothing alike".into(), uploader: None }])
        });
        let report = BatchBuilder::new(&store, &oracle, 3)
            .build(&[track("t1"), track("t2"), track("t3")])
            .unwrap();
        assert_eq!(report.unresolvable, 3);
        assert_eq!(report.cancelled, 0);
    }

    #[test]
    fn test_track_stored_by_another_worker_counts_as_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features.db");
        let store = FeatureStore::open(&path).unwrap();
        let other_worker = FeatureStore::open(&path).unwrap();

        let mut oracle = MockMediaOracle::new();
        oracle.expect_search().returning(|_, _| {
            Ok(vec![MediaHit { id: "v1".into(), title: "Band - Song t1".into(), uploader: None }])
        });
        oracle.expect_extract_features().times(1).returning(move |_, _| {
            let profile = AudioProfile { tempo_bpm: 100.0, ..AudioProfile::default() };
            other_worker
                .upsert(&FeatureVector {
                    track_id: "t1".into(),
                    artist_name: "Band".into(),
                    track_name: "Song t1".into(),
                    source_uri: "spotify:track:t1".into(),
                    profile,
                    popularity: 1,
                    match_title: String::new(),
                })
                .unwrap();
            Ok(raw_features())
        });

        let report = BatchBuilder::new(&store, &oracle, 1).build(&[track("t1")]).unwrap();
        assert_eq!(report.stored, 0);
        assert_eq!(report.skipped_existing, 1);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_no_track_is_handed_out_after_abort() {
        let tracks: Vec<Track> = (0..5).map(|i| track(&format!("t{i}"))).collect();
        let dispatch = Dispatch::default();
        assert_eq!(dispatch.claim(&tracks).unwrap().id, "t0");
        assert_eq!(dispatch.claim(&tracks).unwrap().id, "t1");

        dispatch.abort();
        assert!(dispatch.claim(&tracks).is_none());
        assert!(dispatch.claim(&tracks).is_none());
        assert_eq!(dispatch.cancelled(tracks.len()), 3);
    }

    #[test]
    fn test_exhausted_batch_cancels_nothing() {
        let tracks = vec![track("t0")];
        let dispatch = Dispatch::default();
        assert!(dispatch.claim(&tracks).is_some());
        assert!(dispatch.claim(&tracks).is_none());
        assert!(dispatch.claim(&tracks).is_none());
        assert_eq!(dispatch.cancelled(tracks.len()), 0);
    }

    #[test]
    fn test_explicit_ids_skip_unknown_tracks() {
        let mut provider = MockMetadataProvider::new();
        provider.expect_track().returning(|id| {
            if id == "missing" {
                Err(Error::NotFound(id.to_string()))
            } else {
                Ok(track(id))
            }
        });
        let tracks = collect_tracks(
            &provider,
            &BatchSource::Tracks(vec!["t1".into(), "missing".into(), "t2".into(), "t1".into()]),
            CollectOptions::default(),
        )
        .unwrap();
        let ids: Vec<_> = tracks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t2"]);
    }

    fn by(id: &str, artist: &str) -> Track {
        Track {
            artists: vec![ArtistRef { id: artist.into(), name: artist.to_uppercase() }],
            ..track(id)
        }
    }

    fn page<T>(items: Vec<T>) -> Result<Page<T>> {
        Ok(Page { items, next: None })
    }

    #[test]
    fn test_artist_source_walks_every_release() {
        let mut provider = MockMetadataProvider::new();
        provider
            .expect_artist_albums()
            .returning(|_, _| page(vec!["al1".to_string(), "al2".to_string()]));
        provider.expect_album_tracks().returning(|album, _| match album {
            "al1" => page(vec![by("t1", "a"), by("t2", "a")]),
            _ => page(vec![by("t3", "a")]),
        });

        let tracks = collect_tracks(&provider, &BatchSource::Artist("a".into()), CollectOptions::default()).unwrap();
        let ids: Vec<_> = tracks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t2", "t3"]);
    }

    #[test]
    fn test_extensive_expands_each_artist_once() {
        let mut provider = MockMetadataProvider::new();
        provider.expect_album_tracks().returning(|album, _| match album {
            "al" => page(vec![by("t1", "a"), by("t2", "b"), by("t3", "a")]),
            "a-album" => page(vec![by("t1", "a"), by("a9", "a")]),
            _ => page(vec![by("b9", "b")]),
        });
        provider
            .expect_artist_albums()
            .times(2)
            .returning(|artist, _| page(vec![format!("{artist}-album")]));

        let options = CollectOptions { extensive: true, max_tracks: None };
        let tracks = collect_tracks(&provider, &BatchSource::Album("al".into()), options).unwrap();
        let ids: Vec<_> = tracks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t2", "t3", "a9", "b9"]);
    }

    #[test]
    fn test_max_tracks_caps_the_batch() {
        let mut provider = MockMetadataProvider::new();
        provider
            .expect_liked_tracks()
            .returning(|_| page((0..8).map(|i| track(&format!("t{i}"))).collect()));
        provider.expect_artist_albums().never();

        let options = CollectOptions { extensive: true, max_tracks: Some(5) };
        let tracks = collect_tracks(&provider, &BatchSource::LikedSongs, options).unwrap();
        assert_eq!(tracks.len(), 5);
        assert_eq!(tracks[4].id, "t4");
    }

    #[test]
    fn test_user_playlists_skip_vanished_ones() {
        let mut provider = MockMetadataProvider::new();
        provider
            .expect_user_playlists()
            .returning(|_, _| page(vec!["p1".to_string(), "gone".to_string(), "p2".to_string()]));
        provider.expect_playlist_tracks().returning(|id, _| match id {
            "p1" => page(vec![track("t1"), track("t2")]),
            "p2" => page(vec![track("t2"), track("t3")]),
            other => Err(Error::NotFound(other.to_string())),
        });

        let tracks = collect_tracks(&provider, &BatchSource::UserPlaylists("u".into()), CollectOptions::default()).unwrap();
        let ids: Vec<_> = tracks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t2", "t3"]);
    }
}
