//! # Recommendation Run
//!
//! One interactive run appends up to `target_count` new tracks to a playlist:
//!
//! 1. Load the seed pool (liked songs or a source playlist), the listener's
//!    liked tracks and the destination playlist.
//! 2. Weight the pool's artists and draw them one at a time through the
//!    [`SelectionLottery`].
//! 3. For a drawn artist, try up to `seed_attempts` of its tracks as seeds:
//!    resolve features, rank the nearest stored tracks, validate candidates
//!    in distance order and accept the first that passes.
//! 4. If similarity produced nothing (or is disabled because the store is
//!    unavailable) and a tag service is configured, fall back to similar
//!    artists. A store that fails partway through a run disables similarity
//!    for the rest of it, and the report says so.
//! 5. Append the accepted URIs to the playlist in batches.
//!
//! [`Recommender::run`] never returns an error. Every outcome, including
//! "could not start" and an oracle rate-limit abort, is a [`RunReport`].

use crate::db::FeatureStore;
use crate::error::Error;
use crate::exclusion::ExclusionSet;
use crate::fallback::SimilarArtistFallback;
use crate::lottery::{ArtistWeight, Recency, SeedPool, SelectionLottery};
use crate::oracle::MediaOracle;
use crate::provider::{self, MetadataProvider, TimeRange, Track};
use crate::ranker::{CandidateRanker, DEFAULT_LIMIT};
use crate::resolver::FeatureResolver;
use crate::tags::{ListeningHistory, TagCache, TagService};
use crate::validation::{Policy, SeedContext, SeedMode, ValidationChain};
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;

/// Where the run draws its seeds from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedSource {
    LikedSongs,
    Playlist(String),
}

impl SeedSource {
    const fn mode(&self) -> SeedMode {
        match self {
            Self::LikedSongs => SeedMode::LikedSongs,
            Self::Playlist(_) => SeedMode::Playlist,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub destination_playlist: String,
    pub target_count: usize,
    pub source: SeedSource,
    pub policy: Policy,
    pub dry_run: bool,
}

/// Tuning knobs that come from configuration rather than the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub seed_attempts: usize,
    pub candidate_limit: usize,
    pub fallback_depth: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            seed_attempts: 5,
            candidate_limit: DEFAULT_LIMIT,
            fallback_depth: 2,
        }
    }
}

/// Feature store as handed to a run.
pub enum StoreAccess<'a> {
    Ready(&'a FeatureStore),
    /// The store could not be opened; the message ends up in the report
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddedTrack {
    pub title: String,
    pub artist: String,
    pub source_uri: String,
    pub based_on_seed: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub success: bool,
    pub tracks_added: usize,
    pub added_tracks: Vec<AddedTrack>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded: Option<String>,
    pub aborted: bool,
}

impl RunReport {
    fn not_started(message: String) -> Self {
        Self {
            success: false,
            tracks_added: 0,
            added_tracks: Vec::new(),
            status: "run could not start".to_string(),
            error: Some(message),
            degraded: None,
            aborted: false,
        }
    }
}

/// Similarity matching state for one run. Once the store fails it stays
/// off, and the first failure is what the report shows.
struct Similarity<'s> {
    store: Option<&'s FeatureStore>,
    degraded: Option<String>,
}

impl Similarity<'_> {
    fn disabled_by(mut self, reason: &str) -> Self {
        self.disable(reason);
        self
    }

    fn disable(&mut self, reason: &str) {
        warn!("Similarity matching disabled: {reason}");
        self.store = None;
        self.degraded
            .get_or_insert_with(|| format!("similarity matching disabled: {reason}"));
    }
}

struct Accepted {
    track: Track,
    based_on: String,
}

pub struct Recommender<'a> {
    provider: &'a dyn MetadataProvider,
    oracle: &'a dyn MediaOracle,
    tags: Option<&'a dyn TagService>,
    history: Option<(&'a dyn ListeningHistory, String)>,
    store: StoreAccess<'a>,
    options: RunOptions,
}

impl<'a> Recommender<'a> {
    pub fn new(provider: &'a dyn MetadataProvider, oracle: &'a dyn MediaOracle, store: StoreAccess<'a>) -> Self {
        Self {
            provider,
            oracle,
            tags: None,
            history: None,
            store,
            options: RunOptions::default(),
        }
    }

    #[must_use]
    pub fn with_tags(mut self, tags: &'a dyn TagService) -> Self {
        self.tags = Some(tags);
        self
    }

    /// Weight the lottery by `user`'s scrobbles instead of Spotify history.
    #[must_use]
    pub fn with_history(mut self, history: &'a dyn ListeningHistory, user: String) -> Self {
        self.history = Some((history, user));
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Execute one run. Always returns a report.
    pub fn run<R: Rng>(&self, request: &RunRequest, rng: &mut R) -> RunReport {
        let seeds = match &request.source {
            SeedSource::LikedSongs => provider::all_liked_tracks(self.provider),
            SeedSource::Playlist(id) => provider::all_playlist_tracks(self.provider, id),
        };
        let seeds = match seeds {
            Ok(seeds) => seeds,
            Err(e) => return RunReport::not_started(format!("could not load seed tracks: {e}")),
        };
        if seeds.is_empty() {
            return RunReport::not_started("no seed tracks available".to_string());
        }

        let liked = match &request.source {
            SeedSource::LikedSongs => Ok(seeds.clone()),
            SeedSource::Playlist(_) => provider::all_liked_tracks(self.provider),
        };
        let liked = match liked {
            Ok(liked) => liked,
            Err(e) => return RunReport::not_started(format!("could not load liked songs: {e}")),
        };
        let existing = match provider::all_playlist_tracks(self.provider, &request.destination_playlist) {
            Ok(tracks) => tracks,
            Err(e) => return RunReport::not_started(format!("could not read destination playlist: {e}")),
        };

        let mut exclusions = ExclusionSet::from_library(&liked, &existing);
        let pool = SeedPool::from_tracks(&seeds, &self.recency());
        info!(
            "Seed pool: {} artists from {} tracks, {} liked artists excluded",
            pool.members.len(),
            seeds.len(),
            exclusions.liked_artist_count()
        );

        let mut similarity = match &self.store {
            StoreAccess::Ready(store) => match store.count() {
                Ok(rows) => {
                    debug!("Feature store holds {rows} tracks");
                    Similarity { store: Some(*store), degraded: None }
                }
                Err(e) => Similarity { store: None, degraded: None }.disabled_by(&e.to_string()),
            },
            StoreAccess::Unavailable(reason) => Similarity { store: None, degraded: None }.disabled_by(reason),
        };

        let tag_cache = TagCache::new();
        let mut chain = ValidationChain::new(self.provider, request.policy.clone());
        if let Some(tags) = self.tags {
            chain = chain.with_tags(tags, &tag_cache);
        }

        let mut lottery = SelectionLottery::new(pool.members.clone(), StdRng::seed_from_u64(rng.gen()));
        let mut accepted: Vec<Accepted> = Vec::new();
        let mut abort: Option<String> = None;
        let mut draws = 0;

        while accepted.len() < request.target_count {
            let Some(member) = lottery.draw_next() else {
                info!("Seed pool exhausted after {draws} draws");
                break;
            };
            draws += 1;
            let seed = SeedContext {
                artist_id: member.artist_id.clone(),
                artist_name: member.display_name.clone(),
                mode: request.source.mode(),
            };

            match self.serve_member(&member, &seed, &pool, &mut similarity, &chain, &exclusions, rng) {
                Ok(Some(found)) => {
                    info!(
                        "Accepted '{}' by {} (seed: {})",
                        found.track.name,
                        found.track.artist_line(),
                        found.based_on
                    );
                    exclusions.add_to_playlist(&found.track);
                    accepted.push(found);
                }
                Ok(None) => lottery.record_failure(&member.artist_id),
                Err(e) => {
                    error!("Aborting run: {e}");
                    abort = Some(e.to_string());
                    break;
                }
            }
        }

        self.finish(request, accepted, abort, similarity.degraded, lottery.remaining())
    }

    fn recency(&self) -> Recency {
        if let Some((history, user)) = &self.history {
            match history.recent_artists(user) {
                Ok(artists) if !artists.is_empty() => {
                    info!("Weighting by {} Last.fm scrobbles of {user}", artists.len());
                    return Recency::from_scrobbles(&artists);
                }
                Ok(_) => info!("No Last.fm scrobbles for {user}; using Spotify history"),
                Err(e) => warn!("Last.fm history for {user} unavailable, using Spotify history: {e}"),
            }
        }

        let fetch = |label: &str, result: crate::Result<Vec<Track>>| {
            result.unwrap_or_else(|e| {
                warn!("Skipping {label} for weighting: {e}");
                Vec::new()
            })
        };
        let recent = fetch("recently played", self.provider.recently_played());
        let short = fetch("short-term top tracks", self.provider.top_tracks(TimeRange::ShortTerm));
        let medium = fetch("medium-term top tracks", self.provider.top_tracks(TimeRange::MediumTerm));
        Recency::from_spotify(&recent, &short, &medium)
    }

    /// Find one acceptable track for a drawn artist. Only a media rate limit
    /// is returned as an error.
    #[allow(clippy::too_many_arguments)]
    fn serve_member<R: Rng>(
        &self,
        member: &ArtistWeight,
        seed: &SeedContext,
        pool: &SeedPool,
        similarity: &mut Similarity<'_>,
        chain: &ValidationChain<'_>,
        exclusions: &ExclusionSet,
        rng: &mut R,
    ) -> crate::Result<Option<Accepted>> {
        if let Some(store) = similarity.store {
            let mut seed_tracks = pool
                .tracks_by_artist
                .get(&member.artist_id)
                .cloned()
                .unwrap_or_default();
            seed_tracks.shuffle(rng);
            seed_tracks.truncate(self.options.seed_attempts.max(1));

            let resolver = FeatureResolver::new(store, self.oracle);
            let ranker = CandidateRanker::new(store).with_limit(self.options.candidate_limit);

            for seed_track in &seed_tracks {
                let resolution = match resolver.resolve(seed_track) {
                    Ok(resolution) => resolution,
                    Err(e @ Error::RateLimited(_)) => return Err(e),
                    Err(Error::StoreUnavailable(reason)) => {
                        similarity.disable(&reason);
                        break;
                    }
                    Err(e) => {
                        debug!("Seed '{}' skipped: {e}", seed_track.name);
                        continue;
                    }
                };
                let candidates = match ranker.rank(&resolution.vector, &exclusions.excluded_track_ids()) {
                    Ok(candidates) => candidates,
                    Err(Error::StoreUnavailable(reason)) => {
                        similarity.disable(&reason);
                        break;
                    }
                    Err(e) => {
                        warn!("Ranking failed for '{}': {e}", seed_track.name);
                        continue;
                    }
                };
                for candidate in candidates {
                    if exclusions.contains_track(&candidate.track_id) {
                        continue;
                    }
                    let track = match self.provider.track(&candidate.track_id) {
                        Ok(track) => track,
                        Err(e) => {
                            debug!("Candidate {} skipped: {e}", candidate.track_id);
                            continue;
                        }
                    };
                    if chain.validate(&track, seed, exclusions).passed() {
                        debug!("'{}' accepted at distance {:.4}", track.name, candidate.distance);
                        return Ok(Some(Accepted {
                            track,
                            based_on: format!("{} by {}", seed_track.name, seed_track.artist_line()),
                        }));
                    }
                }
            }
        }

        let Some(tags) = self.tags else { return Ok(None) };
        let fallback = SimilarArtistFallback::new(self.provider, tags, self.options.fallback_depth);
        Ok(fallback.find(seed, chain, exclusions, rng).map(|pick| Accepted {
            track: pick.track,
            based_on: format!("{} (similar artist {})", member.display_name, pick.via_artist),
        }))
    }

    fn finish(
        &self,
        request: &RunRequest,
        accepted: Vec<Accepted>,
        abort: Option<String>,
        degraded: Option<String>,
        remaining: usize,
    ) -> RunReport {
        let mut write_error = None;
        let added_tracks: Vec<AddedTrack> = if request.dry_run {
            info!("Dry run: {} tracks not written", accepted.len());
            accepted.iter().map(to_added).collect()
        } else {
            let uris: Vec<String> = accepted.iter().map(|a| a.track.uri.clone()).collect();
            let (written, outcome) = provider::add_in_batches(self.provider, &request.destination_playlist, &uris);
            if let Err(e) = outcome {
                error!("Adding tracks to {} failed: {e}", request.destination_playlist);
                write_error = Some(format!("could not add tracks to playlist: {e}"));
            }
            accepted[..written].iter().map(to_added).collect()
        };

        let count = added_tracks.len();
        let status = if let Some(reason) = &abort {
            format!("aborted after {count} track(s): {reason}")
        } else if request.target_count == 0 {
            "nothing requested".to_string()
        } else if count == 0 && write_error.is_none() {
            format!(
                "no acceptable tracks found ({remaining} unused artists left in the pool)"
            )
        } else if request.dry_run {
            format!("dry run: found {count} of {} requested", request.target_count)
        } else {
            format!("added {count} of {} requested", request.target_count)
        };

        RunReport {
            success: write_error.is_none(),
            tracks_added: count,
            added_tracks,
            error: write_error.or(abort.clone()),
            status,
            degraded,
            aborted: abort.is_some(),
        }
    }
}

fn to_added(a: &Accepted) -> AddedTrack {
    AddedTrack {
        title: a.track.name.clone(),
        artist: a.track.artist_line(),
        source_uri: a.track.uri.clone(),
        based_on_seed: a.based_on.clone(),
    }
}
