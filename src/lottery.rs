//! # Selection Lottery
//!
//! Weighted, no-repeat draw of seed artists.
//!
//! ## Weights
//!
//! Artists the listener has liked only once or twice are favoured, since they
//! are where undiscovered neighbours tend to be:
//!
//! | liked tracks | base weight |
//! |---|---|
//! | 1 | 10 |
//! | 2 | 5 |
//! | 3 | 2 |
//! | 4+ | 1 |
//!
//! Recent listening boosts the base. With Spotify history every recently
//! played track by the artist adds 3 points, every short-term top track 2 and
//! every medium-term top track 1. With Last.fm history every scrobble adds 1
//! point, matched on the lowercased artist name since scrobbles carry no ids.
//! The multiplier is `min(1 + points / 4, 3)`.
//!
//! ## Termination
//!
//! A drawn artist is retired at once, whatever happens downstream, so a pool
//! of N artists yields at most N draws.

use crate::provider::Track;
use log::trace;
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use std::collections::{HashMap, HashSet};

/// Upper bound of the recency multiplier.
pub const MAX_RECENCY_BOOST: f64 = 3.0;

#[derive(Debug, Clone, PartialEq)]
pub struct ArtistWeight {
    pub artist_id: String,
    pub display_name: String,
    pub liked_count: u32,
    pub weight: f64,
}

#[must_use]
pub const fn base_weight(liked_count: u32) -> f64 {
    match liked_count {
        1 => 10.0,
        2 => 5.0,
        3 => 2.0,
        _ => 1.0,
    }
}

#[must_use]
pub fn recency_multiplier(points: u32) -> f64 {
    (1.0 + f64::from(points) / 4.0).min(MAX_RECENCY_BOOST)
}

/// Recency points per artist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recency {
    by_id: HashMap<String, u32>,
    by_name: HashMap<String, u32>,
}

impl Recency {
    /// Points from Spotify recent plays and top-track lists, keyed by artist id.
    #[must_use]
    pub fn from_spotify(recent: &[Track], short_term: &[Track], medium_term: &[Track]) -> Self {
        let mut by_id: HashMap<String, u32> = HashMap::new();
        for (tracks, value) in [(recent, 3), (short_term, 2), (medium_term, 1)] {
            for artist in tracks.iter().flat_map(|t| t.artists.iter()) {
                *by_id.entry(artist.id.clone()).or_default() += value;
            }
        }
        Self { by_id, by_name: HashMap::new() }
    }

    /// One point per scrobbled artist name.
    #[must_use]
    pub fn from_scrobbles(artist_names: &[String]) -> Self {
        let mut by_name: HashMap<String, u32> = HashMap::new();
        for name in artist_names {
            *by_name.entry(name.to_lowercase()).or_default() += 1;
        }
        Self { by_id: HashMap::new(), by_name }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty() && self.by_name.is_empty()
    }

    #[must_use]
    pub fn points(&self, artist_id: &str, artist_name: &str) -> u32 {
        let by_id = self.by_id.get(artist_id).copied().unwrap_or(0);
        let by_name = self.by_name.get(&artist_name.to_lowercase()).copied().unwrap_or(0);
        by_id + by_name
    }
}

/// Lottery members plus the tracks each artist can be seeded from.
#[derive(Debug, Clone, Default)]
pub struct SeedPool {
    pub members: Vec<ArtistWeight>,
    pub tracks_by_artist: HashMap<String, Vec<Track>>,
}

impl SeedPool {
    /// Group `tracks` by every credited artist, in first-seen order.
    #[must_use]
    pub fn from_tracks(tracks: &[Track], recency: &Recency) -> Self {
        let mut pool = Self::default();
        let mut index: HashMap<String, usize> = HashMap::new();

        for track in tracks {
            for artist in &track.artists {
                if artist.id.is_empty() {
                    continue;
                }
                let slot = *index.entry(artist.id.clone()).or_insert_with(|| {
                    pool.members.push(ArtistWeight {
                        artist_id: artist.id.clone(),
                        display_name: artist.name.clone(),
                        liked_count: 0,
                        weight: 0.0,
                    });
                    pool.members.len() - 1
                });
                pool.members[slot].liked_count += 1;
                pool.tracks_by_artist
                    .entry(artist.id.clone())
                    .or_default()
                    .push(track.clone());
            }
        }

        for member in &mut pool.members {
            let points = recency.points(&member.artist_id, &member.display_name);
            member.weight = base_weight(member.liked_count) * recency_multiplier(points);
        }
        pool
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

pub struct SelectionLottery<R: Rng> {
    members: Vec<ArtistWeight>,
    retired: HashSet<String>,
    rng: R,
}

impl<R: Rng> SelectionLottery<R> {
    pub fn new(members: Vec<ArtistWeight>, rng: R) -> Self {
        Self {
            members,
            retired: HashSet::new(),
            rng,
        }
    }

    /// Draw and retire one member; `None` once the pool is exhausted.
    pub fn draw_next(&mut self) -> Option<ArtistWeight> {
        let active: Vec<usize> = (0..self.members.len())
            .filter(|&i| !self.retired.contains(&self.members[i].artist_id))
            .collect();
        if active.is_empty() {
            return None;
        }

        let pick = match WeightedIndex::new(active.iter().map(|&i| self.members[i].weight.max(0.0))) {
            Ok(dist) => active[dist.sample(&mut self.rng)],
            // every remaining weight is zero
            Err(_) => active[self.rng.gen_range(0..active.len())],
        };

        let drawn = self.members[pick].clone();
        self.retired.insert(drawn.artist_id.clone());
        trace!("Drew {} (weight {:.2})", drawn.display_name, drawn.weight);
        Some(drawn)
    }

    /// Halve a member's weight after it failed to produce a track.
    pub fn record_failure(&mut self, artist_id: &str) {
        if let Some(member) = self.members.iter_mut().find(|m| m.artist_id == artist_id) {
            member.weight /= 2.0;
        }
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.members.len() - self.retired.len()
    }
}
