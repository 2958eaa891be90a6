//! Similar-artist fallback for pool members the similarity path cannot serve.
//!
//! Starting from the drawn artist, ask the tag service for similar artists,
//! try a few of them (shuffled) and run their top tracks through the same
//! [`ValidationChain`]. When none passes, descend into each tried artist's own
//! similar artists. Depth is bounded explicitly and every artist name is
//! visited at most once per search.

use crate::exclusion::ExclusionSet;
use crate::oracle::normalize;
use crate::provider::{MetadataProvider, Track};
use crate::tags::TagService;
use crate::validation::{SeedContext, ValidationChain};
use log::{debug, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashSet;

/// Similar artists requested per lookup.
pub const SIMILAR_LIMIT: usize = 5;
/// Similar artists actually tried per level.
pub const TRIES_PER_LEVEL: usize = 3;

/// A track found through a similar artist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackPick {
    pub track: Track,
    pub via_artist: String,
}

pub struct SimilarArtistFallback<'a> {
    provider: &'a dyn MetadataProvider,
    tags: &'a dyn TagService,
    max_depth: usize,
}

impl<'a> SimilarArtistFallback<'a> {
    pub fn new(provider: &'a dyn MetadataProvider, tags: &'a dyn TagService, max_depth: usize) -> Self {
        Self { provider, tags, max_depth }
    }

    /// First validated track reachable from `seed`'s artist.
    pub fn find<R: Rng>(
        &self,
        seed: &SeedContext,
        chain: &ValidationChain<'_>,
        exclusions: &ExclusionSet,
        rng: &mut R,
    ) -> Option<FallbackPick> {
        let mut visited = HashSet::new();
        visited.insert(normalize(&seed.artist_name));
        self.search(&seed.artist_name, 1, &mut visited, seed, chain, exclusions, rng)
    }

    #[allow(clippy::too_many_arguments)]
    fn search<R: Rng>(
        &self,
        artist_name: &str,
        level: usize,
        visited: &mut HashSet<String>,
        seed: &SeedContext,
        chain: &ValidationChain<'_>,
        exclusions: &ExclusionSet,
        rng: &mut R,
    ) -> Option<FallbackPick> {
        if level > self.max_depth {
            return None;
        }

        let mut similar: Vec<String> = match self.tags.similar_artists(artist_name, SIMILAR_LIMIT) {
            Ok(names) => names
                .into_iter()
                .filter(|n| !visited.contains(&normalize(n)))
                .collect(),
            Err(e) => {
                warn!("Similar artists for {artist_name} unavailable: {e}");
                return None;
            }
        };
        similar.shuffle(rng);
        similar.truncate(TRIES_PER_LEVEL);
        debug!("Level {level} fallback from {artist_name}: trying {similar:?}");

        for name in &similar {
            visited.insert(normalize(name));
        }

        for name in &similar {
            if let Some(track) = self.first_valid_top_track(name, seed, chain, exclusions) {
                return Some(FallbackPick { track, via_artist: name.clone() });
            }
        }

        for name in &similar {
            if let Some(pick) = self.search(name, level + 1, visited, seed, chain, exclusions, rng) {
                return Some(pick);
            }
        }
        None
    }

    fn first_valid_top_track(
        &self,
        artist_name: &str,
        seed: &SeedContext,
        chain: &ValidationChain<'_>,
        exclusions: &ExclusionSet,
    ) -> Option<Track> {
        let artist = match self.provider.search_artist(artist_name) {
            Ok(found) => found.into_iter().next()?,
            Err(e) => {
                debug!("Artist search for {artist_name} failed: {e}");
                return None;
            }
        };
        let top = match self.provider.artist_top_tracks(&artist.id) {
            Ok(top) => top,
            Err(e) => {
                debug!("Top tracks for {artist_name} failed: {e}");
                return None;
            }
        };
        top.into_iter()
            .filter(|t| !exclusions.contains_track(&t.id))
            .find(|t| chain.validate(t, seed, exclusions).passed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ArtistRef, MockMetadataProvider};
    use crate::tags::MockTagService;
    use crate::validation::{Policy, SeedMode};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn track(id: &str, artist: &str) -> Track {
        Track {
            id: id.into(),
            name: id.into(),
            artists: vec![ArtistRef { id: artist.to_lowercase(), name: artist.into() }],
            uri: format!("spotify:track:{id}"),
            popularity: 0,
        }
    }

    fn seed() -> SeedContext {
        SeedContext {
            artist_id: "root".into(),
            artist_name: "Root".into(),
            mode: SeedMode::LikedSongs,
        }
    }

    fn provider_with_top_tracks() -> MockMetadataProvider {
        let mut provider = MockMetadataProvider::new();
        provider
            .expect_search_artist()
            .returning(|name| Ok(vec![ArtistRef { id: name.to_lowercase(), name: name.to_string() }]));
        provider
            .expect_artist_top_tracks()
            .returning(|id| Ok(vec![track(&format!("{id}-hit"), id)]));
        provider
    }

    #[test]
    fn test_direct_similar_artist_is_used() {
        let provider = provider_with_top_tracks();
        let mut tags = MockTagService::new();
        tags.expect_similar_artists()
            .withf(|name, _| name == "Root")
            .returning(|_, _| Ok(vec!["Neighbour".into()]));

        let chain = ValidationChain::new(&provider, Policy::default());
        let fallback = SimilarArtistFallback::new(&provider, &tags, 2);
        let pick = fallback
            .find(&seed(), &chain, &ExclusionSet::new(), &mut StdRng::seed_from_u64(3))
            .unwrap();
        assert_eq!(pick.via_artist, "Neighbour");
        assert_eq!(pick.track.id, "neighbour-hit");
    }

    #[test]
    fn test_recursion_goes_one_level_deeper_when_needed() {
        let provider = provider_with_top_tracks();
        let mut tags = MockTagService::new();
        tags.expect_similar_artists().returning(|name, _| {
            Ok(match name {
                "Root" => vec!["Taken".into()],
                "Taken" => vec!["Root".into(), "Deeper".into()],
                _ => vec![],
            })
        });

        // Taken is already in the playlist, Deeper is not
        let exclusions = ExclusionSet::from_library(&[], &[track("old", "Taken")]);
        let chain = ValidationChain::new(&provider, Policy::default());
        let pick = SimilarArtistFallback::new(&provider, &tags, 2)
            .find(&seed(), &chain, &exclusions, &mut StdRng::seed_from_u64(3))
            .unwrap();
        assert_eq!(pick.via_artist, "Deeper");
    }

    #[test]
    fn test_depth_bound_and_visited_set_terminate() {
        let provider = provider_with_top_tracks();
        let mut tags = MockTagService::new();
        // a cycle in which every artist is already in the playlist
        tags.expect_similar_artists().returning(|name, _| {
            Ok(match name {
                "Root" => vec!["A".into()],
                "A" => vec!["B".into(), "Root".into()],
                "B" => vec!["A".into(), "C".into()],
                _ => vec!["Root".into()],
            })
        });
        let exclusions = ExclusionSet::from_library(
            &[],
            &[track("x", "A"), track("y", "B"), track("z", "C")],
        );
        let chain = ValidationChain::new(&provider, Policy::default());
        let result = SimilarArtistFallback::new(&provider, &tags, 2).find(
            &seed(),
            &chain,
            &exclusions,
            &mut StdRng::seed_from_u64(3),
        );
        assert!(result.is_none());
    }
}
