//! # Validation Chain
//!
//! Ranked candidates pass through an ordered list of checks; the first
//! failing check rejects the candidate and later checks are not evaluated.
//!
//! | # | Check | Applies when |
//! |---|-------|--------------|
//! | 1 | self-artist | seeds come from liked songs |
//! | 2 | liked-artist | `exclude_liked_artists` |
//! | 3 | artist-in-playlist | always |
//! | 4 | follower-ceiling | `max_followers` is set |
//! | 5 | genre-mismatch | `genre_matching` and a tag service is configured |
//!
//! Checks 1 to 3 are pure lookups. Checks 4 and 5 call external services, so
//! ordering them last keeps cheap rejections cheap. Validation reads the
//! [`ExclusionSet`] but never changes it.

use crate::error::Error;
use crate::exclusion::ExclusionSet;
use crate::provider::{MetadataProvider, Track};
use crate::tags::{TagCache, TagService};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Run-level filtering options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub exclude_liked_artists: bool,
    pub max_followers: Option<u64>,
    pub genre_matching: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            exclude_liked_artists: true,
            max_followers: None,
            genre_matching: false,
        }
    }
}

/// Where the run's seeds come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedMode {
    LikedSongs,
    Playlist,
}

/// The seed a candidate was found through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedContext {
    pub artist_id: String,
    pub artist_name: String,
    pub mode: SeedMode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    SelfArtist,
    LikedArtist,
    ArtistInPlaylist,
    FollowerCeiling { followers: u64, ceiling: u64 },
    GenreMismatch,
    NoArtist,
}

impl Rejection {
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::SelfArtist => "self-artist",
            Self::LikedArtist => "liked-artist",
            Self::ArtistInPlaylist => "artist-in-playlist",
            Self::FollowerCeiling { .. } => "follower-ceiling",
            Self::GenreMismatch => "genre-mismatch",
            Self::NoArtist => "no-artist",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Reject(Rejection),
}

impl Verdict {
    #[must_use]
    pub const fn passed(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

#[derive(Debug, Clone, Copy)]
enum Check {
    SelfArtist,
    LikedArtist,
    Playlist,
    Followers,
    Genre,
}

const ORDER: [Check; 5] = [
    Check::SelfArtist,
    Check::LikedArtist,
    Check::Playlist,
    Check::Followers,
    Check::Genre,
];

pub struct ValidationChain<'a> {
    provider: &'a dyn MetadataProvider,
    tags: Option<(&'a dyn TagService, &'a TagCache)>,
    policy: Policy,
}

impl<'a> ValidationChain<'a> {
    pub fn new(provider: &'a dyn MetadataProvider, policy: Policy) -> Self {
        Self { provider, tags: None, policy }
    }

    /// Enable genre comparison through `service`, cached in `cache`.
    #[must_use]
    pub fn with_tags(mut self, service: &'a dyn TagService, cache: &'a TagCache) -> Self {
        self.tags = Some((service, cache));
        self
    }

    pub fn validate(&self, candidate: &Track, seed: &SeedContext, exclusions: &ExclusionSet) -> Verdict {
        let Some(primary) = candidate.primary_artist() else {
            return Verdict::Reject(Rejection::NoArtist);
        };

        for check in ORDER {
            let rejection = match check {
                Check::SelfArtist => (seed.mode == SeedMode::LikedSongs && primary.id == seed.artist_id)
                    .then_some(Rejection::SelfArtist),
                Check::LikedArtist => (self.policy.exclude_liked_artists
                    && candidate.artists.iter().any(|a| exclusions.is_liked_artist(&a.id)))
                .then_some(Rejection::LikedArtist),
                Check::Playlist => candidate
                    .artists
                    .iter()
                    .any(|a| exclusions.is_playlist_artist(&a.id))
                    .then_some(Rejection::ArtistInPlaylist),
                Check::Followers => self.check_followers(&primary.id),
                Check::Genre => self.check_genre(&primary.name, &seed.artist_name),
            };
            if let Some(rejection) = rejection {
                debug!(
                    "Rejected '{}' by {}: {}",
                    candidate.name,
                    primary.name,
                    rejection.reason()
                );
                return Verdict::Reject(rejection);
            }
        }
        Verdict::Pass
    }

    fn check_followers(&self, artist_id: &str) -> Option<Rejection> {
        let ceiling = self.policy.max_followers?;
        match self.provider.artist(artist_id) {
            Ok(info) if info.followers > ceiling => Some(Rejection::FollowerCeiling {
                followers: info.followers,
                ceiling,
            }),
            Ok(_) | Err(Error::NotFound(_)) => None,
            Err(e) => {
                warn!("Follower lookup for {artist_id} failed, not gating on it: {e}");
                None
            }
        }
    }

    fn check_genre(&self, candidate_artist: &str, seed_artist: &str) -> Option<Rejection> {
        if !self.policy.genre_matching {
            return None;
        }
        let (service, cache) = self.tags?;
        let seed_tags = cache.tags_for(service, seed_artist);
        if seed_tags.is_empty() {
            return None;
        }
        let candidate_tags = cache.tags_for(service, candidate_artist);
        if candidate_tags.is_empty() || !seed_tags.is_disjoint(&candidate_tags) {
            None
        } else {
            Some(Rejection::GenreMismatch)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ArtistInfo, ArtistRef, MockMetadataProvider};
    use crate::tags::MockTagService;

    fn track(id: &str, artist_id: &str, artist_name: &str) -> Track {
        Track {
            id: id.into(),
            name: format!("Song {id}"),
            artists: vec![ArtistRef { id: artist_id.into(), name: artist_name.into() }],
            uri: format!("spotify:track:{id}"),
            popularity: 30,
        }
    }

    fn seed(mode: SeedMode) -> SeedContext {
        SeedContext {
            artist_id: "seed-artist".into(),
            artist_name: "Seed Band".into(),
            mode,
        }
    }

    fn followers(n: u64) -> ArtistInfo {
        ArtistInfo { id: "x".into(), name: "x".into(), followers: n }
    }

    #[test]
    fn test_self_artist_only_in_liked_mode() {
        let provider = MockMetadataProvider::new();
        let chain = ValidationChain::new(&provider, Policy::default());
        let same = track("c1", "seed-artist", "Seed Band");
        let exclusions = ExclusionSet::new();

        assert_eq!(
            chain.validate(&same, &seed(SeedMode::LikedSongs), &exclusions),
            Verdict::Reject(Rejection::SelfArtist)
        );
        assert_eq!(chain.validate(&same, &seed(SeedMode::Playlist), &exclusions), Verdict::Pass);
    }

    #[test]
    fn test_liked_artist_rejected_unless_policy_allows() {
        let provider = MockMetadataProvider::new();
        let exclusions = ExclusionSet::from_library(&[track("l1", "liked", "Liked")], &[]);
        let candidate = track("c1", "liked", "Liked");

        let strict = ValidationChain::new(&provider, Policy::default());
        let verdict = strict.validate(&candidate, &seed(SeedMode::LikedSongs), &exclusions);
        assert_eq!(verdict, Verdict::Reject(Rejection::LikedArtist));
        if let Verdict::Reject(r) = verdict {
            assert_eq!(r.reason(), "liked-artist");
        }

        let relaxed = ValidationChain::new(
            &provider,
            Policy { exclude_liked_artists: false, ..Policy::default() },
        );
        assert!(relaxed
            .validate(&candidate, &seed(SeedMode::LikedSongs), &exclusions)
            .passed());
    }

    #[test]
    fn test_playlist_artist_rejected() {
        let provider = MockMetadataProvider::new();
        let exclusions = ExclusionSet::from_library(&[], &[track("p1", "there", "There")]);
        let chain = ValidationChain::new(&provider, Policy::default());
        assert_eq!(
            chain.validate(&track("c1", "there", "There"), &seed(SeedMode::Playlist), &exclusions),
            Verdict::Reject(Rejection::ArtistInPlaylist)
        );
    }

    #[test]
    fn test_follower_ceiling() {
        let mut provider = MockMetadataProvider::new();
        provider
            .expect_artist()
            .withf(|id| id == "big")
            .returning(|_| Ok(followers(2_000_000)));
        provider
            .expect_artist()
            .withf(|id| id == "small")
            .returning(|_| Ok(followers(5_000)));
        provider
            .expect_artist()
            .withf(|id| id == "gone")
            .returning(|id| Err(Error::NotFound(id.to_string())));

        let chain = ValidationChain::new(
            &provider,
            Policy { max_followers: Some(100_000), ..Policy::default() },
        );
        let ctx = seed(SeedMode::Playlist);
        let none = ExclusionSet::new();
        assert_eq!(
            chain.validate(&track("c1", "big", "Big"), &ctx, &none),
            Verdict::Reject(Rejection::FollowerCeiling { followers: 2_000_000, ceiling: 100_000 })
        );
        assert!(chain.validate(&track("c2", "small", "Small"), &ctx, &none).passed());
        assert!(chain.validate(&track("c3", "gone", "Gone"), &ctx, &none).passed());
    }

    #[test]
    fn test_short_circuit_skips_later_checks() {
        // rejected at check 2, so neither the follower lookup nor tags run
        let mut provider = MockMetadataProvider::new();
        provider.expect_artist().never();
        let mut tags = MockTagService::new();
        tags.expect_artist_tags().never();
        let cache = TagCache::new();

        let chain = ValidationChain::new(
            &provider,
            Policy {
                exclude_liked_artists: true,
                max_followers: Some(10),
                genre_matching: true,
            },
        )
        .with_tags(&tags, &cache);

        let exclusions = ExclusionSet::from_library(&[track("l1", "liked", "Liked")], &[]);
        let verdict = chain.validate(&track("c1", "liked", "Liked"), &seed(SeedMode::Playlist), &exclusions);
        assert_eq!(verdict, Verdict::Reject(Rejection::LikedArtist));
    }

    #[test]
    fn test_follower_rejection_skips_genre_lookup() {
        let mut provider = MockMetadataProvider::new();
        provider.expect_artist().times(1).returning(|_| Ok(followers(1_000)));
        let mut tags = MockTagService::new();
        tags.expect_artist_tags().never();
        let cache = TagCache::new();

        let chain = ValidationChain::new(
            &provider,
            Policy { max_followers: Some(10), genre_matching: true, ..Policy::default() },
        )
        .with_tags(&tags, &cache);
        let verdict = chain.validate(
            &track("c1", "a", "A"),
            &seed(SeedMode::Playlist),
            &ExclusionSet::new(),
        );
        assert!(!verdict.passed());
    }

    #[test]
    fn test_genre_overlap() {
        let provider = MockMetadataProvider::new();
        let mut tags = MockTagService::new();
        tags.expect_artist_tags().returning(|artist| {
            Ok(match artist {
                "Seed Band" => vec!["shoegaze".into(), "dream pop".into()],
                "Kin" => vec!["Dream Pop".into()],
                "Stranger" => vec!["death metal".into()],
                _ => vec![],
            })
        });
        let cache = TagCache::new();
        let chain = ValidationChain::new(
            &provider,
            Policy { genre_matching: true, ..Policy::default() },
        )
        .with_tags(&tags, &cache);

        let ctx = seed(SeedMode::Playlist);
        let none = ExclusionSet::new();
        assert!(chain.validate(&track("c1", "k", "Kin"), &ctx, &none).passed());
        assert_eq!(
            chain.validate(&track("c2", "s", "Stranger"), &ctx, &none),
            Verdict::Reject(Rejection::GenreMismatch)
        );
        // no tag data on one side is not a reason to reject
        assert!(chain.validate(&track("c3", "u", "Untagged"), &ctx, &none).passed());
    }
}
