//! # Media Oracle
//!
//! The oracle finds an audio source for a track and turns it into
//! [`RawFeatures`]. Both halves are external and slow; the resolver only sees
//! the [`MediaOracle`] trait.
//!
//! ## Matching
//!
//! Search results are free-form video titles, so [`match_hit`] applies a
//! two-tier textual check on normalised strings:
//!
//! 1. **Primary**: the track name and at least one credited artist both appear
//!    in the title.
//! 2. **Channel fallback**: the track name appears in the title and an artist
//!    appears in the uploader name, or artist and uploader share a word longer
//!    than three characters.

use crate::error::Result;
use crate::features::RawFeatures;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One search result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaHit {
    pub id: String,
    pub title: String,
    pub uploader: Option<String>,
}

/// How a hit was accepted by [`match_hit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Title,
    Channel,
    ChannelWords,
}

/// Search and feature-extraction service.
///
/// Either method may fail with [`crate::Error::RateLimited`], which callers
/// must pass up untouched.
#[cfg_attr(test, mockall::automock)]
pub trait MediaOracle: Send + Sync {
    /// Candidate media for `track_name` by `artist_name` (a comma separated
    /// credit line).
    fn search(&self, track_name: &str, artist_name: &str) -> Result<Vec<MediaHit>>;

    /// Fetch `media_id` into `workdir` and analyse it. The caller owns
    /// `workdir` and removes it afterwards.
    fn extract_features(&self, media_id: &str, workdir: &Path) -> Result<RawFeatures>;
}

/// Lowercase, unify "feat."/"ft."/"feature", drop punctuation, squeeze spaces.
#[must_use]
pub fn normalize(s: &str) -> String {
    let stripped: String = s
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect();
    stripped
        .split_whitespace()
        .map(|word| match word {
            "ft" | "feature" => "feat",
            other => other,
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Classify `hit` against a track, `None` when it does not match.
#[must_use]
pub fn match_hit(hit: &MediaHit, track_name: &str, artist_name: &str) -> Option<MatchKind> {
    let title = normalize(&hit.title);
    let track = normalize(track_name);
    if track.is_empty() || !title.contains(&track) {
        return None;
    }

    let artists: Vec<String> = artist_name
        .split(',')
        .map(normalize)
        .filter(|a| !a.is_empty())
        .collect();

    if artists.iter().any(|a| title.contains(a.as_str())) {
        return Some(MatchKind::Title);
    }

    let uploader = normalize(hit.uploader.as_deref()?);
    if uploader.is_empty() {
        return None;
    }
    for artist in &artists {
        if uploader.contains(artist.as_str()) {
            return Some(MatchKind::Channel);
        }
        if artist.len() > 3 && uploader.len() > 3 {
            let shared = artist
                .split(' ')
                .filter(|w| w.chars().count() > 3)
                .any(|w| uploader.split(' ').any(|u| u == w));
            if shared {
                return Some(MatchKind::ChannelWords);
            }
        }
    }
    None
}

/// First hit that matches, title matches preferred over channel matches.
#[must_use]
pub fn best_match<'a>(hits: &'a [MediaHit], track_name: &str, artist_name: &str) -> Option<&'a MediaHit> {
    let mut fallback = None;
    for hit in hits {
        match match_hit(hit, track_name, artist_name) {
            Some(MatchKind::Title) => return Some(hit),
            Some(_) if fallback.is_none() => fallback = Some(hit),
            _ => {}
        }
    }
    fallback
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(title: &str, uploader: Option<&str>) -> MediaHit {
        MediaHit {
            id: "vid".into(),
            title: title.into(),
            uploader: uploader.map(str::to_string),
        }
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  Song (feat. Someone)!! "), "song feat someone");
        assert_eq!(normalize("A ft. B"), "a feat b");
        assert_eq!(normalize("AC/DC - T.N.T."), "acdc tnt");
        assert_eq!(normalize("Beyoncé"), "beyoncé");
    }

    #[test]
    fn test_title_match_needs_track_and_artist() {
        let h = hit("Daft Punk - Digital Love (Official Audio)", None);
        assert_eq!(match_hit(&h, "Digital Love", "Daft Punk"), Some(MatchKind::Title));
        assert_eq!(match_hit(&h, "One More Time", "Daft Punk"), None);
        assert_eq!(match_hit(&h, "Digital Love", "Someone Else"), None);
    }

    #[test]
    fn test_any_credited_artist_matches() {
        let h = hit("Pharrell Williams - Get Lucky", None);
        assert_eq!(
            match_hit(&h, "Get Lucky", "Daft Punk, Pharrell Williams"),
            Some(MatchKind::Title)
        );
    }

    #[test]
    fn test_channel_fallbacks() {
        let h = hit("Digital Love", Some("Daft Punk"));
        assert_eq!(match_hit(&h, "Digital Love", "Daft Punk"), Some(MatchKind::Channel));

        let topic = hit("Sunrise", Some("Khruangbin Official"));
        assert_eq!(match_hit(&topic, "Sunrise", "Khruangbin"), Some(MatchKind::Channel));

        let words = hit("Sunrise", Some("The Khruangbin Band"));
        assert_eq!(
            match_hit(&words, "Sunrise", "Khruangbin & Leon"),
            Some(MatchKind::ChannelWords)
        );

        // only words longer than three characters count as shared
        let short = hit("Sunrise", Some("who tv"));
        assert_eq!(match_hit(&short, "Sunrise", "The Who"), None);
    }

    #[test]
    fn test_best_match_prefers_title_matches() {
        let hits = vec![
            hit("Digital Love", Some("Daft Punk")),
            hit("Daft Punk - Digital Love", Some("randomuser")),
        ];
        let best = best_match(&hits, "Digital Love", "Daft Punk").unwrap();
        assert_eq!(best.title, "Daft Punk - Digital Love");

        let none = vec![hit("Something else", None)];
        assert!(best_match(&none, "Digital Love", "Daft Punk").is_none());
    }
}
