//! Per-run record of artists and tracks that must not be recommended again.

use crate::provider::Track;
use std::collections::HashSet;

/// Grows during a run, never shrinks.
#[derive(Debug, Clone, Default)]
pub struct ExclusionSet {
    liked_artist_ids: HashSet<String>,
    liked_track_ids: HashSet<String>,
    playlist_artist_ids: HashSet<String>,
    playlist_track_ids: HashSet<String>,
}

impl ExclusionSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from the listener's liked tracks and the destination playlist.
    #[must_use]
    pub fn from_library(liked: &[Track], playlist: &[Track]) -> Self {
        let mut set = Self::new();
        for track in liked {
            set.liked_track_ids.insert(track.id.clone());
            set.liked_artist_ids
                .extend(track.artists.iter().map(|a| a.id.clone()));
        }
        for track in playlist {
            set.add_to_playlist(track);
        }
        set
    }

    /// Fold an accepted or already-present playlist track into the set.
    pub fn add_to_playlist(&mut self, track: &Track) {
        self.playlist_track_ids.insert(track.id.clone());
        self.playlist_artist_ids
            .extend(track.artists.iter().map(|a| a.id.clone()));
    }

    #[must_use]
    pub fn is_liked_artist(&self, artist_id: &str) -> bool {
        self.liked_artist_ids.contains(artist_id)
    }

    #[must_use]
    pub fn is_playlist_artist(&self, artist_id: &str) -> bool {
        self.playlist_artist_ids.contains(artist_id)
    }

    /// Track ids that ranking must skip: liked or already in the playlist.
    #[must_use]
    pub fn excluded_track_ids(&self) -> HashSet<String> {
        self.liked_track_ids
            .union(&self.playlist_track_ids)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn contains_track(&self, track_id: &str) -> bool {
        self.liked_track_ids.contains(track_id) || self.playlist_track_ids.contains(track_id)
    }

    #[must_use]
    pub fn liked_artist_count(&self) -> usize {
        self.liked_artist_ids.len()
    }
}
