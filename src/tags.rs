//! Genre tags, artist similarity and scrobble history from a folksonomy
//! service.

use crate::error::Result;
use log::{debug, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Most tags kept per artist.
pub const MAX_TAGS: usize = 10;

/// Best-effort tag and similarity lookups.
#[cfg_attr(test, mockall::automock)]
pub trait TagService: Send + Sync {
    /// Top tags for an artist, most popular first. May be empty.
    fn artist_tags(&self, artist_name: &str) -> Result<Vec<String>>;

    /// Names of artists similar to `artist_name`, most similar first.
    fn similar_artists(&self, artist_name: &str, limit: usize) -> Result<Vec<String>>;
}

/// A listener's scrobble history.
#[cfg_attr(test, mockall::automock)]
pub trait ListeningHistory: Send + Sync {
    /// Artist name of every recent scrobble, newest first. Tracks playing
    /// right now are not included.
    fn recent_artists(&self, user: &str) -> Result<Vec<String>>;
}

/// Per-run cache so every artist is looked up at most once.
#[derive(Debug, Default)]
pub struct TagCache {
    entries: Mutex<HashMap<String, HashSet<String>>>,
}

impl TagCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lowercased tag set for `artist_name`. Lookup failures are logged and
    /// cached as an empty set.
    pub fn tags_for(&self, service: &dyn TagService, artist_name: &str) -> HashSet<String> {
        let key = artist_name.trim().to_lowercase();
        if let Ok(entries) = self.entries.lock() {
            if let Some(tags) = entries.get(&key) {
                return tags.clone();
            }
        }

        let tags: HashSet<String> = match service.artist_tags(artist_name) {
            Ok(tags) => tags
                .into_iter()
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .take(MAX_TAGS)
                .collect(),
            Err(e) => {
                warn!("Tag lookup for {artist_name} failed: {e}");
                HashSet::new()
            }
        };
        debug!("Tags for {artist_name}: {tags:?}");

        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key, tags.clone());
        }
        tags
    }
}
