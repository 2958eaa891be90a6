//! Track metadata provider: the listener's library, playlists and artist data.
//!
//! Payloads are modelled as explicit records. Service-specific decoding lives
//! in the implementations ([`crate::spotify`]); everything past this trait
//! sees only [`Track`], [`ArtistRef`] and [`ArtistInfo`].

use crate::error::{Error, Result};
use log::{debug, warn};
use std::collections::HashSet;
use serde::{Deserialize, Serialize};

/// Artist as referenced from a track.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtistRef {
    pub id: String,
    pub name: String,
}

/// A playable track with its credited artists, primary artist first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub name: String,
    pub artists: Vec<ArtistRef>,
    pub uri: String,
    pub popularity: i64,
}

impl Track {
    #[must_use]
    pub fn primary_artist(&self) -> Option<&ArtistRef> {
        self.artists.first()
    }

    /// Credit line as stored with features: the first two artists.
    #[must_use]
    pub fn artist_line(&self) -> String {
        self.artists
            .iter()
            .take(2)
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Artist details needed by validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtistInfo {
    pub id: String,
    pub name: String,
    pub followers: u64,
}

/// One page of a paged listing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Opaque token for the following page, `None` on the last page
    pub next: Option<String>,
}

/// Listening-history window for top tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeRange {
    ShortTerm,
    MediumTerm,
}

/// Source of track and artist metadata and the destination for playlist writes.
#[cfg_attr(test, mockall::automock)]
pub trait MetadataProvider: Send + Sync {
    fn track(&self, id: &str) -> Result<Track>;

    fn artist(&self, id: &str) -> Result<ArtistInfo>;

    fn search_artist(&self, name: &str) -> Result<Vec<ArtistRef>>;

    fn liked_tracks(&self, page_token: Option<String>) -> Result<Page<Track>>;

    fn playlist_tracks(&self, playlist_id: &str, page_token: Option<String>) -> Result<Page<Track>>;

    /// Append `uris` to the playlist. Callers keep batches at or below
    /// [`MAX_ADD_BATCH`].
    fn add_tracks(&self, playlist_id: &str, uris: &[String]) -> Result<()>;

    fn artist_top_tracks(&self, artist_id: &str) -> Result<Vec<Track>>;

    /// Ids of an artist's albums, singles and compilations.
    fn artist_albums(&self, artist_id: &str, page_token: Option<String>) -> Result<Page<String>>;

    fn album_tracks(&self, album_id: &str, page_token: Option<String>) -> Result<Page<Track>>;

    /// Ids of a user's public playlists.
    fn user_playlists(&self, user_id: &str, page_token: Option<String>) -> Result<Page<String>>;

    fn recently_played(&self) -> Result<Vec<Track>>;

    fn top_tracks(&self, range: TimeRange) -> Result<Vec<Track>>;
}

/// Largest number of URIs sent in one playlist append.
pub const MAX_ADD_BATCH: usize = 100;

/// Upper bound on pages followed, in case a service keeps handing out tokens.
const MAX_PAGES: usize = 1000;

fn drain<T, F>(label: &str, mut fetch: F) -> Result<Vec<T>>
where
    F: FnMut(Option<String>) -> Result<Page<T>>,
{
    let mut items = Vec::new();
    let mut token = None;
    for _ in 0..MAX_PAGES {
        let page = fetch(token)?;
        items.extend(page.items);
        match page.next {
            Some(next) => token = Some(next),
            None => break,
        }
    }
    debug!("Fetched {} items from {label}", items.len());
    Ok(items)
}

/// Every liked track, following pagination to the end.
pub fn all_liked_tracks(provider: &dyn MetadataProvider) -> Result<Vec<Track>> {
    drain("liked songs", |token| provider.liked_tracks(token))
}

/// Every track of a playlist, following pagination to the end.
pub fn all_playlist_tracks(provider: &dyn MetadataProvider, playlist_id: &str) -> Result<Vec<Track>> {
    drain(playlist_id, |token| provider.playlist_tracks(playlist_id, token))
}

pub fn all_album_tracks(provider: &dyn MetadataProvider, album_id: &str) -> Result<Vec<Track>> {
    drain(album_id, |token| provider.album_tracks(album_id, token))
}

pub fn all_user_playlists(provider: &dyn MetadataProvider, user_id: &str) -> Result<Vec<String>> {
    drain(user_id, |token| provider.user_playlists(user_id, token))
}

/// Every track on every release of an artist, first appearance kept.
///
/// A release that has disappeared is skipped.
pub fn artist_discography(provider: &dyn MetadataProvider, artist_id: &str) -> Result<Vec<Track>> {
    let albums = drain(artist_id, |token| provider.artist_albums(artist_id, token))?;
    let mut seen = HashSet::new();
    let mut tracks = Vec::new();
    for album_id in &albums {
        let album = match all_album_tracks(provider, album_id) {
            Ok(album) => album,
            Err(Error::NotFound(_)) => {
                warn!("Album {album_id} not found, skipping");
                continue;
            }
            Err(e) => return Err(e),
        };
        tracks.extend(album.into_iter().filter(|t| seen.insert(t.id.clone())));
    }
    debug!("{} tracks on {} releases of {artist_id}", tracks.len(), albums.len());
    Ok(tracks)
}

/// Append `uris` in batches of at most [`MAX_ADD_BATCH`], stopping at the
/// first failed batch. Returns how many URIs were written and the failure,
/// if any.
pub fn add_in_batches(provider: &dyn MetadataProvider, playlist_id: &str, uris: &[String]) -> (usize, Result<()>) {
    let mut written = 0;
    for chunk in uris.chunks(MAX_ADD_BATCH) {
        if let Err(e) = provider.add_tracks(playlist_id, chunk) {
            return (written, Err(e));
        }
        written += chunk.len();
    }
    (written, Ok(()))
}
