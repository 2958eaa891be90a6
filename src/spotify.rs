//! Spotify Web API implementation of [`MetadataProvider`].
//!
//! Only a bearer token is needed; obtaining and refreshing it is left to the
//! caller. Responses are decoded into private payload structs with optional
//! fields and then converted, at this boundary, into the crate's [`Track`]
//! and [`ArtistInfo`] records. Entries missing an id, a name or a URI (local
//! files, removed tracks) are dropped here.

use crate::error::{Error, Result};
use crate::http;
use crate::provider::{ArtistInfo, ArtistRef, MetadataProvider, Page, TimeRange, Track};
use crate::retry::RetryPolicy;
use log::{debug, trace};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use ureq::{Agent, Request};

pub const DEFAULT_API_BASE: &str = "https://api.spotify.com/v1";
const SERVICE: &str = "spotify";
const LIKED_PAGE: usize = 50;
const PLAYLIST_PAGE: usize = 100;
const RELEASE_PAGE: usize = 50;

#[derive(Debug, Deserialize)]
struct RawArtist {
    id: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTrack {
    id: Option<String>,
    name: Option<String>,
    #[serde(default)]
    artists: Vec<RawArtist>,
    uri: Option<String>,
    popularity: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TrackItem {
    track: Option<RawTrack>,
}

#[derive(Debug, Deserialize)]
struct Paging<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Followers {
    total: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawArtistFull {
    id: Option<String>,
    name: Option<String>,
    followers: Option<Followers>,
}

#[derive(Debug, Deserialize)]
struct ArtistSearch {
    artists: Paging<RawArtist>,
}

#[derive(Debug, Deserialize)]
struct TopTracks {
    #[serde(default)]
    tracks: Vec<RawTrack>,
}

#[derive(Debug, Deserialize)]
struct RawAlbum {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPlaylist {
    id: Option<String>,
    public: Option<bool>,
}

fn public_id(playlist: RawPlaylist) -> Option<String> {
    if playlist.public == Some(false) {
        None
    } else {
        playlist.id
    }
}

fn artist_ref(raw: RawArtist) -> Option<ArtistRef> {
    Some(ArtistRef {
        id: raw.id?,
        name: raw.name?,
    })
}

fn to_track(raw: RawTrack) -> Option<Track> {
    let artists: Vec<ArtistRef> = raw.artists.into_iter().filter_map(artist_ref).collect();
    if artists.is_empty() {
        return None;
    }
    Some(Track {
        id: raw.id?,
        name: raw.name?,
        artists,
        uri: raw.uri?,
        popularity: raw.popularity.unwrap_or(0),
    })
}

fn to_tracks(raw: Vec<RawTrack>) -> Vec<Track> {
    let total = raw.len();
    let tracks: Vec<Track> = raw.into_iter().filter_map(to_track).collect();
    if tracks.len() < total {
        trace!("Dropped {} incomplete track entries", total - tracks.len());
    }
    tracks
}

fn next_token(next: Option<String>, offset: usize, fetched: usize) -> Option<String> {
    next.filter(|_| fetched > 0).map(|_| (offset + fetched).to_string())
}

fn page_of(paging: Paging<TrackItem>, offset: usize) -> Page<Track> {
    let next = next_token(paging.next, offset, paging.items.len());
    Page {
        items: to_tracks(paging.items.into_iter().filter_map(|i| i.track).collect()),
        next,
    }
}

fn id_page<T>(paging: Paging<Option<T>>, offset: usize, id: impl Fn(T) -> Option<String>) -> Page<String> {
    let next = next_token(paging.next, offset, paging.items.len());
    Page {
        items: paging.items.into_iter().flatten().filter_map(id).collect(),
        next,
    }
}

/// Bare id from an id, a `spotify:<kind>:<id>` URI or an
/// `open.spotify.com/<kind>/<id>` link.
///
/// # Errors
///
/// Returns a message when the input is a link or URI to a different kind
/// of object, or has no usable id.
pub fn parse_id(input: &str, kind: &str) -> std::result::Result<String, String> {
    let input = input.trim();
    let found = if let Some(rest) = input.strip_prefix("spotify:") {
        let mut parts = rest.splitn(2, ':');
        Some((parts.next().unwrap_or_default(), parts.next().unwrap_or_default()))
    } else if let Some(pos) = input.find("spotify.com/") {
        let path = &input[pos + "spotify.com/".len()..];
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let mut segments = path.split('/').filter(|p| !p.is_empty() && !p.starts_with("intl-"));
        Some((segments.next().unwrap_or_default(), segments.next().unwrap_or_default()))
    } else {
        None
    };

    let id = match found {
        Some((found_kind, id)) if found_kind == kind => id,
        Some((found_kind, _)) => return Err(format!("expected a {kind} link, got a {found_kind:?} link")),
        None => input,
    };
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || "._-".contains(c)) {
        return Err(format!("{input:?} is not a Spotify {kind} id"));
    }
    Ok(id.to_string())
}

fn offset_of(token: Option<String>) -> Result<usize> {
    token.map_or(Ok(0), |t| {
        t.parse().map_err(|_| Error::Malformed {
            service: SERVICE,
            message: format!("bad page token {t:?}"),
        })
    })
}

pub struct SpotifyClient {
    agent: Agent,
    api_base: String,
    token: String,
    retry: RetryPolicy,
}

impl SpotifyClient {
    pub fn new(token: String, api_base: &str, retry: RetryPolicy) -> Self {
        Self {
            agent: http::agent(Duration::from_secs(20)),
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
            retry,
        }
    }

    fn get(&self, path: &str) -> Request {
        self.agent
            .get(&format!("{}{path}", self.api_base))
            .set("Authorization", &format!("Bearer {}", self.token))
    }

    fn fetch<T: DeserializeOwned>(&self, label: &str, build: impl Fn() -> Request) -> Result<T> {
        self.retry.run(label, || http::call_json(SERVICE, build()))
    }
}

impl MetadataProvider for SpotifyClient {
    fn track(&self, id: &str) -> Result<Track> {
        let raw: RawTrack = self.fetch("track", || self.get(&format!("/tracks/{id}")))?;
        to_track(raw).ok_or_else(|| Error::Malformed {
            service: SERVICE,
            message: format!("track {id} is missing required fields"),
        })
    }

    fn artist(&self, id: &str) -> Result<ArtistInfo> {
        let raw: RawArtistFull = self.fetch("artist", || self.get(&format!("/artists/{id}")))?;
        Ok(ArtistInfo {
            id: raw.id.unwrap_or_else(|| id.to_string()),
            name: raw.name.unwrap_or_default(),
            followers: raw.followers.and_then(|f| f.total).unwrap_or(0),
        })
    }

    fn search_artist(&self, name: &str) -> Result<Vec<ArtistRef>> {
        let found: ArtistSearch = self.fetch("search", || {
            self.get("/search")
                .query("q", &format!("artist:{name}"))
                .query("type", "artist")
                .query("limit", "5")
        })?;
        Ok(found.artists.items.into_iter().filter_map(artist_ref).collect())
    }

    fn liked_tracks(&self, page_token: Option<String>) -> Result<Page<Track>> {
        let offset = offset_of(page_token)?;
        let paging: Paging<TrackItem> = self.fetch("liked tracks", || {
            self.get("/me/tracks")
                .query("limit", &LIKED_PAGE.to_string())
                .query("offset", &offset.to_string())
        })?;
        debug!("Liked tracks page at offset {offset}: {} items", paging.items.len());
        Ok(page_of(paging, offset))
    }

    fn playlist_tracks(&self, playlist_id: &str, page_token: Option<String>) -> Result<Page<Track>> {
        let offset = offset_of(page_token)?;
        let paging: Paging<TrackItem> = self.fetch("playlist tracks", || {
            self.get(&format!("/playlists/{playlist_id}/tracks"))
                .query("limit", &PLAYLIST_PAGE.to_string())
                .query("offset", &offset.to_string())
        })?;
        Ok(page_of(paging, offset))
    }

    fn add_tracks(&self, playlist_id: &str, uris: &[String]) -> Result<()> {
        let body = serde_json::json!({ "uris": uris });
        self.retry.run("add tracks", || {
            let request = self
                .agent
                .post(&format!("{}/playlists/{playlist_id}/tracks", self.api_base))
                .set("Authorization", &format!("Bearer {}", self.token));
            http::send_json(SERVICE, request, &body)
        })?;
        debug!("Added {} tracks to {playlist_id}", uris.len());
        Ok(())
    }

    fn artist_top_tracks(&self, artist_id: &str) -> Result<Vec<Track>> {
        let top: TopTracks = self.fetch("top tracks", || {
            self.get(&format!("/artists/{artist_id}/top-tracks"))
                .query("market", "from_token")
        })?;
        Ok(to_tracks(top.tracks))
    }

    fn artist_albums(&self, artist_id: &str, page_token: Option<String>) -> Result<Page<String>> {
        let offset = offset_of(page_token)?;
        let paging: Paging<Option<RawAlbum>> = self.fetch("artist albums", || {
            self.get(&format!("/artists/{artist_id}/albums"))
                .query("include_groups", "album,single,compilation")
                .query("limit", &RELEASE_PAGE.to_string())
                .query("offset", &offset.to_string())
        })?;
        Ok(id_page(paging, offset, |album| album.id))
    }

    fn album_tracks(&self, album_id: &str, page_token: Option<String>) -> Result<Page<Track>> {
        let offset = offset_of(page_token)?;
        let paging: Paging<RawTrack> = self.fetch("album tracks", || {
            self.get(&format!("/albums/{album_id}/tracks"))
                .query("limit", &RELEASE_PAGE.to_string())
                .query("offset", &offset.to_string())
        })?;
        let next = next_token(paging.next, offset, paging.items.len());
        Ok(Page { items: to_tracks(paging.items), next })
    }

    fn user_playlists(&self, user_id: &str, page_token: Option<String>) -> Result<Page<String>> {
        let offset = offset_of(page_token)?;
        let paging: Paging<Option<RawPlaylist>> = self.fetch("user playlists", || {
            self.get(&format!("/users/{user_id}/playlists"))
                .query("limit", &RELEASE_PAGE.to_string())
                .query("offset", &offset.to_string())
        })?;
        Ok(id_page(paging, offset, public_id))
    }

    fn recently_played(&self) -> Result<Vec<Track>> {
        let paging: Paging<TrackItem> = self.fetch("recently played", || {
            self.get("/me/player/recently-played").query("limit", "50")
        })?;
        Ok(to_tracks(paging.items.into_iter().filter_map(|i| i.track).collect()))
    }

    fn top_tracks(&self, range: TimeRange) -> Result<Vec<Track>> {
        let range = match range {
            TimeRange::ShortTerm => "short_term",
            TimeRange::MediumTerm => "medium_term",
        };
        let paging: Paging<RawTrack> = self.fetch("top tracks", || {
            self.get("/me/top/tracks")
                .query("time_range", range)
                .query("limit", "50")
        })?;
        Ok(to_tracks(paging.items))
    }
}
