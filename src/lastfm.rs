//! Last.fm implementation of [`TagService`] and [`ListeningHistory`].
//!
//! Uses the public `artist.getTopTags`, `artist.getSimilar` and
//! `user.getRecentTracks` methods. All of them need only an API key. Last.fm reports some failures inside a 200 answer
//! (`{"error": 6, "message": ...}`); those are mapped onto the crate errors
//! here.

use crate::error::{Error, Result};
use crate::http;
use crate::retry::RetryPolicy;
use crate::tags::{ListeningHistory, TagService, MAX_TAGS};
use log::debug;
use serde::Deserialize;
use std::time::Duration;
use ureq::Agent;

pub const DEFAULT_API_BASE: &str = "https://ws.audioscrobbler.com/2.0/";
const SERVICE: &str = "lastfm";

/// Tags applied by fewer users than this are noise.
const MIN_TAG_COUNT: u32 = 5;

/// Scrobbles per page and pages read for the recency weighting.
const RECENT_PAGE: &str = "200";
const RECENT_PAGES: u32 = 5;

const ERR_INVALID_PARAMS: i64 = 6;
const ERR_RATE_LIMIT: i64 = 29;

/// Every answer shape we read; Last.fm fills exactly one body field or `error`.
#[derive(Debug, Default, Deserialize)]
struct Envelope {
    toptags: Option<TopTags>,
    similarartists: Option<SimilarArtists>,
    recenttracks: Option<RecentTracks>,
    error: Option<i64>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TopTags {
    #[serde(default)]
    tag: Vec<LastFmTag>,
}

#[derive(Debug, Deserialize)]
struct LastFmTag {
    name: String,
    #[serde(default)]
    count: u32,
}

#[derive(Debug, Deserialize)]
struct SimilarArtists {
    #[serde(default)]
    artist: Vec<SimilarArtist>,
}

#[derive(Debug, Deserialize)]
struct SimilarArtist {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RecentTracks {
    #[serde(default)]
    track: Vec<Scrobble>,
    #[serde(rename = "@attr")]
    attr: Option<PageAttr>,
}

#[derive(Debug, Deserialize)]
struct PageAttr {
    #[serde(rename = "totalPages", default)]
    total_pages: String,
}

#[derive(Debug, Deserialize)]
struct Scrobble {
    artist: Text,
    /// Missing on the track that is playing right now
    date: Option<Text>,
}

#[derive(Debug, Deserialize)]
struct Text {
    #[serde(rename = "#text", default)]
    text: String,
}

fn scrobbled_artists(scrobbles: Vec<Scrobble>) -> Vec<String> {
    scrobbles
        .into_iter()
        .filter(|s| s.date.is_some() && !s.artist.text.is_empty())
        .map(|s| s.artist.text)
        .collect()
}

fn check(envelope: Envelope, subject: &str) -> Result<Envelope> {
    match envelope.error {
        Some(ERR_INVALID_PARAMS) => Err(Error::NotFound(subject.to_string())),
        Some(ERR_RATE_LIMIT) => Err(Error::Throttled { service: SERVICE, retry_after: None }),
        Some(code) => Err(Error::Malformed {
            service: SERVICE,
            message: format!("error {code}: {}", envelope.message.unwrap_or_default()),
        }),
        None => Ok(envelope),
    }
}

fn missing(field: &str, subject: &str) -> Error {
    Error::Malformed {
        service: SERVICE,
        message: format!("no {field} in answer for {subject}"),
    }
}

fn tag_names(tags: Vec<LastFmTag>) -> Vec<String> {
    tags.into_iter()
        .filter(|t| t.count >= MIN_TAG_COUNT)
        .map(|t| t.name)
        .take(MAX_TAGS)
        .collect()
}

pub struct LastFmClient {
    agent: Agent,
    api_base: String,
    api_key: String,
    retry: RetryPolicy,
}

impl LastFmClient {
    pub fn new(api_key: String, api_base: &str, retry: RetryPolicy) -> Self {
        Self {
            agent: http::agent(Duration::from_secs(15)),
            api_base: api_base.to_string(),
            api_key,
            retry,
        }
    }

    /// Call `method`; `subject` names the artist or user in error messages.
    fn call(&self, method: &str, subject: &str, params: &[(&str, &str)]) -> Result<Envelope> {
        let envelope: Envelope = self.retry.run(method, || {
            let mut request = self
                .agent
                .get(&self.api_base)
                .query("method", method)
                .query("api_key", &self.api_key)
                .query("format", "json");
            for (key, value) in params {
                request = request.query(key, value);
            }
            http::call_json(SERVICE, request)
        })?;
        check(envelope, subject)
    }

    fn call_artist(&self, method: &str, artist: &str, extra: &[(&str, &str)]) -> Result<Envelope> {
        let mut params = vec![("artist", artist), ("autocorrect", "1")];
        params.extend_from_slice(extra);
        self.call(method, artist, &params)
    }
}

impl TagService for LastFmClient {
    fn artist_tags(&self, artist_name: &str) -> Result<Vec<String>> {
        match self.call_artist("artist.gettoptags", artist_name, &[]) {
            Ok(envelope) => envelope
                .toptags
                .map(|t| tag_names(t.tag))
                .ok_or_else(|| missing("toptags", artist_name)),
            Err(Error::NotFound(_)) => {
                debug!("Last.fm does not know {artist_name}");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    fn similar_artists(&self, artist_name: &str, limit: usize) -> Result<Vec<String>> {
        let limit = limit.to_string();
        match self.call_artist("artist.getsimilar", artist_name, &[("limit", limit.as_str())]) {
            Ok(envelope) => envelope
                .similarartists
                .map(|s| s.artist.into_iter().map(|a| a.name).collect())
                .ok_or_else(|| missing("similarartists", artist_name)),
            Err(Error::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}

impl ListeningHistory for LastFmClient {
    fn recent_artists(&self, user: &str) -> Result<Vec<String>> {
        let mut artists = Vec::new();
        for page in 1..=RECENT_PAGES {
            let page_number = page.to_string();
            let envelope = self.call(
                "user.getrecenttracks",
                user,
                &[("user", user), ("limit", RECENT_PAGE), ("page", page_number.as_str())],
            )?;
            let recent = envelope.recenttracks.ok_or_else(|| missing("recenttracks", user))?;
            let last_page = recent
                .attr
                .as_ref()
                .and_then(|a| a.total_pages.parse::<u32>().ok())
                .unwrap_or(page);
            if recent.track.is_empty() {
                break;
            }
            artists.extend(scrobbled_artists(recent.track));
            if page >= last_page {
                break;
            }
        }
        debug!("{} recent scrobbles for {user}", artists.len());
        Ok(artists)
    }
}
