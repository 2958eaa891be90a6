//! # Feature Resolver
//!
//! Resolve-or-extract-and-cache: a track's features come from the
//! [`FeatureStore`] when present, otherwise from the [`MediaOracle`], and the
//! freshly extracted vector is written back.
//!
//! Outcomes:
//! - cache hit: no external call at all
//! - no matching media, or extraction failed: [`Error::Unresolvable`], and
//!   the store is left untouched
//! - oracle rate limit: [`Error::RateLimited`], passed through as is
//! - store lookup failure: [`Error::StoreUnavailable`], before any oracle call
//!
//! Extraction runs inside a scratch directory owned by the resolver; it is
//! removed when the call returns, whichever way it returns.

use crate::db::{FeatureStore, UpsertOutcome};
use crate::error::{Error, Result};
use crate::features::FeatureVector;
use crate::oracle::{best_match, MediaOracle};
use crate::provider::Track;
use log::{debug, info, warn};

/// Where a resolved vector came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Cached,
    /// Extracted and written to the store
    Extracted,
    /// Extracted, but a complete row appeared in the meantime and was kept
    StoredElsewhere,
    /// Extracted; writing it back failed
    Unsaved,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub vector: FeatureVector,
    pub source: Source,
}

pub struct FeatureResolver<'a> {
    store: &'a FeatureStore,
    oracle: &'a dyn MediaOracle,
}

fn keep_rate_limit(track_id: &str, err: Error) -> Error {
    match err {
        Error::RateLimited(_) => err,
        other => Error::unresolvable(track_id, other.to_string()),
    }
}

impl<'a> FeatureResolver<'a> {
    pub fn new(store: &'a FeatureStore, oracle: &'a dyn MediaOracle) -> Self {
        Self { store, oracle }
    }

    /// Features for `track`, extracting and caching them on a miss.
    pub fn resolve(&self, track: &Track) -> Result<Resolution> {
        match self.store.get(&track.id) {
            Ok(vector) => {
                debug!("Cache hit for {}", track.id);
                return Ok(Resolution { vector, source: Source::Cached });
            }
            Err(Error::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let artist_line = track.artist_line();
        let hits = self
            .oracle
            .search(&track.name, &artist_line)
            .map_err(|e| keep_rate_limit(&track.id, e))?;
        let Some(hit) = best_match(&hits, &track.name, &artist_line) else {
            debug!("No media match for '{}' by {artist_line}", track.name);
            return Err(Error::unresolvable(&track.id, "no matching media"));
        };
        info!("Matched '{}' by {artist_line} to '{}'", track.name, hit.title);

        let workdir = tempfile::Builder::new().prefix("kindred-").tempdir()?;
        let raw = self
            .oracle
            .extract_features(&hit.id, workdir.path())
            .map_err(|e| keep_rate_limit(&track.id, e));
        if let Err(e) = workdir.close() {
            warn!("Could not remove scratch directory: {e}");
        }
        let profile = raw?
            .into_profile()
            .map_err(|e| Error::unresolvable(&track.id, e.to_string()))?;

        let vector = FeatureVector {
            track_id: track.id.clone(),
            artist_name: artist_line,
            track_name: track.name.clone(),
            source_uri: track.uri.clone(),
            profile,
            popularity: track.popularity,
            match_title: hit.title.clone(),
        };

        let source = match self.store.upsert(&vector) {
            Ok(UpsertOutcome::Inserted) => Source::Extracted,
            Ok(UpsertOutcome::AlreadyPresent) => {
                debug!("{} was stored by another worker first", track.id);
                Source::StoredElsewhere
            }
            Err(e) => {
                warn!("Could not cache features for {}: {e}", track.id);
                Source::Unsaved
            }
        };
        Ok(Resolution { vector, source })
    }
}
