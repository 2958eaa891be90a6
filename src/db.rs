//! # Feature Store
//!
//! SQLite-backed cache of audio fingerprints, one row per track in the
//! `audio_features` table. Rows are created on first resolution and never
//! deleted or overwritten afterwards.
//!
//! ## Completeness
//!
//! A row counts as resolved only when every numeric column is non-NULL.
//! Partial rows (left behind by interrupted imports or older tools) are
//! reported as [`Error::NotFound`] by [`FeatureStore::get`], are never ranked,
//! and may be completed by a later [`FeatureStore::upsert`].
//!
//! ## Locking
//!
//! The store wraps a single connection in a mutex. Every read and write goes
//! through that lock, so a store can be shared by reference across the batch
//! builder's workers. A poisoned lock or any SQLite failure surfaces as
//! [`Error::StoreUnavailable`].

use crate::error::{Error, Result};
use crate::features::{AudioProfile, Candidate, FeatureVector, DIMENSIONS};
use log::{debug, trace};
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension, Row};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Result of [`FeatureStore::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// New row written, or a partial row completed
    Inserted,
    /// A complete row already existed and was left alone
    AlreadyPresent,
}

/// Persistent feature table behind a coarse lock.
pub struct FeatureStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for FeatureStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureStore").finish_non_exhaustive()
    }
}

fn numeric_columns() -> impl Iterator<Item = &'static str> {
    DIMENSIONS.iter().map(|d| d.column).chain(std::iter::once("key_musical"))
}

fn complete_clause(table: &str) -> String {
    numeric_columns()
        .map(|c| format!("{table}{c} IS NOT NULL"))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn incomplete_clause(table: &str) -> String {
    numeric_columns()
        .map(|c| format!("{table}{c} IS NULL"))
        .collect::<Vec<_>>()
        .join(" OR ")
}

fn schema_sql() -> String {
    let dims = DIMENSIONS
        .iter()
        .map(|d| format!("            {} REAL,\n", d.column))
        .collect::<String>();
    format!(
        "CREATE TABLE IF NOT EXISTS audio_features (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            track_id TEXT NOT NULL UNIQUE,
            artist_name TEXT NOT NULL,
            track_name TEXT NOT NULL,
            source_uri TEXT,
            key_musical INTEGER,
{dims}            popularity INTEGER DEFAULT 0,
            match_title TEXT,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        );
        CREATE INDEX IF NOT EXISTS idx_features_artist ON audio_features(artist_name);
        CREATE INDEX IF NOT EXISTS idx_features_track ON audio_features(track_name);
        CREATE INDEX IF NOT EXISTS idx_features_tempo ON audio_features(tempo_bpm);
        CREATE INDEX IF NOT EXISTS idx_features_energy ON audio_features(energy);
        CREATE INDEX IF NOT EXISTS idx_features_danceability ON audio_features(danceability);
        CREATE INDEX IF NOT EXISTS idx_features_mood ON audio_features(mood_positive);"
    )
}

const IDENTITY_COLUMNS: &str = "track_id, artist_name, track_name, source_uri, popularity, match_title, key_musical";

fn select_columns() -> String {
    let dims: Vec<&str> = DIMENSIONS.iter().map(|d| d.column).collect();
    format!("{IDENTITY_COLUMNS}, {}", dims.join(", "))
}

/// Map a row selected with [`select_columns`]; `None` when any numeric
/// column is NULL.
fn row_to_vector(row: &Row<'_>) -> rusqlite::Result<Option<FeatureVector>> {
    let key: Option<i32> = row.get(6)?;
    let mut values = [0.0_f64; 16];
    for (i, slot) in values.iter_mut().enumerate() {
        match row.get::<_, Option<f64>>(7 + i)? {
            Some(v) => *slot = v,
            None => return Ok(None),
        }
    }
    let Some(key) = key else { return Ok(None) };

    Ok(Some(FeatureVector {
        track_id: row.get(0)?,
        artist_name: row.get(1)?,
        track_name: row.get(2)?,
        source_uri: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        popularity: row.get::<_, Option<i64>>(4)?.unwrap_or(0),
        match_title: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
        profile: AudioProfile::from_values(values, key),
    }))
}

impl FeatureStore {
    /// Open (and create if needed) the store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| {
            Error::StoreUnavailable(format!("cannot open {}: {e}", path.display()))
        })?;
        conn.busy_timeout(Duration::from_secs(5))?;
        debug!("Opened feature store at {}", path.display());
        Self::with_connection(conn)
    }

    /// In-memory store, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(&schema_sql())?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::StoreUnavailable("store lock poisoned".to_string()))
    }

    /// Number of fully resolved rows. Also serves as an availability check.
    pub fn count(&self) -> Result<u64> {
        let conn = self.lock()?;
        let sql = format!("SELECT COUNT(*) FROM audio_features WHERE {}", complete_clause(""));
        let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Look up a resolved vector. Missing and partial rows are `NotFound`.
    pub fn get(&self, track_id: &str) -> Result<FeatureVector> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM audio_features WHERE track_id = ?1", select_columns());
        let row = conn
            .query_row(&sql, [track_id], row_to_vector)
            .optional()?;
        match row {
            Some(Some(vector)) => Ok(vector),
            Some(None) => {
                trace!("Row for {track_id} is incomplete");
                Err(Error::NotFound(track_id.to_string()))
            }
            None => Err(Error::NotFound(track_id.to_string())),
        }
    }

    /// Whether `track_id` has a fully resolved row.
    pub fn is_complete(&self, track_id: &str) -> Result<bool> {
        match self.get(track_id) {
            Ok(_) => Ok(true),
            Err(Error::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Insert `vector` unless a complete row for the same track exists.
    ///
    /// A partial row is completed in place; a complete row is never changed.
    pub fn upsert(&self, vector: &FeatureVector) -> Result<UpsertOutcome> {
        let conn = self.lock()?;

        let dims: Vec<&str> = DIMENSIONS.iter().map(|d| d.column).collect();
        let columns = format!(
            "track_id, artist_name, track_name, source_uri, popularity, match_title, key_musical, {}",
            dims.join(", ")
        );
        let placeholders = (1..=7 + dims.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let updates = columns
            .split(", ")
            .skip(1)
            .map(|c| format!("{c} = excluded.{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO audio_features ({columns}) VALUES ({placeholders})
             ON CONFLICT(track_id) DO UPDATE SET {updates}
             WHERE {}",
            incomplete_clause("audio_features.")
        );

        let mut params: Vec<Value> = vec![
            Value::Text(vector.track_id.clone()),
            Value::Text(vector.artist_name.clone()),
            Value::Text(vector.track_name.clone()),
            Value::Text(vector.source_uri.clone()),
            Value::Integer(vector.popularity),
            Value::Text(vector.match_title.clone()),
            Value::Integer(i64::from(vector.profile.musical_key)),
        ];
        params.extend(vector.profile.values().iter().map(|v| Value::Real(*v)));

        let changed = conn.execute(&sql, params_from_iter(params))?;
        if changed == 0 {
            trace!("{} already stored, left untouched", vector.track_id);
            Ok(UpsertOutcome::AlreadyPresent)
        } else {
            debug!("Stored features for {} ({})", vector.track_id, vector.track_name);
            Ok(UpsertOutcome::Inserted)
        }
    }

    /// The `k` resolved rows closest to `query`, skipping `exclude`.
    ///
    /// Distance is computed by SQLite with the weights in [`DIMENSIONS`];
    /// ties are broken by insertion order so repeated queries over an
    /// unchanged table return the same sequence.
    pub fn k_nearest(
        &self,
        query: &AudioProfile,
        exclude: &HashSet<String>,
        k: usize,
    ) -> Result<Vec<Candidate>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let conn = self.lock()?;

        let terms = DIMENSIONS
            .iter()
            .enumerate()
            .map(|(i, d)| {
                let n = i + 1;
                format!(
                    "{w:?} * (({c} - ?{n}) / {s:?}) * (({c} - ?{n}) / {s:?})",
                    w = d.weight,
                    c = d.column,
                    s = d.scale
                )
            })
            .collect::<Vec<_>>()
            .join(" + ");
        let sql = format!(
            "SELECT track_id, artist_name, track_name, source_uri, popularity, ({terms}) AS d2
             FROM audio_features
             WHERE {}
             ORDER BY d2 ASC, id ASC",
            complete_clause("")
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(query.values()), |row| {
            Ok(Candidate {
                track_id: row.get(0)?,
                artist_name: row.get(1)?,
                track_name: row.get(2)?,
                uri: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                popularity: row.get::<_, Option<i64>>(4)?.unwrap_or(0),
                distance: row.get::<_, f64>(5)?.max(0.0).sqrt(),
            })
        })?;

        let mut out = Vec::with_capacity(k);
        for candidate in rows {
            let candidate = candidate?;
            if exclude.contains(&candidate.track_id) {
                continue;
            }
            out.push(candidate);
            if out.len() == k {
                break;
            }
        }
        trace!("k_nearest returned {} of {k} requested", out.len());
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tempfile::TempDir;

    fn vector(id: &str, artist: &str, tempo: f64, energy: f64) -> FeatureVector {
        FeatureVector {
            track_id: id.to_string(),
            artist_name: artist.to_string(),
            track_name: format!("Song {id}"),
            source_uri: format!("spotify:track:{id}"),
            profile: AudioProfile {
                tempo_bpm: tempo,
                energy,
                danceability: 0.7,
                mood_positive: 0.6,
                ..AudioProfile::default()
            },
            popularity: 40,
            match_title: format!("{artist} - Song {id}"),
        }
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let store = FeatureStore::open_in_memory().unwrap();
        assert!(matches!(store.get("nope"), Err(Error::NotFound(_))));
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_upsert_then_get() {
        let store = FeatureStore::open_in_memory().unwrap();
        let v = vector("t1", "Artist", 120.0, 0.8);
        assert_eq!(store.upsert(&v).unwrap(), UpsertOutcome::Inserted);
        assert_eq!(store.get("t1").unwrap(), v);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_upsert_never_overwrites_complete_row() {
        let store = FeatureStore::open_in_memory().unwrap();
        let first = vector("t1", "Artist", 120.0, 0.8);
        let second = FeatureVector {
            match_title: "different".into(),
            ..vector("t1", "Other", 60.0, 0.1)
        };
        store.upsert(&first).unwrap();
        assert_eq!(store.upsert(&second).unwrap(), UpsertOutcome::AlreadyPresent);
        assert_eq!(store.get("t1").unwrap(), first);
    }

    #[test]
    fn test_partial_row_is_not_found_and_can_be_completed() {
        let store = FeatureStore::open_in_memory().unwrap();
        store
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO audio_features (track_id, artist_name, track_name, tempo_bpm)
                 VALUES ('t9', 'Half', 'Done', 100.0)",
                [],
            )
            .unwrap();

        assert!(matches!(store.get("t9"), Err(Error::NotFound(_))));
        assert!(!store.is_complete("t9").unwrap());
        assert_eq!(store.count().unwrap(), 0);
        assert!(store
            .k_nearest(&AudioProfile::default(), &HashSet::new(), 5)
            .unwrap()
            .is_empty());

        let full = vector("t9", "Half", 100.0, 0.4);
        assert_eq!(store.upsert(&full).unwrap(), UpsertOutcome::Inserted);
        assert_eq!(store.get("t9").unwrap(), full);
    }

    #[test]
    fn test_k_nearest_orders_and_excludes() {
        let store = FeatureStore::open_in_memory().unwrap();
        store.upsert(&vector("far", "C", 60.0, 0.1)).unwrap();
        store.upsert(&vector("near", "B", 118.0, 0.8)).unwrap();
        store.upsert(&vector("same", "A", 120.0, 0.8)).unwrap();

        let query = vector("q", "Q", 120.0, 0.8).profile;
        let all = store.k_nearest(&query, &HashSet::new(), 10).unwrap();
        let ids: Vec<_> = all.iter().map(|c| c.track_id.as_str()).collect();
        assert_eq!(ids, vec!["same", "near", "far"]);
        assert!(all.windows(2).all(|w| w[0].distance <= w[1].distance));
        assert_relative_eq!(all[0].distance, 0.0);

        let exclude: HashSet<String> = ["same".to_string()].into_iter().collect();
        let rest = store.k_nearest(&query, &exclude, 1).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].track_id, "near");
    }

    #[test]
    fn test_sql_distance_matches_rust_distance() {
        let store = FeatureStore::open_in_memory().unwrap();
        let mut v = vector("t1", "A", 97.0, 0.3);
        v.profile.brightness_hz = 3100.0;
        v.profile.treble_hz = 7000.0;
        v.profile.dynamic_range_db = 18.0;
        v.profile.texture = -150.0;
        store.upsert(&v).unwrap();

        let query = vector("q", "Q", 131.0, 0.9).profile;
        let found = store.k_nearest(&query, &HashSet::new(), 1).unwrap();
        assert_relative_eq!(
            found[0].distance,
            crate::features::weighted_distance(&query, &v.profile),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_store_persists_on_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("features.db");
        {
            let store = FeatureStore::open(&path).unwrap();
            store.upsert(&vector("t1", "A", 120.0, 0.8)).unwrap();
        }
        let reopened = FeatureStore::open(&path).unwrap();
        assert_eq!(reopened.count().unwrap(), 1);
        assert_eq!(reopened.get("t1").unwrap().artist_name, "A");
    }
}
