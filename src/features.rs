//! # Audio Feature Model
//!
//! A track's audio fingerprint is an [`AudioProfile`]: sixteen numeric
//! dimensions used for similarity plus the estimated musical key (stored, not
//! compared). Each dimension is described once in [`DIMENSIONS`] with its
//! database column, normalisation range and weight, so the SQL ranking query in
//! [`crate::db`] and the in-memory [`weighted_distance`] can never drift apart.
//!
//! ## Distance
//!
//! ```text
//! d = sqrt( Σ weight_i · ((q_i - c_i) / scale_i)² )
//! ```
//!
//! Energy, danceability and valence carry the largest weights; tempo and the
//! spectral Hz dimensions are divided by a representative range first so a
//! single large-magnitude field cannot dominate.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// One comparable dimension of the profile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dimension {
    /// Column name in the `audio_features` table
    pub column: &'static str,
    /// Representative range the raw difference is divided by
    pub scale: f64,
    /// Weight applied to the squared normalised difference
    pub weight: f64,
}

const fn dim(column: &'static str, scale: f64, weight: f64) -> Dimension {
    Dimension { column, scale, weight }
}

/// Ordered list of distance dimensions. Order matches [`AudioProfile::values`].
pub const DIMENSIONS: [Dimension; 16] = [
    dim("tempo_bpm", 200.0, 0.8),
    dim("beat_regularity", 1.0, 1.2),
    dim("brightness_hz", 5000.0, 1.0),
    dim("treble_hz", 10000.0, 0.7),
    dim("fullness_hz", 5000.0, 0.6),
    dim("dynamic_range", 40.0, 0.9),
    dim("percussiveness", 1.0, 0.8),
    dim("loudness", 1.0, 0.7),
    dim("warmth", 1.0, 1.0),
    dim("punch", 1.0, 0.8),
    dim("texture", 1.0, 0.9),
    dim("energy", 1.0, 1.5),
    dim("danceability", 1.0, 1.3),
    dim("mood_positive", 1.0, 1.2),
    dim("acousticness", 1.0, 1.0),
    dim("instrumental", 1.0, 0.8),
];

/// Numeric audio fingerprint of one track.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AudioProfile {
    pub tempo_bpm: f64,
    pub musical_key: i32,
    pub beat_regularity: f64,
    pub brightness_hz: f64,
    pub treble_hz: f64,
    pub fullness_hz: f64,
    pub dynamic_range_db: f64,
    pub percussiveness: f64,
    pub loudness: f64,
    pub warmth: f64,
    pub punch: f64,
    pub texture: f64,
    pub energy: f64,
    pub danceability: f64,
    pub mood_positive: f64,
    pub acousticness: f64,
    pub instrumentalness: f64,
}

impl AudioProfile {
    /// Distance dimensions in [`DIMENSIONS`] order.
    #[must_use]
    pub const fn values(&self) -> [f64; 16] {
        [
            self.tempo_bpm,
            self.beat_regularity,
            self.brightness_hz,
            self.treble_hz,
            self.fullness_hz,
            self.dynamic_range_db,
            self.percussiveness,
            self.loudness,
            self.warmth,
            self.punch,
            self.texture,
            self.energy,
            self.danceability,
            self.mood_positive,
            self.acousticness,
            self.instrumentalness,
        ]
    }

    /// Rebuild a profile from values in [`DIMENSIONS`] order.
    #[must_use]
    pub const fn from_values(values: [f64; 16], musical_key: i32) -> Self {
        Self {
            tempo_bpm: values[0],
            musical_key,
            beat_regularity: values[1],
            brightness_hz: values[2],
            treble_hz: values[3],
            fullness_hz: values[4],
            dynamic_range_db: values[5],
            percussiveness: values[6],
            loudness: values[7],
            warmth: values[8],
            punch: values[9],
            texture: values[10],
            energy: values[11],
            danceability: values[12],
            mood_positive: values[13],
            acousticness: values[14],
            instrumentalness: values[15],
        }
    }
}

/// Weighted Euclidean distance between two profiles.
#[must_use]
pub fn weighted_distance(a: &AudioProfile, b: &AudioProfile) -> f64 {
    a.values()
        .iter()
        .zip(b.values().iter())
        .zip(DIMENSIONS.iter())
        .map(|((q, c), d)| {
            let diff = (q - c) / d.scale;
            d.weight * diff * diff
        })
        .sum::<f64>()
        .sqrt()
}

/// Stored fingerprint plus the identity of the track it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub track_id: String,
    pub artist_name: String,
    pub track_name: String,
    pub source_uri: String,
    pub profile: AudioProfile,
    pub popularity: i64,
    /// Title of the media the features were extracted from
    pub match_title: String,
}

/// Ephemeral result of a nearest-neighbour query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub track_id: String,
    pub artist_name: String,
    pub track_name: String,
    pub uri: String,
    pub popularity: i64,
    pub distance: f64,
}

/// Feature record as printed by the external extractor.
///
/// Field names follow the analysis tool's vocabulary; [`RawFeatures::into_profile`]
/// maps them onto the stored schema.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RawFeatures {
    pub tempo: f64,
    #[serde(default)]
    pub key_estimate: i32,
    pub beat_strength: f64,
    pub spectral_centroid: f64,
    pub spectral_rolloff: f64,
    pub spectral_bandwidth: f64,
    pub spectral_contrast: f64,
    pub zero_crossing_rate: f64,
    pub rms_energy: f64,
    pub harmonic_mean: f64,
    pub percussive_mean: f64,
    pub mfcc_mean: f64,
    pub energy: f64,
    pub danceability: f64,
    pub valence: f64,
    pub acousticness: f64,
    pub instrumentalness: f64,
}

impl RawFeatures {
    /// Validate and normalise into an [`AudioProfile`].
    ///
    /// Rejects non-finite values and a non-positive tempo; clamps the derived
    /// dimensions to `[0, 1]` and folds the key into `0..12`.
    pub fn into_profile(self) -> Result<AudioProfile> {
        let unit = |v: f64| v.clamp(0.0, 1.0);
        let profile = AudioProfile {
            tempo_bpm: self.tempo,
            musical_key: self.key_estimate.rem_euclid(12),
            beat_regularity: unit(self.beat_strength),
            brightness_hz: self.spectral_centroid,
            treble_hz: self.spectral_rolloff,
            fullness_hz: self.spectral_bandwidth,
            dynamic_range_db: self.spectral_contrast,
            percussiveness: self.zero_crossing_rate,
            loudness: self.rms_energy,
            warmth: self.harmonic_mean,
            punch: self.percussive_mean,
            texture: self.mfcc_mean,
            energy: unit(self.energy),
            danceability: unit(self.danceability),
            mood_positive: unit(self.valence),
            acousticness: unit(self.acousticness),
            instrumentalness: unit(self.instrumentalness),
        };

        if let Some(pos) = profile.values().iter().position(|v| !v.is_finite()) {
            return Err(Error::Extraction(format!(
                "{} is not a finite number",
                DIMENSIONS[pos].column
            )));
        }
        if profile.tempo_bpm <= 0.0 {
            return Err(Error::Extraction(format!(
                "tempo must be positive, got {}",
                profile.tempo_bpm
            )));
        }
        Ok(profile)
    }
}
