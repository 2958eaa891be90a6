//! Music discovery by audio similarity.
//!
//! Kindred picks artists from the listener's liked songs with a weighted
//! lottery, resolves audio features for their tracks, looks up the nearest
//! stored tracks and keeps the first candidate that passes every filter.
//!
//! Core modules:
//! - [`db`] - Feature store and k-nearest queries
//! - [`resolver`] - Resolve-or-extract-and-cache for one track
//! - [`ranker`] - Ordered candidates for a seed vector
//! - [`validation`] - Candidate filters
//! - [`lottery`] - Weighted seed-artist selection
//! - [`recommend`] - A full recommendation run
//! - [`builder`] - Parallel batch feature extraction
//!
//! ### Supporting Modules
//!
//! - [`features`] - Feature vector types and the distance metric
//! - [`provider`], [`oracle`], [`tags`] - Collaborator traits
//! - [`spotify`], [`ytdlp`], [`lastfm`] - Their real implementations
//! - [`exclusion`] - Per-run exclusion state
//! - [`fallback`] - Similar-artist fallback search
//! - [`retry`], [`http`] - Retry policy and HTTP helpers
//! - [`config`] - Data directory and settings
//! - [`cli`], [`completion`] - Command-line interface
//!
//! ## Quick Start Example
//!
//! ```no_run
//! use kindred::db::FeatureStore;
//! use kindred::ranker::CandidateRanker;
//! use std::collections::HashSet;
//!
//! let store = FeatureStore::open(&kindred::config::get_db_path()?)?;
//! let seed = store.get("4uLU6hMCjMI75M1A2tKUQC")?;
//! for candidate in CandidateRanker::new(&store).with_limit(5).rank(&seed, &HashSet::new())? {
//!     println!("{:.4} {} - {}", candidate.distance, candidate.artist_name, candidate.track_name);
//! }
//! # Ok::<(), kindred::Error>(())
//! ```
//!
//! ## Error Handling
//!
//! Library functions return [`Result`] with the crate [`Error`]. The binary
//! wraps them in `anyhow` for context. A recommendation run itself never
//! fails: every outcome is reported through [`recommend::RunReport`].

pub mod builder;
pub mod cli;
pub mod completion;
pub mod config;
pub mod db;
pub mod error;
pub mod exclusion;
pub mod fallback;
pub mod features;
pub mod http;
pub mod lastfm;
pub mod lottery;
pub mod oracle;
pub mod provider;
pub mod ranker;
pub mod recommend;
pub mod resolver;
pub mod retry;
pub mod spotify;
pub mod tags;
pub mod validation;
pub mod ytdlp;

pub use error::{Error, Result};
