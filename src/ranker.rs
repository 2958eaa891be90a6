//! Nearest-neighbour candidates for a seed vector.

use crate::db::FeatureStore;
use crate::error::Result;
use crate::features::{Candidate, FeatureVector};
use log::debug;
use std::collections::HashSet;

/// Candidates pulled per seed. Several usually fail validation, so this is
/// well above the one track a seed normally contributes.
pub const DEFAULT_LIMIT: usize = 20;

pub struct CandidateRanker<'a> {
    store: &'a FeatureStore,
    limit: usize,
}

impl<'a> CandidateRanker<'a> {
    pub fn new(store: &'a FeatureStore) -> Self {
        Self { store, limit: DEFAULT_LIMIT }
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.max(1);
        self
    }

    /// Closest stored tracks to `seed`, nearest first. The seed itself is
    /// always excluded.
    pub fn rank(&self, seed: &FeatureVector, exclude: &HashSet<String>) -> Result<Vec<Candidate>> {
        let mut exclude = exclude.clone();
        exclude.insert(seed.track_id.clone());
        let candidates = self.store.k_nearest(&seed.profile, &exclude, self.limit)?;
        debug!(
            "{} candidates near '{}' (closest {:?})",
            candidates.len(),
            seed.track_name,
            candidates.first().map(|c| c.distance)
        );
        Ok(candidates)
    }
}
