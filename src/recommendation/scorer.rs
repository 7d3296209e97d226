//! Hybrid Scorer
//!
//! Blends the collaborative and content predictions for a (user, item)
//! pair, and the factor and content similarities for item/item and
//! user/user pairs. All inputs are dense indexes into one snapshot.

use crate::config::EngineConfig;

use super::factorization::FactorModel;
use super::snapshot::ModelSnapshot;
use super::vector::{cosine_similarity, is_zero};

/// Read-only view over a snapshot and the factor model locked for the query
#[derive(Clone, Copy)]
pub struct HybridScorer<'a> {
    config: &'a EngineConfig,
    snapshot: &'a ModelSnapshot,
    factors: &'a FactorModel,
}

impl<'a> HybridScorer<'a> {
    pub fn new(
        config: &'a EngineConfig,
        snapshot: &'a ModelSnapshot,
        factors: &'a FactorModel,
    ) -> Self {
        Self {
            config,
            snapshot,
            factors,
        }
    }

    pub fn predict_cf(&self, u: usize, i: usize) -> f64 {
        self.factors.predict(u, i)
    }

    /// Maps cosine in [-1, 1] onto the rating scale [1, 5].
    /// Falls back to the global mean when either side carries no content signal.
    pub fn predict_cb(&self, u: usize, i: usize) -> f64 {
        let preference = self.snapshot.user_preference(u);
        let content = self.snapshot.item_content(i);
        if is_zero(preference) || is_zero(content) {
            return self.factors.global_mean();
        }
        1.0 + (cosine_similarity(preference, content) + 1.0) * 2.0
    }

    pub fn predict(&self, u: usize, i: usize) -> f64 {
        self.config.cf_weight * self.predict_cf(u, i) + self.config.cb_weight * self.predict_cb(u, i)
    }

    pub fn item_similarity(&self, a: usize, b: usize) -> f64 {
        let factor_sim = cosine_similarity(self.factors.item_row(a), self.factors.item_row(b));
        let content_sim =
            cosine_similarity(self.snapshot.item_content(a), self.snapshot.item_content(b));
        self.config.cf_weight * factor_sim + self.config.cb_weight * content_sim
    }

    pub fn user_similarity(&self, a: usize, b: usize) -> f64 {
        let factor_sim = cosine_similarity(self.factors.user_row(a), self.factors.user_row(b));
        let content_sim = cosine_similarity(
            self.snapshot.user_preference(a),
            self.snapshot.user_preference(b),
        );
        self.config.cf_weight * factor_sim + self.config.cb_weight * content_sim
    }
}
