//! Recommendation Service
//!
//! Orchestrates training and answers queries against the current model
//! snapshot. Every query degrades instead of failing:
//!
//! - untrained engine: popularity ranking (quality rating, descending)
//! - user unknown to the index: cold start from the user's preferred tags
//! - target item unknown to the index: popularity ranking
//!
//! Training builds a complete [`ModelSnapshot`] without holding any lock and
//! publishes it with a single pointer swap.

use chrono::{Months, NaiveDate, Utc};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::model::{Item, ItemId, Rating, User, UserId};
use crate::store::InteractionStore;

use super::content::{ratings_by_user, ContentVectorBuilder};
use super::embeddings::TagEmbeddingLearner;
use super::factorization::{self, ConvergenceReport, MatrixFactorizationTrainer};
use super::metrics::{self as rec_metrics, ModelStats, PerformanceTimer, QueryPath};
use super::scorer::HybridScorer;
use super::snapshot::{IdIndex, ModelSnapshot};
use super::vector::cosine_similarity;

/// What a training run produced
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrainingOutcome {
    /// A new snapshot was published
    Trained(TrainingReport),
    /// Too few ratings; the engine is now untrained
    InsufficientData { ratings: usize, required: usize },
    /// Another training run was in progress
    Skipped,
}

impl TrainingOutcome {
    pub fn is_trained(&self) -> bool {
        matches!(self, TrainingOutcome::Trained(_))
    }

    pub fn report(&self) -> Option<&TrainingReport> {
        match self {
            TrainingOutcome::Trained(report) => Some(report),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub users: usize,
    pub items: usize,
    pub tags: usize,
    /// Ratings after collapsing duplicate (user, item) pairs
    pub ratings: usize,
    pub global_mean: f64,
    pub duration_ms: u64,
    #[serde(flatten)]
    pub convergence: ConvergenceReport,
}

/// Hybrid recommendation engine
pub struct RecommendationService {
    config: EngineConfig,
    snapshot: RwLock<Option<Arc<ModelSnapshot>>>,
    training: Mutex<()>,
    online_updates: AtomicU64,
}

impl RecommendationService {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            snapshot: RwLock::new(None),
            training: Mutex::new(()),
            online_updates: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_trained(&self) -> bool {
        self.snapshot.read().is_some()
    }

    /// The published snapshot, if any
    pub fn snapshot(&self) -> Option<Arc<ModelSnapshot>> {
        self.snapshot.read().clone()
    }

    // ========================================================================
    // Training
    // ========================================================================

    /// Full retrain from a snapshot of users, items and ratings.
    ///
    /// Below `min_ratings` (after collapsing duplicates) the engine is marked
    /// untrained and every query falls back to popularity.
    pub fn train(&self, users: &[User], items: &[Item], ratings: &[Rating]) -> TrainingOutcome {
        let Some(_guard) = self.training.try_lock() else {
            warn!("Training already in progress, skipping");
            return TrainingOutcome::Skipped;
        };

        let timer = PerformanceTimer::new("train");
        let mut ratings = dedup_ratings(ratings);
        ratings.sort_by_key(|r| (r.user_id, r.item_id));

        if ratings.len() < self.config.min_ratings {
            warn!(
                "⚠️ Only {} ratings (need {}), engine stays untrained",
                ratings.len(),
                self.config.min_ratings
            );
            *self.snapshot.write() = None;
            metrics::counter!(rec_metrics::TRAINING_RUNS_TOTAL, "result" => "insufficient_data")
                .increment(1);
            return TrainingOutcome::InsufficientData {
                ratings: ratings.len(),
                required: self.config.min_ratings,
            };
        }

        info!(
            "🧠 Training hybrid model: {} users, {} items, {} ratings",
            users.len(),
            items.len(),
            ratings.len()
        );

        let (snapshot, convergence) = self.build_snapshot(users, items, &ratings);
        let report = TrainingReport {
            users: snapshot.users.len(),
            items: snapshot.items.len(),
            tags: snapshot.embeddings.len(),
            ratings: ratings.len(),
            global_mean: snapshot.factors.read().global_mean(),
            duration_ms: timer.elapsed_ms(),
            convergence,
        };

        *self.snapshot.write() = Some(Arc::new(snapshot));
        self.online_updates.store(0, AtomicOrdering::Relaxed);

        metrics::counter!(rec_metrics::TRAINING_RUNS_TOTAL, "result" => "trained").increment(1);
        metrics::histogram!(rec_metrics::TRAINING_DURATION_SECONDS).record(timer.elapsed_secs());
        metrics::gauge!(rec_metrics::TRAINING_RMSE).set(report.convergence.final_rmse);

        info!(
            "✅ Model trained in {}ms: {} epochs, final RMSE {:.4}{}",
            report.duration_ms,
            report.convergence.epochs,
            report.convergence.final_rmse,
            if report.convergence.converged { " (converged)" } else { "" }
        );

        TrainingOutcome::Trained(report)
    }

    /// Retrain from whatever the store currently holds
    pub fn train_from_store(&self, store: &dyn InteractionStore) -> Result<TrainingOutcome> {
        let users = store.list_users()?;
        let items = store.list_items()?;
        let ratings = store.list_ratings()?;
        Ok(self.train(&users, &items, &ratings))
    }

    fn build_snapshot(
        &self,
        users: &[User],
        items: &[Item],
        ratings: &[Rating],
    ) -> (ModelSnapshot, ConvergenceReport) {
        let config = &self.config;
        let mut rng = StdRng::seed_from_u64(config.seed);

        let user_index = IdIndex::build(users.iter().map(|u| u.id));
        let item_index = IdIndex::build(items.iter().map(|i| i.id));

        let embeddings = TagEmbeddingLearner::new(config).learn(items, &mut rng);
        let builder = ContentVectorBuilder::new(config, &embeddings);
        let item_content = builder.item_vectors(items, &item_index);
        let by_user = ratings_by_user(users, ratings);
        let user_preferences = builder.preference_vectors(users, items, &by_user, &user_index);

        let global_mean = factorization::global_mean(ratings);
        let mut samples = factorization::samples(ratings, &user_index, &item_index);
        let skipped = ratings.len() - samples.len();
        if skipped > 0 {
            debug!("{} ratings reference unknown users or items, skipped", skipped);
        }

        let (factors, convergence) = MatrixFactorizationTrainer::new(config).train(
            &mut samples,
            user_index.len(),
            item_index.len(),
            global_mean,
            &mut rng,
        );

        let snapshot = ModelSnapshot {
            users: user_index,
            items: item_index,
            factors: RwLock::new(factors),
            embeddings,
            item_content,
            user_preferences,
            trained_at: Utc::now(),
        };
        (snapshot, convergence)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Top `count` unowned candidates for `user`
    pub fn get_recommendations(&self, user: &User, candidates: &[Item], count: usize) -> Vec<Item> {
        let timer = PerformanceTimer::new("get_recommendations");
        let unowned: Vec<&Item> = candidates.iter().filter(|i| !user.owns(i.id)).collect();

        let (path, result) = match self.snapshot() {
            None => (QueryPath::Popularity, popularity(unowned, count)),
            Some(snapshot) => match snapshot.users.get(&user.id) {
                Some(u) => {
                    let factors = snapshot.factors.read();
                    let scorer = HybridScorer::new(&self.config, &snapshot, &factors);
                    let scored: Vec<(&Item, f64)> = unowned
                        .par_iter()
                        .filter_map(|item| {
                            let i = snapshot.items.get(&item.id)?;
                            Some((*item, scorer.predict(u, i)))
                        })
                        .collect();
                    (QueryPath::Hybrid, top_k(scored, count))
                }
                None => self.cold_start(&snapshot, user, unowned, count),
            },
        };

        rec_metrics::record_query(rec_metrics::RECOMMENDATIONS_TOTAL, path);
        timer.log_if_slow(200);
        debug!(
            "Generated {} recommendations for user {} ({})",
            result.len(),
            user.id,
            path
        );
        result
    }

    /// Rank candidates by cosine to the mean of the user's preferred-tag embeddings
    fn cold_start(
        &self,
        snapshot: &ModelSnapshot,
        user: &User,
        candidates: Vec<&Item>,
        count: usize,
    ) -> (QueryPath, Vec<Item>) {
        let preference = snapshot
            .embeddings
            .mean_of(user.preferred_tags.iter().map(String::as_str));
        let Some(preference) = preference else {
            return (QueryPath::Popularity, popularity(candidates, count));
        };

        let builder = ContentVectorBuilder::new(&self.config, &snapshot.embeddings);
        let scored: Vec<(&Item, f64)> = candidates
            .par_iter()
            .map(|item| {
                let score = match snapshot.items.get(&item.id) {
                    Some(i) => cosine_similarity(&preference, snapshot.item_content(i)),
                    None => cosine_similarity(&preference, &builder.item_vector(item)),
                };
                (*item, score)
            })
            .collect();
        (QueryPath::ColdStart, top_k(scored, count))
    }

    /// Candidates most similar to `target`, excluding the target itself
    pub fn get_similar_items(&self, target: &Item, candidates: &[Item], count: usize) -> Vec<Item> {
        let others: Vec<&Item> = candidates.iter().filter(|i| i.id != target.id).collect();

        let snapshot = self.snapshot();
        let indexed = snapshot
            .as_ref()
            .and_then(|s| s.items.get(&target.id).map(|t| (s, t)));

        let (path, result) = match indexed {
            None => (QueryPath::Popularity, popularity(others, count)),
            Some((snapshot, t)) => {
                let factors = snapshot.factors.read();
                let scorer = HybridScorer::new(&self.config, snapshot, &factors);
                let scored: Vec<(&Item, f64)> = others
                    .par_iter()
                    .filter_map(|item| {
                        let i = snapshot.items.get(&item.id)?;
                        Some((*item, scorer.item_similarity(t, i)))
                    })
                    .collect();
                (QueryPath::Hybrid, top_k(scored, count))
            }
        };

        rec_metrics::record_query(rec_metrics::SIMILAR_ITEMS_TOTAL, path);
        result
    }

    /// Users most similar to `target`. Empty when untrained or the target is unknown.
    pub fn find_similar_users(&self, target: &User, users: &[User], count: usize) -> Vec<User> {
        let Some(snapshot) = self.snapshot() else {
            return Vec::new();
        };
        let Some(t) = snapshot.users.get(&target.id) else {
            return Vec::new();
        };

        let factors = snapshot.factors.read();
        let scorer = HybridScorer::new(&self.config, &snapshot, &factors);
        let mut scored: Vec<(&User, f64)> = users
            .par_iter()
            .filter(|u| u.id != target.id)
            .filter_map(|u| {
                let i = snapshot.users.get(&u.id)?;
                Some((u, scorer.user_similarity(t, i)))
            })
            .collect();
        sort_by_score(&mut scored);

        rec_metrics::record_query(rec_metrics::SIMILAR_USERS_TOTAL, QueryPath::Hybrid);
        scored.into_iter().take(count).map(|(u, _)| u.clone()).collect()
    }

    /// Hybrid prediction for a pair known to the index
    pub fn predict_rating(&self, user_id: UserId, item_id: ItemId) -> Option<f64> {
        let snapshot = self.snapshot()?;
        let u = snapshot.users.get(&user_id)?;
        let i = snapshot.items.get(&item_id)?;
        let factors = snapshot.factors.read();
        Some(HybridScorer::new(&self.config, &snapshot, &factors).predict(u, i))
    }

    // ========================================================================
    // Online updates
    // ========================================================================

    /// One SGD step at the online learning rate for a new or changed rating.
    /// Returns false (no-op) when untrained or either id is unknown to the index.
    /// Tag and content structures are left as they are until the next retrain.
    pub fn on_new_rating(&self, rating: &Rating) -> bool {
        let Some(snapshot) = self.snapshot() else {
            return false;
        };
        let (Some(u), Some(i)) = (
            snapshot.users.get(&rating.user_id),
            snapshot.items.get(&rating.item_id),
        ) else {
            debug!(
                "Rating ({}, {}) not in the trained index, waiting for retrain",
                rating.user_id, rating.item_id
            );
            return false;
        };

        let error = snapshot.factors.write().sgd_step(
            u,
            i,
            rating.value(),
            self.config.online_learning_rate(),
            self.config.regularization,
        );

        self.online_updates.fetch_add(1, AtomicOrdering::Relaxed);
        metrics::counter!(rec_metrics::ONLINE_UPDATES_TOTAL).increment(1);
        debug!(
            "Online update for user {} item {} (error {:.4})",
            rating.user_id, rating.item_id, error
        );
        true
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    pub fn model_stats(&self) -> ModelStats {
        let c = &self.config;
        let mut stats = ModelStats {
            trained: false,
            users: 0,
            items: 0,
            unique_tags: 0,
            latent_factors: c.latent_factors,
            embedding_size: c.embedding_size,
            cf_weight: c.cf_weight,
            cb_weight: c.cb_weight,
            global_mean: None,
            total_parameters: 0,
            online_updates: self.online_updates.load(AtomicOrdering::Relaxed),
            trained_at: None,
        };

        if let Some(snapshot) = self.snapshot() {
            stats.trained = true;
            stats.users = snapshot.users.len();
            stats.items = snapshot.items.len();
            stats.unique_tags = snapshot.embeddings.len();
            stats.global_mean = Some(snapshot.factors.read().global_mean());
            stats.total_parameters = ModelStats::parameter_count(
                stats.users,
                stats.items,
                stats.unique_tags,
                c.latent_factors,
                c.embedding_size,
            );
            stats.trained_at = Some(snapshot.trained_at);
        }
        stats
    }

    /// Latent factor row of an indexed item
    pub fn item_embedding(&self, item_id: ItemId) -> Option<Vec<f64>> {
        let snapshot = self.snapshot()?;
        let i = snapshot.items.get(&item_id)?;
        let row = snapshot.factors.read().item_row(i).to_vec();
        Some(row)
    }

    /// Latent factor row of an indexed user
    pub fn user_embedding(&self, user_id: UserId) -> Option<Vec<f64>> {
        let snapshot = self.snapshot()?;
        let u = snapshot.users.get(&user_id)?;
        let row = snapshot.factors.read().user_row(u).to_vec();
        Some(row)
    }

    pub fn item_content_vector(&self, item_id: ItemId) -> Option<Vec<f64>> {
        let snapshot = self.snapshot()?;
        let i = snapshot.items.get(&item_id)?;
        Some(snapshot.item_content(i).to_vec())
    }

    pub fn tag_embedding(&self, tag: &str) -> Option<Vec<f64>> {
        self.snapshot()?.embeddings.get(tag).map(<[f64]>::to_vec)
    }
}

/// Items released in the six months before `today`, best rated first
pub fn trending_items(items: &[Item], count: usize, today: NaiveDate) -> Vec<Item> {
    let cutoff = today.checked_sub_months(Months::new(6)).unwrap_or(NaiveDate::MIN);
    let recent: Vec<&Item> = items
        .iter()
        .filter(|i| i.release_date.is_some_and(|d| d > cutoff))
        .collect();
    popularity(recent, count)
}

// ============================================================================
// Ranking helpers
// ============================================================================

/// Collapse duplicate (user, item) ratings to the latest one. Equal timestamps
/// resolve to the later position. First-appearance order is kept.
fn dedup_ratings(ratings: &[Rating]) -> Vec<Rating> {
    let mut position: HashMap<(UserId, ItemId), usize> = HashMap::with_capacity(ratings.len());
    let mut out: Vec<Rating> = Vec::with_capacity(ratings.len());
    for r in ratings {
        match position.get(&(r.user_id, r.item_id)) {
            Some(&p) => {
                if r.created_at >= out[p].created_at {
                    out[p] = r.clone();
                }
            }
            None => {
                position.insert((r.user_id, r.item_id), out.len());
                out.push(r.clone());
            }
        }
    }
    out
}

/// Quality rating descending, popularity count breaking ties. Stable.
fn popularity(mut items: Vec<&Item>, count: usize) -> Vec<Item> {
    items.sort_by(|a, b| {
        b.rating
            .partial_cmp(&a.rating)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.rating_count.cmp(&a.rating_count))
    });
    items.into_iter().take(count).cloned().collect()
}

fn sort_by_score<T>(scored: &mut [(T, f64)]) {
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
}

fn top_k(mut scored: Vec<(&Item, f64)>, count: usize) -> Vec<Item> {
    sort_by_score(&mut scored);
    scored.into_iter().take(count).map(|(i, _)| i.clone()).collect()
}
