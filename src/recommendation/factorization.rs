//! Matrix Factorization Trainer
//!
//! Biased matrix factorization fitted by stochastic gradient descent:
//!
//! ```text
//! pred(u, i) = clip(mean + b_u + b_i + p_u . q_i, 1, 5)
//! ```
//!
//! Gradients are taken against the unclipped value. Factor rows live in two
//! flat arenas (`U * F` and `I * F`) addressed by dense index.

use crate::config::EngineConfig;
use crate::model::{ItemId, Rating, UserId, MAX_SCORE, MIN_SCORE};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use tracing::{debug, info};

use super::snapshot::IdIndex;
use super::vector;

/// Global mean used when there is nothing to average
pub const DEFAULT_GLOBAL_MEAN: f64 = 3.0;

/// Learned biases and latent factors
#[derive(Debug, Clone, PartialEq)]
pub struct FactorModel {
    factors: usize,
    global_mean: f64,
    user_bias: Vec<f64>,
    item_bias: Vec<f64>,
    user_factors: Vec<f64>,
    item_factors: Vec<f64>,
}

impl FactorModel {
    /// Zero biases, factors drawn from N(0, sqrt(2 / (U + I)))
    pub fn initialize<R: Rng>(
        num_users: usize,
        num_items: usize,
        factors: usize,
        global_mean: f64,
        rng: &mut R,
    ) -> Self {
        let std_dev = (2.0 / (num_users + num_items).max(1) as f64).sqrt();
        let user_factors = vector::gaussian(rng, num_users * factors, std_dev);
        let item_factors = vector::gaussian(rng, num_items * factors, std_dev);

        Self {
            factors,
            global_mean,
            user_bias: vec![0.0; num_users],
            item_bias: vec![0.0; num_items],
            user_factors,
            item_factors,
        }
    }

    pub fn num_users(&self) -> usize {
        self.user_bias.len()
    }

    pub fn num_items(&self) -> usize {
        self.item_bias.len()
    }

    pub fn factors(&self) -> usize {
        self.factors
    }

    pub fn global_mean(&self) -> f64 {
        self.global_mean
    }

    pub fn user_bias(&self, u: usize) -> f64 {
        self.user_bias[u]
    }

    pub fn item_bias(&self, i: usize) -> f64 {
        self.item_bias[i]
    }

    pub fn user_row(&self, u: usize) -> &[f64] {
        &self.user_factors[u * self.factors..(u + 1) * self.factors]
    }

    pub fn item_row(&self, i: usize) -> &[f64] {
        &self.item_factors[i * self.factors..(i + 1) * self.factors]
    }

    /// `mean + b_u + b_i + p_u . q_i`, unclipped
    pub fn raw_prediction(&self, u: usize, i: usize) -> f64 {
        self.global_mean
            + self.user_bias[u]
            + self.item_bias[i]
            + vector::dot(self.user_row(u), self.item_row(i))
    }

    /// Collaborative prediction clipped to the rating scale
    pub fn predict(&self, u: usize, i: usize) -> f64 {
        self.raw_prediction(u, i)
            .clamp(MIN_SCORE as f64, MAX_SCORE as f64)
    }

    /// One SGD step on a single observation. Touches only user row `u`,
    /// item row `i` and their biases. Returns the pre-update error.
    pub fn sgd_step(&mut self, u: usize, i: usize, actual: f64, lr: f64, reg: f64) -> f64 {
        let error = actual - self.raw_prediction(u, i);

        let bu = &mut self.user_bias[u];
        *bu += lr * (error - reg * *bu);
        let bi = &mut self.item_bias[i];
        *bi += lr * (error - reg * *bi);

        let f = self.factors;
        let p = &mut self.user_factors[u * f..(u + 1) * f];
        let q = &mut self.item_factors[i * f..(i + 1) * f];
        for (pk, qk) in p.iter_mut().zip(q.iter_mut()) {
            let (old_p, old_q) = (*pk, *qk);
            *pk += lr * (error * old_q - reg * old_p);
            *qk += lr * (error * old_p - reg * old_q);
        }

        error
    }

    /// RMSE of the clipped prediction over `samples`; 0 when there are none
    pub fn rmse(&self, samples: &[Sample]) -> f64 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum: f64 = samples
            .iter()
            .map(|s| {
                let e = s.value - self.predict(s.user, s.item);
                e * e
            })
            .sum();
        (sum / samples.len() as f64).sqrt()
    }
}

/// One rating translated into dense indexes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub user: usize,
    pub item: usize,
    pub value: f64,
}

/// Mean score over all ratings, `DEFAULT_GLOBAL_MEAN` if there are none
pub fn global_mean(ratings: &[Rating]) -> f64 {
    if ratings.is_empty() {
        return DEFAULT_GLOBAL_MEAN;
    }
    ratings.iter().map(Rating::value).sum::<f64>() / ratings.len() as f64
}

/// Ratings whose user and item are both indexed, ordered by (user, item) index.
/// The rest are ignored by factorization.
pub fn samples(
    ratings: &[Rating],
    users: &IdIndex<UserId>,
    items: &IdIndex<ItemId>,
) -> Vec<Sample> {
    let mut samples: Vec<Sample> = ratings
        .iter()
        .filter_map(|r| {
            Some(Sample {
                user: users.get(&r.user_id)?,
                item: items.get(&r.item_id)?,
                value: r.value(),
            })
        })
        .collect();
    samples.sort_by_key(|s| (s.user, s.item));
    samples
}

/// How a factorization run ended
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConvergenceReport {
    pub epochs: usize,
    pub rmse_history: Vec<f64>,
    pub final_rmse: f64,
    pub converged: bool,
    pub samples: usize,
}

pub struct MatrixFactorizationTrainer<'a> {
    config: &'a EngineConfig,
}

impl<'a> MatrixFactorizationTrainer<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    /// Fit a fresh model. `samples` is shuffled in place every epoch.
    pub fn train<R: Rng>(
        &self,
        samples: &mut [Sample],
        num_users: usize,
        num_items: usize,
        global_mean: f64,
        rng: &mut R,
    ) -> (FactorModel, ConvergenceReport) {
        let c = self.config;
        let mut model =
            FactorModel::initialize(num_users, num_items, c.latent_factors, global_mean, rng);

        let mut rmse_history = Vec::with_capacity(c.max_iterations);
        let mut converged = false;

        for epoch in 0..c.max_iterations {
            samples.shuffle(rng);
            for s in samples.iter() {
                model.sgd_step(s.user, s.item, s.value, c.learning_rate, c.regularization);
            }

            let rmse = model.rmse(samples);
            rmse_history.push(rmse);

            if epoch % 20 == 0 {
                debug!("Epoch {}: RMSE = {:.4}", epoch, rmse);
            }
            if rmse < c.convergence_rmse {
                converged = true;
                info!("Converged at epoch {} with RMSE {:.4}", epoch, rmse);
                break;
            }
        }

        let report = ConvergenceReport {
            epochs: rmse_history.len(),
            final_rmse: rmse_history.last().copied().unwrap_or(0.0),
            rmse_history,
            converged,
            samples: samples.len(),
        };
        (model, report)
    }
}
