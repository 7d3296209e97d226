//! Recommendation Metrics and Performance Monitoring
//!
//! Metric names recorded through the `metrics` facade, a timing guard for
//! expensive operations, and the model statistics summary.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Instant;

pub const RECOMMENDATIONS_TOTAL: &str = "cortex_recommendations_total";
pub const SIMILAR_ITEMS_TOTAL: &str = "cortex_similar_items_total";
pub const SIMILAR_USERS_TOTAL: &str = "cortex_similar_users_total";
pub const TRAINING_RUNS_TOTAL: &str = "cortex_training_runs_total";
pub const TRAINING_DURATION_SECONDS: &str = "cortex_training_duration_seconds";
pub const TRAINING_RMSE: &str = "cortex_training_rmse";
pub const ONLINE_UPDATES_TOTAL: &str = "cortex_online_updates_total";

/// Which branch answered a recommendation query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryPath {
    Hybrid,
    ColdStart,
    Popularity,
}

impl QueryPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryPath::Hybrid => "hybrid",
            QueryPath::ColdStart => "cold_start",
            QueryPath::Popularity => "popularity",
        }
    }
}

impl fmt::Display for QueryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) fn record_query(name: &'static str, path: QueryPath) {
    metrics::counter!(name, "path" => path.as_str()).increment(1);
}

/// Performance timer for tracking operation duration
pub struct PerformanceTimer {
    start: Instant,
    label: &'static str,
}

impl PerformanceTimer {
    pub fn new(label: &'static str) -> Self {
        Self {
            start: Instant::now(),
            label,
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    pub fn log_if_slow(&self, threshold_ms: u64) {
        let elapsed = self.elapsed_ms();
        if elapsed > threshold_ms {
            tracing::warn!(
                "Slow operation: {} took {}ms (threshold: {}ms)",
                self.label,
                elapsed,
                threshold_ms
            );
        }
    }
}

impl Drop for PerformanceTimer {
    fn drop(&mut self) {
        tracing::debug!("{} completed in {}ms", self.label, self.elapsed_ms());
    }
}

/// Summary of the current model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelStats {
    pub trained: bool,
    pub users: usize,
    pub items: usize,
    pub unique_tags: usize,
    pub latent_factors: usize,
    pub embedding_size: usize,
    pub cf_weight: f64,
    pub cb_weight: f64,
    pub global_mean: Option<f64>,
    pub total_parameters: usize,
    pub online_updates: u64,
    pub trained_at: Option<DateTime<Utc>>,
}

impl ModelStats {
    /// Biases, latent factors, tag embeddings, item content and user preference vectors
    pub fn parameter_count(users: usize, items: usize, tags: usize, factors: usize, width: usize) -> usize {
        (users + items) * factors + users + items + tags * width + items * width + users * width
    }
}

impl fmt::Display for ModelStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.trained {
            return write!(
                f,
                "Hybrid model (untrained): popularity fallback, weights CF={} CB={}",
                self.cf_weight, self.cb_weight
            );
        }
        write!(
            f,
            "Hybrid model: {} users, {} items, {} tags, {} latent factors, {}-d embeddings, \
             weights CF={} CB={}, {} parameters",
            self.users,
            self.items,
            self.unique_tags,
            self.latent_factors,
            self.embedding_size,
            self.cf_weight,
            self.cb_weight,
            self.total_parameters
        )?;
        if let Some(mean) = self.global_mean {
            write!(f, ", global mean {:.3}", mean)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_count() {
        // (3 + 4) * 10 + 3 + 4 + 5 * 8 + 4 * 8 + 3 * 8
        assert_eq!(ModelStats::parameter_count(3, 4, 5, 10, 8), 70 + 7 + 40 + 32 + 24);
        assert_eq!(ModelStats::parameter_count(0, 0, 0, 10, 8), 0);
    }

    #[test]
    fn test_stats_display() {
        let stats = ModelStats {
            trained: true,
            users: 3,
            items: 4,
            unique_tags: 5,
            latent_factors: 10,
            embedding_size: 8,
            cf_weight: 0.6,
            cb_weight: 0.4,
            global_mean: Some(3.5),
            total_parameters: 173,
            online_updates: 0,
            trained_at: None,
        };
        let text = stats.to_string();
        assert!(text.contains("3 users"));
        assert!(text.contains("173 parameters"));
        assert!(text.contains("global mean 3.500"));

        let untrained = ModelStats {
            trained: false,
            global_mean: None,
            ..stats
        };
        assert!(untrained.to_string().contains("untrained"));
    }

    #[test]
    fn test_query_path_labels() {
        assert_eq!(QueryPath::ColdStart.to_string(), "cold_start");
        assert_eq!(QueryPath::Hybrid.as_str(), "hybrid");
    }
}
