//! Configuration management for the Cortex engine
//!
//! Strongly-typed configuration with validation, environment variable parsing
//! and defaults matching the published model hyperparameters.
//!
//! # Example
//! ```no_run
//! use cortex::Config;
//! let config = Config::from_env().expect("failed to load config");
//! println!("Latent factors: {}", config.engine.latent_factors);
//! ```

use crate::error::{Error, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Model hyperparameters
    pub engine: EngineConfig,
    /// API server configuration
    pub api: ApiConfig,
    /// Where the interaction data comes from
    pub data: DataConfig,
    /// How often to retrain from the store (None = only at startup)
    pub retrain_interval: Option<Duration>,
    /// Seed for the implicit-feedback random source
    pub feedback_seed: u64,
}

/// Hybrid model hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineConfig {
    /// Width F of the user/item latent factor vectors
    pub latent_factors: usize,
    /// Width E of tag embeddings, content vectors and preference vectors
    pub embedding_size: usize,
    /// SGD learning rate, shared with the tag embedding learner
    pub learning_rate: f64,
    /// L2 regularization on biases and factors
    pub regularization: f64,
    /// Maximum SGD epochs for matrix factorization
    pub max_iterations: usize,
    /// Epochs of tag co-occurrence learning
    pub embedding_epochs: usize,
    /// Fraction of the learning rate applied per co-occurring tag pair
    pub co_occurrence_step: f64,
    /// Training stops once epoch RMSE falls below this
    pub convergence_rmse: f64,
    /// Below this many ratings the engine stays untrained
    pub min_ratings: usize,
    /// Weight of the collaborative prediction in the hybrid score
    pub cf_weight: f64,
    /// Weight of the content prediction in the hybrid score
    pub cb_weight: f64,
    /// Weight of owned-but-unrated items in user preference vectors
    pub owned_weight: f64,
    /// Online updates use `learning_rate * online_lr_multiplier`
    pub online_lr_multiplier: f64,
    /// Seed for initialization and shuffling
    pub seed: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            latent_factors: 10,
            embedding_size: 8,
            learning_rate: 0.01,
            regularization: 0.02,
            max_iterations: 100,
            embedding_epochs: 50,
            co_occurrence_step: 0.1,
            convergence_rmse: 0.1,
            min_ratings: 10,
            cf_weight: 0.6,
            cb_weight: 0.4,
            owned_weight: 0.5,
            online_lr_multiplier: 2.0,
            seed: 42,
        }
    }
}

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout: Duration,
    pub cors_enabled: bool,
    /// Port for the Prometheus exporter (only with the `prometheus` feature)
    pub metrics_port: u16,
}

/// Interaction data source
#[derive(Debug, Clone)]
pub struct DataConfig {
    /// JSON dataset loaded into the in-memory store at startup
    pub dataset_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Try to load .env file (ignore if not found)
        dotenvy::dotenv().ok();

        let retrain_secs: u64 = get_env_or("RETRAIN_INTERVAL_SECS", "0")
            .parse()
            .unwrap_or(0);

        let config = Self {
            engine: EngineConfig::from_env()?,
            api: ApiConfig::from_env()?,
            data: DataConfig::from_env(),
            retrain_interval: (retrain_secs > 0).then(|| Duration::from_secs(retrain_secs)),
            feedback_seed: get_env_or("FEEDBACK_SEED", "7").parse().unwrap_or(7),
        };

        config.validate()?;
        config.log_summary();

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;

        if self.api.port == 0 {
            return Err(Error::InvalidConfig {
                key: "API_PORT",
                message: "port must be non-zero".into(),
            });
        }

        Ok(())
    }

    /// Log configuration summary
    fn log_summary(&self) {
        let e = &self.engine;
        info!("Configuration loaded:");
        info!("  Model:");
        info!(
            "    Latent factors: {}, tag embedding size: {}",
            e.latent_factors, e.embedding_size
        );
        info!(
            "    Learning rate: {}, regularization: {}, max iterations: {}",
            e.learning_rate, e.regularization, e.max_iterations
        );
        info!(
            "    Hybrid weights: CF={}, CB={}",
            e.cf_weight, e.cb_weight
        );
        info!("    Minimum ratings to train: {}", e.min_ratings);
        info!("  Data:");
        match &self.data.dataset_path {
            Some(path) => info!("    Dataset: {}", path.display()),
            None => info!("    Dataset: none (empty store)"),
        }
        match self.retrain_interval {
            Some(interval) => info!("    Retrain every {:?}", interval),
            None => info!("    Periodic retraining disabled"),
        }
        info!("  API:");
        info!("    Listening on: {}:{}", self.api.host, self.api.port);
    }
}

impl EngineConfig {
    fn from_env() -> Result<Self> {
        let d = Self::default();
        Ok(Self {
            latent_factors: get_env_parsed_or("REC_LATENT_FACTORS", d.latent_factors)?,
            embedding_size: get_env_parsed_or("REC_EMBEDDING_SIZE", d.embedding_size)?,
            learning_rate: get_env_parsed_or("REC_LEARNING_RATE", d.learning_rate)?,
            regularization: get_env_parsed_or("REC_REGULARIZATION", d.regularization)?,
            max_iterations: get_env_parsed_or("REC_MAX_ITERATIONS", d.max_iterations)?,
            embedding_epochs: get_env_parsed_or("REC_EMBEDDING_EPOCHS", d.embedding_epochs)?,
            co_occurrence_step: get_env_parsed_or("REC_CO_OCCURRENCE_STEP", d.co_occurrence_step)?,
            convergence_rmse: get_env_parsed_or("REC_CONVERGENCE_RMSE", d.convergence_rmse)?,
            min_ratings: get_env_parsed_or("REC_MIN_RATINGS", d.min_ratings)?,
            cf_weight: get_env_parsed_or("REC_CF_WEIGHT", d.cf_weight)?,
            cb_weight: get_env_parsed_or("REC_CB_WEIGHT", d.cb_weight)?,
            owned_weight: get_env_parsed_or("REC_OWNED_WEIGHT", d.owned_weight)?,
            online_lr_multiplier: get_env_parsed_or(
                "REC_ONLINE_LR_MULTIPLIER",
                d.online_lr_multiplier,
            )?,
            seed: get_env_parsed_or("REC_SEED", d.seed)?,
        })
    }

    /// Reject hyperparameters the trainer cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.latent_factors == 0 {
            return Err(Error::InvalidConfig {
                key: "REC_LATENT_FACTORS",
                message: "must be at least 1".into(),
            });
        }
        if self.embedding_size == 0 {
            return Err(Error::InvalidConfig {
                key: "REC_EMBEDDING_SIZE",
                message: "must be at least 1".into(),
            });
        }
        if !(self.learning_rate > 0.0) {
            return Err(Error::InvalidConfig {
                key: "REC_LEARNING_RATE",
                message: "must be positive".into(),
            });
        }
        for (key, value) in [
            ("REC_REGULARIZATION", self.regularization),
            ("REC_CF_WEIGHT", self.cf_weight),
            ("REC_CB_WEIGHT", self.cb_weight),
            ("REC_OWNED_WEIGHT", self.owned_weight),
            ("REC_ONLINE_LR_MULTIPLIER", self.online_lr_multiplier),
        ] {
            if !(value >= 0.0) {
                return Err(Error::InvalidConfig {
                    key,
                    message: format!("must be non-negative, got {}", value).into(),
                });
            }
        }
        Ok(())
    }

    /// Learning rate used for a single online update
    pub fn online_learning_rate(&self) -> f64 {
        self.learning_rate * self.online_lr_multiplier
    }
}

impl ApiConfig {
    fn from_env() -> Result<Self> {
        Ok(Self {
            port: get_env_or("API_PORT", "8080").parse().unwrap_or(8080),
            host: get_env_or("API_HOST", "0.0.0.0"),
            request_timeout: Duration::from_secs(
                get_env_or("API_REQUEST_TIMEOUT_SECS", "30")
                    .parse()
                    .unwrap_or(30),
            ),
            cors_enabled: get_env_or("API_CORS_ENABLED", "true")
                .parse()
                .unwrap_or(true),
            metrics_port: get_env_or("METRICS_PORT", "9090").parse().unwrap_or(9090),
        })
    }
}

impl DataConfig {
    fn from_env() -> Self {
        Self {
            dataset_path: std::env::var("DATASET_PATH")
                .ok()
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
        }
    }
}

// ============================================================================
// Helper functions
// ============================================================================

/// Get environment variable with default
fn get_env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an environment variable if present, otherwise use the default.
/// A present but unparsable value is a configuration error.
fn get_env_parsed_or<T>(key: &'static str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(value) => value.trim().parse().map_err(|e: T::Err| Error::InvalidConfig {
            key,
            message: format!("Invalid value '{}': {}", value, e).into(),
        }),
        Err(_) => Ok(default),
    }
}
