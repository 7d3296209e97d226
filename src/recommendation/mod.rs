//! Recommendation Module
//!
//! Hybrid recommender for the game library: collaborative filtering from the
//! rating matrix blended with content-based filtering from learned tag
//! embeddings.
//!
//! ## Architecture
//!
//! 1. **Embeddings** - Learn a dense vector per tag from tag co-occurrence
//! 2. **Content** - Item content vectors and user preference vectors from tag embeddings
//! 3. **Factorization** - Biased matrix factorization trained by SGD
//! 4. **Scorer** - Blend CF and CB predictions and similarities
//! 5. **Engine** - Train, publish snapshots, answer queries with fallbacks
//!
//! ## Algorithm Overview
//!
//! The hybrid prediction for a known (user, item) pair is:
//! - Collaborative (60%): `clip(mean + b_u + b_i + p_u . q_i, 1, 5)`
//! - Content (40%): cosine of preference and content vectors mapped onto 1-5
//!
//! Users missing from the trained index are served from their preferred tags
//! (cold start). An untrained engine ranks by quality rating.

pub mod content;
pub mod embeddings;
pub mod engine;
pub mod factorization;
pub mod feedback;
pub mod metrics;
pub mod scorer;
pub mod snapshot;
pub mod vector;

pub use engine::{trending_items, RecommendationService, TrainingOutcome, TrainingReport};
pub use feedback::{FeedbackEffect, FeedbackPolicy, Interaction};
pub use metrics::{ModelStats, QueryPath};
