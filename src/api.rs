//! HTTP API Server for Recommendations
//!
//! REST endpoints over the recommendation service and the interaction store.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ApiConfig;
use crate::error::{Error, Result};
use crate::model::{Item, ItemId, Rating, User, UserId};
use crate::recommendation::{
    trending_items, FeedbackEffect, FeedbackPolicy, Interaction, ModelStats,
    RecommendationService, TrainingOutcome,
};
use crate::store::{InMemoryStore, InteractionStore};

/// Largest page any listing endpoint returns
const MAX_LIMIT: usize = 100;

/// Shared application state
pub struct AppState {
    pub service: Arc<RecommendationService>,
    pub store: Arc<InMemoryStore>,
    pub feedback: FeedbackPolicy,
    feedback_rng: Mutex<StdRng>,
}

impl AppState {
    pub fn new(
        service: Arc<RecommendationService>,
        store: Arc<InMemoryStore>,
        feedback_seed: u64,
    ) -> Self {
        Self {
            service,
            store,
            feedback: FeedbackPolicy::default(),
            feedback_rng: Mutex::new(StdRng::seed_from_u64(feedback_seed)),
        }
    }
}

/// Query params for listing endpoints
#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

impl LimitQuery {
    fn clamped(&self) -> usize {
        self.limit.min(MAX_LIMIT)
    }
}

fn default_limit() -> usize {
    10
}

/// Response for item listings
#[derive(Debug, Serialize, Deserialize)]
pub struct ItemsResponse {
    pub items: Vec<Item>,
    pub total: usize,
}

impl From<Vec<Item>> for ItemsResponse {
    fn from(items: Vec<Item>) -> Self {
        Self {
            total: items.len(),
            items,
        }
    }
}

/// Public view of a user
#[derive(Debug, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: UserId,
    pub username: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UsersResponse {
    pub users: Vec<UserSummary>,
    pub total: usize,
}

/// Request body for writing a rating
#[derive(Debug, Deserialize)]
pub struct RatingRequest {
    pub user_id: UserId,
    pub item_id: ItemId,
    pub score: i64,
    pub review: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RatingResponse {
    pub rating: Rating,
    /// Whether the live model took an online step for this rating
    pub model_updated: bool,
}

/// Request body for recording interactions
#[derive(Debug, Deserialize)]
pub struct InteractionRequest {
    pub user_id: UserId,
    pub item_id: ItemId,
    pub interaction_type: String,
    /// Required when `interaction_type` is `rate`
    pub score: Option<i64>,
}

impl InteractionRequest {
    fn interaction(&self) -> Result<Interaction> {
        if self.interaction_type.trim().eq_ignore_ascii_case("rate") {
            let score = self
                .score
                .ok_or_else(|| Error::bad_request("rate interactions need a score"))?;
            let rating = Rating::new(self.user_id, self.item_id, score)?;
            return Ok(Interaction::Rate {
                score: rating.score,
            });
        }
        self.interaction_type.parse()
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub trained: bool,
}

/// Build the router with all routes and layers
pub fn router(state: Arc<AppState>, config: &ApiConfig) -> Router {
    let mut app = Router::new()
        // Health check
        .route("/health", get(health_check))
        // Model lifecycle
        .route("/api/v1/model/stats", get(get_model_stats))
        .route("/api/v1/model/train", post(train_model))
        // Queries
        .route("/api/v1/recommendations/:user_id", get(get_recommendations))
        .route("/api/v1/items/:item_id/similar", get(get_similar_items))
        .route("/api/v1/users/:user_id/similar", get(get_similar_users))
        .route("/api/v1/trending", get(get_trending))
        // Writes
        .route("/api/v1/ratings", post(submit_rating))
        .route("/api/v1/interactions", post(record_interaction))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(config.request_timeout));

    if config.cors_enabled {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    app.with_state(state)
}

/// Serve until `shutdown` resolves
pub async fn start_server<F>(state: Arc<AppState>, config: ApiConfig, shutdown: F) -> anyhow::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let app = router(state, &config);

    let addr = format!("{}:{}", config.host, config.port);
    info!("🚀 Starting recommendation API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

/// Health check endpoint
async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        trained: state.service.is_trained(),
    })
}

async fn get_model_stats(State(state): State<Arc<AppState>>) -> Json<ModelStats> {
    Json(state.service.model_stats())
}

/// Run CPU-bound engine work on the blocking pool
async fn run_blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await.map_err(|e| {
        error!("Engine task failed: {:?}", e);
        Error::internal(e)
    })?
}

/// Retrain from the store on the blocking pool
async fn train_model(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<TrainingOutcome>)> {
    let service = state.service.clone();
    let store = state.store.clone();
    let outcome = run_blocking(move || service.train_from_store(&*store)).await?;

    match outcome {
        TrainingOutcome::Skipped => Err(Error::TrainingInProgress),
        outcome => Ok((StatusCode::OK, Json(outcome))),
    }
}

/// Get personalized recommendations for a user
async fn get_recommendations(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<ItemsResponse>> {
    let user = state
        .store
        .get_user(user_id)
        .ok_or_else(|| Error::not_found("user", user_id))?;
    let items = state.store.list_items()?;

    let service = state.service.clone();
    let limit = query.clamped();
    let recs = run_blocking(move || Ok(service.get_recommendations(&user, &items, limit))).await?;
    Ok(Json(recs.into()))
}

async fn get_similar_items(
    State(state): State<Arc<AppState>>,
    Path(item_id): Path<ItemId>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<ItemsResponse>> {
    let target = state
        .store
        .get_item(item_id)
        .ok_or_else(|| Error::not_found("item", item_id))?;
    let items = state.store.list_items()?;

    let service = state.service.clone();
    let limit = query.clamped();
    let similar =
        run_blocking(move || Ok(service.get_similar_items(&target, &items, limit))).await?;
    Ok(Json(similar.into()))
}

async fn get_similar_users(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<UsersResponse>> {
    let target = state
        .store
        .get_user(user_id)
        .ok_or_else(|| Error::not_found("user", user_id))?;
    let users = state.store.list_users()?;

    let service = state.service.clone();
    let limit = query.clamped();
    let neighbours =
        run_blocking(move || Ok(service.find_similar_users(&target, &users, limit))).await?;
    let users: Vec<UserSummary> = neighbours
        .into_iter()
        .map(|u: User| UserSummary {
            id: u.id,
            username: u.username,
        })
        .collect();
    Ok(Json(UsersResponse {
        total: users.len(),
        users,
    }))
}

/// Recently released items by quality rating
async fn get_trending(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<ItemsResponse>> {
    let items = state.store.list_items()?;
    let trending = trending_items(&items, query.clamped(), Utc::now().date_naive());
    Ok(Json(trending.into()))
}

/// Validate and store a rating, then nudge the live model
async fn submit_rating(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RatingRequest>,
) -> Result<(StatusCode, Json<RatingResponse>)> {
    let mut rating = Rating::new(req.user_id, req.item_id, req.score)?;
    if let Some(review) = req.review {
        rating = rating.with_review(review);
    }

    let rating = state.store.upsert_rating(rating)?;
    let model_updated = state.service.on_new_rating(&rating);

    Ok((
        StatusCode::CREATED,
        Json(RatingResponse {
            rating,
            model_updated,
        }),
    ))
}

/// Record a user interaction and apply the implicit feedback policy
async fn record_interaction(
    State(state): State<Arc<AppState>>,
    Json(req): Json<InteractionRequest>,
) -> Result<(StatusCode, Json<FeedbackEffect>)> {
    let interaction = req.interaction()?;
    let item = state
        .store
        .get_item(req.item_id)
        .ok_or_else(|| Error::not_found("item", req.item_id))?;

    let effect = state.store.update_user(req.user_id, |user| {
        let effect = {
            let mut rng = state.feedback_rng.lock();
            state.feedback.apply(user, &item, interaction, &mut *rng)
        };
        match interaction {
            Interaction::Purchase => {
                user.add_owned_item(&item);
                user.remove_from_wishlist(item.id);
            }
            Interaction::Wishlist => {
                user.add_to_wishlist(item.id);
            }
            _ => {}
        }
        effect
    })?;

    info!(
        "📊 Recorded {} interaction: user={}, item={} (+{} / -{} tags)",
        interaction,
        req.user_id,
        req.item_id,
        effect.added.len(),
        effect.removed.len()
    );

    Ok((StatusCode::CREATED, Json(effect)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "current_thread")]
    async fn test_run_blocking_leaves_runtime_thread() {
        let runtime_thread = std::thread::current().id();
        let worker = run_blocking(|| Ok(std::thread::current().id()))
            .await
            .unwrap();
        assert_ne!(worker, runtime_thread);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_run_blocking_propagates_errors() {
        let err = run_blocking::<(), _>(|| Err(Error::bad_request("nope")))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "BAD_REQUEST");
    }
}
