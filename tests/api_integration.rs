use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use cortex::api::{router, AppState};
use cortex::config::ApiConfig;
use cortex::{Dataset, EngineConfig, InMemoryStore, Item, Rating, RecommendationService, User};

fn api_config() -> ApiConfig {
    ApiConfig {
        host: "127.0.0.1".to_string(),
        port: 8080,
        request_timeout: Duration::from_secs(10),
        cors_enabled: true,
        metrics_port: 9090,
    }
}

fn dataset() -> Dataset {
    let items: Vec<Item> = (1..=6)
        .map(|id| {
            let tags: &[&str] = if id <= 3 { &["RPG", "Fantasy"] } else { &["Sports"] };
            Item::new(id, format!("Game {}", id), tags).with_rating(3.0 + id as f64 * 0.25)
        })
        .collect();
    let users: Vec<User> = (1..=3).map(|id| User::new(id, format!("player{}", id))).collect();
    let mut ratings = Vec::new();
    for user in 1..=3u64 {
        for item in 1..=4u64 {
            ratings.push(Rating::new(user, item, 1 + ((user + item) % 5) as i64).unwrap());
        }
    }
    Dataset {
        users,
        items,
        ratings,
    }
}

fn app() -> (Router, Arc<AppState>) {
    let store = Arc::new(InMemoryStore::from_dataset(dataset()).unwrap());
    let service = Arc::new(RecommendationService::new(EngineConfig::default()));
    let state = Arc::new(AppState::new(service, store, 7));
    (router(state.clone(), &api_config()), state)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health_reports_training_state() {
    let (app, _) = app();
    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["trained"], false);
}

#[tokio::test]
async fn test_train_then_recommend() {
    let (app, state) = app();

    let (status, body) = send(&app, post_json("/api/v1/model/train", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "trained");
    assert!(state.service.is_trained());

    let (status, body) = send(&app, get("/api/v1/model/stats")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["trained"], true);
    assert_eq!(body["users"], 3);
    assert_eq!(body["items"], 6);

    let (status, body) = send(&app, get("/api/v1/recommendations/1?limit=3")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 3);
    assert_eq!(body["items"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_recommendations_for_unknown_user_is_not_found() {
    let (app, _) = app();
    let (status, body) = send(&app, get("/api/v1/recommendations/404")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_untrained_recommendations_follow_popularity() {
    let (app, _) = app();
    let (status, body) = send(&app, get("/api/v1/recommendations/1?limit=2")).await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<u64> = body["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["id"].as_u64().unwrap())
        .collect();
    assert_eq!(ids, vec![6, 5]);
}

#[tokio::test]
async fn test_rating_validation_and_online_update() {
    let (app, state) = app();

    let (status, body) = send(
        &app,
        post_json("/api/v1/ratings", json!({"user_id": 1, "item_id": 5, "score": 9})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_RATING");

    // Untrained: stored but no model step
    let (status, body) = send(
        &app,
        post_json("/api/v1/ratings", json!({"user_id": 1, "item_id": 5, "score": 4})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["model_updated"], false);
    assert_eq!(state.store.rating_count(), 13);

    send(&app, post_json("/api/v1/model/train", json!({}))).await;
    let (status, body) = send(
        &app,
        post_json(
            "/api/v1/ratings",
            json!({"user_id": 2, "item_id": 6, "score": 5, "review": "great"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["model_updated"], true);
    assert_eq!(body["rating"]["review"], "great");

    let (status, _) = send(
        &app,
        post_json("/api/v1/ratings", json!({"user_id": 77, "item_id": 6, "score": 5})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_purchase_interaction_updates_user() {
    let (app, state) = app();

    let (status, body) = send(
        &app,
        post_json(
            "/api/v1/interactions",
            json!({"user_id": 1, "item_id": 4, "interaction_type": "purchase"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["added"], json!(["Sports"]));

    let user = state.store.get_user(1).unwrap();
    assert!(user.owns(4));
    assert!(user.preferred_tags.contains("Sports"));
}

#[tokio::test]
async fn test_interaction_validation() {
    let (app, _) = app();

    let (status, body) = send(
        &app,
        post_json(
            "/api/v1/interactions",
            json!({"user_id": 1, "item_id": 4, "interaction_type": "like"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");

    let (status, _) = send(
        &app,
        post_json(
            "/api/v1/interactions",
            json!({"user_id": 1, "item_id": 4, "interaction_type": "rate"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        post_json(
            "/api/v1/interactions",
            json!({"user_id": 1, "item_id": 99, "interaction_type": "view"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_similar_endpoints() {
    let (app, _) = app();
    send(&app, post_json("/api/v1/model/train", json!({}))).await;

    let (status, body) = send(&app, get("/api/v1/items/1/similar?limit=2")).await;
    assert_eq!(status, StatusCode::OK);
    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|i| i["id"] != 1));

    let (status, body) = send(&app, get("/api/v1/users/1/similar")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);

    let (status, _) = send(&app, get("/api/v1/items/99/similar")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_trending_ignores_undated_items() {
    let (app, _) = app();
    let (status, body) = send(&app, get("/api/v1/trending")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 0);
}
