use cortex::recommendation::vector::cosine_similarity;
use cortex::{EngineConfig, Item, ItemId, Rating, RecommendationService, TrainingOutcome, User};

/// Items A, B, C from the catalog scenario
fn scenario_items() -> Vec<Item> {
    vec![
        Item::new(1, "A", ["RPG", "Fantasy"]).with_rating(4.8),
        Item::new(2, "B", ["RPG", "Fantasy"]).with_rating(4.0),
        Item::new(3, "C", ["Sports"]).with_rating(4.9),
    ]
}

/// Scenario items plus a back catalog where RPG and Fantasy co-occur often
fn training_catalog() -> Vec<Item> {
    let mut items = scenario_items();
    for id in 100..130 {
        items.push(Item::new(id, format!("Epic {}", id), ["RPG", "Fantasy"]).with_rating(3.5));
    }
    for id in 200..205 {
        items.push(Item::new(id, format!("League {}", id), ["Sports"]).with_rating(3.0));
    }
    items
}

fn training_users() -> Vec<User> {
    (1..=6).map(|id| User::new(id, format!("player{}", id))).collect()
}

fn training_ratings() -> Vec<Rating> {
    let mut ratings = Vec::new();
    for user in 1..=6u64 {
        for (n, item) in (100..110u64).enumerate() {
            let score = 1 + ((user as usize + n) % 5) as i64;
            ratings.push(Rating::new(user, item, score).unwrap());
        }
        ratings.push(Rating::new(user, 200 + user % 5, 4).unwrap());
        ratings.push(Rating::new(user, 1 + user % 3, 5).unwrap());
    }
    ratings
}

fn trained_service() -> RecommendationService {
    let service = RecommendationService::new(EngineConfig::default());
    let outcome = service.train(&training_users(), &training_catalog(), &training_ratings());
    assert!(outcome.is_trained(), "expected a trained model, got {:?}", outcome);
    service
}

fn ids(items: &[Item]) -> Vec<ItemId> {
    items.iter().map(|i| i.id).collect()
}

#[test]
fn test_nine_ratings_leave_engine_untrained() {
    let service = RecommendationService::new(EngineConfig::default());
    let ratings: Vec<Rating> = training_ratings().into_iter().take(9).collect();

    let outcome = service.train(&training_users(), &training_catalog(), &ratings);
    assert!(matches!(
        outcome,
        TrainingOutcome::InsufficientData { ratings: 9, required: 10 }
    ));
    assert!(!service.is_trained());

    let recs = service.get_recommendations(&training_users()[0], &training_catalog(), 50);
    for pair in recs.windows(2) {
        assert!(pair[0].rating >= pair[1].rating);
    }
    assert_eq!(recs[0].id, 3);
}

#[test]
fn test_untrained_scenario_uses_popularity() {
    let service = RecommendationService::new(EngineConfig::default());
    let user = User::new(500, "newcomer").with_preferred_tags(["RPG"]);

    let recs = service.get_recommendations(&user, &scenario_items(), 2);
    assert_eq!(ids(&recs), vec![3, 1]);
}

#[test]
fn test_cold_start_scenario_ranks_by_preferred_tags() {
    let service = trained_service();
    let user = User::new(500, "newcomer").with_preferred_tags(["RPG"]);

    let recs = service.get_recommendations(&user, &scenario_items(), 2);
    assert_eq!(ids(&recs), vec![1, 2]);

    let all = service.get_recommendations(&user, &scenario_items(), 3);
    assert_eq!(ids(&all), vec![1, 2, 3]);
}

#[test]
fn test_cold_start_without_tags_falls_back_to_popularity() {
    let service = trained_service();

    let untagged = User::new(501, "quiet");
    let recs = service.get_recommendations(&untagged, &scenario_items(), 3);
    assert_eq!(ids(&recs), vec![3, 1, 2]);

    // Tags the model has never seen carry no embedding either
    let unknown_tags = User::new(502, "odd").with_preferred_tags(["Knitting"]);
    let recs = service.get_recommendations(&unknown_tags, &scenario_items(), 3);
    assert_eq!(ids(&recs), vec![3, 1, 2]);
}

#[test]
fn test_cold_start_scores_unindexed_candidates() {
    let service = trained_service();
    let user = User::new(500, "newcomer").with_preferred_tags(["Sports"]);
    let fresh = vec![
        Item::new(900, "Fresh RPG", ["RPG", "Fantasy"]).with_rating(5.0),
        Item::new(901, "Fresh Sports", ["Sports"]).with_rating(1.0),
    ];

    let recs = service.get_recommendations(&user, &fresh, 1);
    assert_eq!(ids(&recs), vec![901]);
}

#[test]
fn test_owned_items_are_never_recommended() {
    let service = trained_service();
    let catalog = training_catalog();

    for (n, mut user) in training_users().into_iter().enumerate() {
        for item in catalog.iter().skip(n).step_by(3) {
            user.add_owned_item(item);
        }
        let recs = service.get_recommendations(&user, &catalog, catalog.len());
        assert!(!recs.is_empty());
        assert!(recs.iter().all(|i| !user.owns(i.id)), "user {} got an owned item", user.id);
        assert_eq!(recs.len(), catalog.len() - user.owned_items.len());
    }

    // Same for a cold-start user
    let mut newcomer = User::new(500, "newcomer").with_preferred_tags(["RPG"]);
    newcomer.add_owned_item(&catalog[0]);
    let recs = service.get_recommendations(&newcomer, &scenario_items(), 3);
    assert_eq!(ids(&recs), vec![2, 3]);
}

#[test]
fn test_collaborative_predictions_stay_on_scale() {
    let service = trained_service();
    let snapshot = service.snapshot().unwrap();
    let factors = snapshot.factors();

    for u in 0..factors.num_users() {
        for i in 0..factors.num_items() {
            let p = factors.predict(u, i);
            assert!((1.0..=5.0).contains(&p));
        }
    }
    for user in 1..=6 {
        for item in [1, 2, 3, 100, 200] {
            let p = service.predict_rating(user, item).unwrap();
            assert!((1.0..=5.0).contains(&p));
        }
    }
}

#[test]
fn test_training_is_deterministic_and_order_independent() {
    let a = trained_service();
    let report_a = match a.train(&training_users(), &training_catalog(), &training_ratings()) {
        TrainingOutcome::Trained(report) => report,
        other => panic!("unexpected outcome {:?}", other),
    };

    let mut users = training_users();
    users.reverse();
    let mut items = training_catalog();
    items.reverse();
    let mut ratings = training_ratings();
    ratings.reverse();

    let b = RecommendationService::new(EngineConfig::default());
    let report_b = match b.train(&users, &items, &ratings) {
        TrainingOutcome::Trained(report) => report,
        other => panic!("unexpected outcome {:?}", other),
    };

    assert_eq!(report_a.convergence.rmse_history, report_b.convergence.rmse_history);
    assert_eq!(a.item_embedding(100), b.item_embedding(100));
    assert_eq!(a.tag_embedding("RPG"), b.tag_embedding("RPG"));
    assert!(report_a.convergence.epochs <= 100);
    assert!(report_a.convergence.converged || report_a.convergence.epochs == 100);
}

#[test]
fn test_online_update_touches_only_its_rows() {
    let service = trained_service();
    let snapshot = service.snapshot().unwrap();
    let before = snapshot.factors();

    let rating = Rating::new(2, 105, 5).unwrap();
    assert!(service.on_new_rating(&rating));
    let after = snapshot.factors();

    let u = snapshot.users().get(&2).unwrap();
    let i = snapshot.items().get(&105).unwrap();

    for row in 0..before.num_users() {
        let unchanged = before.user_row(row) == after.user_row(row)
            && before.user_bias(row).to_bits() == after.user_bias(row).to_bits();
        assert_eq!(unchanged, row != u, "user row {}", row);
    }
    for row in 0..before.num_items() {
        let unchanged = before.item_row(row) == after.item_row(row)
            && before.item_bias(row).to_bits() == after.item_bias(row).to_bits();
        assert_eq!(unchanged, row != i, "item row {}", row);
    }
}

#[test]
fn test_online_update_leaves_content_frozen() {
    let service = trained_service();
    let content_before = service.item_content_vector(105).unwrap();
    let tag_before = service.tag_embedding("RPG").unwrap();

    for _ in 0..20 {
        service.on_new_rating(&Rating::new(2, 105, 1).unwrap());
    }

    assert_eq!(service.item_content_vector(105).unwrap(), content_before);
    assert_eq!(service.tag_embedding("RPG").unwrap(), tag_before);
    assert_eq!(service.model_stats().online_updates, 20);
}

#[test]
fn test_online_update_for_unknown_ids_is_noop() {
    let service = trained_service();
    let before = service.snapshot().unwrap().factors();

    assert!(!service.on_new_rating(&Rating::new(999, 100, 5).unwrap()));
    assert!(!service.on_new_rating(&Rating::new(1, 999, 5).unwrap()));

    assert_eq!(service.snapshot().unwrap().factors(), before);
}

#[test]
fn test_empty_tag_item_has_zero_content_signal() {
    let mut items = training_catalog();
    items.push(Item::new(300, "Mystery", Vec::<String>::new()).with_rating(4.0));
    let service = RecommendationService::new(EngineConfig::default());
    assert!(service.train(&training_users(), &items, &training_ratings()).is_trained());

    let content = service.item_content_vector(300).unwrap();
    assert!(content.iter().all(|x| *x == 0.0));
    let other = service.item_content_vector(1).unwrap();
    assert_eq!(cosine_similarity(&content, &other), 0.0);
    assert_eq!(cosine_similarity(&other, &content), 0.0);
}

#[test]
fn test_similar_items_and_users() {
    let service = trained_service();
    let catalog = training_catalog();

    let similar = service.get_similar_items(&catalog[0], &catalog, 5);
    assert_eq!(similar.len(), 5);
    assert!(similar.iter().all(|i| i.id != 1));

    let users = training_users();
    let neighbours = service.find_similar_users(&users[0], &users, 10);
    assert_eq!(neighbours.len(), 5);
    assert!(neighbours.iter().all(|u| u.id != 1));
}

#[test]
fn test_model_stats_summary() {
    let service = trained_service();
    let stats = service.model_stats();

    assert!(stats.trained);
    assert_eq!(stats.users, 6);
    assert_eq!(stats.items, 38);
    assert_eq!(stats.unique_tags, 3);
    assert_eq!(stats.latent_factors, 10);
    assert_eq!(stats.embedding_size, 8);
    assert!(stats.to_string().contains("6 users"));
}
