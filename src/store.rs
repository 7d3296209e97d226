//! Interaction Store Adapter
//!
//! The engine reads users, items and ratings through [`InteractionStore`].
//! Persistence lives outside this crate; [`InMemoryStore`] is the adapter the
//! binary and the tests use, optionally seeded from a JSON dataset file.
//!
//! Rating writes go through [`InMemoryStore::upsert_rating`], which validates the
//! score before anything reaches the engine.

use crate::error::{Error, Result};
use crate::model::{Item, ItemId, Rating, User, UserId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// Read-only view the engine consumes
pub trait InteractionStore: Send + Sync {
    fn list_users(&self) -> Result<Vec<User>>;
    fn list_items(&self) -> Result<Vec<Item>>;
    fn list_ratings(&self) -> Result<Vec<Rating>>;
}

/// Serialized form of a whole store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub items: Vec<Item>,
    #[serde(default)]
    pub ratings: Vec<Rating>,
}

#[derive(Debug, Default)]
struct StoreState {
    users: BTreeMap<UserId, User>,
    items: BTreeMap<ItemId, Item>,
    ratings: BTreeMap<(UserId, ItemId), Rating>,
}

/// Thread-safe in-memory store with upsert rating semantics
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a dataset. Every rating is validated; ratings embedded in
    /// user records and the top-level rating list are merged.
    pub fn from_dataset(dataset: Dataset) -> Result<Self> {
        let store = Self::new();
        {
            let mut state = store.state.write();
            for item in dataset.items {
                state.items.insert(item.id, item);
            }
            for mut user in dataset.users {
                for rating in std::mem::take(&mut user.ratings) {
                    rating.validate()?;
                    state.ratings.insert((rating.user_id, rating.item_id), rating);
                }
                state.users.insert(user.id, user);
            }
            for rating in dataset.ratings {
                rating.validate()?;
                state.ratings.insert((rating.user_id, rating.item_id), rating);
            }
            // Mirror the authoritative rating table back onto the user records
            let StoreState { users, ratings, .. } = &mut *state;
            for rating in ratings.values() {
                if let Some(user) = users.get_mut(&rating.user_id) {
                    user.upsert_rating(rating.clone());
                }
            }
        }
        Ok(store)
    }

    /// Load a JSON dataset document (`{ "users": [...], "items": [...], "ratings": [...] }`)
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::store(format!("Failed to read dataset {}", path.display()), e))?;
        let dataset: Dataset = serde_json::from_str(&raw)?;
        info!(
            "Loaded dataset {}: {} users, {} items, {} ratings",
            path.display(),
            dataset.users.len(),
            dataset.items.len(),
            dataset.ratings.len()
        );
        Self::from_dataset(dataset)
    }

    /// Export the current contents
    pub fn snapshot(&self) -> Dataset {
        let state = self.state.read();
        Dataset {
            users: state.users.values().cloned().collect(),
            items: state.items.values().cloned().collect(),
            ratings: state.ratings.values().cloned().collect(),
        }
    }

    pub fn get_user(&self, id: UserId) -> Option<User> {
        self.state.read().users.get(&id).cloned()
    }

    pub fn get_item(&self, id: ItemId) -> Option<Item> {
        self.state.read().items.get(&id).cloned()
    }

    pub fn insert_user(&self, user: User) {
        self.state.write().users.insert(user.id, user);
    }

    pub fn insert_item(&self, item: Item) {
        self.state.write().items.insert(item.id, item);
    }

    /// Apply a mutation to a stored user
    pub fn update_user<F, T>(&self, id: UserId, f: F) -> Result<T>
    where
        F: FnOnce(&mut User) -> T,
    {
        let mut state = self.state.write();
        let user = state
            .users
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("user", id))?;
        Ok(f(user))
    }

    /// Insert or replace the rating for its (user, item) pair.
    ///
    /// Rejects out-of-range scores and unknown users/items. Keeps the user's
    /// rating list and the item's quality average in step.
    pub fn upsert_rating(&self, rating: Rating) -> Result<Rating> {
        rating.validate()?;

        let mut state = self.state.write();
        let StoreState {
            users,
            items,
            ratings,
        } = &mut *state;

        let user = users
            .get_mut(&rating.user_id)
            .ok_or_else(|| Error::not_found("user", rating.user_id))?;
        let item = items
            .get_mut(&rating.item_id)
            .ok_or_else(|| Error::not_found("item", rating.item_id))?;

        match user.upsert_rating(rating.clone()) {
            Some(previous) => item.replace_rating(previous, rating.score),
            None => item.add_rating(rating.score),
        }
        ratings.insert((rating.user_id, rating.item_id), rating.clone());

        debug!(
            "Stored rating user={} item={} score={}",
            rating.user_id, rating.item_id, rating.score
        );
        Ok(rating)
    }

    pub fn rating_count(&self) -> usize {
        self.state.read().ratings.len()
    }
}

impl InteractionStore for InMemoryStore {
    fn list_users(&self) -> Result<Vec<User>> {
        Ok(self.state.read().users.values().cloned().collect())
    }

    fn list_items(&self) -> Result<Vec<Item>> {
        Ok(self.state.read().items.values().cloned().collect())
    }

    fn list_ratings(&self) -> Result<Vec<Rating>> {
        Ok(self.state.read().ratings.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn seeded() -> InMemoryStore {
        let store = InMemoryStore::new();
        store.insert_user(User::new(1, "ana"));
        store.insert_item(Item::new(10, "Quest", ["RPG"]));
        store
    }

    #[test]
    fn test_upsert_rating_replaces_existing_pair() {
        let store = seeded();
        store.upsert_rating(Rating::new(1, 10, 2).unwrap()).unwrap();
        store.upsert_rating(Rating::new(1, 10, 4).unwrap()).unwrap();

        let ratings = store.list_ratings().unwrap();
        assert_eq!(ratings.len(), 1);
        assert_eq!(ratings[0].score, 4);

        let user = store.get_user(1).unwrap();
        assert_eq!(user.ratings.len(), 1);

        let item = store.get_item(10).unwrap();
        assert_eq!(item.rating_count, 1);
        assert!((item.rating - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_upsert_rating_rejects_invalid_and_unknown() {
        let store = seeded();
        let mut bad = Rating::new(1, 10, 3).unwrap();
        bad.score = 9;
        assert!(matches!(
            store.upsert_rating(bad),
            Err(Error::InvalidRating { score: 9 })
        ));
        assert!(matches!(
            store.upsert_rating(Rating::new(2, 10, 3).unwrap()),
            Err(Error::NotFound { .. })
        ));
        assert_eq!(store.rating_count(), 0);
    }

    #[test]
    fn test_from_json_file_merges_ratings() {
        let json = r#"{
            "users": [
                {"id": 1, "username": "ana", "ratings": [{"user_id": 1, "item_id": 10, "score": 3}]},
                {"id": 2, "username": "bo", "preferred_tags": ["RPG"]}
            ],
            "items": [{"id": 10, "title": "Quest", "tags": ["RPG", "Fantasy"], "rating": 4.5}],
            "ratings": [{"user_id": 2, "item_id": 10, "score": 5}]
        }"#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let store = InMemoryStore::from_json_file(file.path()).unwrap();
        assert_eq!(store.list_users().unwrap().len(), 2);
        assert_eq!(store.list_ratings().unwrap().len(), 2);
        assert_eq!(store.get_user(2).unwrap().ratings.len(), 1);
        assert_eq!(store.get_user(1).unwrap().ratings.len(), 1);
    }

    #[test]
    fn test_from_json_file_rejects_bad_score() {
        let json = r#"{"ratings": [{"user_id": 1, "item_id": 10, "score": 0}]}"#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        assert!(InMemoryStore::from_json_file(file.path()).is_err());
    }

    #[test]
    fn test_from_json_file_missing_is_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = InMemoryStore::from_json_file(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, Error::Store { .. }));
        assert_eq!(err.error_code(), "STORE_ERROR");
        assert!(err.to_string().contains("Interaction store error"));
    }

    #[test]
    fn test_update_user() {
        let store = seeded();
        store
            .update_user(1, |u| u.preferred_tags.insert("Puzzle".to_string()))
            .unwrap();
        assert!(store.get_user(1).unwrap().preferred_tags.contains("Puzzle"));
        assert!(store.update_user(99, |_| ()).is_err());
    }
}
