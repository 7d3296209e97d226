//! Content Vector Builder
//!
//! Item content vector: mean of the item's tag embeddings.
//! User preference vector: weighted mean of the tag embeddings of the user's
//! rated items (weight `score / 5`) and owned-but-unrated items (a fixed lower
//! weight). A zero vector means "no content signal".

use crate::config::EngineConfig;
use crate::model::{Item, ItemId, Rating, User, UserId};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::embeddings::TagEmbeddingTable;
use super::snapshot::IdIndex;
use super::vector;

/// Item id -> score, one entry per rated item
pub type RatedItems = BTreeMap<ItemId, u8>;

/// Merge the ratings carried on user records with the snapshot's rating list.
/// The rating list wins where both mention the same pair.
pub fn ratings_by_user(users: &[User], ratings: &[Rating]) -> HashMap<UserId, RatedItems> {
    let mut by_user: HashMap<UserId, RatedItems> = HashMap::with_capacity(users.len());
    for user in users {
        let entry = by_user.entry(user.id).or_default();
        for r in &user.ratings {
            entry.insert(r.item_id, r.score);
        }
    }
    for r in ratings {
        by_user.entry(r.user_id).or_default().insert(r.item_id, r.score);
    }
    by_user
}

pub struct ContentVectorBuilder<'a> {
    config: &'a EngineConfig,
    embeddings: &'a TagEmbeddingTable,
}

impl<'a> ContentVectorBuilder<'a> {
    pub fn new(config: &'a EngineConfig, embeddings: &'a TagEmbeddingTable) -> Self {
        Self { config, embeddings }
    }

    fn zero(&self) -> Vec<f64> {
        vec![0.0; self.config.embedding_size]
    }

    /// Mean of the item's known tag embeddings, zero when it has none
    pub fn item_vector(&self, item: &Item) -> Vec<f64> {
        self.embeddings
            .mean_of(item.tags.iter().map(String::as_str))
            .unwrap_or_else(|| self.zero())
    }

    /// One content vector per indexed item, in index order
    pub fn item_vectors(&self, items: &[Item], index: &IdIndex<ItemId>) -> Vec<Vec<f64>> {
        let by_id: HashMap<ItemId, &Item> = items.iter().map(|i| (i.id, i)).collect();
        index
            .ids()
            .iter()
            .map(|id| {
                by_id
                    .get(id)
                    .map(|item| self.item_vector(item))
                    .unwrap_or_else(|| self.zero())
            })
            .collect()
    }

    /// Rating-weighted mean of the tags behind a user's rated and owned items
    pub fn preference_vector(
        &self,
        rated: &RatedItems,
        owned: &BTreeSet<ItemId>,
        items: &HashMap<ItemId, &Item>,
    ) -> Vec<f64> {
        let mut acc = self.zero();
        let mut total_weight = 0.0;

        let rated_sources = rated
            .iter()
            .map(|(id, score)| (*id, *score as f64 / 5.0));
        let owned_sources = owned
            .iter()
            .filter(|id| !rated.contains_key(id))
            .map(|id| (*id, self.config.owned_weight));

        for (item_id, weight) in rated_sources.chain(owned_sources) {
            let Some(item) = items.get(&item_id) else {
                continue;
            };
            for emb in item.tags.iter().filter_map(|t| self.embeddings.get(t)) {
                vector::add_scaled(&mut acc, emb, weight);
                total_weight += weight;
            }
        }

        if total_weight > 0.0 {
            vector::scale(&mut acc, 1.0 / total_weight);
            acc
        } else {
            self.zero()
        }
    }

    /// One preference vector per indexed user, in index order
    pub fn preference_vectors(
        &self,
        users: &[User],
        items: &[Item],
        ratings: &HashMap<UserId, RatedItems>,
        index: &IdIndex<UserId>,
    ) -> Vec<Vec<f64>> {
        let items_by_id: HashMap<ItemId, &Item> = items.iter().map(|i| (i.id, i)).collect();
        let users_by_id: HashMap<UserId, &User> = users.iter().map(|u| (u.id, u)).collect();
        let empty_rated = RatedItems::new();
        let empty_owned = BTreeSet::new();

        index
            .ids()
            .iter()
            .map(|id| {
                let rated = ratings.get(id).unwrap_or(&empty_rated);
                let owned = users_by_id
                    .get(id)
                    .map(|u| &u.owned_items)
                    .unwrap_or(&empty_owned);
                self.preference_vector(rated, owned, &items_by_id)
            })
            .collect()
    }
}
