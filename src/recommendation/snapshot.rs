//! Model snapshot
//!
//! Bundles everything one training run produces. A snapshot is only ever
//! published fully built; the service swaps it in as a single `Arc`.
//! After publication only the latent factors and biases change, through
//! the online-update path, behind their own lock.

use crate::model::{ItemId, UserId};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;

use super::embeddings::TagEmbeddingTable;
use super::factorization::FactorModel;

/// Dense id <-> index map. Ids are sorted so indexes don't depend on input order.
#[derive(Debug, Clone, Default)]
pub struct IdIndex<K> {
    to_index: HashMap<K, usize>,
    ids: Vec<K>,
}

impl<K: Copy + Ord + Hash> IdIndex<K> {
    pub fn build<I: IntoIterator<Item = K>>(ids: I) -> Self {
        let ids: Vec<K> = ids.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
        let to_index = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        Self { to_index, ids }
    }

    pub fn get(&self, id: &K) -> Option<usize> {
        self.to_index.get(id).copied()
    }

    pub fn id(&self, index: usize) -> Option<K> {
        self.ids.get(index).copied()
    }

    pub fn ids(&self) -> &[K] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// A fully trained hybrid model
#[derive(Debug)]
pub struct ModelSnapshot {
    pub(crate) users: IdIndex<UserId>,
    pub(crate) items: IdIndex<ItemId>,
    pub(crate) factors: RwLock<FactorModel>,
    pub(crate) embeddings: TagEmbeddingTable,
    pub(crate) item_content: Vec<Vec<f64>>,
    pub(crate) user_preferences: Vec<Vec<f64>>,
    pub(crate) trained_at: DateTime<Utc>,
}

impl ModelSnapshot {
    pub fn users(&self) -> &IdIndex<UserId> {
        &self.users
    }

    pub fn items(&self) -> &IdIndex<ItemId> {
        &self.items
    }

    pub fn embeddings(&self) -> &TagEmbeddingTable {
        &self.embeddings
    }

    pub fn item_content(&self, index: usize) -> &[f64] {
        &self.item_content[index]
    }

    pub fn user_preference(&self, index: usize) -> &[f64] {
        &self.user_preferences[index]
    }

    pub fn trained_at(&self) -> DateTime<Utc> {
        self.trained_at
    }

    /// Copy of the current factor model
    pub fn factors(&self) -> FactorModel {
        self.factors.read().clone()
    }
}
