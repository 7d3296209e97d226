//! Tag Embedding Learner
//!
//! Learns a dense vector per tag from tag co-occurrence within items. Every
//! observed tag starts from a seeded Gaussian draw; for a fixed number of epochs
//! each pair of tags sharing an item is pulled together symmetrically. There is
//! no convergence check: the epoch count is the only stopping rule.

use crate::config::EngineConfig;
use crate::model::Item;
use rand::Rng;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

use super::vector;

/// Tag -> dense vector of width E. Immutable once learned.
#[derive(Debug, Clone, Default)]
pub struct TagEmbeddingTable {
    width: usize,
    index: HashMap<String, usize>,
    vectors: Vec<Vec<f64>>,
}

impl TagEmbeddingTable {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.index.contains_key(tag)
    }

    pub fn get(&self, tag: &str) -> Option<&[f64]> {
        self.index.get(tag).map(|&i| self.vectors[i].as_slice())
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.index.keys().map(String::as_str)
    }

    /// Unweighted mean of the known embeddings among `tags`.
    /// `None` when none of the tags has an embedding.
    pub fn mean_of<'a, I>(&self, tags: I) -> Option<Vec<f64>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut acc = vec![0.0; self.width];
        let mut count = 0usize;
        for emb in tags.into_iter().filter_map(|t| self.get(t)) {
            vector::add_scaled(&mut acc, emb, 1.0);
            count += 1;
        }
        if count == 0 {
            return None;
        }
        vector::scale(&mut acc, 1.0 / count as f64);
        Some(acc)
    }
}

/// Unsupervised co-occurrence learner
pub struct TagEmbeddingLearner<'a> {
    config: &'a EngineConfig,
}

impl<'a> TagEmbeddingLearner<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    pub fn learn<R: Rng>(&self, items: &[Item], rng: &mut R) -> TagEmbeddingTable {
        let width = self.config.embedding_size;

        // Sorted vocabulary and item order: the table depends only on the seed
        // and the catalog contents, not on input order.
        let vocabulary: BTreeSet<&str> = items
            .iter()
            .flat_map(|item| item.tags.iter().map(String::as_str))
            .collect();

        let std_dev = (2.0 / width as f64).sqrt();
        let mut index = HashMap::with_capacity(vocabulary.len());
        let mut vectors = Vec::with_capacity(vocabulary.len());
        for tag in vocabulary {
            index.insert(tag.to_string(), vectors.len());
            vectors.push(vector::gaussian(rng, width, std_dev));
        }

        let mut multi_tag: Vec<&Item> = items.iter().filter(|item| item.tags.len() >= 2).collect();
        multi_tag.sort_by_key(|item| item.id);
        let item_tags: Vec<Vec<usize>> = multi_tag
            .iter()
            .map(|item| item.tags.iter().filter_map(|t| index.get(t).copied()).collect())
            .collect();

        let step = self.config.learning_rate * self.config.co_occurrence_step;
        for _ in 0..self.config.embedding_epochs {
            for tags in &item_tags {
                for i in 0..tags.len() {
                    for j in (i + 1)..tags.len() {
                        if let Some((a, b)) = pair_mut(&mut vectors, tags[i], tags[j]) {
                            pull_together(a, b, step);
                        }
                    }
                }
            }
        }

        debug!(
            "Tag embeddings learned for {} tags over {} co-occurring items",
            vectors.len(),
            item_tags.len()
        );

        TagEmbeddingTable {
            width,
            index,
            vectors,
        }
    }
}

/// Move `a` and `b` toward each other by `step * (a - b)` per component
fn pull_together(a: &mut [f64], b: &mut [f64], step: f64) {
    for (x, y) in a.iter_mut().zip(b.iter_mut()) {
        let delta = step * (*x - *y);
        *x -= delta;
        *y += delta;
    }
}

fn pair_mut(vectors: &mut [Vec<f64>], i: usize, j: usize) -> Option<(&mut [f64], &mut [f64])> {
    if i == j {
        return None;
    }
    if i < j {
        let (head, tail) = vectors.split_at_mut(j);
        Some((&mut head[i], &mut tail[0]))
    } else {
        let (head, tail) = vectors.split_at_mut(i);
        Some((&mut tail[0], &mut head[j]))
    }
}
