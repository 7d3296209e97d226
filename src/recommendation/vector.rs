//! Dense vector helpers shared by the learners and the scorer

use rand::Rng;
use rand_distr::StandardNormal;

pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub fn norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

pub fn is_zero(a: &[f64]) -> bool {
    a.iter().all(|x| *x == 0.0)
}

/// Cosine similarity. Zero-norm or mismatched vectors score 0 instead of dividing by zero.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0, 0.0, 0.0);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}

/// `acc += v * weight`
pub fn add_scaled(acc: &mut [f64], v: &[f64], weight: f64) {
    for (a, x) in acc.iter_mut().zip(v) {
        *a += x * weight;
    }
}

pub fn scale(v: &mut [f64], factor: f64) {
    for x in v.iter_mut() {
        *x *= factor;
    }
}

/// Vector of `width` draws from N(0, std_dev)
pub fn gaussian<R: Rng>(rng: &mut R, width: usize, std_dev: f64) -> Vec<f64> {
    (0..width)
        .map(|_| rng.sample::<f64, _>(StandardNormal) * std_dev)
        .collect()
}
