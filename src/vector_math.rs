use std::cmp::Ordering;

use ndarray::{Array2, ArrayView1};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("vector length mismatch: expected {expected}, got {actual}")]
pub struct LengthMismatch {
    pub expected: usize,
    pub actual: usize,
}

/// Scales `vector` to unit length. The zero vector is returned unchanged.
pub fn l2_normalized(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = ArrayView1::from(vector.as_slice()).dot(&ArrayView1::from(vector.as_slice())).sqrt();
    if norm > f32::EPSILON {
        vector.iter_mut().for_each(|x| *x /= norm);
    }
    vector
}

/// Scores every row of `matrix` against `query` by inner product and returns
/// the best `k` as `(id, score)`, highest score first, ties by ascending id.
///
/// Rows and `query` are expected to be unit length, making the score a
/// cosine similarity in `[-1, 1]`.
pub fn rank_top_k(
    matrix: &Array2<f32>,
    ids: &[u64],
    query: &[f32],
    k: usize,
) -> Result<Vec<(u64, f32)>, LengthMismatch> {
    if k == 0 || ids.is_empty() {
        return Ok(Vec::new());
    }
    if matrix.ncols() != query.len() {
        return Err(LengthMismatch {
            expected: matrix.ncols(),
            actual: query.len(),
        });
    }

    let scores = matrix.dot(&ArrayView1::from(query));
    let mut ranked: Vec<(u64, f32)> = ids.iter().copied().zip(scores.iter().copied()).collect();
    ranked.sort_by(|left, right| {
        right
            .1
            .partial_cmp(&left.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| left.0.cmp(&right.0))
    });
    ranked.truncate(k);
    Ok(ranked)
}
