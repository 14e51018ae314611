//! Top-K cosine similarity search over the registry matrix.
//!
//! Two interchangeable strategies implement [`SimilaritySearch`]:
//!
//!  - [`Postings`], the production path: an inverted index by n-gram column
//!    that only ever touches rows sharing at least one column with the query
//!    and keeps the best `k` hits in a bounded heap.
//!  - [`CsrMatrix`] itself, an exhaustive scan that scores every row against
//!    a dense copy of the query. It is kept for small inputs and as a
//!    reference for the optimized path.
//!
//! Both return at most `k` hits scoring strictly above `min_score`, ordered by
//! descending score with ties broken by ascending row index.

mod exhaustive;
mod postings;

use std::{
  cmp::{Ordering, Reverse},
  collections::BinaryHeap,
};

use rayon::prelude::*;
use serde::Serialize;

pub use postings::Postings;

use crate::{error::LinkError, vector::SparseVector};

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Hit {
  pub row: usize,
  pub score: f64,
}

impl Eq for Hit {}

impl PartialOrd for Hit {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

// Greater means better: higher score first, then lower row.
impl Ord for Hit {
  fn cmp(&self, other: &Self) -> Ordering {
    self.score.total_cmp(&other.score).then_with(|| other.row.cmp(&self.row))
  }
}

pub trait SimilaritySearch: Sync {
  /// Width of the vectors this strategy accepts.
  fn width(&self) -> usize;

  /// Number of rows that can be returned.
  fn rows(&self) -> usize;

  /// Returns the best `k` rows scoring strictly above `min_score`.
  fn top_k(&self, query: &SparseVector, k: usize, min_score: f64) -> Result<Vec<Hit>, LinkError>;

  /// Runs [`SimilaritySearch::top_k`] for every query, in parallel.
  fn top_k_many(&self, queries: &[SparseVector], k: usize, min_score: f64) -> Result<Vec<Vec<Hit>>, LinkError> {
    queries.par_iter().map(|query| self.top_k(query, k, min_score)).collect()
  }

  fn check_width(&self, query: &SparseVector) -> Result<(), LinkError> {
    if query.dim() != self.width() {
      return Err(LinkError::ShapeMismatch {
        expected: self.width(),
        actual: query.dim(),
      });
    }

    Ok(())
  }
}

/// Bounded selection of the best `k` hits above a threshold.
pub(crate) struct TopK {
  k: usize,
  min_score: f64,
  heap: BinaryHeap<Reverse<Hit>>,
}

impl TopK {
  /// Thresholds below zero are raised to zero: rows without any n-gram in
  /// common with the query are never hits.
  pub(crate) fn new(k: usize, min_score: f64) -> TopK {
    TopK {
      k,
      min_score: min_score.max(0.0),
      heap: BinaryHeap::with_capacity(k.saturating_add(1).min(1024)),
    }
  }

  pub(crate) fn offer(&mut self, row: usize, score: f64) {
    // Also rejects NaN.
    if self.k == 0 || !(score > self.min_score) {
      return;
    }

    let hit = Hit { row, score: score.min(1.0) };

    if self.heap.len() < self.k {
      self.heap.push(Reverse(hit));
    } else if let Some(Reverse(worst)) = self.heap.peek()
      && hit > *worst
    {
      self.heap.pop();
      self.heap.push(Reverse(hit));
    }
  }

  pub(crate) fn into_sorted(self) -> Vec<Hit> {
    // Ascending order of `Reverse<Hit>` is descending order of `Hit`.
    self.heap.into_sorted_vec().into_iter().map(|Reverse(hit)| hit).collect()
  }
}
