use std::{cell::RefCell, time::Instant};

use metrics::histogram;

use crate::{
  error::LinkError,
  search::{Hit, SimilaritySearch, TopK},
  vector::{CsrMatrix, SparseVector},
};

/// Inverted index over the registry matrix: for every n-gram column, the rows
/// holding a nonzero weight for it, in ascending row order.
#[derive(Clone, Debug, Default)]
pub struct Postings {
  rows: usize,
  column_ptr: Vec<usize>,
  row_ids: Vec<u32>,
  weights: Vec<f64>,
}

/// Per-thread accumulator reused across queries, so a search only pays for the
/// rows it actually touches.
#[derive(Default)]
struct Scratch {
  sums: Vec<f64>,
  marked: Vec<bool>,
  touched: Vec<u32>,
}

impl Scratch {
  fn prepare(&mut self, rows: usize) {
    if self.sums.len() < rows {
      self.sums.resize(rows, 0.0);
      self.marked.resize(rows, false);
    }
  }

  fn accumulate(&mut self, row: u32, value: f64) {
    let slot = row as usize;

    if !self.marked[slot] {
      self.marked[slot] = true;
      self.touched.push(row);
    }

    self.sums[slot] += value;
  }

  fn drain_into(&mut self, top: &mut TopK) {
    for row in self.touched.drain(..) {
      let slot = row as usize;

      top.offer(slot, self.sums[slot]);

      self.sums[slot] = 0.0;
      self.marked[slot] = false;
    }
  }
}

thread_local! {
  static SCRATCH: RefCell<Scratch> = RefCell::new(Scratch::default());
}

impl Postings {
  pub fn from_matrix(matrix: &CsrMatrix) -> Postings {
    let cols = matrix.cols();
    let mut counts = vec![0usize; cols + 1];

    for row in 0..matrix.rows() {
      for (column, _) in matrix.row(row) {
        counts[column as usize + 1] += 1;
      }
    }

    for column in 0..cols {
      counts[column + 1] += counts[column];
    }

    let column_ptr = counts.clone();
    let mut cursor = counts;
    let mut row_ids = vec![0u32; matrix.nnz()];
    let mut weights = vec![0.0f64; matrix.nnz()];

    for row in 0..matrix.rows() {
      for (column, weight) in matrix.row(row) {
        let position = cursor[column as usize];

        row_ids[position] = row as u32;
        weights[position] = weight;
        cursor[column as usize] += 1;
      }
    }

    Postings {
      rows: matrix.rows(),
      column_ptr,
      row_ids,
      weights,
    }
  }

  fn column(&self, column: u32) -> impl Iterator<Item = (u32, f64)> + '_ {
    let (start, end) = (self.column_ptr[column as usize], self.column_ptr[column as usize + 1]);

    self.row_ids[start..end].iter().copied().zip(self.weights[start..end].iter().copied())
  }
}

impl SimilaritySearch for Postings {
  fn width(&self) -> usize {
    self.column_ptr.len().saturating_sub(1)
  }

  fn rows(&self) -> usize {
    self.rows
  }

  fn top_k(&self, query: &SparseVector, k: usize, min_score: f64) -> Result<Vec<Hit>, LinkError> {
    self.check_width(query)?;

    if k == 0 || query.nnz() == 0 {
      return Ok(Vec::new());
    }

    let then = Instant::now();
    let mut top = TopK::new(k, min_score);

    SCRATCH.with_borrow_mut(|scratch| {
      scratch.prepare(self.rows);

      for (column, weight) in query.iter() {
        for (row, value) in self.column(column) {
          scratch.accumulate(row, weight * value);
        }
      }

      scratch.drain_into(&mut top);
    });

    histogram!("kvklink_search_latency_seconds").record(then.elapsed().as_secs_f64());

    Ok(top.into_sorted())
  }
}
