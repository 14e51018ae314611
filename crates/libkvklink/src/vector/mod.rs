pub(crate) mod vectorizer;

use serde::{Deserialize, Serialize};

use crate::error::LinkError;

/// A sparse row vector with sorted, unique column indices.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSparseVector")]
pub struct SparseVector {
  dim: usize,
  indices: Vec<u32>,
  values: Vec<f64>,
}

#[derive(Deserialize)]
struct RawSparseVector {
  dim: usize,
  indices: Vec<u32>,
  values: Vec<f64>,
}

impl TryFrom<RawSparseVector> for SparseVector {
  type Error = LinkError;

  fn try_from(raw: RawSparseVector) -> Result<Self, Self::Error> {
    if raw.indices.len() != raw.values.len() {
      return Err(LinkError::ShapeMismatch {
        expected: raw.indices.len(),
        actual: raw.values.len(),
      });
    }

    SparseVector::from_sorted(raw.dim, raw.indices.into_iter().zip(raw.values))
  }
}

impl SparseVector {
  /// The all-zero vector of width `dim`.
  pub fn zeros(dim: usize) -> SparseVector {
    SparseVector {
      dim,
      indices: Vec::new(),
      values: Vec::new(),
    }
  }

  /// Builds a vector from `(column, value)` pairs, which must be sorted by
  /// column and fall inside `dim`.
  pub fn from_sorted(dim: usize, entries: impl IntoIterator<Item = (u32, f64)>) -> Result<SparseVector, LinkError> {
    let (indices, values): (Vec<u32>, Vec<f64>) = entries.into_iter().unzip();

    if let Some(&last) = indices.last()
      && last as usize >= dim
    {
      return Err(LinkError::ShapeMismatch { expected: dim, actual: last as usize + 1 });
    }

    if indices.windows(2).any(|pair| pair[0] >= pair[1]) {
      return Err(LinkError::OtherError(anyhow::anyhow!("sparse vector indices must be strictly increasing")));
    }

    Ok(SparseVector { dim, indices, values })
  }

  pub fn dim(&self) -> usize {
    self.dim
  }

  pub fn nnz(&self) -> usize {
    self.indices.len()
  }

  pub fn is_zero(&self) -> bool {
    self.values.iter().all(|value| *value == 0.0)
  }

  pub fn iter(&self) -> impl Iterator<Item = (u32, f64)> + '_ {
    self.indices.iter().copied().zip(self.values.iter().copied())
  }

  pub fn norm(&self) -> f64 {
    self.values.iter().map(|value| value * value).sum::<f64>().sqrt()
  }

  pub(crate) fn normalized(mut self) -> SparseVector {
    let norm = self.norm();

    if norm > 0.0 {
      self.values.iter_mut().for_each(|value| *value /= norm);
    }

    self
  }
}

/// Compressed sparse row matrix, one row per registry name variant.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CsrMatrix {
  cols: usize,
  indptr: Vec<usize>,
  indices: Vec<u32>,
  data: Vec<f64>,
}

impl CsrMatrix {
  pub fn new(cols: usize) -> CsrMatrix {
    CsrMatrix {
      cols,
      indptr: vec![0],
      indices: Vec::new(),
      data: Vec::new(),
    }
  }

  pub fn push_row(&mut self, row: &SparseVector) -> Result<(), LinkError> {
    if row.dim != self.cols {
      return Err(LinkError::ShapeMismatch { expected: self.cols, actual: row.dim });
    }

    self.indices.extend_from_slice(&row.indices);
    self.data.extend_from_slice(&row.values);
    self.indptr.push(self.indices.len());

    Ok(())
  }

  pub fn rows(&self) -> usize {
    self.indptr.len().saturating_sub(1)
  }

  pub fn cols(&self) -> usize {
    self.cols
  }

  pub fn nnz(&self) -> usize {
    self.data.len()
  }

  pub fn row(&self, row: usize) -> impl Iterator<Item = (u32, f64)> + '_ {
    let (start, end) = (self.indptr[row], self.indptr[row + 1]);

    self.indices[start..end].iter().copied().zip(self.data[start..end].iter().copied())
  }

  /// Checks the structural invariants of a matrix coming from outside the
  /// process, such as a persisted snapshot.
  pub(crate) fn check(&self) -> Result<(), LinkError> {
    let consistent = self.indptr.first() == Some(&0)
      && self.indptr.windows(2).all(|pair| pair[0] <= pair[1])
      && self.indptr.last() == Some(&self.indices.len())
      && self.indices.len() == self.data.len();

    if !consistent {
      return Err(LinkError::Snapshot("inconsistent sparse matrix layout".into()));
    }

    if let Some(&column) = self.indices.iter().find(|column| **column as usize >= self.cols) {
      return Err(LinkError::ShapeMismatch { expected: self.cols, actual: column as usize + 1 });
    }

    Ok(())
  }
}
