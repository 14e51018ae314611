use crate::{
  error::LinkError,
  search::{Hit, SimilaritySearch, TopK},
  vector::{CsrMatrix, SparseVector},
};

impl SimilaritySearch for CsrMatrix {
  fn width(&self) -> usize {
    self.cols()
  }

  fn rows(&self) -> usize {
    CsrMatrix::rows(self)
  }

  fn top_k(&self, query: &SparseVector, k: usize, min_score: f64) -> Result<Vec<Hit>, LinkError> {
    self.check_width(query)?;

    let mut dense = vec![0.0f64; self.cols()];

    for (column, weight) in query.iter() {
      dense[column as usize] = weight;
    }

    let mut top = TopK::new(k, min_score);

    for row in 0..CsrMatrix::rows(self) {
      let score = self.row(row).fold(0.0, |score, (column, value)| score + dense[column as usize] * value);

      top.offer(row, score);
    }

    Ok(top.into_sorted())
  }
}
