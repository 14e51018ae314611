use serde::{Deserialize, Serialize};

use crate::{
  error::LinkError,
  model::CanonicalEntity,
  search::{Hit, Postings, SimilaritySearch},
  vector::{CsrMatrix, SparseVector, vectorizer::NgramVectorizer},
};

/// The fitted n-gram space of one registry snapshot.
///
/// Holds one matrix row per (entity, name) pair. `owners[row]` is the
/// position of the owning entity in the registry. The index is never updated
/// in place: a changed registry gets a new index.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "RawIndex")]
pub struct SimilarityIndex {
  vectorizer: NgramVectorizer,
  matrix: CsrMatrix,
  owners: Vec<u32>,

  #[serde(skip)]
  postings: Postings,
}

#[derive(Deserialize)]
struct RawIndex {
  vectorizer: NgramVectorizer,
  matrix: CsrMatrix,
  owners: Vec<u32>,
}

impl TryFrom<RawIndex> for SimilarityIndex {
  type Error = LinkError;

  fn try_from(raw: RawIndex) -> Result<Self, Self::Error> {
    raw.matrix.check()?;

    if raw.matrix.cols() != raw.vectorizer.width() {
      return Err(LinkError::ShapeMismatch {
        expected: raw.vectorizer.width(),
        actual: raw.matrix.cols(),
      });
    }

    if raw.owners.len() != raw.matrix.rows() {
      return Err(LinkError::Snapshot(format!("{} row owners for {} matrix rows", raw.owners.len(), raw.matrix.rows())));
    }

    Ok(SimilarityIndex {
      postings: Postings::from_matrix(&raw.matrix),
      vectorizer: raw.vectorizer,
      matrix: raw.matrix,
      owners: raw.owners,
    })
  }
}

impl SimilarityIndex {
  /// Fits the vocabulary over every name of every entity.
  pub fn build(entities: &[CanonicalEntity], ngram_size: usize) -> Result<SimilarityIndex, LinkError> {
    let rows = entities
      .iter()
      .enumerate()
      .flat_map(|(slot, entity)| entity.names.iter().map(move |name| (slot as u32, name.as_str())))
      .collect::<Vec<_>>();

    let (vectorizer, matrix) = NgramVectorizer::fit(rows.iter().map(|(_, name)| *name), ngram_size)?;

    tracing::info!(entities = entities.len(), rows = matrix.rows(), vocabulary = vectorizer.width(), "built similarity index");

    Ok(SimilarityIndex {
      postings: Postings::from_matrix(&matrix),
      owners: rows.into_iter().map(|(slot, _)| slot).collect(),
      vectorizer,
      matrix,
    })
  }

  pub fn transform(&self, text: &str) -> SparseVector {
    self.vectorizer.transform(text)
  }

  /// Searches with the inverted postings.
  pub fn search(&self, query: &SparseVector, k: usize, min_score: f64) -> Result<Vec<Hit>, LinkError> {
    self.postings.top_k(query, k, min_score)
  }

  /// Searches by scanning every row; only meant for small registries and
  /// for checking the postings path.
  pub fn search_exhaustive(&self, query: &SparseVector, k: usize, min_score: f64) -> Result<Vec<Hit>, LinkError> {
    self.matrix.top_k(query, k, min_score)
  }

  /// Registry position of the entity owning `row`.
  pub fn owner(&self, row: usize) -> Option<usize> {
    self.owners.get(row).map(|slot| *slot as usize)
  }

  pub fn rows(&self) -> usize {
    self.matrix.rows()
  }

  pub fn width(&self) -> usize {
    self.vectorizer.width()
  }

  pub fn ngram_size(&self) -> usize {
    self.vectorizer.ngram_size()
  }
}

#[cfg(test)]
mod tests {
  use super::SimilarityIndex;
  use crate::{error::LinkError, model::CanonicalEntity};

  fn entities() -> Vec<CanonicalEntity> {
    vec![
      CanonicalEntity::builder("00000001".parse().unwrap()).names(&["Acme Corp", "Acme Software"]).description("software").build(),
      CanonicalEntity::builder("00000002".parse().unwrap()).names(&["Acme Ltd"]).description("logistics").build(),
    ]
  }

  #[test]
  fn one_row_per_name_variant() {
    let index = SimilarityIndex::build(&entities(), 3).unwrap();

    assert_eq!(index.rows(), 3);
    assert_eq!(index.owner(0), Some(0));
    assert_eq!(index.owner(1), Some(0));
    assert_eq!(index.owner(2), Some(1));
    assert_eq!(index.owner(3), None);
  }

  #[test]
  fn search_paths_agree() {
    let index = SimilarityIndex::build(&entities(), 3).unwrap();
    let query = index.transform("acme software");

    assert_eq!(index.search(&query, 5, 0.0).unwrap(), index.search_exhaustive(&query, 5, 0.0).unwrap());
    assert_eq!(index.search(&query, 1, 0.0).unwrap()[0].row, 1);
  }

  #[test]
  fn serde_rebuilds_postings() {
    let index = SimilarityIndex::build(&entities(), 3).unwrap();
    let restored: SimilarityIndex = serde_json::from_str(&serde_json::to_string(&index).unwrap()).unwrap();
    let query = restored.transform("acme ltd");

    assert_eq!(restored.search(&query, 5, 0.5).unwrap(), index.search(&index.transform("acme ltd"), 5, 0.5).unwrap());
  }

  #[test]
  fn serde_rejects_missing_owners() {
    let index = SimilarityIndex::build(&entities(), 3).unwrap();
    let mut payload = serde_json::to_value(&index).unwrap();

    payload["owners"] = serde_json::json!([0]);

    let error = serde_json::from_value::<SimilarityIndex>(payload).unwrap_err();

    assert!(error.to_string().contains("row owners"));
  }

  #[test]
  fn transform_width_matches_index() {
    let index = SimilarityIndex::build(&entities(), 3).unwrap();

    assert_eq!(index.transform("").dim(), index.width());
    assert!(!matches!(index.search(&index.transform(""), 1, 0.0), Err(LinkError::ShapeMismatch { .. })));
  }
}
