use std::collections::BTreeMap;

use ahash::{HashMap, HashMapExt, HashSet};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};

use crate::{
  error::LinkError,
  normalize::clean_for_ngrams,
  vector::{CsrMatrix, SparseVector},
};

/// Character n-gram TF-IDF vectorizer with a vocabulary fixed at fit time.
///
/// Rows are raw n-gram counts weighted by a smoothed inverse document
/// frequency, `ln((1 + n) / (1 + df)) + 1`, and scaled to unit length so the
/// dot product of two rows is their cosine similarity.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "RawVectorizer")]
pub struct NgramVectorizer {
  ngram_size: usize,
  vocabulary: Vec<CompactString>,
  idf: Vec<f64>,

  #[serde(skip)]
  columns: HashMap<CompactString, u32>,
}

#[derive(Deserialize)]
struct RawVectorizer {
  ngram_size: usize,
  vocabulary: Vec<CompactString>,
  idf: Vec<f64>,
}

impl TryFrom<RawVectorizer> for NgramVectorizer {
  type Error = LinkError;

  fn try_from(raw: RawVectorizer) -> Result<Self, Self::Error> {
    if raw.ngram_size == 0 {
      return Err(LinkError::Snapshot("n-gram size must be positive".into()));
    }

    if raw.vocabulary.len() != raw.idf.len() {
      return Err(LinkError::ShapeMismatch {
        expected: raw.vocabulary.len(),
        actual: raw.idf.len(),
      });
    }

    let columns = column_lookup(&raw.vocabulary);

    if columns.len() != raw.vocabulary.len() {
      return Err(LinkError::Snapshot("vocabulary contains duplicate n-grams".into()));
    }

    Ok(NgramVectorizer {
      ngram_size: raw.ngram_size,
      vocabulary: raw.vocabulary,
      idf: raw.idf,
      columns,
    })
  }
}

impl NgramVectorizer {
  /// Learns the vocabulary and IDF weights from `corpus` and returns the
  /// vectorizer together with the matrix of the corpus' own rows.
  ///
  /// Column order is the lexicographic order of the n-grams, which keeps it
  /// reproducible across fits of the same corpus.
  pub fn fit<I, S>(corpus: I, ngram_size: usize) -> Result<(NgramVectorizer, CsrMatrix), LinkError>
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    if ngram_size == 0 {
      return Err(LinkError::OtherError(anyhow::anyhow!("n-gram size must be positive")));
    }

    let documents = corpus.into_iter().map(|name| ngrams(&clean_for_ngrams(name.as_ref()), ngram_size)).collect::<Vec<_>>();

    let mut document_frequency: BTreeMap<&str, usize> = BTreeMap::new();

    for grams in &documents {
      let unique = grams.iter().map(CompactString::as_str).collect::<HashSet<_>>();

      for gram in unique {
        *document_frequency.entry(gram).or_default() += 1;
      }
    }

    let total = documents.len() as f64;
    let vocabulary = document_frequency.keys().map(|gram| CompactString::from(*gram)).collect::<Vec<_>>();
    let idf = document_frequency.values().map(|df| ((1.0 + total) / (1.0 + *df as f64)).ln() + 1.0).collect::<Vec<_>>();

    let vectorizer = NgramVectorizer {
      ngram_size,
      columns: column_lookup(&vocabulary),
      vocabulary,
      idf,
    };

    let mut matrix = CsrMatrix::new(vectorizer.width());

    for grams in &documents {
      matrix.push_row(&vectorizer.weigh(grams))?;
    }

    tracing::debug!(documents = documents.len(), vocabulary = vectorizer.width(), nnz = matrix.nnz(), "fitted n-gram vectorizer");

    Ok((vectorizer, matrix))
  }

  /// Maps one name onto the fitted vocabulary. Unknown n-grams are ignored, so
  /// an empty or entirely unknown name yields the zero vector.
  pub fn transform(&self, text: &str) -> SparseVector {
    self.weigh(&ngrams(&clean_for_ngrams(text), self.ngram_size))
  }

  pub fn width(&self) -> usize {
    self.vocabulary.len()
  }

  pub fn ngram_size(&self) -> usize {
    self.ngram_size
  }

  pub fn column(&self, gram: &str) -> Option<u32> {
    self.columns.get(gram).copied()
  }

  fn weigh(&self, grams: &[CompactString]) -> SparseVector {
    let mut counts: HashMap<u32, f64> = HashMap::with_capacity(grams.len());

    for gram in grams {
      if let Some(column) = self.columns.get(gram) {
        *counts.entry(*column).or_default() += 1.0;
      }
    }

    let mut entries = counts.into_iter().map(|(column, count)| (column, count * self.idf[column as usize])).collect::<Vec<_>>();

    entries.sort_unstable_by_key(|(column, _)| *column);

    SparseVector {
      dim: self.width(),
      indices: entries.iter().map(|(column, _)| *column).collect(),
      values: entries.iter().map(|(_, weight)| *weight).collect(),
    }
    .normalized()
  }
}

fn column_lookup(vocabulary: &[CompactString]) -> HashMap<CompactString, u32> {
  vocabulary.iter().enumerate().map(|(column, gram)| (gram.clone(), column as u32)).collect()
}

/// Overlapping character n-grams of an already normalized string.
pub(crate) fn ngrams(normalized: &str, n: usize) -> Vec<CompactString> {
  let chars = normalized.chars().collect::<Vec<_>>();

  if n == 0 || chars.len() < n {
    return Vec::new();
  }

  chars.windows(n).map(|window| window.iter().collect::<CompactString>()).collect()
}
