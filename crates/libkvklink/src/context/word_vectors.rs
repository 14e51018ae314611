use std::{
  fs::File,
  io::{BufRead, BufReader},
  path::Path,
};

use ahash::HashMap;
use anyhow::Context;

use crate::{context::Embedder, error::LinkError};

/// Static word embeddings; a text is embedded as the mean vector of its known
/// tokens.
#[derive(Clone, Debug, Default)]
pub struct WordVectors {
  dim: usize,
  vectors: HashMap<String, Vec<f32>>,
}

impl WordVectors {
  /// Loads vectors from a file in the textual word2vec / fastText format.
  pub fn from_path(path: impl AsRef<Path>) -> Result<WordVectors, LinkError> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("could not open word vectors at {}", path.display()))?;

    WordVectors::read(BufReader::new(file))
  }

  /// Parses one `word v1 v2 ...` entry per line. A leading `count dim` header
  /// line is accepted and skipped.
  pub fn read<R: BufRead>(reader: R) -> Result<WordVectors, LinkError> {
    let mut out = WordVectors::default();

    for (number, line) in reader.lines().enumerate() {
      let line = line?;
      let mut fields = line.split_whitespace();

      let Some(word) = fields.next() else { continue };
      let values = fields.map(str::parse::<f32>).collect::<Result<Vec<_>, _>>().with_context(|| format!("invalid vector on line {}", number + 1))?;

      if number == 0 && values.len() == 1 && word.parse::<usize>().is_ok() {
        continue;
      }

      out.insert(word, values).with_context(|| format!("invalid vector on line {}", number + 1))?;
    }

    tracing::info!(words = out.vectors.len(), dim = out.dim, "loaded word vectors");

    Ok(out)
  }

  pub fn from_pairs<'w>(pairs: impl IntoIterator<Item = (&'w str, Vec<f32>)>) -> Result<WordVectors, LinkError> {
    let mut out = WordVectors::default();

    for (word, vector) in pairs {
      out.insert(word, vector)?;
    }

    Ok(out)
  }

  pub fn dim(&self) -> usize {
    self.dim
  }

  fn insert(&mut self, word: &str, vector: Vec<f32>) -> Result<(), LinkError> {
    if vector.is_empty() {
      return Err(LinkError::OtherError(anyhow::anyhow!("empty vector for '{word}'")));
    }

    if self.dim == 0 {
      self.dim = vector.len();
    }

    if vector.len() != self.dim {
      return Err(LinkError::ShapeMismatch {
        expected: self.dim,
        actual: vector.len(),
      });
    }

    self.vectors.insert(word.to_lowercase(), vector);

    Ok(())
  }
}

impl Embedder for WordVectors {
  fn embed(&self, text: &str) -> Result<Vec<f32>, LinkError> {
    let mut sum = vec![0.0f32; self.dim];
    let mut known = 0usize;

    for token in text.split(|c: char| !c.is_alphanumeric()).filter(|token| !token.is_empty()) {
      if let Some(vector) = self.vectors.get(&token.to_lowercase()) {
        sum.iter_mut().zip(vector).for_each(|(acc, value)| *acc += value);
        known += 1;
      }
    }

    if known > 0 {
      sum.iter_mut().for_each(|value| *value /= known as f32);
    }

    Ok(sum)
  }
}

#[cfg(test)]
mod tests {
  use float_cmp::approx_eq;

  use super::WordVectors;
  use crate::{context::Embedder, error::LinkError};

  #[test]
  fn read_with_header() {
    let vectors = WordVectors::read("3 2\nbank 1.0 0.0\nvervoer 0.0 1.0\nBier 0.5 0.5\n".as_bytes()).unwrap();

    assert_eq!(vectors.dim(), 2);
    assert_eq!(vectors.embed("bier").unwrap(), vec![0.5, 0.5]);
  }

  #[test]
  fn read_rejects_ragged_vectors() {
    assert!(matches!(WordVectors::read("bank 1.0 0.0\nvervoer 0.0\n".as_bytes()), Err(LinkError::OtherError(_))));
    assert!(WordVectors::read("bank 1.0 abc\n".as_bytes()).is_err());
  }

  #[test]
  fn embed_averages_known_tokens() {
    let vectors = WordVectors::from_pairs([("bank", vec![1.0, 0.0]), ("vervoer", vec![0.0, 1.0])]).unwrap();
    let embedded = vectors.embed("De Bank, het vervoer en de rest").unwrap();

    assert!(approx_eq!(f32, embedded[0], 0.5));
    assert!(approx_eq!(f32, embedded[1], 0.5));
  }

  #[test]
  fn embed_unknown_text_is_zero() {
    let vectors = WordVectors::from_pairs([("bank", vec![1.0, 0.0])]).unwrap();

    assert_eq!(vectors.embed("").unwrap(), vec![0.0, 0.0]);
    assert_eq!(vectors.embed("onbekend").unwrap(), vec![0.0, 0.0]);
  }
}
