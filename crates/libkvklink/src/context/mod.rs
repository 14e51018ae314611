//! Contextual disambiguation between surviving candidates.
//!
//! Each candidate's descriptor text is embedded and compared with the
//! embedding of the text surrounding the mention. The embedding itself is a
//! collaborator behind [`Embedder`].

mod word_vectors;

use std::sync::{Arc, PoisonError, RwLock};

use ahash::HashMap;
use tracing::instrument;

pub use word_vectors::WordVectors;

use crate::{
  error::LinkError,
  model::{CanonicalEntity, Identifier},
};

pub trait Embedder: Send + Sync {
  /// Embeds a text into a dense vector of fixed dimensionality.
  fn embed(&self, text: &str) -> Result<Vec<f32>, LinkError>;

  fn similarity(&self, lhs: &[f32], rhs: &[f32]) -> f64 {
    cosine(lhs, rhs)
  }
}

/// Descriptor embeddings keyed by descriptor text.
///
/// A cache holds vectors from a single embedding space, so it must only ever
/// be used with one embedder.
#[derive(Debug, Default)]
pub struct DescriptorCache {
  vectors: RwLock<HashMap<String, Arc<[f32]>>>,
}

impl DescriptorCache {
  pub fn get_or_embed<E: Embedder + ?Sized>(&self, embedder: &E, descriptor: &str) -> Result<Arc<[f32]>, LinkError> {
    if let Some(vector) = self.vectors.read().unwrap_or_else(PoisonError::into_inner).get(descriptor) {
      return Ok(Arc::clone(vector));
    }

    let vector: Arc<[f32]> = embedder.embed(descriptor)?.into();
    let mut vectors = self.vectors.write().unwrap_or_else(PoisonError::into_inner);

    Ok(Arc::clone(vectors.entry(descriptor.to_string()).or_insert(vector)))
  }

  pub fn len(&self) -> usize {
    self.vectors.read().unwrap_or_else(PoisonError::into_inner).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// Cosine similarity, defined as zero when either side is the zero vector or
/// the dimensions disagree.
pub fn cosine(lhs: &[f32], rhs: &[f32]) -> f64 {
  if lhs.len() != rhs.len() || lhs.is_empty() {
    return 0.0;
  }

  let (dot, lhs_norm, rhs_norm) = lhs.iter().zip(rhs).fold((0.0f64, 0.0f64, 0.0f64), |(dot, ln, rn), (l, r)| {
    let (l, r) = (f64::from(*l), f64::from(*r));

    (dot + l * r, ln + l * l, rn + r * r)
  });

  if lhs_norm == 0.0 || rhs_norm == 0.0 {
    return 0.0;
  }

  dot / (lhs_norm.sqrt() * rhs_norm.sqrt())
}

/// Picks the candidate whose descriptor best matches `context`.
///
/// The winner must score strictly above zero and strictly above every
/// candidate seen before it, so ties keep the earliest candidate. Returns
/// `None` when there are no candidates or none scores above zero.
#[instrument(level = "debug", skip_all, fields(candidates = candidates.len()))]
pub fn disambiguate<E, S>(embedder: &E, candidates: &[(Identifier, S)], context: &str) -> Result<Option<Identifier>, LinkError>
where
  E: Embedder + ?Sized,
  S: AsRef<str>,
{
  if candidates.is_empty() {
    return Ok(None);
  }

  let context = embedder.embed(context)?;
  let mut scores = Vec::with_capacity(candidates.len());

  for (identifier, descriptor) in candidates {
    let vector = embedder.embed(descriptor.as_ref())?;

    scores.push((identifier, embedder.similarity(&vector, &context)));
  }

  Ok(pick_best(scores))
}

/// Same as [`disambiguate`], embedding each entity's descriptor through
/// `cache`.
pub fn disambiguate_entities<E>(embedder: &E, cache: &DescriptorCache, candidates: &[&CanonicalEntity], context: &str) -> Result<Option<Identifier>, LinkError>
where
  E: Embedder + ?Sized,
{
  if candidates.is_empty() {
    return Ok(None);
  }

  let context = embedder.embed(context)?;
  let mut scores = Vec::with_capacity(candidates.len());

  for entity in candidates {
    let vector = cache.get_or_embed(embedder, &entity.descriptor())?;

    scores.push((&entity.identifier, embedder.similarity(&vector, &context)));
  }

  Ok(pick_best(scores))
}

fn pick_best<'i>(scores: impl IntoIterator<Item = (&'i Identifier, f64)>) -> Option<Identifier> {
  let mut best: Option<&Identifier> = None;
  let mut highest = 0.0;

  for (identifier, score) in scores {
    tracing::debug!(candidate = %identifier, score, "scored candidate against context");

    if score > highest {
      highest = score;
      best = Some(identifier);
    }
  }

  best.cloned()
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};

  use float_cmp::approx_eq;

  use super::{DescriptorCache, Embedder, WordVectors};
  use crate::{
    error::LinkError,
    model::{CanonicalEntity, Identifier},
  };

  fn id(raw: &str) -> Identifier {
    raw.parse().unwrap()
  }

  fn vectors() -> WordVectors {
    WordVectors::from_pairs([
      ("software", vec![1.0, 0.0]),
      ("logistics", vec![0.0, 1.0]),
      ("shipping", vec![0.1, 0.9]),
      ("company", vec![0.5, 0.5]),
    ])
    .unwrap()
  }

  struct Counting<'e> {
    inner: &'e WordVectors,
    calls: AtomicUsize,
  }

  impl Embedder for Counting<'_> {
    fn embed(&self, text: &str) -> Result<Vec<f32>, LinkError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      self.inner.embed(text)
    }
  }

  struct Broken;

  impl Embedder for Broken {
    fn embed(&self, _: &str) -> Result<Vec<f32>, LinkError> {
      Err(LinkError::Collaborator("embedding service unavailable".into()))
    }
  }

  #[test]
  fn cosine() {
    assert!(approx_eq!(f64, super::cosine(&[1.0, 0.0], &[1.0, 0.0]), 1.0));
    assert!(approx_eq!(f64, super::cosine(&[1.0, 0.0], &[0.0, 1.0]), 0.0));
    assert!(approx_eq!(f64, super::cosine(&[1.0, 0.0], &[-1.0, 0.0]), -1.0));
    assert_eq!(super::cosine(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    assert_eq!(super::cosine(&[1.0], &[1.0, 0.0]), 0.0);
  }

  #[test]
  fn disambiguate_by_context() {
    let candidates = vec![(id("00000001"), "software"), (id("00000002"), "logistics")];
    let picked = super::disambiguate(&vectors(), &candidates, "the shipping company announced...").unwrap();

    assert_eq!(picked, Some(id("00000002")));
  }

  #[test]
  fn disambiguate_empty_candidates() {
    let candidates: Vec<(Identifier, &str)> = vec![];

    assert_eq!(super::disambiguate(&Broken, &candidates, "anything").unwrap(), None);
  }

  #[test]
  fn disambiguate_without_positive_score() {
    let candidates = vec![(id("00000001"), "software"), (id("00000002"), "logistics")];

    assert_eq!(super::disambiguate(&vectors(), &candidates, "volkomen onbekende woorden").unwrap(), None);
  }

  #[test]
  fn disambiguate_ties_keep_first() {
    let candidates = vec![(id("00000002"), "logistics"), (id("00000001"), "logistics")];

    assert_eq!(super::disambiguate(&vectors(), &candidates, "shipping").unwrap(), Some(id("00000002")));
  }

  #[test]
  fn disambiguate_propagates_collaborator_failure() {
    let candidates = vec![(id("00000001"), "software")];

    assert!(matches!(super::disambiguate(&Broken, &candidates, "context"), Err(LinkError::Collaborator(_))));
  }

  #[test]
  fn disambiguate_entities_caches_descriptor_vectors() {
    let vectors = vectors();
    let embedder = Counting { inner: &vectors, calls: AtomicUsize::new(0) };
    let cache = DescriptorCache::default();

    let software = CanonicalEntity::builder(id("00000001")).names(&["Acme Corp"]).description("software").build();
    let logistics = CanonicalEntity::builder(id("00000002")).names(&["Acme Ltd"]).description("logistics").build();

    let first = super::disambiguate_entities(&embedder, &cache, &[&software, &logistics], "shipping company").unwrap();
    let second = super::disambiguate_entities(&embedder, &cache, &[&software, &logistics], "software company").unwrap();

    assert_eq!(first, Some(id("00000002")));
    assert_eq!(second, Some(id("00000001")));
    // Two descriptors once, plus one context per call.
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 4);
    assert_eq!(cache.len(), 2);
  }

  #[test]
  fn descriptor_cache_is_keyed_by_text() {
    let vectors = vectors();
    let embedder = Counting { inner: &vectors, calls: AtomicUsize::new(0) };
    let cache = DescriptorCache::default();

    let software = cache.get_or_embed(&embedder, "software").unwrap();
    let again = cache.get_or_embed(&embedder, "software").unwrap();
    let logistics = cache.get_or_embed(&embedder, "logistics").unwrap();

    assert_eq!(*software, *vectors.embed("software").unwrap());
    assert_eq!(software, again);
    assert_eq!(*logistics, *vectors.embed("logistics").unwrap());
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
  }

  #[test]
  fn descriptor_cache_skips_failures() {
    let cache = DescriptorCache::default();

    assert!(matches!(cache.get_or_embed(&Broken, "software"), Err(LinkError::Collaborator(_))));
    assert!(cache.is_empty());
  }
}
