//! The knowledge base: registered companies, their fitted name index, and the
//! alias table mapping surface strings to weighted candidates.
//!
//! Readers work on `Arc` snapshots. Writers replace the alias table or the
//! whole registry atomically, so an in-flight resolution sees either the old
//! or the new state, never a mix of both.

pub mod loader;
mod snapshot;

pub use snapshot::SNAPSHOT_VERSION;

use std::{
  collections::BTreeMap,
  sync::{Arc, PoisonError, RwLock},
};

use ahash::{HashMap, HashSet};
use jiff::Timestamp;
use metrics::histogram;
use tracing::instrument;
use validator::Validate;

use crate::{
  error::LinkError,
  index::SimilarityIndex,
  model::{Alias, Candidate, CanonicalEntity, Identifier, dedup_candidates},
  normalize::clean_element,
  params::LinkParams,
};

/// Tolerance on the sum of an alias' priors.
pub const PRIOR_TOLERANCE: f64 = 1e-6;

/// Alias records keyed by normalized alias text.
pub type AliasTable = BTreeMap<String, Alias>;

/// Registered entities and the index fitted over their names.
#[derive(Debug)]
pub struct Registry {
  entities: Vec<CanonicalEntity>,
  slots: HashMap<Identifier, u32>,
  index: SimilarityIndex,
  built_at: Timestamp,
}

impl Registry {
  /// Builds a registry, merging the names of entities sharing an identifier
  /// into the first one, then fits the name index.
  pub fn build(entities: Vec<CanonicalEntity>, ngram_size: usize) -> Result<Registry, LinkError> {
    let mut merged: Vec<CanonicalEntity> = Vec::with_capacity(entities.len());
    let mut slots: HashMap<Identifier, u32> = HashMap::default();

    for entity in entities {
      match slots.get(&entity.identifier) {
        Some(slot) => {
          tracing::debug!(identifier = %entity.identifier, "merging duplicate registry entry");

          merged[*slot as usize].add_names(entity.names.iter().map(String::as_str));
        }

        None => {
          slots.insert(entity.identifier.clone(), merged.len() as u32);
          merged.push(entity);
        }
      }
    }

    let index = SimilarityIndex::build(&merged, ngram_size)?;

    Ok(Registry {
      entities: merged,
      slots,
      index,
      built_at: Timestamp::now(),
    })
  }

  pub(crate) fn from_parts(entities: Vec<CanonicalEntity>, index: SimilarityIndex, built_at: Timestamp) -> Result<Registry, LinkError> {
    let mut slots: HashMap<Identifier, u32> = HashMap::default();

    for (slot, entity) in entities.iter().enumerate() {
      if slots.insert(entity.identifier.clone(), slot as u32).is_some() {
        return Err(LinkError::Snapshot(format!("duplicate entity {}", entity.identifier)));
      }
    }

    if let Some(row) = (0..index.rows()).find(|row| index.owner(*row).is_none_or(|slot| slot >= entities.len())) {
      return Err(LinkError::Snapshot(format!("row {row} is owned by an unknown entity")));
    }

    Ok(Registry { entities, slots, index, built_at })
  }

  pub fn entity(&self, identifier: &Identifier) -> Option<&CanonicalEntity> {
    self.slots.get(identifier).map(|slot| &self.entities[*slot as usize])
  }

  pub fn contains(&self, identifier: &Identifier) -> bool {
    self.slots.contains_key(identifier)
  }

  pub fn entities(&self) -> &[CanonicalEntity] {
    &self.entities
  }

  pub fn index(&self) -> &SimilarityIndex {
    &self.index
  }

  /// When the index was fitted.
  pub fn built_at(&self) -> Timestamp {
    self.built_at
  }

  pub fn len(&self) -> usize {
    self.entities.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entities.is_empty()
  }

  /// Finds the entities owning the `limit` name rows most similar to `text`,
  /// best first, each entity once.
  pub fn search(&self, text: &str, limit: usize, threshold: f64) -> Result<Vec<Candidate>, LinkError> {
    let query = self.index.transform(text);
    let hits = self.index.search(&query, limit, threshold)?;

    let candidates = hits.into_iter().filter_map(|hit| {
      let entity = self.entities.get(self.index.owner(hit.row)?)?;

      Some(Candidate {
        identifier: entity.identifier.clone(),
        score: hit.score,
      })
    });

    Ok(dedup_candidates(candidates))
  }
}

/// A consistent view of the registry and the alias table.
#[derive(Clone, Debug)]
pub struct KbSnapshot {
  pub registry: Arc<Registry>,
  pub aliases: Arc<AliasTable>,
}

impl KbSnapshot {
  pub fn alias(&self, text: &str) -> Option<&Alias> {
    self.aliases.get(&clean_element(text))
  }

  /// Candidate entities for a mention: up to `candidate_limit` name rows
  /// scoring above `candidate_threshold`, collapsed to their owners.
  pub fn resolve(&self, mention_text: &str, params: &LinkParams) -> Result<Vec<Candidate>, LinkError> {
    let candidates = self.registry.search(mention_text, params.candidate_limit, params.candidate_threshold)?;

    histogram!("kvklink_candidates_per_mention").record(candidates.len() as f64);

    Ok(candidates)
  }

  /// The candidate with the strictly highest prior for an alias. Candidates
  /// with a zero prior never win.
  pub fn majority_candidate(&self, alias_text: &str) -> Option<Identifier> {
    majority(self.alias(alias_text)?)
  }
}

#[derive(Debug)]
pub struct KnowledgeBase {
  registry: RwLock<Arc<Registry>>,
  aliases: RwLock<Arc<AliasTable>>,
  params: LinkParams,
}

impl KnowledgeBase {
  pub fn from_entities(entities: Vec<CanonicalEntity>, params: LinkParams) -> Result<KnowledgeBase, LinkError> {
    params.validate()?;

    let registry = Registry::build(entities, params.ngram_size)?;

    Ok(KnowledgeBase::from_registry(registry, AliasTable::new(), params))
  }

  pub(crate) fn from_registry(registry: Registry, aliases: AliasTable, params: LinkParams) -> KnowledgeBase {
    KnowledgeBase {
      registry: RwLock::new(Arc::new(registry)),
      aliases: RwLock::new(Arc::new(aliases)),
      params,
    }
  }

  pub fn params(&self) -> &LinkParams {
    &self.params
  }

  pub fn registry(&self) -> Arc<Registry> {
    self.registry.read().unwrap_or_else(PoisonError::into_inner).clone()
  }

  pub fn aliases(&self) -> Arc<AliasTable> {
    self.aliases.read().unwrap_or_else(PoisonError::into_inner).clone()
  }

  pub fn snapshot(&self) -> KbSnapshot {
    let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
    let aliases = self.aliases.read().unwrap_or_else(PoisonError::into_inner);

    KbSnapshot {
      registry: registry.clone(),
      aliases: aliases.clone(),
    }
  }

  /// See [`KbSnapshot::resolve`].
  #[instrument(level = "debug", skip(self))]
  pub fn resolve(&self, mention_text: &str) -> Result<Vec<Candidate>, LinkError> {
    self.snapshot().resolve(mention_text, &self.params)
  }

  /// The single closest entity above `best_match_threshold`, if any.
  #[instrument(level = "debug", skip(self))]
  pub fn best_match(&self, mention_text: &str) -> Result<Option<Identifier>, LinkError> {
    let candidates = self.registry().search(mention_text, 1, self.params.best_match_threshold)?;

    Ok(candidates.into_iter().next().map(|candidate| candidate.identifier))
  }

  pub fn candidates(&self, alias_text: &str) -> Option<Alias> {
    self.aliases().get(&clean_element(alias_text)).cloned()
  }

  pub fn majority_candidate(&self, alias_text: &str) -> Option<Identifier> {
    majority(self.aliases().get(&clean_element(alias_text))?)
  }

  /// Stores or overwrites the record of one alias.
  ///
  /// Priors must be non-negative and sum to one within [`PRIOR_TOLERANCE`];
  /// an empty candidate list records an alias without known candidates.
  /// Nothing is written when validation fails.
  pub fn register_alias(&self, alias_text: &str, candidates: &[Identifier], priors: &[f64]) -> Result<(), LinkError> {
    let text = clean_element(alias_text);

    if candidates.len() != priors.len() {
      return Err(LinkError::InvalidPrior {
        alias: text,
        reason: format!("{} candidates for {} priors", candidates.len(), priors.len()),
      });
    }

    let alias = Alias {
      text,
      candidates: candidates.iter().cloned().zip(priors.iter().copied()).collect(),
    };

    self.write_aliases(vec![alias], false)
  }

  /// Registers an alias with the same prior for every candidate.
  pub fn register_uniform(&self, alias_text: &str, candidates: &[Identifier]) -> Result<(), LinkError> {
    let priors = vec![1.0 / candidates.len().max(1) as f64; candidates.len()];

    self.register_alias(alias_text, candidates, &priors)
  }

  /// Replaces the records of every alias in `priors` as one batch.
  ///
  /// Candidates an existing alias had but that were never chosen are kept
  /// with a zero prior. Aliases not in `priors` are left untouched.
  pub fn apply_priors(&self, priors: BTreeMap<String, Alias>) -> Result<(), LinkError> {
    self.write_aliases(priors.into_values().collect(), true)
  }

  /// Stores several alias records at once; either all are written or none.
  pub fn register_aliases(&self, aliases: Vec<Alias>) -> Result<(), LinkError> {
    self.write_aliases(aliases, false)
  }

  /// Swaps in a new set of entities and a freshly fitted index. Fails with
  /// [`LinkError::UnknownEntity`] if a registered alias refers to an entity
  /// missing from the new set.
  pub fn replace_entities(&self, entities: Vec<CanonicalEntity>) -> Result<(), LinkError> {
    let registry = Registry::build(entities, self.params.ngram_size)?;
    let mut current = self.registry.write().unwrap_or_else(PoisonError::into_inner);

    {
      let aliases = self.aliases.read().unwrap_or_else(PoisonError::into_inner);

      if let Some(missing) = aliases.values().flat_map(Alias::identifiers).find(|identifier| !registry.contains(identifier)) {
        return Err(LinkError::UnknownEntity(missing.to_string()));
      }
    }

    tracing::info!(entities = registry.len(), rows = registry.index().rows(), "replaced registry");

    *current = Arc::new(registry);

    Ok(())
  }

  fn write_aliases(&self, mut batch: Vec<Alias>, keep_unchosen: bool) -> Result<(), LinkError> {
    let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);

    for alias in &mut batch {
      alias.text = clean_element(&alias.text);

      validate_alias(&registry, alias)?;
    }

    let mut guard = self.aliases.write().unwrap_or_else(PoisonError::into_inner);
    let table = Arc::make_mut(&mut *guard);

    for mut alias in batch {
      if keep_unchosen && let Some(previous) = table.get(&alias.text) {
        let unchosen = previous.identifiers().filter(|identifier| alias.prior(identifier).is_none()).cloned().collect::<Vec<_>>();

        alias.candidates.extend(unchosen.into_iter().map(|identifier| (identifier, 0.0)));
      }

      tracing::debug!(alias = %alias.text, candidates = alias.candidates.len(), "registered alias");

      table.insert(alias.text.clone(), alias);
    }

    Ok(())
  }
}

fn validate_alias(registry: &Registry, alias: &Alias) -> Result<(), LinkError> {
  let invalid = |reason: String| LinkError::InvalidPrior { alias: alias.text.clone(), reason };

  if alias.candidates.is_empty() {
    return Ok(());
  }

  if let Some((identifier, prior)) = alias.candidates.iter().find(|(_, prior)| !prior.is_finite() || *prior < 0.0) {
    return Err(invalid(format!("prior {prior} of {identifier} is not a probability")));
  }

  let sum = alias.candidates.iter().map(|(_, prior)| prior).sum::<f64>();

  if (sum - 1.0).abs() > PRIOR_TOLERANCE {
    return Err(invalid(format!("priors sum to {sum}")));
  }

  let mut seen: HashSet<&Identifier> = HashSet::default();

  for identifier in alias.identifiers() {
    if !seen.insert(identifier) {
      return Err(invalid(format!("{identifier} is listed twice")));
    }

    if !registry.contains(identifier) {
      return Err(LinkError::UnknownEntity(identifier.to_string()));
    }
  }

  Ok(())
}

pub(crate) fn majority(alias: &Alias) -> Option<Identifier> {
  let mut best = None;
  let mut highest = 0.0;

  for (identifier, prior) in &alias.candidates {
    if *prior > highest {
      highest = *prior;
      best = Some(identifier);
    }
  }

  best.cloned()
}
