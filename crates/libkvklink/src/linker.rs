//! End-to-end linking of company mentions to registry entities.

use std::{fmt, sync::Arc};

use ahash::HashSet;
use bon::bon;
use metrics::counter;
use rayon::prelude::*;
use serde::Serialize;
use tracing::instrument;
use validator::Validate;

use crate::{
  context::{DescriptorCache, Embedder, disambiguate_entities},
  error::LinkError,
  model::{Alias, Document, Identifier, Mention},
  ner::{EntityRecognizer, organization_mentions},
  normalize::clean_element,
  params::LinkParams,
  registry::{KbSnapshot, KnowledgeBase},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkMethod {
  /// Only one entity was close enough by name.
  SingleCandidate,
  Context,
  /// The alias' most frequently chosen entity.
  Prior,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NilReason {
  NoCandidate,
  NoContextMatch,
  Ambiguous,
}

impl NilReason {
  pub fn as_str(&self) -> &'static str {
    match self {
      NilReason::NoCandidate => "no_candidate",
      NilReason::NoContextMatch => "no_context_match",
      NilReason::Ambiguous => "ambiguous",
    }
  }
}

#[derive(Clone, Debug, PartialEq)]
pub enum LinkOutcome {
  Linked { identifier: Identifier, method: LinkMethod },
  Nil(NilReason),
  /// A collaborator or index failure prevented a decision.
  Unresolved(String),
}

impl LinkOutcome {
  pub fn identifier(&self) -> Option<&Identifier> {
    match self {
      LinkOutcome::Linked { identifier, .. } => Some(identifier),
      _ => None,
    }
  }

  fn label(&self) -> &'static str {
    match self {
      LinkOutcome::Linked { .. } => "linked",
      LinkOutcome::Nil(_) => "nil",
      LinkOutcome::Unresolved(_) => "unresolved",
    }
  }
}

/// Mentions found in one document, each with its outcome.
#[derive(Debug)]
pub struct DocumentLinks {
  pub document_id: String,
  pub links: Vec<(Mention, LinkOutcome)>,
  pub invalid_spans: usize,
}

pub struct Linker {
  kb: Arc<KnowledgeBase>,
  embedder: Option<Arc<dyn Embedder>>,
  descriptors: DescriptorCache,
  params: LinkParams,
}

#[bon]
impl Linker {
  /// Without an embedder, ambiguous mentions fall back to alias priors.
  /// Parameters default to the knowledge base's own.
  #[builder]
  pub fn builder(#[builder(start_fn)] kb: Arc<KnowledgeBase>, embedder: Option<Arc<dyn Embedder>>, params: Option<LinkParams>) -> Result<Linker, LinkError> {
    let params = params.unwrap_or_else(|| kb.params().clone());

    params.validate()?;

    Ok(Linker {
      kb,
      embedder,
      descriptors: DescriptorCache::default(),
      params,
    })
  }
}

impl Linker {
  pub fn knowledge_base(&self) -> &Arc<KnowledgeBase> {
    &self.kb
  }

  pub fn params(&self) -> &LinkParams {
    &self.params
  }

  pub fn link_mention(&self, mention: &Mention) -> LinkOutcome {
    self.link_with(&self.kb.snapshot(), mention)
  }

  /// Links independent mentions in parallel against one knowledge base
  /// snapshot. Outcomes keep the order of `mentions`.
  #[instrument(skip_all, fields(mentions = mentions.len()))]
  pub fn link_mentions(&self, mentions: &[Mention]) -> Vec<LinkOutcome> {
    let state = self.kb.snapshot();

    mentions.par_iter().map(|mention| self.link_with(&state, mention)).collect()
  }

  /// Extracts the company mentions of a document and links them. Entities
  /// shipped with the document are used as is; otherwise the recognizer is
  /// asked for them.
  #[instrument(skip_all, fields(document = %document.id))]
  pub async fn link_document<R: EntityRecognizer>(&self, recognizer: &R, document: &Document) -> Result<DocumentLinks, LinkError> {
    let entities = match &document.entities {
      Some(entities) => entities.clone(),
      None => recognizer.extract_entities(&document.text).await?,
    };

    let extraction = organization_mentions(document, &entities, &self.params);
    let outcomes = self.link_mentions(&extraction.mentions);

    Ok(DocumentLinks {
      document_id: document.id.clone(),
      links: extraction.mentions.into_iter().zip(outcomes).collect(),
      invalid_spans: extraction.invalid_spans,
    })
  }

  /// Registers every distinct mention text that is not an alias yet and has
  /// name candidates, with the same prior for each candidate. Returns the
  /// number of new aliases.
  #[instrument(skip_all)]
  pub fn seed_aliases<'m>(&self, mentions: impl IntoIterator<Item = &'m str>) -> Result<usize, LinkError> {
    let aliases = {
      let state = self.kb.snapshot();
      let mut seen = HashSet::default();

      let texts = mentions.into_iter().map(clean_element).filter(|text| !text.is_empty() && state.alias(text).is_none() && seen.insert(text.clone())).collect::<Vec<_>>();

      texts
        .into_par_iter()
        .map(|text| -> Result<Alias, LinkError> {
          let candidates = state.resolve(&text, &self.params)?;
          let prior = 1.0 / candidates.len().max(1) as f64;

          Ok(Alias {
            text,
            candidates: candidates.into_iter().map(|candidate| (candidate.identifier, prior)).collect(),
          })
        })
        .filter(|alias| !matches!(alias, Ok(alias) if alias.is_empty()))
        .collect::<Result<Vec<_>, _>>()?
    };

    let seeded = aliases.len();

    self.kb.register_aliases(aliases)?;

    tracing::info!(seeded, "seeded aliases");

    Ok(seeded)
  }

  fn link_with(&self, state: &KbSnapshot, mention: &Mention) -> LinkOutcome {
    let outcome = self.decide(state, mention).unwrap_or_else(|err| {
      tracing::warn!(mention = %mention.raw_text, error = %err, "could not link mention");

      LinkOutcome::Unresolved(err.to_string())
    });

    counter!("kvklink_mentions_total", "outcome" => outcome.label()).increment(1);

    outcome
  }

  fn decide(&self, state: &KbSnapshot, mention: &Mention) -> Result<LinkOutcome, LinkError> {
    let candidates = state.resolve(&mention.raw_text, &self.params)?;

    match candidates.as_slice() {
      [] => return Ok(LinkOutcome::Nil(NilReason::NoCandidate)),

      [single] => {
        return Ok(LinkOutcome::Linked {
          identifier: single.identifier.clone(),
          method: LinkMethod::SingleCandidate,
        });
      }

      _ => {}
    }

    let Some(embedder) = &self.embedder else {
      return Ok(match state.majority_candidate(&mention.raw_text) {
        Some(identifier) => LinkOutcome::Linked { identifier, method: LinkMethod::Prior },
        None => LinkOutcome::Nil(NilReason::Ambiguous),
      });
    };

    let entities = candidates.iter().filter_map(|candidate| state.registry.entity(&candidate.identifier)).collect::<Vec<_>>();

    Ok(match disambiguate_entities(&**embedder, &self.descriptors, &entities, &mention.context_window)? {
      Some(identifier) => LinkOutcome::Linked { identifier, method: LinkMethod::Context },
      None => LinkOutcome::Nil(NilReason::NoContextMatch),
    })
  }
}

/// Counters accumulated over a batch run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
  pub documents: usize,
  pub failed_documents: usize,
  pub mentions: usize,
  pub invalid_spans: usize,
  pub linked: usize,
  pub nil: usize,
  pub unresolved: usize,
}

impl BatchReport {
  pub fn record_outcome(&mut self, outcome: &LinkOutcome) {
    self.mentions += 1;

    match outcome {
      LinkOutcome::Linked { .. } => self.linked += 1,
      LinkOutcome::Nil(_) => self.nil += 1,
      LinkOutcome::Unresolved(_) => self.unresolved += 1,
    }
  }

  pub fn record_document(&mut self, result: &Result<DocumentLinks, LinkError>) {
    self.documents += 1;

    match result {
      Ok(links) => {
        self.invalid_spans += links.invalid_spans;

        for (_, outcome) in &links.links {
          self.record_outcome(outcome);
        }
      }

      Err(_) => self.failed_documents += 1,
    }
  }

  pub fn merge(&mut self, other: &BatchReport) {
    self.documents += other.documents;
    self.failed_documents += other.failed_documents;
    self.mentions += other.mentions;
    self.invalid_spans += other.invalid_spans;
    self.linked += other.linked;
    self.nil += other.nil;
    self.unresolved += other.unresolved;
  }
}

impl fmt::Display for BatchReport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "documents:      {} ({} failed)", self.documents, self.failed_documents)?;
    writeln!(f, "mentions:       {} ({} invalid spans skipped)", self.mentions, self.invalid_spans)?;
    writeln!(f, "  linked:       {}", self.linked)?;
    writeln!(f, "  nil:          {}", self.nil)?;
    write!(f, "  unresolved:   {}", self.unresolved)
  }
}
