mod context;
mod error;
mod index;
mod linker;
mod model;
mod ner;
mod normalize;
mod params;
mod priors;
mod registry;
mod search;
mod vector;

/// Forces the lazily built lookup tables, so the first mention does not pay
/// for them.
pub fn init() {
  let _ = *crate::normalize::replacers::SYMBOLS;
  let _ = *crate::ner::PUNCTUATION_ONLY;
}

pub mod prelude {
  pub use crate::context::{DescriptorCache, Embedder, WordVectors, cosine, disambiguate, disambiguate_entities};
  pub use crate::error::LinkError;
  pub use crate::index::SimilarityIndex;
  pub use crate::linker::{BatchReport, DocumentLinks, LinkMethod, LinkOutcome, Linker, NilReason};
  pub use crate::model::{Alias, Candidate, CanonicalEntity, Document, EntitySpan, Identifier, Mention};
  pub use crate::ner::{EntityRecognizer, Extraction, HttpRecognizer, organization_mentions};
  pub use crate::normalize::{clean_element, clean_for_ngrams};
  pub use crate::params::LinkParams;
  pub use crate::priors::{Observation, ObservationLog, Outcome, load_observations, read_observations, recompute_priors};
  pub use crate::registry::{
    AliasTable, KbSnapshot, KnowledgeBase, PRIOR_TOLERANCE, Registry, SNAPSHOT_VERSION,
    loader::{RegistryLoad, load_registry, read_registry},
  };
  pub use crate::search::{Hit, Postings, SimilaritySearch};
  pub use crate::vector::{CsrMatrix, SparseVector};

  pub use crate::ner::MockedRecognizer;
}
