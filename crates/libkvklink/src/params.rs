use serde::{Deserialize, Serialize};
use serde_inline_default::serde_inline_default;
use validator::Validate;

/// Tuning of candidate generation and mention extraction.
#[serde_inline_default]
#[derive(Clone, Debug, Deserialize, Serialize, Validate)]
pub struct LinkParams {
  /// Maximum number of name rows considered per mention.
  #[serde_inline_default(5)]
  #[validate(range(min = 1))]
  pub candidate_limit: usize,
  /// Cosine similarity a name row must strictly exceed to become a candidate.
  #[serde_inline_default(0.80)]
  #[validate(range(min = 0.0, max = 1.0))]
  pub candidate_threshold: f64,
  /// Threshold used when only the single closest name is wanted.
  #[serde_inline_default(0.74)]
  #[validate(range(min = 0.0, max = 1.0))]
  pub best_match_threshold: f64,
  #[serde_inline_default(3)]
  #[validate(range(min = 1, max = 8))]
  pub ngram_size: usize,
  /// Characters of surrounding text kept around a mention for disambiguation.
  #[serde_inline_default(500)]
  pub context_window: usize,
  /// Recognizer labels treated as company mentions.
  #[serde_inline_default(vec!["ORG".to_string(), "NORP".to_string()])]
  #[validate(length(min = 1, message = "at least one label must be given"))]
  pub organization_labels: Vec<String>,
}

impl Default for LinkParams {
  fn default() -> Self {
    LinkParams {
      candidate_limit: 5,
      candidate_threshold: 0.80,
      best_match_threshold: 0.74,
      ngram_size: 3,
      context_window: 500,
      organization_labels: vec!["ORG".to_string(), "NORP".to_string()],
    }
  }
}

impl LinkParams {
  pub fn is_organization(&self, label: &str) -> bool {
    self.organization_labels.iter().any(|candidate| candidate == label)
  }
}
