#[derive(Debug, thiserror::Error)]
pub enum LinkError {
  #[error("vector dimension mismatch: index has {expected} columns, got {actual}")]
  ShapeMismatch { expected: usize, actual: usize },
  #[error("unknown entity: {0}")]
  UnknownEntity(String),
  #[error("invalid priors for alias '{alias}': {reason}")]
  InvalidPrior { alias: String, reason: String },
  #[error("invalid registry identifier: '{0}'")]
  InvalidIdentifier(String),
  #[error("invalid mention span {begin}..{end} for a document of {len} characters")]
  InvalidSpan { begin: usize, end: usize, len: usize },
  #[error("invalid parameters: {0}")]
  InvalidParams(#[from] validator::ValidationErrors),
  #[error("collaborator failure: {0}")]
  Collaborator(String),
  #[error("invalid snapshot: {0}")]
  Snapshot(String),
  #[error(transparent)]
  Io(#[from] std::io::Error),
  #[error(transparent)]
  Csv(#[from] csv::Error),
  #[error(transparent)]
  Json(#[from] serde_json::Error),
  #[error(transparent)]
  OtherError(#[from] anyhow::Error),
}

impl From<reqwest::Error> for LinkError {
  fn from(value: reqwest::Error) -> Self {
    LinkError::Collaborator(value.to_string())
  }
}
