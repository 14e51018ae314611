use libkvklink::prelude::LinkError;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
  #[error("configuration error: {0}")]
  ConfigError(String),
  #[error(transparent)]
  Link(#[from] LinkError),
  #[error(transparent)]
  Io(#[from] std::io::Error),
  #[error(transparent)]
  Json(#[from] serde_json::Error),
}
