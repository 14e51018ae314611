//! Company mentions from named-entity recognition output.

use std::sync::LazyLock;

use ahash::HashSet;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{
  error::LinkError,
  model::{Document, EntitySpan, Mention},
  params::LinkParams,
};

pub(crate) static PUNCTUATION_ONLY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[\p{P}\p{S}\s]*$").unwrap());

#[allow(async_fn_in_trait)]
pub trait EntityRecognizer: Send + Sync {
  fn extract_entities(&self, text: &str) -> impl Future<Output = Result<Vec<EntitySpan>, LinkError>> + Send;
}

/// Client for a recognizer service answering `POST {"text": ..}` with
/// `{"entities": [{"begin", "end", "label", "text"}]}`.
#[derive(Clone, Debug)]
pub struct HttpRecognizer {
  client: reqwest::Client,
  url: String,
}

#[derive(Serialize)]
struct RecognizeRequest<'t> {
  text: &'t str,
}

#[derive(Deserialize)]
struct RecognizeResponse {
  entities: Vec<EntitySpan>,
}

impl HttpRecognizer {
  pub fn new(url: impl Into<String>) -> HttpRecognizer {
    HttpRecognizer::with_client(reqwest::Client::new(), url)
  }

  pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> HttpRecognizer {
    HttpRecognizer { client, url: url.into() }
  }
}

impl EntityRecognizer for HttpRecognizer {
  #[instrument(skip_all, fields(chars = text.len()))]
  async fn extract_entities(&self, text: &str) -> Result<Vec<EntitySpan>, LinkError> {
    let response = self.client.post(&self.url).json(&RecognizeRequest { text }).send().await?;

    if !response.status().is_success() {
      return Err(LinkError::Collaborator(format!("recognizer answered with status {}", response.status())));
    }

    let body: RecognizeResponse = response.json().await?;

    tracing::debug!(entities = body.entities.len(), "got entities from recognizer");

    Ok(body.entities)
  }
}

/// Recognizer returning a fixed set of entities, or always failing.
#[derive(Clone, Debug, Default)]
pub struct MockedRecognizer {
  entities: Vec<EntitySpan>,
  failing: bool,
}

impl MockedRecognizer {
  pub fn with_entities(entities: Vec<EntitySpan>) -> MockedRecognizer {
    MockedRecognizer { entities, failing: false }
  }

  pub fn failing() -> MockedRecognizer {
    MockedRecognizer { entities: vec![], failing: true }
  }
}

impl EntityRecognizer for MockedRecognizer {
  async fn extract_entities(&self, _: &str) -> Result<Vec<EntitySpan>, LinkError> {
    match self.failing {
      true => Err(LinkError::Collaborator("recognizer unavailable".to_string())),
      false => Ok(self.entities.clone()),
    }
  }
}

#[derive(Debug, Default)]
pub struct Extraction {
  pub mentions: Vec<Mention>,
  pub invalid_spans: usize,
}

/// Turns recognizer output into company mentions.
///
/// Keeps entities with a configured label whose text is not only
/// punctuation, once per distinct text. Spans are character offsets; out of
/// range spans are counted and skipped.
pub fn organization_mentions(document: &Document, entities: &[EntitySpan], params: &LinkParams) -> Extraction {
  let offsets = document.text.char_indices().map(|(offset, _)| offset).chain(std::iter::once(document.text.len())).collect::<Vec<_>>();
  let len = offsets.len() - 1;
  let slice = |begin: usize, end: usize| &document.text[offsets[begin]..offsets[end]];

  let mut seen = HashSet::default();
  let mut extraction = Extraction::default();

  for entity in entities.iter().filter(|entity| params.is_organization(&entity.label)) {
    if let Err(err) = check_span(entity, len) {
      tracing::debug!(document = %document.id, error = %err, "skipping entity");

      extraction.invalid_spans += 1;
      continue;
    }

    let text = slice(entity.begin, entity.end).trim();

    if PUNCTUATION_ONLY.is_match(text) || !seen.insert(text) {
      continue;
    }

    let half = params.context_window / 2;
    let window = (entity.begin.saturating_sub(half), (entity.begin + half).min(len));

    extraction.mentions.push(Mention {
      raw_text: text.to_string(),
      document_id: document.id.clone(),
      char_span: (entity.begin, entity.end),
      context_window: slice(window.0, window.1).to_string(),
    });
  }

  extraction
}

fn check_span(entity: &EntitySpan, len: usize) -> Result<(), LinkError> {
  match entity.begin < entity.end && entity.end <= len {
    true => Ok(()),
    false => Err(LinkError::InvalidSpan {
      begin: entity.begin,
      end: entity.end,
      len,
    }),
  }
}
