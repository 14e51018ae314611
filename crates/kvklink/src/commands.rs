use std::{
  fs::{self, File},
  io::{BufRead, BufReader, BufWriter, Read, Write},
  path::{Path, PathBuf},
};

use libkvklink::prelude::*;
use serde::Serialize;

use crate::error::CliError;

/// Entity source for documents: a recognizer service, or only the entities
/// shipped with each document.
pub enum Recognizer {
  Http(HttpRecognizer),
  Precomputed,
}

impl Recognizer {
  pub fn new(url: Option<String>) -> Recognizer {
    match url {
      Some(url) => Recognizer::Http(HttpRecognizer::new(url)),
      None => Recognizer::Precomputed,
    }
  }
}

impl EntityRecognizer for Recognizer {
  async fn extract_entities(&self, text: &str) -> Result<Vec<EntitySpan>, LinkError> {
    match self {
      Recognizer::Http(recognizer) => recognizer.extract_entities(text).await,
      Recognizer::Precomputed => Err(LinkError::Collaborator("document has no entities and no recognizer is configured".into())),
    }
  }
}

#[derive(Serialize)]
struct LinkRecord<'r> {
  document_id: &'r str,
  mention: &'r str,
  begin: usize,
  end: usize,
  outcome: &'static str,
  #[serde(skip_serializing_if = "Option::is_none")]
  kvk_number: Option<&'r Identifier>,
  #[serde(skip_serializing_if = "Option::is_none")]
  method: Option<LinkMethod>,
  #[serde(skip_serializing_if = "Option::is_none")]
  reason: Option<&'r str>,
}

impl<'r> LinkRecord<'r> {
  fn new(mention: &'r Mention, outcome: &'r LinkOutcome) -> LinkRecord<'r> {
    let mut record = LinkRecord {
      document_id: &mention.document_id,
      mention: &mention.raw_text,
      begin: mention.char_span.0,
      end: mention.char_span.1,
      outcome: "linked",
      kvk_number: None,
      method: None,
      reason: None,
    };

    match outcome {
      LinkOutcome::Linked { identifier, method } => {
        record.kvk_number = Some(identifier);
        record.method = Some(*method);
      }

      LinkOutcome::Nil(reason) => {
        record.outcome = "nil";
        record.reason = Some(reason.as_str());
      }

      LinkOutcome::Unresolved(reason) => {
        record.outcome = "unresolved";
        record.reason = Some(reason.as_str());
      }
    }

    record
  }
}

pub fn open_knowledge_base(snapshot: &Path, params: LinkParams) -> Result<KnowledgeBase, CliError> {
  let file = File::open(snapshot).map_err(|err| CliError::ConfigError(format!("could not open snapshot {}: {err}", snapshot.display())))?;

  Ok(KnowledgeBase::load(BufReader::new(file), params)?)
}

/// Writes the snapshot next to its destination and renames it into place, so
/// the previous snapshot survives a failed save.
pub fn save_knowledge_base(kb: &KnowledgeBase, snapshot: &Path) -> Result<(), CliError> {
  let staging = staging_path(snapshot);

  let written = write_snapshot(kb, &staging).and_then(|()| fs::rename(&staging, snapshot).map_err(CliError::from));

  if written.is_err() {
    let _ = fs::remove_file(&staging);
  }

  written
}

pub(crate) fn staging_path(snapshot: &Path) -> PathBuf {
  let mut staging = snapshot.as_os_str().to_owned();
  staging.push(".tmp");

  PathBuf::from(staging)
}

fn write_snapshot(kb: &KnowledgeBase, path: &Path) -> Result<(), CliError> {
  let mut writer = BufWriter::new(File::create(path)?);

  kb.save(&mut writer)?;
  writer.flush()?;
  writer.get_ref().sync_all()?;

  Ok(())
}

/// Builds a knowledge base from a registry export.
pub fn index(registry: impl Read, params: LinkParams) -> Result<KnowledgeBase, CliError> {
  let load = read_registry(registry)?;

  if load.entities.is_empty() {
    return Err(CliError::ConfigError("registry export contains no usable rows".into()));
  }

  Ok(KnowledgeBase::from_entities(load.entities, params)?)
}

/// Seeds aliases from the company mentions of every readable document.
pub async fn seed<R: EntityRecognizer>(linker: &Linker, recognizer: &R, documents: impl BufRead) -> Result<usize, CliError> {
  let mut texts = Vec::new();

  for document in read_documents(documents) {
    let Some(document) = document else { continue };

    let entities = match document.entities.clone() {
      Some(entities) => entities,

      None => match recognizer.extract_entities(&document.text).await {
        Ok(entities) => entities,

        Err(err) => {
          tracing::warn!(document = %document.id, error = %err, "could not extract entities");
          continue;
        }
      },
    };

    texts.extend(organization_mentions(&document, &entities, linker.params()).mentions.into_iter().map(|mention| mention.raw_text));
  }

  Ok(linker.seed_aliases(texts.iter().map(String::as_str))?)
}

/// Replaces the priors of every alias found in an annotation export.
pub fn priors(kb: &KnowledgeBase, observations: impl Read) -> Result<usize, CliError> {
  let log = read_observations(observations)?;
  let priors = recompute_priors(&log.observations);
  let updated = priors.len();

  kb.apply_priors(priors)?;

  tracing::info!(aliases = updated, skipped = log.skipped, "recomputed alias priors");

  Ok(updated)
}

/// Links every document and writes one JSON line per mention.
pub async fn link<R: EntityRecognizer>(linker: &Linker, recognizer: &R, documents: impl BufRead, mut output: impl Write) -> Result<BatchReport, CliError> {
  let mut report = BatchReport::default();

  for document in read_documents(documents) {
    let Some(document) = document else {
      report.documents += 1;
      report.failed_documents += 1;
      continue;
    };

    let result = linker.link_document(recognizer, &document).await;

    report.record_document(&result);

    match result {
      Ok(links) => {
        for (mention, outcome) in &links.links {
          serde_json::to_writer(&mut output, &LinkRecord::new(mention, outcome))?;
          output.write_all(b"\n")?;
        }
      }

      Err(err) => tracing::warn!(document = %document.id, error = %err, "could not link document"),
    }
  }

  output.flush()?;

  Ok(report)
}

/// One document per non-empty line; unreadable lines yield `None`.
fn read_documents(reader: impl BufRead) -> impl Iterator<Item = Option<Document>> {
  reader.lines().enumerate().filter_map(|(number, line)| {
    let parsed = line.map_err(CliError::from).and_then(|line| match line.trim().is_empty() {
      true => Ok(None),
      false => Ok(Some(serde_json::from_str::<Document>(&line)?)),
    });

    match parsed {
      Ok(None) => None,
      Ok(Some(document)) => Some(Some(document)),

      Err(err) => {
        tracing::warn!(line = number + 1, error = %err, "skipping unreadable document");

        Some(None)
      }
    }
  })
}
