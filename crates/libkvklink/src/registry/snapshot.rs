use std::io::{Read, Write};

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::{AliasTable, KnowledgeBase, Registry, validate_alias};
use crate::{error::LinkError, index::SimilarityIndex, model::CanonicalEntity, normalize::clean_element, params::LinkParams};

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize)]
struct SnapshotRef<'s> {
  version: u32,
  built_at: Timestamp,
  entities: &'s [CanonicalEntity],
  index: &'s SimilarityIndex,
  aliases: &'s AliasTable,
}

#[derive(Deserialize)]
struct Snapshot {
  version: u32,
  built_at: Timestamp,
  entities: Vec<CanonicalEntity>,
  index: SimilarityIndex,
  #[serde(default)]
  aliases: AliasTable,
}

impl KnowledgeBase {
  /// Writes the registry, its fitted index and the alias table as JSON.
  pub fn save<W: Write>(&self, writer: W) -> Result<(), LinkError> {
    let state = self.snapshot();

    let snapshot = SnapshotRef {
      version: SNAPSHOT_VERSION,
      built_at: state.registry.built_at(),
      entities: state.registry.entities(),
      index: state.registry.index(),
      aliases: &state.aliases,
    };

    serde_json::to_writer(writer, &snapshot)?;

    tracing::info!(entities = state.registry.len(), aliases = state.aliases.len(), "saved knowledge base snapshot");

    Ok(())
  }

  /// Restores a knowledge base written by [`KnowledgeBase::save`] without
  /// fitting the index again.
  pub fn load<R: Read>(reader: R, params: LinkParams) -> Result<KnowledgeBase, LinkError> {
    params.validate()?;

    let snapshot: Snapshot = serde_json::from_reader(reader)?;

    if snapshot.version != SNAPSHOT_VERSION {
      return Err(LinkError::Snapshot(format!("unsupported version {}, expected {SNAPSHOT_VERSION}", snapshot.version)));
    }

    if snapshot.index.ngram_size() != params.ngram_size {
      tracing::warn!(snapshot = snapshot.index.ngram_size(), configured = params.ngram_size, "snapshot was fitted with a different n-gram size");
    }

    let registry = Registry::from_parts(snapshot.entities, snapshot.index, snapshot.built_at)?;

    for (key, alias) in &snapshot.aliases {
      if *key != alias.text || clean_element(&alias.text) != alias.text {
        return Err(LinkError::Snapshot(format!("alias key '{key}' does not match normalized alias '{}'", alias.text)));
      }

      validate_alias(&registry, alias)?;
    }

    tracing::info!(entities = registry.len(), aliases = snapshot.aliases.len(), built_at = %snapshot.built_at, "loaded knowledge base snapshot");

    Ok(KnowledgeBase::from_registry(registry, snapshot.aliases, params))
  }
}

#[cfg(test)]
mod tests {
  use crate::{
    error::LinkError,
    model::{CanonicalEntity, Identifier},
    params::LinkParams,
    registry::KnowledgeBase,
  };

  fn id(raw: &str) -> Identifier {
    raw.parse().unwrap()
  }

  fn knowledge_base() -> KnowledgeBase {
    let entities = vec![
      CanonicalEntity::builder(id("00000001")).names(&["Acme Corp"]).description("software").city("Utrecht").build(),
      CanonicalEntity::builder(id("00000002")).names(&["Acme Ltd", "Acme Logistics"]).description("logistics").build(),
    ];

    let kb = KnowledgeBase::from_entities(entities, LinkParams::default()).unwrap();

    kb.register_alias("acme", &[id("00000001"), id("00000002")], &[0.7, 0.3]).unwrap();
    kb
  }

  #[test]
  fn save_and_load() {
    let kb = knowledge_base();
    let mut buffer = Vec::new();

    kb.save(&mut buffer).unwrap();

    let restored = KnowledgeBase::load(buffer.as_slice(), LinkParams::default()).unwrap();

    assert_eq!(restored.registry().built_at(), kb.registry().built_at());
    assert_eq!(restored.registry().index().rows(), 3);
    assert_eq!(restored.registry().entity(&id("00000001")).unwrap().descriptor(), "software Utrecht");
    assert_eq!(*restored.aliases(), *kb.aliases());
    assert_eq!(restored.resolve("acme logistics").unwrap(), kb.resolve("acme logistics").unwrap());
    assert_eq!(restored.best_match("acme corp").unwrap(), Some(id("00000001")));
  }

  #[test]
  fn version_mismatch() {
    let mut buffer = Vec::new();

    knowledge_base().save(&mut buffer).unwrap();

    let mut payload: serde_json::Value = serde_json::from_slice(&buffer).unwrap();

    payload["version"] = serde_json::json!(99);

    let result = KnowledgeBase::load(payload.to_string().as_bytes(), LinkParams::default());

    assert!(matches!(result, Err(LinkError::Snapshot(_))));
  }

  #[test]
  fn dangling_alias() {
    let mut buffer = Vec::new();

    knowledge_base().save(&mut buffer).unwrap();

    let mut payload: serde_json::Value = serde_json::from_slice(&buffer).unwrap();

    payload["aliases"]["acme"]["candidates"][1][0] = serde_json::json!("00000009");

    let result = KnowledgeBase::load(payload.to_string().as_bytes(), LinkParams::default());

    assert!(matches!(result, Err(LinkError::UnknownEntity(_))));
  }

  #[test]
  fn mismatched_alias_key() {
    let mut buffer = Vec::new();

    knowledge_base().save(&mut buffer).unwrap();

    let payload: serde_json::Value = serde_json::from_slice(&buffer).unwrap();
    let alias = payload["aliases"]["acme"].clone();

    let mut renamed = payload.clone();
    renamed["aliases"] = serde_json::json!({ "acme corp": alias });

    let mut unnormalized = alias.clone();
    unnormalized["text"] = serde_json::json!("ACME");

    let mut raw = payload;
    raw["aliases"] = serde_json::json!({ "ACME": unnormalized });

    for payload in [renamed, raw] {
      let result = KnowledgeBase::load(payload.to_string().as_bytes(), LinkParams::default());

      assert!(matches!(result, Err(LinkError::Snapshot(_))));
    }
  }

  #[test]
  fn truncated_payload() {
    let result = KnowledgeBase::load("{\"version\": 1".as_bytes(), LinkParams::default());

    assert!(matches!(result, Err(LinkError::Json(_))));
  }
}
