use std::{env, sync::Arc};

use libkvklink::prelude::*;

use crate::commands::{self, Recognizer};

const REGISTRY: &str = "\
kvk_number\tname\talternative_names\tsbi_code\tsbi_code_description\tcity
1234567\tAcme Corp\tAcme Software\t6201.0\tsoftware development\tUtrecht
87654321\tAcme Ltd\t\t4941\tlogistics transport\tRotterdam
";

fn knowledge_base() -> Arc<KnowledgeBase> {
  let params = LinkParams {
    candidate_threshold: 0.4,
    ..LinkParams::default()
  };

  Arc::new(commands::index(REGISTRY.as_bytes(), params).unwrap())
}

fn id(raw: &str) -> Identifier {
  raw.parse().unwrap()
}

#[test]
fn index_rejects_empty_registry() {
  assert!(commands::index("kvk_number\tname\tsbi_code_description\n".as_bytes(), LinkParams::default()).is_err());
}

#[test]
fn snapshot_roundtrip_on_disk() {
  let kb = knowledge_base();
  let path = env::temp_dir().join(format!("kvklink-snapshot-{}.json", std::process::id()));

  commands::save_knowledge_base(&kb, &path).unwrap();

  let restored = commands::open_knowledge_base(&path, kb.params().clone()).unwrap();

  std::fs::remove_file(&path).unwrap();

  assert_eq!(restored.best_match("acme software").unwrap(), Some(id("01234567")));
}

#[tokio::test]
async fn interrupted_batch_fails() {
  assert!(crate::interruptible(std::future::pending(), async {}).await.is_err());
  assert!(crate::interruptible(async { Ok(()) }, std::future::pending()).await.is_ok());
}

#[test]
fn failed_save_keeps_previous_snapshot() {
  let kb = knowledge_base();
  let path = env::temp_dir().join(format!("kvklink-kept-{}.json", std::process::id()));
  let staging = commands::staging_path(&path);

  commands::save_knowledge_base(&kb, &path).unwrap();
  assert!(!staging.exists());

  kb.register_uniform("acme", &[id("01234567")]).unwrap();
  std::fs::create_dir_all(&staging).unwrap();

  let saved = commands::save_knowledge_base(&kb, &path);

  std::fs::remove_dir_all(&staging).unwrap();

  let restored = commands::open_knowledge_base(&path, kb.params().clone());

  std::fs::remove_file(&path).unwrap();

  assert!(saved.is_err());

  let restored = restored.unwrap();

  assert!(restored.candidates("acme").is_none());
  assert_eq!(restored.best_match("acme software").unwrap(), Some(id("01234567")));
}

#[tokio::test]
async fn seed_then_priors() {
  let kb = knowledge_base();
  let linker = Linker::builder(kb.clone()).build().unwrap();

  let documents = r#"{"id": "1", "text": "Acme breidt uit", "entities": [{"begin": 0, "end": 4, "label": "ORG"}]}
{"id": "2", "text": "Geen entiteiten hier"}
"#;

  let seeded = commands::seed(&linker, &Recognizer::Precomputed, documents.as_bytes()).await.unwrap();

  assert_eq!(seeded, 1);
  assert_eq!(kb.candidates("acme").unwrap().candidates.len(), 2);

  let observations = "alias\tentity\nAcme\t87654321\nAcme\t87654321\nAcme\t1234567\nAcme\tNIL_ambiguous\n";
  let updated = commands::priors(&kb, observations.as_bytes()).unwrap();
  let alias = kb.candidates("acme").unwrap();

  assert_eq!(updated, 1);
  assert_eq!(alias.identifiers().collect::<Vec<_>>(), [&id("01234567"), &id("87654321")]);
  assert_eq!(kb.majority_candidate("acme"), Some(id("87654321")));
}

#[tokio::test]
async fn link_writes_one_line_per_mention() {
  let linker = Linker::builder(knowledge_base()).build().unwrap();

  let documents = r#"{"id": "1", "text": "Acme Ltd en Gemeente Utrecht", "entities": [{"begin": 0, "end": 8, "label": "ORG"}, {"begin": 12, "end": 28, "label": "ORG"}]}
not json
{"id": "3", "text": "Zonder entiteiten"}
"#;

  let mut output = Vec::new();
  let report = commands::link(&linker, &Recognizer::Precomputed, documents.as_bytes(), &mut output).await.unwrap();
  let lines = String::from_utf8(output).unwrap().lines().map(|line| serde_json::from_str::<serde_json::Value>(line).unwrap()).collect::<Vec<_>>();

  assert_eq!(lines.len(), 2);
  assert_eq!(lines[0]["outcome"], "linked");
  assert_eq!(lines[0]["kvk_number"], "87654321");
  assert_eq!(lines[0]["method"], "single_candidate");
  assert_eq!(lines[1]["outcome"], "nil");
  assert_eq!(lines[1]["reason"], "no_candidate");

  assert_eq!(report.documents, 3);
  assert_eq!(report.failed_documents, 2);
  assert_eq!(report.mentions, 2);
  assert_eq!(report.linked, 1);
}
