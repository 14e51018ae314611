//! Re-estimation of alias priors from annotated observations.

use std::{collections::BTreeMap, fs::File, io::Read, path::Path};

use anyhow::Context;
use csv::StringRecord;

use crate::{
  error::LinkError,
  model::{Alias, Identifier},
  normalize::clean_element,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
  Chosen(Identifier),
  /// The annotator decided the mention is not a registered company.
  Rejected,
}

/// One annotated mention: the alias text and what it turned out to refer to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Observation {
  pub alias: String,
  pub outcome: Outcome,
}

impl Observation {
  pub fn chosen(alias: impl Into<String>, identifier: Identifier) -> Observation {
    Observation {
      alias: alias.into(),
      outcome: Outcome::Chosen(identifier),
    }
  }

  pub fn rejected(alias: impl Into<String>) -> Observation {
    Observation {
      alias: alias.into(),
      outcome: Outcome::Rejected,
    }
  }
}

/// Computes, per alias, the share of observations choosing each entity.
///
/// Rejections are left out of both counts and totals. Aliases with no chosen
/// observation are absent from the result. Output is ordered by alias, then
/// by identifier.
pub fn recompute_priors<'o>(observations: impl IntoIterator<Item = &'o Observation>) -> BTreeMap<String, Alias> {
  let mut counts: BTreeMap<String, BTreeMap<Identifier, usize>> = BTreeMap::new();

  for observation in observations {
    if let Outcome::Chosen(identifier) = &observation.outcome {
      *counts.entry(clean_element(&observation.alias)).or_default().entry(identifier.clone()).or_default() += 1;
    }
  }

  counts
    .into_iter()
    .map(|(text, chosen)| {
      let total = chosen.values().sum::<usize>() as f64;
      let candidates = chosen.into_iter().map(|(identifier, count)| (identifier, count as f64 / total)).collect();

      (text.clone(), Alias { text, candidates })
    })
    .collect()
}

#[derive(Debug, Default)]
pub struct ObservationLog {
  pub observations: Vec<Observation>,
  pub skipped: usize,
}

fn is_rejection(value: &str) -> bool {
  value == "NIL" || value.starts_with("NIL_")
}

pub fn load_observations(path: &Path) -> Result<ObservationLog, LinkError> {
  let file = File::open(path).with_context(|| format!("could not open observation log {}", path.display()))?;

  read_observations(file)
}

/// Reads a tab-separated annotation export with `alias` and `entity` columns
/// (`mention` and `kvk_number` or `answer` are accepted as well).
pub fn read_observations<R: Read>(reader: R) -> Result<ObservationLog, LinkError> {
  let mut reader = csv::ReaderBuilder::new().delimiter(b'\t').quoting(false).flexible(true).from_reader(reader);

  let headers = reader.headers()?.clone();
  let find = |names: &[&str]| headers.iter().position(|header| names.contains(&header.trim()));

  let (Some(alias_column), Some(entity_column)) = (find(&["alias", "mention"]), find(&["entity", "kvk_number", "answer"])) else {
    return Err(LinkError::OtherError(anyhow::anyhow!("observation log needs an alias and an entity column")));
  };

  let mut log = ObservationLog::default();
  let mut record = StringRecord::new();

  while reader.read_record(&mut record)? {
    let alias = record.get(alias_column).map(str::trim).unwrap_or_default();
    let entity = record.get(entity_column).map(str::trim).unwrap_or_default();

    if alias.is_empty() || entity.is_empty() {
      log.skipped += 1;
      continue;
    }

    if is_rejection(entity) {
      log.observations.push(Observation::rejected(alias));
      continue;
    }

    match Identifier::parse(entity) {
      Ok(identifier) => log.observations.push(Observation::chosen(alias, identifier)),

      Err(err) => {
        tracing::warn!(alias, error = %err, "skipping observation");

        log.skipped += 1;
      }
    }
  }

  tracing::info!(observations = log.observations.len(), skipped = log.skipped, "read observation log");

  Ok(log)
}

#[cfg(test)]
mod tests {
  use float_cmp::approx_eq;

  use super::{Observation, Outcome};
  use crate::model::Identifier;

  fn id(raw: &str) -> Identifier {
    raw.parse().unwrap()
  }

  #[test]
  fn recompute_priors_from_counts() {
    let mut observations = Vec::new();

    observations.extend(std::iter::repeat_n(Observation::chosen("acme", id("00000001")), 7));
    observations.extend(std::iter::repeat_n(Observation::chosen("Acme", id("00000002")), 3));
    observations.push(Observation::rejected("acme"));

    let priors = super::recompute_priors(&observations);
    let acme = &priors["acme"];

    assert_eq!(priors.len(), 1);
    assert_eq!(acme.candidates.len(), 2);
    assert!(approx_eq!(f64, acme.prior(&id("00000001")).unwrap(), 0.7, ulps = 2));
    assert!(approx_eq!(f64, acme.prior(&id("00000002")).unwrap(), 0.3, ulps = 2));
  }

  #[test]
  fn rejected_only_aliases_are_absent() {
    let observations = [Observation::rejected("de gemeente"), Observation::chosen("zeta", id("00000003"))];
    let priors = super::recompute_priors(&observations);

    assert!(!priors.contains_key("de gemeente"));
    assert_eq!(priors["zeta"].candidates, [(id("00000003"), 1.0)]);
  }

  #[test]
  fn recompute_priors_is_order_independent() {
    let forward = [
      Observation::chosen("b", id("00000002")),
      Observation::chosen("a", id("00000002")),
      Observation::chosen("a", id("00000001")),
    ];

    let mut backward = forward.clone();
    backward.reverse();

    let forward = super::recompute_priors(&forward);

    assert_eq!(forward, super::recompute_priors(&backward));
    assert_eq!(forward.keys().collect::<Vec<_>>(), ["a", "b"]);
    assert_eq!(forward["a"].identifiers().collect::<Vec<_>>(), [&id("00000001"), &id("00000002")]);
  }

  #[test]
  fn read_observations() {
    let export = "\
context\tmention\tanswer
Acme levert software\tAcme\t1234567
Gemeente Utrecht zegt\tGemeente Utrecht\tNIL_notanorg
Zeta rijdt\tZeta\tNIL
Broken\tBroken\tnot-a-number
Empty\t\t12345678
";

    let log = super::read_observations(export.as_bytes()).unwrap();

    assert_eq!(log.skipped, 2);
    assert_eq!(log.observations.len(), 3);
    assert_eq!(log.observations[0].outcome, Outcome::Chosen(id("01234567")));
    assert_eq!(log.observations[1].outcome, Outcome::Rejected);
    assert_eq!(log.observations[2], Observation::rejected("Zeta"));
  }
}
