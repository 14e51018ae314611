use std::{fmt, str::FromStr};

use bon::bon;
use compact_str::CompactString;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{error::LinkError, normalize::clean_element};

/// Number of digits of a registry number.
const IDENTIFIER_DIGITS: usize = 8;

/// A KvK registry number, always stored in its eight digit form.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier(CompactString);

impl Identifier {
  /// Parses a registry number, restoring the leading zero that spreadsheet
  /// exports drop from seven digit numbers.
  pub fn parse(raw: &str) -> Result<Identifier, LinkError> {
    let trimmed = raw.trim();
    let digits = trimmed.strip_suffix(".0").unwrap_or(trimmed);

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
      return Err(LinkError::InvalidIdentifier(raw.to_string()));
    }

    match digits.len() {
      IDENTIFIER_DIGITS => Ok(Identifier(CompactString::from(digits))),
      len if len == IDENTIFIER_DIGITS - 1 => Ok(Identifier(compact_str::format_compact!("0{digits}"))),
      _ => Err(LinkError::InvalidIdentifier(raw.to_string())),
    }
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl FromStr for Identifier {
  type Err = LinkError;

  fn from_str(value: &str) -> Result<Self, Self::Err> {
    Identifier::parse(value)
  }
}

impl TryFrom<String> for Identifier {
  type Error = LinkError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    Identifier::parse(&value)
  }
}

impl From<Identifier> for String {
  fn from(value: Identifier) -> Self {
    value.0.into_string()
  }
}

impl fmt::Display for Identifier {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// One registered company.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CanonicalEntity {
  pub identifier: Identifier,
  /// Legal name first, then known alternates, all normalized and unique.
  pub names: Vec<String>,
  pub description: String,
  pub classification_code: Option<String>,
  pub city: Option<String>,
}

#[bon]
impl CanonicalEntity {
  #[builder]
  pub fn builder(#[builder(start_fn)] identifier: Identifier, names: &[&str], description: &str, classification_code: Option<&str>, city: Option<&str>) -> CanonicalEntity {
    let mut entity = CanonicalEntity {
      identifier,
      names: Vec::with_capacity(names.len()),
      description: description.to_string(),
      classification_code: classification_code.map(ToString::to_string),
      city: city.map(ToString::to_string),
    };

    entity.add_names(names.iter().copied());
    entity
  }
}

impl CanonicalEntity {
  /// Adds names after light normalization, skipping empty and known ones.
  pub fn add_names<'n>(&mut self, names: impl IntoIterator<Item = &'n str>) {
    for name in names.into_iter().map(clean_element) {
      if !name.is_empty() && !self.names.contains(&name) {
        self.names.push(name);
      }
    }
  }

  /// Text compared against a mention's context: the industry description,
  /// followed by the city when known.
  pub fn descriptor(&self) -> String {
    match &self.city {
      Some(city) if !city.is_empty() => format!("{} {}", self.description, city),
      _ => self.description.clone(),
    }
  }
}

/// A normalized surface string and the entities it may refer to.
///
/// Priors either sum to one or the candidate list is empty.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Alias {
  pub text: String,
  pub candidates: Vec<(Identifier, f64)>,
}

impl Alias {
  pub fn identifiers(&self) -> impl Iterator<Item = &Identifier> {
    self.candidates.iter().map(|(identifier, _)| identifier)
  }

  pub fn prior(&self, identifier: &Identifier) -> Option<f64> {
    self.candidates.iter().find(|(candidate, _)| candidate == identifier).map(|(_, prior)| *prior)
  }

  pub fn is_empty(&self) -> bool {
    self.candidates.is_empty()
  }
}

/// An entity span returned by the recognizer, with character offsets.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct EntitySpan {
  pub begin: usize,
  pub end: usize,
  pub label: String,
  #[serde(default)]
  pub text: String,
}

/// An input article. Entities may come precomputed with the document.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Document {
  pub id: String,
  pub text: String,
  #[serde(default)]
  pub entities: Option<Vec<EntitySpan>>,
}

/// One occurrence of a company name in a document.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Mention {
  pub raw_text: String,
  pub document_id: String,
  /// Character offsets, `begin < end`.
  pub char_span: (usize, usize),
  pub context_window: String,
}

impl Mention {
  pub fn new(raw_text: impl Into<String>) -> Mention {
    let raw_text = raw_text.into();

    Mention {
      char_span: (0, raw_text.chars().count()),
      context_window: raw_text.clone(),
      document_id: String::new(),
      raw_text,
    }
  }
}

/// A registry entity proposed for a mention, with its name similarity.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Candidate {
  pub identifier: Identifier,
  pub score: f64,
}

pub(crate) fn dedup_candidates(candidates: impl IntoIterator<Item = Candidate>) -> Vec<Candidate> {
  candidates.into_iter().unique_by(|candidate| candidate.identifier.clone()).collect()
}
