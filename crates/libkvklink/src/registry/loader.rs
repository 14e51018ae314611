use std::{fs::File, io::Read, path::Path};

use anyhow::Context;
use csv::StringRecord;

use crate::{
  error::LinkError,
  model::{CanonicalEntity, Identifier},
};

/// Entities read from a registry export, with the number of rows that could
/// not be used.
#[derive(Debug, Default)]
pub struct RegistryLoad {
  pub entities: Vec<CanonicalEntity>,
  pub skipped: usize,
}

struct Columns {
  identifier: usize,
  name: usize,
  alternate_names: Option<usize>,
  description: usize,
  classification_code: Option<usize>,
  city: Option<usize>,
}

impl Columns {
  fn locate(headers: &StringRecord) -> Result<Columns, LinkError> {
    let find = |names: &[&str]| headers.iter().position(|header| names.iter().any(|name| header.trim().eq_ignore_ascii_case(name)));
    let require = |names: &[&str]| find(names).ok_or_else(|| LinkError::OtherError(anyhow::anyhow!("registry file has no '{}' column", names[0])));

    Ok(Columns {
      identifier: require(&["identifier", "kvk_number"])?,
      name: require(&["name"])?,
      alternate_names: find(&["alternate_names", "alternative_names"]),
      description: require(&["description", "sbi_code_description"])?,
      classification_code: find(&["classification_code", "sbi_code"]),
      city: find(&["city"]),
    })
  }
}

pub fn load_registry(path: &Path) -> Result<RegistryLoad, LinkError> {
  let file = File::open(path).with_context(|| format!("could not open registry file {}", path.display()))?;

  read_registry(file)
}

/// Reads a tab-separated registry export with a header row.
pub fn read_registry<R: Read>(reader: R) -> Result<RegistryLoad, LinkError> {
  let mut reader = csv::ReaderBuilder::new().delimiter(b'\t').quoting(false).flexible(true).from_reader(reader);
  let columns = Columns::locate(reader.headers()?)?;
  let mut load = RegistryLoad::default();

  for (line, record) in reader.records().enumerate() {
    let record = record?;

    match parse_row(&columns, &record) {
      Ok(Some(entity)) => load.entities.push(entity),

      Ok(None) => load.skipped += 1,

      Err(err) => {
        tracing::warn!(line = line + 2, error = %err, "skipping registry row");

        load.skipped += 1;
      }
    }
  }

  tracing::info!(entities = load.entities.len(), skipped = load.skipped, "read registry");

  Ok(load)
}

fn parse_row(columns: &Columns, record: &StringRecord) -> Result<Option<CanonicalEntity>, LinkError> {
  let field = |index: Option<usize>| index.and_then(|index| record.get(index)).map(str::trim).filter(|value| !value.is_empty());

  let identifier = Identifier::parse(field(Some(columns.identifier)).unwrap_or_default())?;

  let (Some(name), Some(description)) = (field(Some(columns.name)), field(Some(columns.description))) else {
    return Ok(None);
  };

  let names = std::iter::once(name)
    .chain(field(columns.alternate_names).into_iter().flat_map(|names| names.split(',')))
    .collect::<Vec<_>>();

  let classification_code = field(columns.classification_code).map(|code| code.strip_suffix(".0").unwrap_or(code));

  Ok(Some(
    CanonicalEntity::builder(identifier)
      .names(&names)
      .description(description)
      .maybe_classification_code(classification_code)
      .maybe_city(field(columns.city))
      .build(),
  ))
}
