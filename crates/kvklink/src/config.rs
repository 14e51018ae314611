use std::{
  env::{self, VarError},
  fmt::Display,
  fs,
  net::SocketAddr,
  path::Path,
  str::FromStr,
};

use libkvklink::prelude::LinkParams;
use validator::Validate;

use crate::error::CliError;

#[derive(Clone, Debug)]
pub struct Config {
  pub env: Env,
  /// Serves Prometheus metrics while a command runs, when set.
  pub metrics_addr: Option<SocketAddr>,
}

impl Config {
  pub fn from_env() -> Result<Config, CliError> {
    Ok(Config {
      env: Env::from(env::var("ENV").unwrap_or("dev".into())),
      metrics_addr: parse_env::<String>("METRICS_ADDR", String::new())
        .map(|addr| (!addr.is_empty()).then_some(addr))?
        .map(|addr| addr.parse().map_err(|err| CliError::ConfigError(format!("could not read METRICS_ADDR: {err}"))))
        .transpose()?,
    })
  }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Env {
  Dev,
  Production,
}

impl From<String> for Env {
  fn from(value: String) -> Self {
    match value.as_ref() {
      "production" => Env::Production,
      _ => Env::Dev,
    }
  }
}

pub fn parse_env<T>(name: &str, default: T) -> Result<T, CliError>
where
  T: FromStr,
  T::Err: Display,
{
  match env::var(name) {
    Ok(value) if value.is_empty() => Ok(default),
    Ok(value) => value.parse::<T>().map_err(|err| CliError::ConfigError(format!("could not read {name}: {err}"))),
    Err(VarError::NotPresent) => Ok(default),
    Err(err) => Err(CliError::ConfigError(format!("could not read {name}: {err}"))),
  }
}

/// Reads linking parameters from a JSON file; missing fields take their
/// defaults.
pub fn load_params(path: Option<&Path>) -> Result<LinkParams, CliError> {
  let params = match path {
    Some(path) => serde_json::from_str::<LinkParams>(&fs::read_to_string(path)?)?,
    None => LinkParams::default(),
  };

  params.validate().map_err(|err| CliError::ConfigError(format!("invalid parameters: {err}")))?;

  Ok(params)
}
