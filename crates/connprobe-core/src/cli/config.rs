use std::{
  io,
  path::PathBuf,
};

use directories::ProjectDirs;
use serde::{
  Deserialize,
  Deserializer,
  Serialize,
};
use snafu::{
  ResultExt,
  Snafu,
};
use tracing::warn;

use super::options::ReportFormat;
use crate::{
  client::EnvSpec,
  probe::ConnectStrategy,
};

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct Config {
  pub probe: Option<ProbeConfig>,
  pub report: Option<ReportConfig>,
  pub sim: Option<SimConfig>,
}

#[derive(Debug, Snafu)]
pub enum ConfigLoadError {
  #[snafu(display("Config file not found."))]
  NotFound,
  #[snafu(display("Failed to load config file."))]
  IoError { source: io::Error },
  #[snafu(display("Failed to parse config file."))]
  TomlError { source: toml::de::Error },
}

impl Config {
  pub fn load(path: Option<PathBuf>) -> Result<Self, ConfigLoadError> {
    let config_text = match path {
      Some(path) => std::fs::read_to_string(path).context(IoSnafu)?, // if manually specified config doesn't exist, return a hard error
      None => {
        let Some(project_dirs) = project_directory() else {
          warn!("No valid home directory found! Not loading config.toml.");
          return Err(ConfigLoadError::NotFound);
        };
        // ~/.config/connprobe/config.toml
        let config_path = project_dirs.config_dir().join("config.toml");

        std::fs::read_to_string(config_path).map_err(|e| match e.kind() {
          io::ErrorKind::NotFound => ConfigLoadError::NotFound,
          _ => ConfigLoadError::IoError { source: e },
        })?
      }
    };

    let config: Self = toml::from_str(&config_text).context(TomlSnafu)?;
    Ok(config)
  }
}

#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
pub struct ProbeConfig {
  #[serde(default, deserialize_with = "deserialize_count")]
  pub threads: Option<usize>,
  #[serde(default, deserialize_with = "deserialize_count")]
  pub iterations: Option<usize>,
  pub strategy: Option<ConnectStrategy>,
  pub managed_env: Option<EnvSpec>,
  pub env: Option<EnvSpec>,
  pub call_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReportConfig {
  pub format: Option<ReportFormat>,
}

/// Settings of the simulated client. Failure rules are kept as text and parsed by the backend.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SimConfig {
  pub latency_ms: Option<u64>,
  pub fail: Option<Vec<String>>,
}

fn deserialize_count<'de, D>(deserializer: D) -> Result<Option<usize>, D::Error>
where
  D: Deserializer<'de>,
{
  let value = Option::<i64>::deserialize(deserializer)?;
  match value {
    Some(v) if v <= 0 => Err(serde::de::Error::invalid_value(
      serde::de::Unexpected::Signed(v),
      &"a positive integer",
    )),
    Some(v) => usize::try_from(v).map(Some).map_err(|_| {
      serde::de::Error::invalid_value(serde::de::Unexpected::Signed(v), &"a positive integer")
    }),
    None => Ok(None),
  }
}

pub fn project_directory() -> Option<ProjectDirs> {
  ProjectDirs::from("dev", "connprobe", "connprobe")
}
