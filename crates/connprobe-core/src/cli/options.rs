use clap::ValueEnum;
use serde::{
  Deserialize,
  Serialize,
};
use strum::Display;

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Color {
  Auto,
  Always,
  Never,
}

#[derive(
  Debug, Clone, Copy, ValueEnum, PartialEq, Eq, Display, Default, Deserialize, Serialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum ReportFormat {
  /// One human readable line per probe.
  #[default]
  Text,
  // https://jsonlines.org/
  JsonStream,
}
