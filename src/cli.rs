use std::path::PathBuf;

use clap::Parser;
use connprobe_backend_sim::{
  FailureRuleParseError,
  args::SimArgs,
};
use connprobe_core::cli::{
  args::{
    ProbeArgs,
    ReportArgs,
  },
  config::Config,
  options::Color,
};
use tracing::debug;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
pub struct Cli {
  #[arg(long, default_value_t = Color::Auto, help = "Control whether colored output is enabled")]
  pub color: Color,
  #[arg(
    short = 'P',
    long,
    help = "Load profile from this path",
    conflicts_with = "no_profile"
  )]
  pub profile: Option<PathBuf>,
  #[arg(long, help = "Do not load profiles")]
  pub no_profile: bool,
  #[clap(
    short,
    long,
    help = "Output, stdout by default. A single hyphen '-' also represents stdout."
  )]
  pub output: Option<PathBuf>,
  #[clap(flatten)]
  pub probe_args: ProbeArgs,
  #[clap(flatten)]
  pub report_args: ReportArgs,
  #[clap(flatten)]
  pub sim_args: SimArgs,
}

impl Cli {
  pub fn merge_config(&mut self, config: Config) -> Result<(), FailureRuleParseError> {
    debug!("Merging config: {config:?}");
    if let Some(c) = config.probe {
      self.probe_args.merge_config(c);
    }
    if let Some(c) = config.report {
      self.report_args.merge_config(c);
    }
    if let Some(c) = config.sim {
      self.sim_args.merge_config(c)?;
    }
    Ok(())
  }
}
