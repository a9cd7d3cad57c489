use std::time::Duration;

use clap::Args;
use connprobe_core::cli::config::SimConfig;

use crate::{
  SimulatedClient,
  failure::{
    FailureRule,
    FailureRuleParseError,
  },
};

#[derive(Args, Debug, Default, Clone)]
pub struct SimArgs {
  #[clap(
    long = "sim-latency",
    value_name = "MILLISECONDS",
    help = "Delay of every simulated network round trip [default: 0]"
  )]
  pub latency: Option<u64>,
  #[clap(
    long = "sim-fail",
    value_name = "OP[:EVERY]",
    help = "Make the simulated client fail every EVERY-th call of OP, e.g. begin-session or ping:3. Can be repeated"
  )]
  pub fail: Vec<FailureRule>,
}

impl SimArgs {
  pub fn merge_config(&mut self, config: SimConfig) -> Result<(), FailureRuleParseError> {
    // Command line arguments take precedence over config file
    self.latency = self.latency.or(config.latency_ms);
    if self.fail.is_empty() {
      self.fail = config
        .fail
        .unwrap_or_default()
        .iter()
        .map(|rule| rule.parse())
        .collect::<Result<_, _>>()?;
    }
    Ok(())
  }

  pub fn build(&self) -> SimulatedClient {
    SimulatedClient::builder()
      .latency(Duration::from_millis(self.latency.unwrap_or_default()))
      .fail_all(self.fail.iter().copied())
      .build()
  }
}
