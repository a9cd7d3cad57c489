use std::time::Duration;

use clap::Args;

use super::{
  config::{
    ProbeConfig,
    ReportConfig,
  },
  options::ReportFormat,
  positive_count_parser,
};
use crate::{
  client::EnvSpec,
  harness::{
    DEFAULT_ITERATIONS,
    DEFAULT_THREADS,
    HarnessConfig,
  },
  probe::{
    ConnectStrategy,
    ProbeOptions,
  },
};

#[derive(Args, Debug, Default, Clone)]
pub struct ProbeArgs {
  #[clap(
    short = 't',
    long,
    allow_negative_numbers = true,
    value_parser = positive_count_parser,
    help = "Number of worker threads started in every loop [default: 1]"
  )]
  pub threads: Option<usize>,
  #[clap(
    short = 'l',
    long = "loops",
    allow_negative_numbers = true,
    value_parser = positive_count_parser,
    help = "Number of barrier-synchronized loops [default: 32]"
  )]
  pub iterations: Option<usize>,
  #[clap(long, help = "How each worker connects [default: session]")]
  pub strategy: Option<ConnectStrategy>,
  #[clap(
    long,
    value_name = "INIT/MODE",
    help = "Initialization of the process-level environment, e.g. nls/default [default: nls/default]"
  )]
  pub managed_env: Option<EnvSpec>,
  #[clap(
    long,
    value_name = "INIT/MODE",
    help = "Initialization of the per-worker environment, e.g. plain/threaded [default: nls/threaded]"
  )]
  pub env: Option<EnvSpec>,
  #[clap(
    long,
    value_name = "MILLISECONDS",
    help = "Timeout applied to every blocking call on the service context"
  )]
  pub call_timeout: Option<u64>,
}

impl ProbeArgs {
  pub fn merge_config(&mut self, config: ProbeConfig) {
    // Command line arguments take precedence over config file
    self.threads = self.threads.or(config.threads);
    self.iterations = self.iterations.or(config.iterations);
    self.strategy = self.strategy.or(config.strategy);
    self.managed_env = self.managed_env.or(config.managed_env);
    self.env = self.env.or(config.env);
    self.call_timeout = self.call_timeout.or(config.call_timeout_ms);
  }

  pub fn harness_config(&self) -> HarnessConfig {
    let defaults = ProbeOptions::default();
    HarnessConfig {
      threads: self.threads.unwrap_or(DEFAULT_THREADS),
      iterations: self.iterations.unwrap_or(DEFAULT_ITERATIONS),
      options: ProbeOptions {
        strategy: self.strategy.unwrap_or(defaults.strategy),
        managed_env: self.managed_env.unwrap_or(defaults.managed_env),
        env: self.env.unwrap_or(defaults.env),
        call_timeout: self.call_timeout.map(Duration::from_millis),
      },
    }
  }
}

#[derive(Args, Debug, Default, Clone)]
pub struct ReportArgs {
  #[clap(long, help = "Format of the report [default: text]")]
  pub format: Option<ReportFormat>,
}

impl ReportArgs {
  pub fn merge_config(&mut self, config: ReportConfig) {
    self.format = self.format.or(config.format);
  }

  pub fn format(&self) -> ReportFormat {
    self.format.unwrap_or_default()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::client::{
    EnvInit,
    EnvMode,
  };

  #[test]
  fn defaults_without_flags_or_config() {
    let config = ProbeArgs::default().harness_config();
    assert_eq!(config, HarnessConfig::default());
  }

  #[test]
  fn command_line_wins_over_config() {
    let mut args = ProbeArgs {
      threads: Some(4),
      env: Some(EnvSpec::new(EnvInit::Plain, EnvMode::Threaded)),
      ..Default::default()
    };
    args.merge_config(ProbeConfig {
      threads: Some(16),
      iterations: Some(2),
      strategy: Some(ConnectStrategy::Logon),
      env: Some(EnvSpec::new(EnvInit::Nls, EnvMode::Object)),
      call_timeout_ms: Some(250),
      ..Default::default()
    });
    let config = args.harness_config();
    assert_eq!(config.threads, 4);
    assert_eq!(config.iterations, 2);
    assert_eq!(config.options.strategy, ConnectStrategy::Logon);
    assert_eq!(
      config.options.env,
      EnvSpec::new(EnvInit::Plain, EnvMode::Threaded)
    );
    assert_eq!(config.options.managed_env, EnvSpec::managed_default());
    assert_eq!(config.options.call_timeout, Some(Duration::from_millis(250)));
  }

  #[test]
  fn report_format_falls_back_to_config() {
    let mut args = ReportArgs::default();
    assert_eq!(args.format(), ReportFormat::Text);
    args.merge_config(ReportConfig {
      format: Some(ReportFormat::JsonStream),
    });
    assert_eq!(args.format(), ReportFormat::JsonStream);
  }
}
