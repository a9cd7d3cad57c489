mod cli;
mod log;

use std::io::{
  BufWriter,
  Write,
  stdout,
};

use clap::Parser;
use cli::Cli;
use connprobe_core::{
  cli::{
    config::{
      Config,
      ConfigLoadError,
    },
    options::Color,
  },
  credentials::Credentials,
  harness::Harness,
  report::{
    Reporter,
    Summary,
  },
};

fn main() -> color_eyre::Result<()> {
  let mut cli = Cli::parse();
  if cli.color == Color::Auto && std::env::var_os("NO_COLOR").is_some() {
    // Respect NO_COLOR if --color=auto
    cli.color = Color::Never;
  }
  if cli.color == Color::Always {
    owo_colors::control::set_should_colorize(true);
    color_eyre::install()?;
  } else if cli.color == Color::Never {
    owo_colors::control::set_should_colorize(false);
  } else {
    color_eyre::install()?;
  }
  log::initialize_logging()?;
  log::trace!("Commandline args: {:?}", cli);
  if !cli.no_profile {
    match Config::load(cli.profile.clone()) {
      Ok(config) => cli.merge_config(config)?,
      Err(ConfigLoadError::NotFound) => (),
      Err(e) => return Err(e.into()),
    }
  }
  // Nothing is allocated from the client before the credentials are known to be complete.
  let credentials = Credentials::from_env()?;
  let config = cli.probe_args.harness_config();
  config.validate()?;

  let output: Box<dyn Write + Send> = match cli.output {
    None => Box::new(stdout()),
    Some(ref x) if x.as_os_str() == "-" => Box::new(stdout()),
    Some(ref path) => {
      let file = std::fs::OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(path)?;
      if cli.color != Color::Always {
        // Disable color by default when output is file
        owo_colors::control::set_should_colorize(false);
      }
      Box::new(BufWriter::new(file))
    }
  };
  let mut reporter = Reporter::new(output, cli.report_args.format());

  let client = cli.sim_args.build();
  let harness = Harness::new(&client, config);
  let mut write_error = None;
  let results = harness.run_with(&credentials, |_, round| {
    if write_error.is_none()
      && let Err(e) = reporter.report_loop(round)
    {
      write_error = Some(e);
    }
  })?;
  if let Some(e) = write_error {
    return Err(e.into());
  }
  let summary = Summary::new(
    harness.config().threads,
    harness.config().iterations,
    &results,
  );
  log::info!(
    probes = summary.probes,
    failed = summary.failed,
    release_failures = summary.release_failures,
    "probe run finished"
  );
  reporter.finish(&summary)?;
  Ok(())
}
