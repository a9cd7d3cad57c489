//! Barrier-synchronized driver of concurrent probes.
//!
//! Every loop spawns a fresh set of worker threads and joins all of them before the next loop
//! starts. Workers share nothing but the read-only credentials and options, and each one owns
//! its complete set of client handles.

use std::{
  collections::TryReserveError,
  io,
  thread::{
    self,
    ScopedJoinHandle,
  },
};

use snafu::{
  IntoError,
  OptionExt,
  ResultExt,
  Snafu,
  ensure,
};
use tracing::{
  debug,
  info,
  warn,
};

use crate::{
  client::DatabaseClient,
  credentials::Credentials,
  probe::{
    ProbeOptions,
    ProbeResult,
    ProbeSlot,
    probe_once,
  },
};

pub const DEFAULT_THREADS: usize = 1;
/// The reproduction runs loops 1 through 32.
pub const DEFAULT_ITERATIONS: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub struct HarnessConfig {
  pub threads: usize,
  pub iterations: usize,
  pub options: ProbeOptions,
}

impl Default for HarnessConfig {
  fn default() -> Self {
    Self {
      threads: DEFAULT_THREADS,
      iterations: DEFAULT_ITERATIONS,
      options: ProbeOptions::default(),
    }
  }
}

impl HarnessConfig {
  pub fn validate(&self) -> Result<(), HarnessError> {
    ensure!(
      self.threads >= 1,
      ConfigurationSnafu {
        reason: format!("thread count must be at least 1, got {}", self.threads),
      }
    );
    ensure!(
      self.iterations >= 1,
      ConfigurationSnafu {
        reason: format!("iteration count must be at least 1, got {}", self.iterations),
      }
    );
    Ok(())
  }
}

#[derive(Debug, Snafu)]
pub enum HarnessError {
  #[snafu(display("Invalid configuration: {reason}"))]
  Configuration { reason: String },
  #[snafu(display("{threads} threads times {iterations} loops is more probes than can be tracked"))]
  TooManyProbes { threads: usize, iterations: usize },
  #[snafu(display("Failed to allocate bookkeeping for {count} {what}"))]
  Resources {
    count: usize,
    what: &'static str,
    source: TryReserveError,
  },
  /// Workers of the loop that were already running are joined first and kept in `finished`.
  #[snafu(display("Failed to spawn worker thread {thread} of loop {iteration}"))]
  Spawn {
    thread: usize,
    iteration: usize,
    finished: Vec<ProbeResult>,
    source: io::Error,
  },
}

type Worker<'scope> = (ProbeSlot, ScopedJoinHandle<'scope, ProbeResult>);

pub struct Harness<'c> {
  client: &'c dyn DatabaseClient,
  config: HarnessConfig,
}

impl<'c> Harness<'c> {
  pub fn new(client: &'c dyn DatabaseClient, config: HarnessConfig) -> Self {
    Self { client, config }
  }

  pub fn config(&self) -> &HarnessConfig {
    &self.config
  }

  /// Run every loop and return all results ordered by thread, then by loop.
  pub fn run(&self, credentials: &Credentials) -> Result<Vec<ProbeResult>, HarnessError> {
    self.run_with(credentials, |_, _| {})
  }

  /// Like [`Harness::run`], calling `on_iteration` with each loop's results (in thread order)
  /// as soon as that loop's workers have all been joined.
  pub fn run_with(
    &self,
    credentials: &Credentials,
    mut on_iteration: impl FnMut(usize, &[ProbeResult]),
  ) -> Result<Vec<ProbeResult>, HarnessError> {
    self.config.validate()?;
    let HarnessConfig {
      threads,
      iterations,
      ..
    } = self.config;
    info!(threads, iterations, strategy = %self.config.options.strategy, "starting probe run");
    let total = threads
      .checked_mul(iterations)
      .context(TooManyProbesSnafu {
        threads,
        iterations,
      })?;
    let mut results = Vec::new();
    results.try_reserve_exact(total).context(ResourcesSnafu {
      count: total,
      what: "probe results",
    })?;
    for iteration in 1..=iterations {
      let round = self.run_loop(credentials, iteration)?;
      debug!(
        iteration,
        failed = round.iter().filter(|r| !r.succeeded()).count(),
        "loop finished"
      );
      on_iteration(iteration, &round);
      results.extend(round);
    }
    results.sort_by_key(|r| (r.thread, r.iteration));
    Ok(results)
  }

  fn run_loop(
    &self,
    credentials: &Credentials,
    iteration: usize,
  ) -> Result<Vec<ProbeResult>, HarnessError> {
    let client = self.client;
    let options = &self.config.options;
    let threads = self.config.threads;
    // The scope joins every spawned worker before returning, including on a spawn failure.
    thread::scope(|scope| {
      let mut workers = Vec::new();
      workers.try_reserve_exact(threads).context(ResourcesSnafu {
        count: threads,
        what: "worker threads",
      })?;
      for index in 1..=threads {
        let slot = ProbeSlot {
          thread: index,
          iteration,
        };
        let spawned = thread::Builder::new()
          .name(format!("probe-{iteration}-{index}"))
          .spawn_scoped(scope, move || {
            probe_once(client, credentials, options, slot)
          });
        match spawned {
          Ok(worker) => workers.push((slot, worker)),
          Err(source) => {
            let finished = abandon_loop(iteration, workers);
            return Err(
              SpawnSnafu {
                thread: index,
                iteration,
                finished,
              }
              .into_error(source),
            );
          }
        }
      }
      Ok(join_workers(workers))
    })
  }
}

fn join_workers(workers: Vec<Worker<'_>>) -> Vec<ProbeResult> {
  workers
    .into_iter()
    .map(|(slot, worker)| {
      worker
        .join()
        .unwrap_or_else(|payload| ProbeResult::panicked(slot, payload.as_ref()))
    })
    .collect()
}

/// Join the workers of a loop that cannot be completed and log what they did.
fn abandon_loop(iteration: usize, workers: Vec<Worker<'_>>) -> Vec<ProbeResult> {
  let finished = join_workers(workers);
  for result in &finished {
    warn!(
      iteration,
      thread = result.thread,
      connected = result.connection_succeeded,
      pinged = result.ping_succeeded,
      "worker of aborted loop {iteration} finished: {}",
      if result.succeeded() {
        "success"
      } else {
        result.error_message.as_str()
      }
    );
  }
  finished
}
