use std::{
  any::Any,
  time::{
    Duration,
    Instant,
  },
};

use clap::ValueEnum;
use serde::{
  Deserialize,
  Serialize,
  Serializer,
};
use strum::Display;
use tracing::{
  debug,
  info_span,
};

use crate::{
  client::{
    ClientError,
    CredentialKind,
    DatabaseClient,
    EnvSpec,
    HandleKind,
  },
  credentials::Credentials,
  stack::{
    HandleStack,
    Slot,
  },
};

/// Upper bound, in bytes, of [`ProbeResult::error_message`].
pub const MAX_ERROR_MESSAGE_LEN: usize = 512;

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Display, Serialize, Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum ConnectStrategy {
  /// Allocate every handle explicitly and begin a session on a service context.
  #[default]
  Session,
  /// Use the client's one-call logon.
  Logon,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOptions {
  pub strategy: ConnectStrategy,
  /// Spec of the process-level environment. Unused by [`ConnectStrategy::Logon`].
  pub managed_env: EnvSpec,
  /// Spec of the per-worker environment.
  pub env: EnvSpec,
  pub call_timeout: Option<Duration>,
}

impl Default for ProbeOptions {
  fn default() -> Self {
    Self {
      strategy: ConnectStrategy::Session,
      managed_env: EnvSpec::managed_default(),
      env: EnvSpec::threaded_default(),
      call_timeout: None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
  Acquisition,
  Attach,
  Authentication,
  LivenessCheck,
  WorkerPanic,
}

/// Which worker of which loop a probe runs as. Both are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSlot {
  pub thread: usize,
  pub iteration: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
  pub thread: usize,
  pub iteration: usize,
  pub connection_succeeded: bool,
  pub ping_succeeded: bool,
  pub error_message: String,
  pub failure: Option<FailureKind>,
  /// Release steps that failed during cleanup. They are logged, never propagated.
  pub release_failures: usize,
  /// Kernel thread id of the worker, useful when matching a crash dump to a worker.
  pub os_thread_id: Option<i32>,
  #[serde(rename = "elapsed_us", serialize_with = "serialize_micros")]
  pub elapsed: Duration,
}

fn serialize_micros<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
  serializer.serialize_u64(u64::try_from(value.as_micros()).unwrap_or(u64::MAX))
}

impl ProbeResult {
  fn new(slot: ProbeSlot) -> Self {
    Self {
      thread: slot.thread,
      iteration: slot.iteration,
      connection_succeeded: false,
      ping_succeeded: false,
      error_message: String::new(),
      failure: None,
      release_failures: 0,
      os_thread_id: None,
      elapsed: Duration::ZERO,
    }
  }

  /// Result for a worker that panicked before it could report.
  pub fn panicked(slot: ProbeSlot, payload: &(dyn Any + Send)) -> Self {
    let detail = payload
      .downcast_ref::<&str>()
      .map(|s| s.to_string())
      .or_else(|| payload.downcast_ref::<String>().cloned())
      .unwrap_or_else(|| "unknown panic payload".to_string());
    let mut result = Self::new(slot);
    result.record(Failure {
      kind: FailureKind::WorkerPanic,
      message: format!("Worker panicked: {detail}"),
    });
    result
  }

  pub fn succeeded(&self) -> bool {
    self.connection_succeeded && self.ping_succeeded
  }

  fn record(&mut self, failure: Failure) {
    self.failure = Some(failure.kind);
    self.error_message = bounded(failure.message);
  }
}

fn bounded(mut message: String) -> String {
  if message.len() > MAX_ERROR_MESSAGE_LEN {
    let mut end = MAX_ERROR_MESSAGE_LEN;
    while !message.is_char_boundary(end) {
      end -= 1;
    }
    message.truncate(end);
  }
  message
}

struct Failure {
  kind: FailureKind,
  message: String,
}

impl Failure {
  fn acquisition(what: &str, err: &ClientError) -> Self {
    Self {
      kind: FailureKind::Acquisition,
      message: format!("Failed to {what} (status {})", err.status),
    }
  }

  fn diagnosed(kind: FailureKind, stack: &HandleStack<'_>, err: &ClientError) -> Self {
    Self {
      kind,
      message: stack.diagnose(err),
    }
  }

  fn fixed(kind: FailureKind, message: &str, err: &ClientError) -> Self {
    Self {
      kind,
      message: format!("{message} (status {})", err.status),
    }
  }
}

/// Run one full connect, ping and disconnect cycle.
///
/// Never fails: every problem ends up in the returned [`ProbeResult`]. Whatever was acquired is
/// released in reverse order before returning, whether or not the cycle succeeded.
pub fn probe_once(
  client: &dyn DatabaseClient,
  credentials: &Credentials,
  options: &ProbeOptions,
  slot: ProbeSlot,
) -> ProbeResult {
  let span = info_span!("probe", iteration = slot.iteration, thread = slot.thread);
  let _enter = span.enter();
  let start = Instant::now();
  let mut result = ProbeResult::new(slot);
  result.os_thread_id = Some(nix::unistd::gettid().as_raw());

  let mut stack = HandleStack::new(client);
  let outcome = match options.strategy {
    ConnectStrategy::Session => session_cycle(&mut stack, credentials, options, &mut result),
    ConnectStrategy::Logon => logon_cycle(&mut stack, credentials, options, &mut result),
  };
  if let Err(failure) = outcome {
    debug!(kind = %failure.kind, "probe failed: {}", failure.message);
    result.record(failure);
  }
  result.release_failures = stack.release();
  result.elapsed = start.elapsed();
  result
}

fn allocate(stack: &mut HandleStack<'_>, env: Slot, kind: HandleKind) -> Result<Slot, Failure> {
  let handle = stack
    .client()
    .allocate_handle(stack.get(env), kind)
    .map_err(|e| Failure::acquisition(&format!("allocate {kind} handle"), &e))?;
  Ok(stack.push(handle))
}

fn session_cycle(
  stack: &mut HandleStack<'_>,
  credentials: &Credentials,
  options: &ProbeOptions,
  result: &mut ProbeResult,
) -> Result<(), Failure> {
  let client = stack.client();
  let managed = client
    .create_managed_environment(options.managed_env)
    .map_err(|e| Failure::acquisition("initialize managed environment", &e))?;
  stack.push(managed);
  let env = client
    .create_environment(options.env)
    .map_err(|e| Failure::acquisition("initialize environment", &e))?;
  let env = stack.push(env);

  let error = allocate(stack, env, HandleKind::Error)?;
  let server = allocate(stack, env, HandleKind::Server)?;
  let context = allocate(stack, env, HandleKind::ServiceContext)?;
  if let Some(timeout) = options.call_timeout {
    client
      .set_call_timeout(stack.get(context), timeout, stack.get(error))
      .map_err(|e| Failure::acquisition("set call timeout on service context", &e))?;
  }
  let session = allocate(stack, env, HandleKind::Session)?;

  client
    .attach(stack.get(server), stack.get(error), credentials.target())
    .map_err(|e| Failure::diagnosed(FailureKind::Attach, stack, &e))?;
  stack.mark_attached(server);
  client
    .bind(stack.get(context), stack.get(server), stack.get(error))
    .map_err(|e| {
      Failure::fixed(
        FailureKind::Attach,
        "Failed to set server handle in service context",
        &e,
      )
    })?;

  for (kind, value) in [
    (CredentialKind::Principal, credentials.principal()),
    (CredentialKind::Secret, credentials.secret()),
  ] {
    client
      .set_credential(stack.get(session), kind, value, stack.get(error))
      .map_err(|e| {
        Failure::fixed(
          FailureKind::Authentication,
          &format!("Failed to set {kind} in session handle"),
          &e,
        )
      })?;
  }
  client
    .begin_session(stack.get(context), stack.get(session), stack.get(error))
    .map_err(|e| Failure::diagnosed(FailureKind::Authentication, stack, &e))?;
  stack.mark_session(context, session);
  client
    .bind(stack.get(context), stack.get(session), stack.get(error))
    .map_err(|e| {
      Failure::fixed(
        FailureKind::Authentication,
        "Failed to set session handle in service context",
        &e,
      )
    })?;
  result.connection_succeeded = true;

  client
    .ping(stack.get(context), stack.get(error))
    .map_err(|e| Failure::diagnosed(FailureKind::LivenessCheck, stack, &e))?;
  result.ping_succeeded = true;
  Ok(())
}

fn logon_cycle(
  stack: &mut HandleStack<'_>,
  credentials: &Credentials,
  options: &ProbeOptions,
  result: &mut ProbeResult,
) -> Result<(), Failure> {
  let client = stack.client();
  let env = client
    .create_environment(options.env)
    .map_err(|e| Failure::acquisition("initialize environment", &e))?;
  let env = stack.push(env);
  let error = allocate(stack, env, HandleKind::Error)?;

  let context = client
    .logon(stack.get(env), stack.get(error), credentials)
    .map_err(|e| Failure::diagnosed(FailureKind::Authentication, stack, &e))?;
  let context = stack.push_logon(context);
  if let Some(timeout) = options.call_timeout {
    client
      .set_call_timeout(stack.get(context), timeout, stack.get(error))
      .map_err(|e| Failure::acquisition("set call timeout on service context", &e))?;
  }
  result.connection_succeeded = true;

  client
    .ping(stack.get(context), stack.get(error))
    .map_err(|e| Failure::diagnosed(FailureKind::LivenessCheck, stack, &e))?;
  result.ping_succeeded = true;
  Ok(())
}
