use std::{
  num::NonZeroU32,
  str::FromStr,
};

use connprobe_core::client::HandleKind;
use serde::{
  Deserialize,
  Serialize,
};
use snafu::Snafu;
use strum::{
  Display,
  EnumString,
};

/// Every call the simulated client can be asked to fail.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
  CreateManagedEnvironment,
  CreateEnvironment,
  AllocateError,
  AllocateServer,
  AllocateServiceContext,
  AllocateSession,
  Attach,
  Bind,
  SetCredential,
  SetCallTimeout,
  BeginSession,
  Ping,
  EndSession,
  Detach,
  Logon,
  Logoff,
  Free,
}

impl Operation {
  /// The operation allocating a child handle of `kind`, if such a handle can be allocated.
  pub fn allocation(kind: HandleKind) -> Option<Self> {
    match kind {
      HandleKind::Error => Some(Self::AllocateError),
      HandleKind::Server => Some(Self::AllocateServer),
      HandleKind::ServiceContext => Some(Self::AllocateServiceContext),
      HandleKind::Session => Some(Self::AllocateSession),
      HandleKind::ManagedEnvironment | HandleKind::Environment => None,
    }
  }
}

/// Fail every `every`-th call of `op`. `every = 1` fails every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureRule {
  pub op: Operation,
  pub every: NonZeroU32,
}

impl FailureRule {
  pub fn always(op: Operation) -> Self {
    Self {
      op,
      every: NonZeroU32::MIN,
    }
  }

  pub fn every(op: Operation, every: NonZeroU32) -> Self {
    Self { op, every }
  }

  /// Whether the `nth` call (1-based) of the operation fails.
  pub fn triggers(&self, nth: u32) -> bool {
    nth % self.every.get() == 0
  }
}

#[derive(Debug, Snafu)]
pub enum FailureRuleParseError {
  #[snafu(display("Unknown operation {op:?}"))]
  UnknownOperation { op: String },
  #[snafu(display("Invalid period {every:?}, expected a positive integer"))]
  InvalidPeriod { every: String },
}

impl FromStr for FailureRule {
  type Err = FailureRuleParseError;

  /// Parse `<operation>[:<every>]`, e.g. `begin-session` or `ping:3`.
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (op, every) = match s.split_once(':') {
      Some((op, every)) => (op, Some(every)),
      None => (s, None),
    };
    let op = op
      .trim()
      .parse()
      .map_err(|_| FailureRuleParseError::UnknownOperation { op: op.to_string() })?;
    let every = match every {
      None => NonZeroU32::MIN,
      Some(every) => every
        .trim()
        .parse()
        .map_err(|_| FailureRuleParseError::InvalidPeriod {
          every: every.to_string(),
        })?,
    };
    Ok(Self { op, every })
  }
}
