//! Capability surface of an external database client library.
//!
//! The probe never talks to a vendor binding directly. Anything that can hand out
//! environment, error, server, service-context and session handles and drive a
//! connection lifecycle with them can be plugged in by implementing [`DatabaseClient`].

use std::{
  num::NonZeroU64,
  str::FromStr,
  time::Duration,
};

use serde::{
  Deserialize,
  Serialize,
};
use snafu::Snafu;
use strum::{
  Display,
  EnumString,
};

use crate::credentials::Credentials;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum HandleKind {
  ManagedEnvironment,
  Environment,
  Error,
  Server,
  ServiceContext,
  Session,
}

/// An opaque reference to library-managed state.
///
/// Handles are deliberately not `Clone`: [`DatabaseClient::free`] takes the handle by value,
/// so a handle can be released at most once.
#[derive(Debug, PartialEq, Eq)]
pub struct Handle {
  kind: HandleKind,
  token: NonZeroU64,
}

impl Handle {
  /// Wrap a library token. Only client implementations should call this.
  pub fn new(kind: HandleKind, token: NonZeroU64) -> Self {
    Self { kind, token }
  }

  pub fn kind(&self) -> HandleKind {
    self.kind
  }

  pub fn token(&self) -> NonZeroU64 {
    self.token
  }
}

/// Which initialization entry point is used to create an environment.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum EnvInit {
  /// Plain environment creation (`OCIEnvCreate` style).
  Plain,
  /// Environment creation with explicit character sets (`OCIEnvNlsCreate` style).
  #[default]
  Nls,
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum EnvMode {
  #[default]
  Default,
  Threaded,
  Object,
}

/// Initialization variant plus mode flags, written as `<init>/<mode>` on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EnvSpec {
  pub init: EnvInit,
  pub mode: EnvMode,
}

impl EnvSpec {
  pub const fn new(init: EnvInit, mode: EnvMode) -> Self {
    Self { init, mode }
  }

  /// The process-level environment of the reproduction: NLS init, default mode.
  pub const fn managed_default() -> Self {
    Self::new(EnvInit::Nls, EnvMode::Default)
  }

  /// The per-thread environment: NLS init, threaded mode.
  pub const fn threaded_default() -> Self {
    Self::new(EnvInit::Nls, EnvMode::Threaded)
  }
}

impl std::fmt::Display for EnvSpec {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}/{}", self.init, self.mode)
  }
}

#[derive(Debug, Snafu)]
#[snafu(display("Invalid environment spec {input:?}, expected <plain|nls>/<default|threaded|object>"))]
pub struct EnvSpecParseError {
  input: String,
}

impl TryFrom<String> for EnvSpec {
  type Error = EnvSpecParseError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    value.parse()
  }
}

impl From<EnvSpec> for String {
  fn from(value: EnvSpec) -> Self {
    value.to_string()
  }
}

impl FromStr for EnvSpec {
  type Err = EnvSpecParseError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let err = || EnvSpecParseError {
      input: s.to_string(),
    };
    let (init, mode) = s.split_once('/').ok_or_else(err)?;
    Ok(Self {
      init: init.parse().map_err(|_| err())?,
      mode: mode.parse().map_err(|_| err())?,
    })
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum CredentialKind {
  Principal,
  Secret,
}

/// A failed library call. `status` is whatever return code the library produced.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(display("status {status}: {message}"))]
pub struct ClientError {
  pub status: i32,
  pub message: String,
}

impl ClientError {
  pub fn new(status: i32, message: impl Into<String>) -> Self {
    Self {
      status,
      message: message.into(),
    }
  }
}

pub type ClientResult<T> = Result<T, ClientError>;

/// A database client library, treated as an opaque collaborator.
///
/// Implementations must be shareable across threads, but the handles they produce are
/// owned by the thread that created them. Calls that take an `error` handle are expected to
/// leave diagnostics retrievable through [`DatabaseClient::describe_last_error`].
pub trait DatabaseClient: Send + Sync {
  fn create_managed_environment(&self, spec: EnvSpec) -> ClientResult<Handle>;

  fn create_environment(&self, spec: EnvSpec) -> ClientResult<Handle>;

  /// Allocate a child handle of `kind` from an environment.
  fn allocate_handle(&self, env: &Handle, kind: HandleKind) -> ClientResult<Handle>;

  fn attach(&self, server: &Handle, error: &Handle, target: &str) -> ClientResult<()>;

  /// Associate `handle` (a server or a session) with a service context.
  fn bind(&self, context: &Handle, handle: &Handle, error: &Handle) -> ClientResult<()>;

  fn set_credential(
    &self,
    session: &Handle,
    kind: CredentialKind,
    value: &str,
    error: &Handle,
  ) -> ClientResult<()>;

  fn set_call_timeout(&self, context: &Handle, timeout: Duration, error: &Handle)
  -> ClientResult<()>;

  fn begin_session(&self, context: &Handle, session: &Handle, error: &Handle) -> ClientResult<()>;

  fn ping(&self, context: &Handle, error: &Handle) -> ClientResult<()>;

  fn end_session(&self, context: &Handle, session: &Handle, error: &Handle) -> ClientResult<()>;

  fn detach(&self, server: &Handle, error: &Handle) -> ClientResult<()>;

  /// Simplified one-call login, returning a ready service context.
  fn logon(&self, env: &Handle, error: &Handle, credentials: &Credentials) -> ClientResult<Handle>;

  /// Counterpart of [`DatabaseClient::logon`]. Consumes the service context.
  fn logoff(&self, context: Handle, error: &Handle) -> ClientResult<()>;

  fn free(&self, handle: Handle) -> ClientResult<()>;

  /// Text of the most recent diagnostic recorded on `error`. Empty when there is none.
  fn describe_last_error(&self, error: &Handle) -> String;
}
