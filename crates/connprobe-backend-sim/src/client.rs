use std::{
  num::NonZeroU64,
  sync::{
    Mutex,
    MutexGuard,
  },
  thread,
  time::Duration,
};

use connprobe_core::{
  client::{
    ClientError,
    ClientResult,
    CredentialKind,
    DatabaseClient,
    EnvSpec,
    Handle,
    HandleKind,
  },
  credentials::Credentials,
};
use hashbrown::{
  HashMap,
  HashSet,
};
use tracing::trace;

use crate::failure::{
  FailureRule,
  Operation,
};

/// Status returned for a failed call.
pub const STATUS_ERROR: i32 = -1;
/// Status returned when a call is handed a handle that is not alive or has the wrong kind.
pub const STATUS_INVALID_HANDLE: i32 = -2;

/// One call made to the simulated client, in the order the calls happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
  /// Name of the calling thread.
  pub thread: Option<String>,
  pub op: Operation,
  /// Kind of the handle allocated or freed, for the calls that do either.
  pub kind: Option<HandleKind>,
  pub ok: bool,
}

#[derive(Default)]
struct State {
  next_token: u64,
  calls: HashMap<Operation, u32>,
  live: HashMap<u64, HandleKind>,
  attached: HashSet<u64>,
  /// Begun sessions and the service context they were begun on.
  sessions: HashMap<u64, u64>,
  logged_on: HashSet<u64>,
  timeouts: HashMap<u64, Duration>,
  last_error: HashMap<u64, String>,
  journal: Vec<CallRecord>,
  acquisitions: usize,
  releases: usize,
  invalid_releases: usize,
}

impl State {
  fn mint(&mut self, kind: HandleKind) -> Handle {
    self.next_token += 1;
    self.live.insert(self.next_token, kind);
    self.acquisitions += 1;
    let token = NonZeroU64::new(self.next_token).unwrap_or(NonZeroU64::MIN);
    Handle::new(kind, token)
  }

  fn is_live(&self, handle: &Handle, kind: HandleKind) -> bool {
    handle.kind() == kind && self.live.get(&handle.token().get()) == Some(&kind)
  }

  fn fail_on(&mut self, error: Option<&Handle>, err: ClientError) -> ClientError {
    if let Some(error) = error {
      self
        .last_error
        .insert(error.token().get(), err.message.clone());
    }
    err
  }
}

pub struct SimulatedClient {
  latency: Duration,
  rules: Vec<FailureRule>,
  state: Mutex<State>,
}

#[derive(Debug, Default, Clone)]
pub struct SimulatedClientBuilder {
  latency: Duration,
  rules: Vec<FailureRule>,
}

impl SimulatedClientBuilder {
  /// Delay added to every network round trip: attach, session begin, ping and logon.
  pub fn latency(mut self, latency: Duration) -> Self {
    self.latency = latency;
    self
  }

  pub fn fail(mut self, rule: FailureRule) -> Self {
    self.rules.push(rule);
    self
  }

  pub fn fail_all(mut self, rules: impl IntoIterator<Item = FailureRule>) -> Self {
    self.rules.extend(rules);
    self
  }

  pub fn build(self) -> SimulatedClient {
    SimulatedClient {
      latency: self.latency,
      rules: self.rules,
      state: Mutex::default(),
    }
  }
}

impl Default for SimulatedClient {
  fn default() -> Self {
    Self::builder().build()
  }
}

impl SimulatedClient {
  pub fn builder() -> SimulatedClientBuilder {
    SimulatedClientBuilder::default()
  }

  /// Successful acquisitions: handles created, servers attached, sessions begun, logons.
  pub fn acquisitions(&self) -> usize {
    self.state().acquisitions
  }

  /// Release calls made on live resources, successful or not.
  pub fn releases(&self) -> usize {
    self.state().releases
  }

  /// Releases of handles that were never allocated or already freed.
  pub fn invalid_releases(&self) -> usize {
    self.state().invalid_releases
  }

  /// Handles still alive.
  pub fn live_handles(&self) -> usize {
    self.state().live.len()
  }

  pub fn journal(&self) -> Vec<CallRecord> {
    self.state().journal.clone()
  }

  fn state(&self) -> MutexGuard<'_, State> {
    // Poisoning only means a probe thread panicked while holding the lock.
    self
      .state
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Count the call, journal it and decide whether it fails.
  fn enter(
    &self,
    state: &mut State,
    op: Operation,
    kind: Option<HandleKind>,
    error: Option<&Handle>,
  ) -> ClientResult<()> {
    let nth = {
      let n = state.calls.entry(op).or_default();
      *n += 1;
      *n
    };
    let injected = self.rules.iter().any(|r| r.op == op && r.triggers(nth));
    state.journal.push(CallRecord {
      thread: thread::current().name().map(str::to_string),
      op,
      kind,
      ok: !injected,
    });
    trace!(%op, nth, injected, "simulated call");
    if injected {
      let err = ClientError::new(STATUS_ERROR, format!("SIM-00001: injected failure in {op}"));
      return Err(state.fail_on(error, err));
    }
    Ok(())
  }

  fn invalid(state: &mut State, what: &str, error: Option<&Handle>) -> ClientError {
    let err = ClientError::new(STATUS_INVALID_HANDLE, format!("SIM-00002: invalid {what} handle"));
    state.fail_on(error, err)
  }

  fn round_trip(&self, timeout: Option<Duration>) -> Result<(), Duration> {
    match timeout {
      Some(timeout) if self.latency > timeout => {
        thread::sleep(timeout);
        Err(timeout)
      }
      _ => {
        if !self.latency.is_zero() {
          thread::sleep(self.latency);
        }
        Ok(())
      }
    }
  }

  fn timed_out(state: &mut State, timeout: Duration, error: &Handle) -> ClientError {
    let err = ClientError::new(
      STATUS_ERROR,
      format!("SIM-03136: call timed out after {} ms", timeout.as_millis()),
    );
    state.fail_on(Some(error), err)
  }

  fn check_error_handle(state: &mut State, error: &Handle) -> ClientResult<()> {
    if state.is_live(error, HandleKind::Error) {
      Ok(())
    } else {
      Err(Self::invalid(state, "error", None))
    }
  }
}

impl DatabaseClient for SimulatedClient {
  fn create_managed_environment(&self, spec: EnvSpec) -> ClientResult<Handle> {
    let mut state = self.state();
    self.enter(
      &mut state,
      Operation::CreateManagedEnvironment,
      Some(HandleKind::ManagedEnvironment),
      None,
    )?;
    trace!(%spec, "managed environment created");
    Ok(state.mint(HandleKind::ManagedEnvironment))
  }

  fn create_environment(&self, spec: EnvSpec) -> ClientResult<Handle> {
    let mut state = self.state();
    self.enter(
      &mut state,
      Operation::CreateEnvironment,
      Some(HandleKind::Environment),
      None,
    )?;
    trace!(%spec, "environment created");
    Ok(state.mint(HandleKind::Environment))
  }

  fn allocate_handle(&self, env: &Handle, kind: HandleKind) -> ClientResult<Handle> {
    let mut state = self.state();
    let Some(op) = Operation::allocation(kind) else {
      return Err(Self::invalid(&mut state, "child", None));
    };
    self.enter(&mut state, op, Some(kind), None)?;
    if !state.is_live(env, HandleKind::Environment) {
      return Err(Self::invalid(&mut state, "environment", None));
    }
    Ok(state.mint(kind))
  }

  fn attach(&self, server: &Handle, error: &Handle, target: &str) -> ClientResult<()> {
    {
      let mut state = self.state();
      Self::check_error_handle(&mut state, error)?;
      self.enter(&mut state, Operation::Attach, None, Some(error))?;
      if !state.is_live(server, HandleKind::Server) {
        return Err(Self::invalid(&mut state, "server", Some(error)));
      }
      if target.is_empty() {
        let err = ClientError::new(STATUS_ERROR, "SIM-12162: target name is empty");
        return Err(state.fail_on(Some(error), err));
      }
    }
    // Attach is a network round trip with no service context yet, so no call timeout applies.
    let _ = self.round_trip(None);
    let mut state = self.state();
    if !state.attached.insert(server.token().get()) {
      let err = ClientError::new(STATUS_ERROR, "SIM-24327: server is already attached");
      return Err(state.fail_on(Some(error), err));
    }
    state.acquisitions += 1;
    Ok(())
  }

  fn bind(&self, context: &Handle, handle: &Handle, error: &Handle) -> ClientResult<()> {
    let mut state = self.state();
    Self::check_error_handle(&mut state, error)?;
    self.enter(&mut state, Operation::Bind, None, Some(error))?;
    if !state.is_live(context, HandleKind::ServiceContext) {
      return Err(Self::invalid(&mut state, "service context", Some(error)));
    }
    let live = state.is_live(handle, HandleKind::Server) || state.is_live(handle, HandleKind::Session);
    if !live {
      return Err(Self::invalid(&mut state, "server or session", Some(error)));
    }
    Ok(())
  }

  fn set_credential(
    &self,
    session: &Handle,
    kind: CredentialKind,
    value: &str,
    error: &Handle,
  ) -> ClientResult<()> {
    let mut state = self.state();
    Self::check_error_handle(&mut state, error)?;
    self.enter(&mut state, Operation::SetCredential, None, Some(error))?;
    if !state.is_live(session, HandleKind::Session) {
      return Err(Self::invalid(&mut state, "session", Some(error)));
    }
    trace!(%kind, len = value.len(), "credential set");
    Ok(())
  }

  fn set_call_timeout(
    &self,
    context: &Handle,
    timeout: Duration,
    error: &Handle,
  ) -> ClientResult<()> {
    let mut state = self.state();
    Self::check_error_handle(&mut state, error)?;
    self.enter(&mut state, Operation::SetCallTimeout, None, Some(error))?;
    if !state.is_live(context, HandleKind::ServiceContext) {
      return Err(Self::invalid(&mut state, "service context", Some(error)));
    }
    state.timeouts.insert(context.token().get(), timeout);
    Ok(())
  }

  fn begin_session(&self, context: &Handle, session: &Handle, error: &Handle) -> ClientResult<()> {
    let timeout = {
      let mut state = self.state();
      Self::check_error_handle(&mut state, error)?;
      self.enter(&mut state, Operation::BeginSession, None, Some(error))?;
      if !state.is_live(context, HandleKind::ServiceContext) {
        return Err(Self::invalid(&mut state, "service context", Some(error)));
      }
      if !state.is_live(session, HandleKind::Session) {
        return Err(Self::invalid(&mut state, "session", Some(error)));
      }
      state.timeouts.get(&context.token().get()).copied()
    };
    let round_trip = self.round_trip(timeout);
    let mut state = self.state();
    if let Err(timeout) = round_trip {
      return Err(Self::timed_out(&mut state, timeout, error));
    }
    state
      .sessions
      .insert(session.token().get(), context.token().get());
    state.acquisitions += 1;
    Ok(())
  }

  fn ping(&self, context: &Handle, error: &Handle) -> ClientResult<()> {
    let timeout = {
      let mut state = self.state();
      Self::check_error_handle(&mut state, error)?;
      self.enter(&mut state, Operation::Ping, None, Some(error))?;
      if !state.is_live(context, HandleKind::ServiceContext) {
        return Err(Self::invalid(&mut state, "service context", Some(error)));
      }
      let token = context.token().get();
      let has_session =
        state.sessions.values().any(|c| *c == token) || state.logged_on.contains(&token);
      if !has_session {
        let err = ClientError::new(STATUS_ERROR, "SIM-01012: not logged on");
        return Err(state.fail_on(Some(error), err));
      }
      state.timeouts.get(&context.token().get()).copied()
    };
    let round_trip = self.round_trip(timeout);
    if let Err(timeout) = round_trip {
      return Err(Self::timed_out(&mut self.state(), timeout, error));
    }
    Ok(())
  }

  fn end_session(&self, context: &Handle, session: &Handle, error: &Handle) -> ClientResult<()> {
    let mut state = self.state();
    Self::check_error_handle(&mut state, error)?;
    if !state.is_live(context, HandleKind::ServiceContext)
      || !state.sessions.contains_key(&session.token().get())
    {
      state.invalid_releases += 1;
      return Err(Self::invalid(&mut state, "session", Some(error)));
    }
    state.releases += 1;
    self.enter(&mut state, Operation::EndSession, None, Some(error))?;
    state.sessions.remove(&session.token().get());
    Ok(())
  }

  fn detach(&self, server: &Handle, error: &Handle) -> ClientResult<()> {
    let mut state = self.state();
    Self::check_error_handle(&mut state, error)?;
    if !state.attached.contains(&server.token().get()) {
      state.invalid_releases += 1;
      return Err(Self::invalid(&mut state, "attached server", Some(error)));
    }
    state.releases += 1;
    self.enter(&mut state, Operation::Detach, None, Some(error))?;
    state.attached.remove(&server.token().get());
    Ok(())
  }

  fn logon(&self, env: &Handle, error: &Handle, credentials: &Credentials) -> ClientResult<Handle> {
    {
      let mut state = self.state();
      Self::check_error_handle(&mut state, error)?;
      self.enter(
        &mut state,
        Operation::Logon,
        Some(HandleKind::ServiceContext),
        Some(error),
      )?;
      if !state.is_live(env, HandleKind::Environment) {
        return Err(Self::invalid(&mut state, "environment", Some(error)));
      }
      if credentials.principal().is_empty() {
        let err = ClientError::new(STATUS_ERROR, "SIM-01017: invalid username/password");
        return Err(state.fail_on(Some(error), err));
      }
    }
    let _ = self.round_trip(None);
    let mut state = self.state();
    let context = state.mint(HandleKind::ServiceContext);
    state.logged_on.insert(context.token().get());
    Ok(context)
  }

  fn logoff(&self, context: Handle, error: &Handle) -> ClientResult<()> {
    let mut state = self.state();
    Self::check_error_handle(&mut state, error)?;
    let token = context.token().get();
    if !state.logged_on.contains(&token) {
      state.invalid_releases += 1;
      return Err(Self::invalid(&mut state, "logged on service context", Some(error)));
    }
    state.releases += 1;
    self.enter(&mut state, Operation::Logoff, None, Some(error))?;
    state.logged_on.remove(&token);
    state.live.remove(&token);
    state.timeouts.remove(&token);
    Ok(())
  }

  fn free(&self, handle: Handle) -> ClientResult<()> {
    let mut state = self.state();
    let token = handle.token().get();
    if !state.is_live(&handle, handle.kind()) || state.logged_on.contains(&token) {
      state.invalid_releases += 1;
      return Err(Self::invalid(&mut state, &handle.kind().to_string(), None));
    }
    state.releases += 1;
    self.enter(&mut state, Operation::Free, Some(handle.kind()), None)?;
    state.live.remove(&token);
    state.timeouts.remove(&token);
    state.last_error.remove(&token);
    Ok(())
  }

  fn describe_last_error(&self, error: &Handle) -> String {
    self
      .state()
      .last_error
      .get(&error.token().get())
      .cloned()
      .unwrap_or_default()
  }
}
