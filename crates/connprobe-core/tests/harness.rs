use std::time::Duration;

use connprobe_backend_sim::{
  FailureRule,
  Operation,
  SimulatedClient,
};
use connprobe_core::{
  client::{
    ClientResult,
    CredentialKind,
    DatabaseClient,
    EnvSpec,
    Handle,
    HandleKind,
  },
  credentials::Credentials,
  harness::{
    Harness,
    HarnessConfig,
    HarnessError,
  },
  probe::{
    ConnectStrategy,
    FailureKind,
    ProbeOptions,
  },
};
use rstest::rstest;

fn credentials() -> Credentials {
  Credentials::new("scott", "tiger", "ORCL")
}

fn config(threads: usize, iterations: usize) -> HarnessConfig {
  HarnessConfig {
    threads,
    iterations,
    ..Default::default()
  }
}

#[rstest]
#[case(1, 1)]
#[case(1, 32)]
#[case(3, 2)]
#[case(8, 3)]
fn one_result_per_thread_and_loop(#[case] threads: usize, #[case] iterations: usize) {
  let client = SimulatedClient::default();
  let results = Harness::new(&client, config(threads, iterations))
    .run(&credentials())
    .unwrap();
  assert_eq!(results.len(), threads * iterations);
  assert!(results.iter().all(|r| r.succeeded()));
  assert!(results.iter().all(|r| r.error_message.is_empty()));
  let slots: Vec<_> = results.iter().map(|r| (r.thread, r.iteration)).collect();
  let expected: Vec<_> = (1..=threads)
    .flat_map(|t| (1..=iterations).map(move |i| (t, i)))
    .collect();
  assert_eq!(slots, expected);
  assert_eq!(client.acquisitions(), client.releases());
  assert_eq!(client.live_handles(), 0);
}

#[test]
fn three_threads_two_loops_report_per_loop() {
  let client = SimulatedClient::default();
  let mut seen = vec![];
  let results = Harness::new(&client, config(3, 2))
    .run_with(&credentials(), |iteration, round| {
      seen.push((
        iteration,
        round.iter().map(|r| r.thread).collect::<Vec<_>>(),
      ));
    })
    .unwrap();
  assert_eq!(seen, [(1, vec![1, 2, 3]), (2, vec![1, 2, 3])]);
  assert_eq!(results.len(), 6);
  assert_eq!(client.acquisitions(), 6 * 7);
}

#[test]
fn loops_do_not_overlap() {
  let client = SimulatedClient::builder()
    .latency(Duration::from_millis(2))
    .build();
  Harness::new(&client, config(4, 3))
    .run(&credentials())
    .unwrap();
  let loops: Vec<usize> = client
    .journal()
    .iter()
    .map(|call| {
      let name = call.thread.as_deref().unwrap();
      name
        .strip_prefix("probe-")
        .and_then(|rest| rest.split('-').next())
        .unwrap()
        .parse()
        .unwrap()
    })
    .collect();
  assert!(loops.is_sorted(), "calls of different loops interleaved");
  assert_eq!(loops.first(), Some(&1));
  assert_eq!(loops.last(), Some(&3));
}

#[test]
fn begin_session_failure_releases_everything() {
  let client = SimulatedClient::builder()
    .fail(FailureRule::always(Operation::BeginSession))
    .build();
  let results = Harness::new(&client, config(1, 1))
    .run(&credentials())
    .unwrap();
  let [result] = results.as_slice() else {
    panic!("expected exactly one result, got {results:?}");
  };
  assert!(!result.connection_succeeded);
  assert!(!result.ping_succeeded);
  assert_eq!(result.failure, Some(FailureKind::Authentication));
  assert_eq!(
    result.error_message,
    "SIM-00001: injected failure in begin-session"
  );
  // Managed environment, environment, four child handles and the attach.
  assert_eq!(client.acquisitions(), 7);
  assert_eq!(client.releases(), 7);
  assert_eq!(client.live_handles(), 0);
  assert_eq!(client.invalid_releases(), 0);
}

#[rstest]
#[case(Operation::CreateManagedEnvironment)]
#[case(Operation::CreateEnvironment)]
#[case(Operation::AllocateError)]
#[case(Operation::AllocateServer)]
#[case(Operation::AllocateServiceContext)]
#[case(Operation::AllocateSession)]
#[case(Operation::Attach)]
#[case(Operation::Bind)]
#[case(Operation::SetCredential)]
#[case(Operation::BeginSession)]
#[case(Operation::Ping)]
fn any_acquire_failure_is_balanced(#[case] op: Operation) {
  let client = SimulatedClient::builder()
    .fail(FailureRule::always(op))
    .build();
  let results = Harness::new(&client, config(2, 2))
    .run(&credentials())
    .unwrap();
  assert_eq!(results.len(), 4);
  assert!(results.iter().all(|r| !r.succeeded()));
  assert!(results.iter().all(|r| !r.error_message.is_empty()));
  assert!(results
    .iter()
    .all(|r| r.connection_succeeded || !r.ping_succeeded));
  assert_eq!(client.acquisitions(), client.releases());
  assert_eq!(client.live_handles(), 0);
  assert_eq!(client.invalid_releases(), 0);
}

const FULL_SESSION_RELEASE: [&str; 8] = [
  "end-session",
  "detach",
  "free(session)",
  "free(service-context)",
  "free(server)",
  "free(error)",
  "free(environment)",
  "free(managed-environment)",
];

/// Release calls in the order they were made, e.g. `detach` or `free(server)`.
fn release_calls(client: &SimulatedClient) -> Vec<String> {
  client
    .journal()
    .iter()
    .filter_map(|call| match (call.op, call.kind) {
      (Operation::Free, Some(kind)) => Some(format!("free({kind})")),
      (Operation::EndSession | Operation::Detach | Operation::Logoff, _) => {
        Some(call.op.to_string())
      }
      _ => None,
    })
    .collect()
}

#[rstest]
#[case(Operation::CreateManagedEnvironment, &[])]
#[case(Operation::CreateEnvironment, &FULL_SESSION_RELEASE[7..])]
#[case(Operation::AllocateError, &FULL_SESSION_RELEASE[6..])]
#[case(Operation::AllocateServer, &FULL_SESSION_RELEASE[5..])]
#[case(Operation::AllocateServiceContext, &FULL_SESSION_RELEASE[4..])]
#[case(Operation::SetCallTimeout, &FULL_SESSION_RELEASE[3..])]
#[case(Operation::AllocateSession, &FULL_SESSION_RELEASE[3..])]
#[case(Operation::Attach, &FULL_SESSION_RELEASE[2..])]
#[case(Operation::Bind, &FULL_SESSION_RELEASE[1..])]
#[case(Operation::SetCredential, &FULL_SESSION_RELEASE[1..])]
#[case(Operation::BeginSession, &FULL_SESSION_RELEASE[1..])]
#[case(Operation::Ping, &FULL_SESSION_RELEASE)]
fn session_failure_releases_prior_acquisitions_in_reverse(
  #[case] op: Operation,
  #[case] expected: &[&str],
) {
  let client = SimulatedClient::builder()
    .fail(FailureRule::always(op))
    .build();
  let config = HarnessConfig {
    threads: 1,
    iterations: 1,
    options: ProbeOptions {
      call_timeout: Some(Duration::from_secs(5)),
      ..Default::default()
    },
  };
  let results = Harness::new(&client, config).run(&credentials()).unwrap();
  assert!(!results[0].succeeded());
  assert_eq!(results[0].release_failures, 0);
  assert_eq!(release_calls(&client), expected);
  assert_eq!(client.acquisitions(), client.releases());
  assert_eq!(client.invalid_releases(), 0);
}

#[rstest]
#[case(Operation::CreateEnvironment, &[], 0)]
#[case(Operation::AllocateError, &["free(environment)"], 0)]
#[case(Operation::Logon, &["free(error)", "free(environment)"], 0)]
#[case(Operation::SetCallTimeout, &["logoff", "free(error)", "free(environment)"], 0)]
#[case(Operation::Ping, &["logoff", "free(error)", "free(environment)"], 0)]
#[case(Operation::Logoff, &["logoff", "free(error)", "free(environment)"], 1)]
fn logon_failure_releases_prior_acquisitions_in_reverse(
  #[case] op: Operation,
  #[case] expected: &[&str],
  #[case] release_failures: usize,
) {
  let client = SimulatedClient::builder()
    .fail(FailureRule::always(op))
    .build();
  let config = HarnessConfig {
    threads: 1,
    iterations: 1,
    options: ProbeOptions {
      strategy: ConnectStrategy::Logon,
      call_timeout: Some(Duration::from_secs(5)),
      ..Default::default()
    },
  };
  let results = Harness::new(&client, config).run(&credentials()).unwrap();
  assert_eq!(results[0].succeeded(), op == Operation::Logoff);
  assert_eq!(results[0].release_failures, release_failures);
  assert_eq!(release_calls(&client), expected);
  assert_eq!(client.acquisitions(), client.releases());
  assert_eq!(client.invalid_releases(), 0);
}

#[test]
fn oversized_run_is_an_error_not_a_panic() {
  let client = SimulatedClient::default();
  let err = Harness::new(&client, config(usize::MAX / 2, 4))
    .run(&credentials())
    .unwrap_err();
  assert!(matches!(err, HarnessError::TooManyProbes { .. }));

  let err = Harness::new(&client, config(usize::MAX / 2, 1))
    .run(&credentials())
    .unwrap_err();
  assert!(matches!(err, HarnessError::Resources { .. }));
  assert!(client.journal().is_empty());
}

#[test]
fn partial_cleanup_runs_in_reverse() {
  let client = SimulatedClient::builder()
    .fail(FailureRule::always(Operation::AllocateSession))
    .build();
  let results = Harness::new(&client, config(1, 1))
    .run(&credentials())
    .unwrap();
  assert_eq!(results[0].failure, Some(FailureKind::Acquisition));
  assert_eq!(
    results[0].error_message,
    "Failed to allocate session handle (status -1)"
  );
  let freed: Vec<HandleKind> = client
    .journal()
    .iter()
    .filter(|call| call.op == Operation::Free)
    .filter_map(|call| call.kind)
    .collect();
  assert_eq!(
    freed,
    [
      HandleKind::ServiceContext,
      HandleKind::Server,
      HandleKind::Error,
      HandleKind::Environment,
      HandleKind::ManagedEnvironment,
    ]
  );
  assert_eq!(client.acquisitions(), 5);
  assert_eq!(client.releases(), 5);
}

#[test]
fn ping_failure_keeps_connection() {
  let client = SimulatedClient::builder()
    .fail(FailureRule::always(Operation::Ping))
    .build();
  let results = Harness::new(&client, config(2, 1))
    .run(&credentials())
    .unwrap();
  for result in &results {
    assert!(result.connection_succeeded);
    assert!(!result.ping_succeeded);
    assert_eq!(result.failure, Some(FailureKind::LivenessCheck));
    assert_eq!(result.error_message, "SIM-00001: injected failure in ping");
  }
  assert_eq!(client.acquisitions(), client.releases());
}

#[test]
fn release_failures_are_counted_not_fatal() {
  let client = SimulatedClient::builder()
    .fail(FailureRule::always(Operation::Detach))
    .build();
  let results = Harness::new(&client, config(2, 2))
    .run(&credentials())
    .unwrap();
  assert!(results.iter().all(|r| r.succeeded()));
  assert!(results.iter().all(|r| r.release_failures == 1));
  assert_eq!(client.acquisitions(), client.releases());
  assert_eq!(client.live_handles(), 0);
}

#[test]
fn zero_threads_makes_no_client_calls() {
  let client = SimulatedClient::default();
  let err = Harness::new(&client, config(0, 3))
    .run(&credentials())
    .unwrap_err();
  assert!(matches!(err, HarnessError::Configuration { .. }));
  assert!(client.journal().is_empty());
}

#[test]
fn logon_strategy_skips_managed_environment() {
  let client = SimulatedClient::default();
  let config = HarnessConfig {
    threads: 2,
    iterations: 2,
    options: ProbeOptions {
      strategy: ConnectStrategy::Logon,
      ..Default::default()
    },
  };
  let results = Harness::new(&client, config).run(&credentials()).unwrap();
  assert!(results.iter().all(|r| r.succeeded()));
  let journal = client.journal();
  assert!(
    journal
      .iter()
      .all(|call| call.op != Operation::CreateManagedEnvironment)
  );
  assert_eq!(
    journal.iter().filter(|c| c.op == Operation::Logoff).count(),
    4
  );
  // Environment, error handle and logon per probe.
  assert_eq!(client.acquisitions(), 4 * 3);
  assert_eq!(client.releases(), 4 * 3);
}

#[test]
fn call_timeout_fails_slow_session() {
  let client = SimulatedClient::builder()
    .latency(Duration::from_millis(40))
    .build();
  let config = HarnessConfig {
    threads: 1,
    iterations: 1,
    options: ProbeOptions {
      call_timeout: Some(Duration::from_millis(5)),
      ..Default::default()
    },
  };
  let results = Harness::new(&client, config).run(&credentials()).unwrap();
  assert!(!results[0].connection_succeeded);
  assert_eq!(results[0].failure, Some(FailureKind::Authentication));
  assert!(results[0].error_message.contains("timed out after 5 ms"));
  assert_eq!(client.acquisitions(), client.releases());
}

/// Delegates to a [`SimulatedClient`] but panics on ping.
struct PanicOnPing(SimulatedClient);

impl DatabaseClient for PanicOnPing {
  fn create_managed_environment(&self, spec: EnvSpec) -> ClientResult<Handle> {
    self.0.create_managed_environment(spec)
  }

  fn create_environment(&self, spec: EnvSpec) -> ClientResult<Handle> {
    self.0.create_environment(spec)
  }

  fn allocate_handle(&self, env: &Handle, kind: HandleKind) -> ClientResult<Handle> {
    self.0.allocate_handle(env, kind)
  }

  fn attach(&self, server: &Handle, error: &Handle, target: &str) -> ClientResult<()> {
    self.0.attach(server, error, target)
  }

  fn bind(&self, context: &Handle, handle: &Handle, error: &Handle) -> ClientResult<()> {
    self.0.bind(context, handle, error)
  }

  fn set_credential(
    &self,
    session: &Handle,
    kind: CredentialKind,
    value: &str,
    error: &Handle,
  ) -> ClientResult<()> {
    self.0.set_credential(session, kind, value, error)
  }

  fn set_call_timeout(
    &self,
    context: &Handle,
    timeout: Duration,
    error: &Handle,
  ) -> ClientResult<()> {
    self.0.set_call_timeout(context, timeout, error)
  }

  fn begin_session(&self, context: &Handle, session: &Handle, error: &Handle) -> ClientResult<()> {
    self.0.begin_session(context, session, error)
  }

  fn ping(&self, _context: &Handle, _error: &Handle) -> ClientResult<()> {
    panic!("driver crashed");
  }

  fn end_session(&self, context: &Handle, session: &Handle, error: &Handle) -> ClientResult<()> {
    self.0.end_session(context, session, error)
  }

  fn detach(&self, server: &Handle, error: &Handle) -> ClientResult<()> {
    self.0.detach(server, error)
  }

  fn logon(&self, env: &Handle, error: &Handle, credentials: &Credentials) -> ClientResult<Handle> {
    self.0.logon(env, error, credentials)
  }

  fn logoff(&self, context: Handle, error: &Handle) -> ClientResult<()> {
    self.0.logoff(context, error)
  }

  fn free(&self, handle: Handle) -> ClientResult<()> {
    self.0.free(handle)
  }

  fn describe_last_error(&self, error: &Handle) -> String {
    self.0.describe_last_error(error)
  }
}

#[test]
fn worker_panic_becomes_failed_result() {
  let client = PanicOnPing(SimulatedClient::default());
  let results = Harness::new(&client, config(2, 1))
    .run(&credentials())
    .unwrap();
  assert_eq!(results.len(), 2);
  for result in &results {
    assert!(!result.connection_succeeded);
    assert_eq!(result.failure, Some(FailureKind::WorkerPanic));
    assert_eq!(result.error_message, "Worker panicked: driver crashed");
  }
  // The handle stack unwinds while the worker panics.
  assert_eq!(client.0.acquisitions(), client.0.releases());
  assert_eq!(client.0.live_handles(), 0);
}
