//! Scoped ownership of everything a probe acquires from the client.
//!
//! Every successful acquisition is pushed onto a [`HandleStack`]. Unwinding pops entries in
//! strict reverse order, so a failure at any step releases exactly what was acquired before it.
//! The stack also unwinds on drop, which covers a panicking client.

use tracing::{
  debug,
  trace,
  warn,
};

use crate::client::{
  ClientError,
  DatabaseClient,
  Handle,
  HandleKind,
};

/// Position of an entry on a [`HandleStack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Slot(usize);

#[derive(Debug)]
enum Entry {
  Handle(Handle),
  /// The server at this slot is attached to its target.
  Attached { server: Slot },
  /// A session is established on the service context.
  SessionBegun { context: Slot, session: Slot },
  /// A service context obtained through the one-call logon.
  LoggedOn(Handle),
}

pub(crate) struct HandleStack<'c> {
  client: &'c dyn DatabaseClient,
  entries: Vec<Entry>,
  error: Option<Slot>,
  acquired: usize,
  release_failures: usize,
}

impl<'c> HandleStack<'c> {
  pub fn new(client: &'c dyn DatabaseClient) -> Self {
    Self {
      client,
      entries: Vec::with_capacity(8),
      error: None,
      acquired: 0,
      release_failures: 0,
    }
  }

  pub fn client(&self) -> &'c dyn DatabaseClient {
    self.client
  }

  pub fn push(&mut self, handle: Handle) -> Slot {
    let slot = Slot(self.entries.len());
    if handle.kind() == HandleKind::Error && self.error.is_none() {
      self.error = Some(slot);
    }
    trace!("acquired {} handle", handle.kind());
    self.entries.push(Entry::Handle(handle));
    self.acquired += 1;
    slot
  }

  pub fn push_logon(&mut self, context: Handle) -> Slot {
    let slot = Slot(self.entries.len());
    trace!("logged on");
    self.entries.push(Entry::LoggedOn(context));
    self.acquired += 1;
    slot
  }

  pub fn mark_attached(&mut self, server: Slot) {
    self.entries.push(Entry::Attached { server });
    self.acquired += 1;
  }

  pub fn mark_session(&mut self, context: Slot, session: Slot) {
    self.entries.push(Entry::SessionBegun { context, session });
    self.acquired += 1;
  }

  /// # Panics
  ///
  /// Panics if `slot` does not hold a handle. Slots only come from this stack, so this is a bug.
  pub fn get(&self, slot: Slot) -> &Handle {
    match &self.entries[slot.0] {
      Entry::Handle(handle) | Entry::LoggedOn(handle) => handle,
      other => panic!("slot {} holds {other:?}, not a handle", slot.0),
    }
  }

  /// The error handle, once one has been acquired.
  pub fn error(&self) -> Option<&Handle> {
    self.error.map(|slot| self.get(slot))
  }

  /// Text for a failed call: the library diagnostic when there is one, the call error otherwise.
  pub fn diagnose(&self, err: &ClientError) -> String {
    let described = self
      .error()
      .map(|error| self.client.describe_last_error(error))
      .unwrap_or_default();
    if described.is_empty() {
      Self::describe_call(err)
    } else {
      described
    }
  }

  /// Text carried by the call error itself, for calls that take no error handle.
  fn describe_call(err: &ClientError) -> String {
    if err.message.is_empty() {
      format!("call failed with status {}", err.status)
    } else {
      err.message.clone()
    }
  }

  /// Number of acquisitions so far, including attach and session establishment.
  #[cfg(test)]
  pub fn acquired(&self) -> usize {
    self.acquired
  }

  /// Release everything in reverse order. Returns how many release steps failed.
  pub fn release(mut self) -> usize {
    self.unwind();
    debug!(
      acquired = self.acquired,
      failed = self.release_failures,
      "handle stack released"
    );
    self.release_failures
  }

  fn unwind(&mut self) {
    while let Some(entry) = self.entries.pop() {
      // Only free takes no error handle, so its diagnostic is the call error alone.
      let via_error_handle = !matches!(entry, Entry::Handle(_));
      let (step, result) = match entry {
        Entry::Handle(handle) => {
          if self.error == Some(Slot(self.entries.len())) {
            self.error = None;
          }
          let kind = handle.kind();
          (format!("free({kind})"), self.client.free(handle))
        }
        Entry::LoggedOn(context) => match self.error() {
          Some(error) => ("logoff".to_string(), self.client.logoff(context, error)),
          None => {
            self.orphaned("logoff");
            continue;
          }
        },
        Entry::Attached { server } => match self.error() {
          Some(error) => (
            "detach".to_string(),
            self.client.detach(self.get(server), error),
          ),
          None => {
            self.orphaned("detach");
            continue;
          }
        },
        Entry::SessionBegun { context, session } => match self.error() {
          Some(error) => (
            "end_session".to_string(),
            self
              .client
              .end_session(self.get(context), self.get(session), error),
          ),
          None => {
            self.orphaned("end_session");
            continue;
          }
        },
      };
      match result {
        Ok(()) => trace!("{step} succeeded"),
        Err(e) => {
          self.release_failures += 1;
          let detail = if via_error_handle {
            self.diagnose(&e)
          } else {
            Self::describe_call(&e)
          };
          warn!(status = e.status, "{step} returned {}: {detail}", e.status);
        }
      }
    }
  }

  fn orphaned(&mut self, step: &str) {
    self.release_failures += 1;
    warn!("{step} skipped: no error handle to report through");
  }
}

impl Drop for HandleStack<'_> {
  fn drop(&mut self) {
    self.unwind();
  }
}
