use std::fmt::Debug;

use snafu::{
  OptionExt,
  Snafu,
};

/// Environment variables consulted for each credential, in order of preference.
pub const PRINCIPAL_VARS: [&str; 2] = ["CONNPROBE_PRINCIPAL", "ORA_SCHEMA"];
pub const SECRET_VARS: [&str; 2] = ["CONNPROBE_SECRET", "ORA_PASSWD"];
pub const TARGET_VARS: [&str; 2] = ["CONNPROBE_TARGET", "ORA_DBNAME"];

/// Login triple shared read-only by every worker for the lifetime of the process.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
  principal: String,
  secret: String,
  target: String,
}

#[derive(Debug, Snafu)]
pub enum CredentialsError {
  #[snafu(display(
    "{} must be defined (or {}). Credentials are read from CONNPROBE_PRINCIPAL, CONNPROBE_SECRET and CONNPROBE_TARGET.",
    vars[0],
    vars[1]
  ))]
  Missing { vars: [&'static str; 2] },
}

impl Credentials {
  pub fn new(
    principal: impl Into<String>,
    secret: impl Into<String>,
    target: impl Into<String>,
  ) -> Self {
    Self {
      principal: principal.into(),
      secret: secret.into(),
      target: target.into(),
    }
  }

  /// Read the credentials from the process environment.
  pub fn from_env() -> Result<Self, CredentialsError> {
    Self::from_lookup(|name| std::env::var(name).ok())
  }

  /// Read the credentials through `lookup`, which maps a variable name to its value.
  pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CredentialsError> {
    let get = |vars: [&'static str; 2]| {
      vars
        .into_iter()
        .find_map(|name| lookup(name))
        .context(MissingSnafu { vars })
    };
    Ok(Self {
      principal: get(PRINCIPAL_VARS)?,
      secret: get(SECRET_VARS)?,
      target: get(TARGET_VARS)?,
    })
  }

  pub fn principal(&self) -> &str {
    &self.principal
  }

  pub fn secret(&self) -> &str {
    &self.secret
  }

  pub fn target(&self) -> &str {
    &self.target
  }
}

impl Debug for Credentials {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Credentials")
      .field("principal", &self.principal)
      .field("secret", &"<redacted>")
      .field("target", &self.target)
      .finish()
  }
}
