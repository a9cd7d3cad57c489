use std::num::ParseIntError;

use snafu::Snafu;

pub mod args;
pub mod config;
pub mod options;
pub mod theme;

#[derive(Debug, Snafu)]
pub enum ParseCountError {
  #[snafu(display("{source}"), context(false))]
  NotANumber { source: ParseIntError },
  #[snafu(display("must be a positive integer"))]
  NotPositive,
}

/// Parse a worker or loop count. Zero and negative values are rejected.
pub fn positive_count_parser(s: &str) -> Result<usize, ParseCountError> {
  let v = s.trim().parse::<i64>()?;
  if v <= 0 {
    return Err(ParseCountError::NotPositive);
  }
  usize::try_from(v).map_err(|_| ParseCountError::NotPositive)
}
