//! A simulated database client.
//!
//! Implements the full [`DatabaseClient`](connprobe_core::client::DatabaseClient) surface in
//! memory. It validates every handle it is given, can inject failures into any operation, and
//! keeps counters and a call journal so tests can check the release discipline of a probe.

pub mod args;
mod client;
mod failure;

pub use client::{
  CallRecord,
  STATUS_ERROR,
  STATUS_INVALID_HANDLE,
  SimulatedClient,
  SimulatedClientBuilder,
};
pub use failure::{
  FailureRule,
  FailureRuleParseError,
  Operation,
};
