use std::{
  collections::BTreeMap,
  io::{
    self,
    Write,
  },
};

use itertools::Itertools;
use owo_colors::OwoColorize;
use serde::Serialize;

use crate::{
  cli::{
    options::ReportFormat,
    theme::THEME,
  },
  probe::ProbeResult,
};

pub const SUCCESS_TEXT: &str = "Database connection and ping successful.";

/// Aggregate view of a finished run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Summary {
  pub threads: usize,
  pub iterations: usize,
  pub probes: usize,
  pub connected: usize,
  pub pinged: usize,
  pub failed: usize,
  pub release_failures: usize,
  /// Failed probes per failure kind.
  pub failures: BTreeMap<String, usize>,
}

impl Summary {
  pub fn new(threads: usize, iterations: usize, results: &[ProbeResult]) -> Self {
    Self {
      threads,
      iterations,
      probes: results.len(),
      connected: results.iter().filter(|r| r.connection_succeeded).count(),
      pinged: results.iter().filter(|r| r.ping_succeeded).count(),
      failed: results.iter().filter(|r| !r.succeeded()).count(),
      release_failures: results.iter().map(|r| r.release_failures).sum(),
      failures: results
        .iter()
        .filter_map(|r| r.failure)
        .map(|kind| kind.to_string())
        .counts()
        .into_iter()
        .collect(),
    }
  }
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum Record<'a> {
  Probe(&'a ProbeResult),
  Summary(&'a Summary),
}

/// Writes probe outcomes as loops complete, then a closing summary.
pub struct Reporter {
  out: Box<dyn Write + Send>,
  format: ReportFormat,
}

impl Reporter {
  pub fn new(out: Box<dyn Write + Send>, format: ReportFormat) -> Self {
    Self { out, format }
  }

  pub fn report_loop(&mut self, results: &[ProbeResult]) -> io::Result<()> {
    for result in results {
      match self.format {
        ReportFormat::Text => self.write_text_line(result)?,
        ReportFormat::JsonStream => self.write_record(&Record::Probe(result))?,
      }
    }
    self.out.flush()
  }

  pub fn finish(&mut self, summary: &Summary) -> io::Result<()> {
    match self.format {
      ReportFormat::Text => {
        if summary.failed > 0 {
          writeln!(
            self.out,
            " INFO: {} of {} probes failed",
            summary.failed.style(THEME.warning),
            summary.probes
          )?;
        }
        if summary.release_failures > 0 {
          writeln!(
            self.out,
            " INFO: {} release steps failed",
            summary.release_failures.style(THEME.warning)
          )?;
        }
        writeln!(self.out, " INFO: Thread count: {}", summary.threads)?;
        writeln!(self.out, "\n {}\n", "EXIT SUCCESS".style(THEME.summary))?;
      }
      ReportFormat::JsonStream => self.write_record(&Record::Summary(summary))?,
    }
    self.out.flush()
  }

  fn write_text_line(&mut self, result: &ProbeResult) -> io::Result<()> {
    let label = format!("LOOP {} Thread {}", result.iteration, result.thread);
    if result.succeeded() {
      writeln!(
        self.out,
        " INFO: {} {}",
        label.style(THEME.label),
        SUCCESS_TEXT.style(THEME.success)
      )
    } else {
      writeln!(
        self.out,
        " INFO: {} {} {}",
        label.style(THEME.label),
        "Error:".style(THEME.error),
        result.error_message
      )
    }
  }

  fn write_record(&mut self, record: &Record<'_>) -> io::Result<()> {
    serde_json::to_writer(&mut self.out, record)?;
    writeln!(self.out)
  }
}
