// Copyright (c) 2023 Ratatui Developers
// Copyright (c) 2024 Levi Zim

// Permission is hereby granted, free of charge, to any person obtaining a copy of this software and
// associated documentation files (the "Software"), to deal in the Software without restriction,
// including without limitation the rights to use, copy, modify, merge, publish, distribute,
// sublicense, and/or sell copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:

// The above copyright notice and this permission notice shall be included in all copies or substantial
// portions of the Software.

// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR IMPLIED, INCLUDING BUT
// NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND
// NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES
// OR OTHER LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

use std::{
  path::PathBuf,
  sync::LazyLock,
};

use color_eyre::eyre::Result;
use connprobe_core::cli::config::project_directory;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
  self,
  EnvFilter,
  Layer,
  filter::LevelFilter,
  layer::SubscriberExt,
  util::SubscriberInitExt,
};

pub use tracing::*;

pub static PROJECT_NAME: LazyLock<String> =
  LazyLock::new(|| env!("CARGO_CRATE_NAME").to_uppercase());
pub static DATA_FOLDER: LazyLock<Option<PathBuf>> = LazyLock::new(|| {
  std::env::var(format!("{}_DATA", &*PROJECT_NAME))
    .ok()
    .map(PathBuf::from)
});
pub static LOG_ENV: LazyLock<String> = LazyLock::new(|| format!("{}_LOGLEVEL", &*PROJECT_NAME));
pub static LOG_FILE: LazyLock<String> = LazyLock::new(|| format!("{}.log", env!("CARGO_PKG_NAME")));

pub fn get_data_dir() -> PathBuf {
  if let Some(s) = DATA_FOLDER.clone() {
    s
  } else if let Some(proj_dirs) = project_directory() {
    proj_dirs.data_local_dir().to_path_buf()
  } else {
    PathBuf::from(".").join(".data")
  }
}

fn file_filter() -> EnvFilter {
  let directives = std::env::var("RUST_LOG")
    .or_else(|_| std::env::var(&*LOG_ENV))
    .unwrap_or_else(|_| format!("{}=info", env!("CARGO_CRATE_NAME")));
  EnvFilter::builder()
    .with_default_directive(LevelFilter::WARN.into())
    .parse_lossy(directives)
}

pub fn initialize_logging() -> Result<()> {
  let directory = get_data_dir();
  std::fs::create_dir_all(&directory)?;
  let log_path = directory.join(&*LOG_FILE);
  let log_file = std::fs::File::create(log_path)?;
  let file_subscriber = tracing_subscriber::fmt::layer()
    .with_file(true)
    .with_line_number(true)
    .with_thread_ids(true)
    .with_thread_names(true)
    .with_writer(log_file)
    .with_target(false)
    .with_ansi(false)
    .with_filter(file_filter());
  // Release failures are the interesting signal of a run, so they also go to stderr.
  let stderr_subscriber = tracing_subscriber::fmt::layer()
    .with_writer(std::io::stderr)
    .with_target(false)
    .with_thread_names(true)
    .without_time()
    .with_filter(LevelFilter::WARN);
  tracing_subscriber::registry()
    .with(file_subscriber)
    .with(stderr_subscriber)
    .with(ErrorLayer::default())
    .init();
  Ok(())
}
