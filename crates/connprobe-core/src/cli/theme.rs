use std::sync::LazyLock;

use owo_colors::Style;

pub struct Theme {
  pub label: Style,
  pub success: Style,
  pub error: Style,
  pub warning: Style,
  pub summary: Style,
}

impl Default for Theme {
  fn default() -> Self {
    Self {
      label: Style::new().bright_cyan(),
      success: Style::new().green(),
      error: Style::new().bright_red().bold(),
      warning: Style::new().bright_yellow(),
      summary: Style::new().bold(),
    }
  }
}

pub static THEME: LazyLock<Theme> = LazyLock::new(Default::default);
