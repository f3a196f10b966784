use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{
  debug,
  info,
  warn
};

use crate::preferences::PreferenceStore;

pub const THEME_STORAGE_KEY: &str =
  "theme";

#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub enum Theme {
  Light,
  Dark
}

impl Theme {
  pub fn storage_value(
    self
  ) -> &'static str {
    match self {
      | Theme::Light => "light",
      | Theme::Dark => "dark"
    }
  }

  pub fn from_storage(
    raw: &str
  ) -> Option<Self> {
    match raw.trim() {
      | "light" => Some(Theme::Light),
      | "dark" => Some(Theme::Dark),
      | _ => None
    }
  }

  pub fn toggled(self) -> Self {
    match self {
      | Theme::Light => Theme::Dark,
      | Theme::Dark => Theme::Light
    }
  }
}

impl fmt::Display for Theme {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(self.storage_value())
  }
}

/// Whatever renders the theme (document root class, terminal palette).
pub trait ThemeSurface: Send + Sync {
  fn apply_theme(&self, theme: Theme);
}

/// Theme state with explicit two-phase startup: [`ThemeController::load`]
/// resolves the value, [`ThemeController::apply`] pushes it out. Nothing is
/// applied before the value is known.
pub struct ThemeController {
  store: Arc<dyn PreferenceStore>,
  theme: Mutex<Theme>
}

impl ThemeController {
  #[tracing::instrument(skip(store))]
  pub fn load(
    store: Arc<dyn PreferenceStore>,
    system_prefers_dark: bool
  ) -> Self {
    let stored = store
      .get(THEME_STORAGE_KEY)
      .and_then(|raw| {
        Theme::from_storage(&raw)
      });

    let theme = match stored {
      | Some(theme) => theme,
      | None if system_prefers_dark => {
        Theme::Dark
      }
      | None => Theme::Light
    };

    debug!(
      %theme,
      from_store = stored.is_some(),
      "resolved theme preference"
    );

    Self {
      store,
      theme: Mutex::new(theme)
    }
  }

  pub fn current(&self) -> Theme {
    *self.theme.lock()
  }

  /// Idempotent: re-applying the same theme rewrites the same state.
  pub fn apply(
    &self,
    surface: &dyn ThemeSurface
  ) {
    let theme = self.current();
    surface.apply_theme(theme);
    if let Err(err) = self.store.set(
      THEME_STORAGE_KEY,
      theme.storage_value()
    ) {
      warn!(
        error = %err,
        "failed to persist theme \
         preference"
      );
    }
  }

  pub fn set(
    &self,
    theme: Theme,
    surface: &dyn ThemeSurface
  ) {
    *self.theme.lock() = theme;
    info!(%theme, "theme changed");
    self.apply(surface);
  }

  pub fn toggle(
    &self,
    surface: &dyn ThemeSurface
  ) -> Theme {
    let next = self.current().toggled();
    self.set(next, surface);
    next
  }
}
