//! # dispatch-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** - [`DispatchSettings::default()`]
//! 2. **Settings file** - `~/.dispatch/settings.json` or an explicit path,
//!    deep-merged over the defaults
//! 3. **Environment variables** - `DISPATCH_*` overrides (highest priority)
//!
//! Settings are loaded once at start-up and passed down explicitly; there is
//! no process-wide singleton.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
