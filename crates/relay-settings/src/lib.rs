//! # relay-settings
//!
//! Layered configuration for the tool relay.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** ([`RelaySettings::default()`])
//! 2. **Settings file**: `--config` path or `~/.relay/settings.json`, deep-merged over defaults
//! 3. **Environment variables**: `RELAY_*` overrides
//!
//! The loaded value is validated once and then injected, immutable, into
//! every component.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
