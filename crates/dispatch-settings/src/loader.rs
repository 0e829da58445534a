use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::errors::{Result, SettingsError};
use crate::types::DispatchSettings;

/// `~/.dispatch`, falling back to `/tmp/.dispatch` when `HOME` is unset.
pub fn dispatch_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".dispatch")
}

/// Default settings file location.
pub fn settings_path() -> PathBuf {
    dispatch_dir().join("settings.json")
}

/// Load from the default location. A missing file means "defaults".
pub fn load_settings() -> Result<DispatchSettings> {
    let path = settings_path();
    if !path.exists() {
        let mut settings = DispatchSettings::default();
        apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
        settings.validate();
        return Ok(settings);
    }
    load_settings_from_path(&path)
}

/// Load from an explicit file, deep-merged over the defaults, then apply
/// environment overrides. The file must exist.
pub fn load_settings_from_path(path: &Path) -> Result<DispatchSettings> {
    let raw = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
        path: path.to_owned(),
        source,
    })?;
    let user: Value = serde_json::from_str(&raw).map_err(|source| SettingsError::Parse {
        path: path.to_owned(),
        source,
    })?;
    if !user.is_object() {
        return Err(SettingsError::Invalid(format!(
            "{} must contain a JSON object",
            path.display()
        )));
    }

    let defaults = serde_json::to_value(DispatchSettings::default()).map_err(|source| {
        SettingsError::Parse {
            path: path.to_owned(),
            source,
        }
    })?;
    let merged = deep_merge(defaults, user);
    let mut settings: DispatchSettings =
        serde_json::from_value(merged).map_err(|source| SettingsError::Parse {
            path: path.to_owned(),
            source,
        })?;

    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings.validate();
    tracing::debug!(path = %path.display(), "settings loaded");
    Ok(settings)
}

/// Recursively merge `overlay` into `base`. Objects merge key by key; any
/// other value in `overlay` replaces the one in `base`.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                let merged = match base.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                base.insert(key, merged);
            }
            Value::Object(base)
        }
        (_, overlay) => overlay,
    }
}

/// Apply `DISPATCH_*` overrides. Unparseable values are ignored with a
/// warning.
pub(crate) fn apply_env_overrides<F>(settings: &mut DispatchSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    fn parsed<T: std::str::FromStr>(key: &str, raw: Option<String>) -> Option<T> {
        let raw = raw?;
        match raw.trim().parse() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(key, value = %raw, "ignoring unparseable environment override");
                None
            }
        }
    }

    if let Some(port) = parsed("DISPATCH_PORT", lookup("DISPATCH_PORT")) {
        settings.server.port = port;
    }
    if let Some(limit) = parsed("DISPATCH_RATE_LIMIT", lookup("DISPATCH_RATE_LIMIT")) {
        settings.rate_limit.max_requests = limit;
    }
    if let Some(ceiling) = parsed("DISPATCH_BUDGET_CEILING_USD", lookup("DISPATCH_BUDGET_CEILING_USD")) {
        settings.budget.ceiling_usd = ceiling;
    }
    if let Some(path) = lookup("DISPATCH_DB_PATH").filter(|p| !p.trim().is_empty()) {
        settings.storage.database_path = PathBuf::from(path);
    }
    if let Some(level) = lookup("DISPATCH_LOG_LEVEL").filter(|l| !l.trim().is_empty()) {
        settings.logging.level = level;
    }
}
