use std::{collections::HashMap, fs, io, path::Path, str::FromStr};

use anyhow::{anyhow, Context};
use tracing::warn;

pub const DEFAULT_CONFIG_FILE: &str = "push_relay.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Local,
    Remote,
}

impl FromStr for StrategyKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "local-clock" => Ok(Self::Local),
            "remote" | "server" => Ok(Self::Remote),
            other => Err(anyhow!("unknown verification strategy '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub strategy: StrategyKind,
    pub verification_url: Option<String>,
    pub validity_window_ms: u64,
    pub remote_timeout_ms: u64,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Local,
            verification_url: None,
            validity_window_ms: 30_000,
            remote_timeout_ms: 10_000,
            log_filter: "info".into(),
        }
    }
}

/// Defaults, then the TOML file, then environment. An explicit `config_path`
/// must exist; the default file is optional.
pub fn load_settings(config_path: Option<&Path>) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    let (path, required) = match config_path {
        Some(path) => (path, true),
        None => (Path::new(DEFAULT_CONFIG_FILE), false),
    };
    match fs::read_to_string(path) {
        Ok(raw) => apply_file(&mut settings, &raw)
            .with_context(|| format!("invalid config file '{}'", path.display()))?,
        Err(err) if !required && err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read '{}'", path.display()))
        }
    }

    apply_env(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

pub fn apply_file(settings: &mut Settings, raw: &str) -> anyhow::Result<()> {
    let file_cfg: HashMap<String, toml::Value> = toml::from_str(raw)?;
    let file_cfg: HashMap<String, String> = file_cfg
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                toml::Value::String(s) => s,
                other => other.to_string(),
            };
            (key, value)
        })
        .collect();

    if let Some(v) = file_cfg.get("strategy") {
        settings.strategy = v.parse()?;
    }
    if let Some(v) = file_cfg.get("verification_url") {
        settings.verification_url = Some(v.clone());
    }
    if let Some(v) = file_cfg.get("validity_window_ms") {
        set_millis(&mut settings.validity_window_ms, "validity_window_ms", v);
    }
    if let Some(v) = file_cfg.get("remote_timeout_ms") {
        set_millis(&mut settings.remote_timeout_ms, "remote_timeout_ms", v);
    }
    if let Some(v) = file_cfg.get("log_filter") {
        settings.log_filter = v.clone();
    }
    Ok(())
}

pub fn apply_env(settings: &mut Settings, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("VERIFICATION_URL") {
        settings.verification_url = Some(v);
    }
    if let Some(v) = var("APP__VERIFICATION_URL") {
        settings.verification_url = Some(v);
    }

    if let Some(v) = var("APP__STRATEGY") {
        match v.parse() {
            Ok(strategy) => settings.strategy = strategy,
            Err(err) => warn!(%err, "config: ignoring APP__STRATEGY"),
        }
    }

    if let Some(v) = var("APP__VALIDITY_WINDOW_MS") {
        set_millis(&mut settings.validity_window_ms, "APP__VALIDITY_WINDOW_MS", &v);
    }
    if let Some(v) = var("APP__REMOTE_TIMEOUT_MS") {
        set_millis(&mut settings.remote_timeout_ms, "APP__REMOTE_TIMEOUT_MS", &v);
    }

    if let Some(v) = var("APP__LOG_FILTER") {
        settings.log_filter = v;
    }
}

fn set_millis(target: &mut u64, key: &str, raw: &str) {
    match raw.trim().parse::<u64>() {
        Ok(parsed) => *target = parsed,
        Err(_) => warn!(key, value = raw, "config: keeping default for non-numeric value"),
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
