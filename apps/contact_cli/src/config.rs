use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{anyhow, bail, Context};
use serde::Deserialize;
use shared::protocol::DEFAULT_RELAY_ENDPOINT;
use submission_core::{ControllerSettings, DEFAULT_REVERT_AFTER};
use url::Url;

pub const DEFAULT_CONFIG_FILE: &str = "contact.toml";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const MAX_REVERT_AFTER_SECS: u64 = 3600;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub relay_endpoint: String,
    pub access_key: Option<String>,
    pub revert_after_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            relay_endpoint: DEFAULT_RELAY_ENDPOINT.into(),
            access_key: None,
            revert_after_secs: DEFAULT_REVERT_AFTER.as_secs(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl Settings {
    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            revert_after: Duration::from_secs(self.revert_after_secs),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn require_access_key(&self) -> anyhow::Result<&str> {
        self.access_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                anyhow!(
                    "relay access key is not configured; set RELAY_ACCESS_KEY or access_key in {DEFAULT_CONFIG_FILE}"
                )
            })
    }

    pub fn relay_endpoint_url(&self) -> anyhow::Result<Url> {
        let url = Url::parse(self.relay_endpoint.trim())
            .with_context(|| format!("invalid relay endpoint '{}'", self.relay_endpoint))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!(
                "relay endpoint '{}' must use http or https",
                self.relay_endpoint
            );
        }
        Ok(url)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.relay_endpoint_url()?;
        if self.request_timeout_secs == 0 {
            bail!("request_timeout_secs must be greater than zero");
        }
        if self.revert_after_secs > MAX_REVERT_AFTER_SECS {
            bail!(
                "revert_after_secs must be at most {MAX_REVERT_AFTER_SECS}, got {}",
                self.revert_after_secs
            );
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
    relay_endpoint: Option<String>,
    access_key: Option<String>,
    revert_after_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
}

/// Defaults, then `contact.toml` (or the explicit `config_path`), then
/// environment overrides. A missing default file is not an error.
pub fn load_settings(config_path: Option<&Path>) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    match fs::read_to_string(&path) {
        Ok(raw) => apply_file(&mut settings, &raw)
            .with_context(|| format!("failed to parse config file '{}'", path.display()))?,
        Err(err) if err.kind() == ErrorKind::NotFound && config_path.is_none() => {}
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read config file '{}'", path.display()))
        }
    }

    apply_env(&mut settings, |name| std::env::var(name).ok());
    settings.validate()?;
    Ok(settings)
}

fn apply_file(settings: &mut Settings, raw: &str) -> anyhow::Result<()> {
    let file_cfg: FileSettings = toml::from_str(raw)?;
    if let Some(v) = file_cfg.relay_endpoint {
        settings.relay_endpoint = v;
    }
    if let Some(v) = file_cfg.access_key {
        settings.access_key = Some(v);
    }
    if let Some(v) = file_cfg.revert_after_secs {
        settings.revert_after_secs = v;
    }
    if let Some(v) = file_cfg.request_timeout_secs {
        settings.request_timeout_secs = v;
    }
    Ok(())
}

fn apply_env(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("RELAY_ENDPOINT") {
        settings.relay_endpoint = v;
    }
    if let Some(v) = lookup("APP__RELAY_ENDPOINT") {
        settings.relay_endpoint = v;
    }

    if let Some(v) = lookup("RELAY_ACCESS_KEY") {
        settings.access_key = Some(v);
    }
    if let Some(v) = lookup("APP__RELAY_ACCESS_KEY") {
        settings.access_key = Some(v);
    }

    if let Some(parsed) = lookup("APP__REVERT_AFTER_SECS").and_then(|v| v.parse::<u64>().ok()) {
        settings.revert_after_secs = parsed;
    }
    if let Some(parsed) =
        lookup("APP__REQUEST_TIMEOUT_SECS").and_then(|v| v.parse::<u64>().ok())
    {
        settings.request_timeout_secs = parsed;
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
