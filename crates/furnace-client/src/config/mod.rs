use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use toml::Value;

use crate::error::{Error, Result};
use crate::selection::{ColorScheme, RecordingOptions};
use crate::session::{ArtifactOnStart, SessionSettings};

pub const DEFAULT_CONFIG_FILE: &str = "furnace.toml";
pub const URL_ENV: &str = "FURNACE_URL";

#[derive(Debug, Clone)]
pub struct ConfigDoc {
    pub path: PathBuf,
    pub value: Value,
}

impl ConfigDoc {
    pub fn value_path(&self, path: &str) -> Option<&Value> {
        let path = path.trim();
        if path.is_empty() {
            return Some(&self.value);
        }

        let mut cur = &self.value;
        for seg in path.split('.') {
            let tbl = cur.as_table()?;
            cur = tbl.get(seg)?;
        }
        Some(cur)
    }

    pub fn deserialize_path<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let Some(v) = self.value_path(path) else {
            return Ok(None);
        };
        let parsed = v.clone().try_into().map_err(|e| {
            Error::msg(format!(
                "invalid [{path}] in {}: {e}",
                self.path.display()
            ))
        })?;
        Ok(Some(parsed))
    }
}

fn merge_values(base: &mut Value, child: Value) {
    match (base, child) {
        (Value::Table(base_tbl), Value::Table(child_tbl)) => {
            for (k, v) in child_tbl {
                match base_tbl.get_mut(&k) {
                    Some(existing) => merge_values(existing, v),
                    None => {
                        base_tbl.insert(k, v);
                    }
                }
            }
        }
        (base_slot, child_val) => {
            *base_slot = child_val;
        }
    }
}

fn resolve_ref_path(from_file: &Path, reference: &str) -> PathBuf {
    let p = PathBuf::from(reference);
    if p.is_absolute() {
        p
    } else {
        from_file.parent().unwrap_or_else(|| Path::new(".")).join(p)
    }
}

fn parse_imports(path: &Path, value: &Value) -> Result<Vec<String>> {
    let Some(arr) = value.get("imports").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };
    let mut out = Vec::new();
    for v in arr {
        let Some(s) = v.as_str() else {
            return Err(Error::msg(format!(
                "invalid imports entry in {} (expected string)",
                path.display()
            )));
        };
        let s = s.trim();
        if !s.is_empty() {
            out.push(s.to_string());
        }
    }
    Ok(out)
}

fn load_value_inner(path: &Path, stack: &mut HashSet<PathBuf>) -> Result<Value> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if !stack.insert(canonical.clone()) {
        return Err(Error::msg(format!(
            "config extends cycle detected at {}",
            canonical.display()
        )));
    }

    let data = fs::read_to_string(path)
        .map_err(|e| Error::msg(format!("failed to read config {}: {e}", path.display())))?;
    let mut value: Value = toml::from_str(&data)
        .map_err(|e| Error::msg(format!("TOML parse error in {}: {e}", path.display())))?;

    // Parent first, then imports in order, then this file on top.
    let mut out = Value::Table(Default::default());
    if let Some(ext) = value.get("extends").and_then(Value::as_str) {
        out = load_value_inner(&resolve_ref_path(path, ext), stack)?;
    }
    for imp in parse_imports(path, &value)? {
        let loaded = load_value_inner(&resolve_ref_path(path, &imp), stack)?;
        merge_values(&mut out, loaded);
    }
    if let Some(tbl) = value.as_table_mut() {
        tbl.remove("extends");
        tbl.remove("imports");
    }
    merge_values(&mut out, value);

    stack.remove(&canonical);
    Ok(out)
}

pub fn load(path: &Path) -> Result<ConfigDoc> {
    let mut stack = HashSet::<PathBuf>::new();
    let value = load_value_inner(path, &mut stack)?;
    Ok(ConfigDoc {
        path: path.to_path_buf(),
        value,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub registry_refresh_ms: u64,
    pub status_poll_ms: u64,
    pub max_poll_failures: u32,
    pub artifact_on_start: ArtifactOnStart,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            request_timeout_secs: 30,
            registry_refresh_ms: 10_000,
            status_poll_ms: 2_000,
            max_poll_failures: 0,
            artifact_on_start: ArtifactOnStart::Hide,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecordingConfig {
    pub colors: ColorScheme,
    pub inverted: bool,
    pub symfs: bool,
    pub viewport_width: u32,
    pub width_margin: u32,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            colors: ColorScheme::Hot,
            inverted: true,
            symfs: false,
            viewport_width: 1280,
            width_margin: 20,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FurnaceConfig {
    pub client: ClientConfig,
    pub recording: RecordingConfig,
    pub source: Option<PathBuf>,
}

impl FurnaceConfig {
    pub fn from_doc(doc: &ConfigDoc) -> Result<Self> {
        if let Some(tbl) = doc.value.as_table() {
            for key in tbl.keys() {
                if key != "client" && key != "recording" {
                    return Err(Error::msg(format!(
                        "unknown section '{key}' in {}",
                        doc.path.display()
                    )));
                }
            }
        }
        let cfg = Self {
            client: doc.deserialize_path("client")?.unwrap_or_default(),
            recording: doc.deserialize_path("recording")?.unwrap_or_default(),
            source: Some(doc.path.clone()),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Explicit path must exist; otherwise `furnace.toml` in the working
    /// directory is used when present, and built-in defaults when not.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let mut cfg = match explicit {
            Some(path) => Self::from_doc(&load(path)?)?,
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_FILE);
                if fallback.is_file() {
                    Self::from_doc(&load(fallback)?)?
                } else {
                    Self::default()
                }
            }
        };
        cfg.apply_env(|key| std::env::var(key).ok());
        match &cfg.source {
            Some(p) => tracing::debug!(path = %p.display(), base_url = %cfg.client.base_url, "config loaded"),
            None => tracing::debug!(base_url = %cfg.client.base_url, "using default config"),
        }
        Ok(cfg)
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(URL_ENV) {
            let url = url.trim();
            if !url.is_empty() {
                self.client.base_url = url.to_string();
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.client.base_url.trim().is_empty() {
            return Err(Error::msg("client.base_url must not be empty"));
        }
        if self.client.request_timeout_secs == 0 {
            return Err(Error::msg("client.request_timeout_secs must be > 0"));
        }
        if self.client.registry_refresh_ms == 0 || self.client.status_poll_ms == 0 {
            return Err(Error::msg(
                "client.registry_refresh_ms and client.status_poll_ms must be > 0",
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.client.request_timeout_secs)
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            registry_refresh: Duration::from_millis(self.client.registry_refresh_ms),
            status_poll: Duration::from_millis(self.client.status_poll_ms),
            width_margin: self.recording.width_margin,
            max_poll_failures: self.client.max_poll_failures,
            artifact_on_start: self.client.artifact_on_start,
        }
    }

    pub fn options(&self) -> RecordingOptions {
        RecordingOptions::default()
            .with_colors(self.recording.colors)
            .with_inverted(self.recording.inverted)
            .with_symfs(self.recording.symfs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_overrides_leaves_and_keeps_siblings() {
        let mut base: Value = toml::from_str("[client]\nbase_url = \"a\"\nmax_poll_failures = 3\n").unwrap();
        let child: Value = toml::from_str("[client]\nbase_url = \"b\"\n").unwrap();
        merge_values(&mut base, child);
        assert_eq!(base["client"]["base_url"].as_str(), Some("b"));
        assert_eq!(base["client"]["max_poll_failures"].as_integer(), Some(3));
    }

    #[test]
    fn env_url_overrides_file() {
        let mut cfg = FurnaceConfig::default();
        cfg.apply_env(|k| (k == URL_ENV).then(|| "http://proxy:9000".to_string()));
        assert_eq!(cfg.client.base_url, "http://proxy:9000");

        cfg.apply_env(|_| Some("   ".to_string()));
        assert_eq!(cfg.client.base_url, "http://proxy:9000");
    }

    #[test]
    fn defaults_map_to_session_settings() {
        let cfg = FurnaceConfig::default();
        let s = cfg.session_settings();
        assert_eq!(s.registry_refresh, Duration::from_secs(10));
        assert_eq!(s.status_poll, Duration::from_secs(2));
        assert_eq!(s.width_margin, 20);
        assert_eq!(cfg.options(), RecordingOptions::default());
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let mut cfg = FurnaceConfig::default();
        cfg.client.status_poll_ms = 0;
        assert!(cfg.validate().is_err());
    }
}
