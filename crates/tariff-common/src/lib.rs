use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

/// Final, merged process configuration.
///
/// Merge order: CLI > ENV > defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub host: String,
    pub port: u16,
    /// Overall per-request deadline.
    pub request_timeout: Duration,
    /// Idle timeout on upstream stream reads.
    pub stream_idle_timeout: Duration,
    pub dedup_ttl: Duration,
    pub dedup_max_entries: usize,
    pub session_ttl: Duration,
    pub session_max_entries: usize,
    pub rate_limit_cooldown: Duration,
    pub catalog_ttl: Duration,
    pub max_fallback_attempts: u32,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8402,
            request_timeout: Duration::from_millis(180_000),
            stream_idle_timeout: Duration::from_secs(300),
            dedup_ttl: Duration::from_secs(30),
            dedup_max_entries: 256,
            session_ttl: Duration::from_secs(3600),
            session_max_entries: 1024,
            rate_limit_cooldown: Duration::from_secs(60),
            catalog_ttl: Duration::from_secs(3600),
            max_fallback_attempts: 3,
        }
    }
}

impl GlobalConfig {
    /// Apply `TARIFF_PORT` on top of the defaults. CLI flags override later.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(value) = std::env::var("TARIFF_PORT")
            && let Ok(port) = value.trim().parse::<u16>()
        {
            config.port = port;
        }
        config
    }
}

/// Whether registration is short-circuited entirely (`TARIFF_DISABLED`).
pub fn is_disabled() -> bool {
    std::env::var("TARIFF_DISABLED")
        .map(|value| {
            let value = value.trim();
            !value.is_empty() && value != "0" && !value.eq_ignore_ascii_case("false")
        })
        .unwrap_or(false)
}

/// One provider's access configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderKeyEntry {
    pub api_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// Ready-made key set consumed by the core. The core never writes this.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeysConfig {
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderKeyEntry>,
}

impl ApiKeysConfig {
    pub fn get(&self, provider: &str) -> Option<&ProviderKeyEntry> {
        self.providers
            .get(provider)
            .filter(|entry| !entry.api_key.trim().is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.providers
            .values()
            .all(|entry| entry.api_key.trim().is_empty())
    }

    pub fn insert(&mut self, provider: &str, api_key: String, base_url: Option<String>) {
        self.providers
            .insert(provider.to_string(), ProviderKeyEntry { api_key, base_url });
    }

    pub fn configured_providers(&self) -> Vec<String> {
        self.providers
            .iter()
            .filter(|(_, entry)| !entry.api_key.trim().is_empty())
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// `~/.tariff/tariff/config.json`, shaped `{providers: {<id>: {apiKey, baseUrl?}}}`.
pub fn config_file_path() -> Option<PathBuf> {
    let home = std::env::var_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".tariff")
            .join("tariff")
            .join("config.json"),
    )
}

pub fn load_keys_file(path: &PathBuf) -> Result<ApiKeysConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// Env var consulted for each provider id. The resolver downstream does not
/// care which source a key came from.
pub fn provider_env_var(provider: &str) -> Option<&'static str> {
    match provider {
        "openai" => Some("OPENAI_API_KEY"),
        "anthropic" => Some("ANTHROPIC_API_KEY"),
        "google" => Some("GEMINI_API_KEY"),
        "deepseek" => Some("DEEPSEEK_API_KEY"),
        "openrouter" => Some("OPENROUTER_API_KEY"),
        _ => None,
    }
}

/// Assemble the key set: file first, env on top.
pub fn discover_keys(providers: &[&str]) -> ApiKeysConfig {
    let mut keys = config_file_path()
        .filter(|path| path.exists())
        .and_then(|path| load_keys_file(&path).ok())
        .unwrap_or_default();

    for provider in providers {
        let Some(var) = provider_env_var(provider) else {
            continue;
        };
        if let Ok(value) = std::env::var(var) {
            let value = value.trim().to_string();
            if !value.is_empty() {
                let base_url = keys.get(provider).and_then(|entry| entry.base_url.clone());
                keys.insert(provider, value, base_url);
            }
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_file_shape_round_trips() {
        let raw = r#"{"providers":{"openai":{"apiKey":"sk-x"},"google":{"apiKey":"g","baseUrl":"http://localhost:9999"}}}"#;
        let keys: ApiKeysConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(keys.get("openai").unwrap().api_key, "sk-x");
        assert_eq!(
            keys.get("google").unwrap().base_url.as_deref(),
            Some("http://localhost:9999")
        );
        assert!(keys.get("anthropic").is_none());
    }

    #[test]
    fn blank_keys_do_not_count_as_configured() {
        let mut keys = ApiKeysConfig::default();
        keys.insert("openai", "  ".to_string(), None);
        assert!(keys.is_empty());
        assert!(keys.configured_providers().is_empty());
    }
}
