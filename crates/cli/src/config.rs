use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::debug;

use deltaflow_core::config::DEFAULT_COZE_BOT_ID;

/// CLI configuration loaded from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliConfig {
    /// Agent bot id
    #[serde(default)]
    pub bot_id: Option<String>,

    /// Relay base URL; when set, chat goes through the relay
    #[serde(default)]
    pub relay_url: Option<String>,

    /// Bearer token sent to the relay
    #[serde(default)]
    pub relay_token: Option<String>,

    /// API keys keyed by service name ("coze", "copywriting")
    #[serde(default)]
    pub api_keys: HashMap<String, String>,
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

impl CliConfig {
    /// Return the default config directory path: ~/.config/deltaflow/
    pub fn default_config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("could not determine user config directory")?
            .join("deltaflow");
        Ok(config_dir)
    }

    /// Return the default config file path.
    pub fn default_config_path() -> Result<PathBuf> {
        Ok(Self::default_config_dir()?.join("config.toml"))
    }

    /// Load config from the given path, or the default path.
    /// Returns default config if the file does not exist.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let config_path = match path {
            Some(p) => PathBuf::from(p),
            None => Self::default_config_path()?,
        };

        if config_path.exists() {
            debug!(?config_path, "Loading config");
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("failed to read config: {}", config_path.display()))?;
            Self::parse(&content)
                .with_context(|| format!("failed to parse config: {}", config_path.display()))
        } else {
            debug!(?config_path, "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Resolve an API key for the given service.
    /// Priority: cli_override > env var > config file.
    pub fn resolve_api_key(&self, service: &str, cli_override: Option<&str>) -> Option<String> {
        // 1. CLI argument
        if let Some(key) = cli_override {
            return Some(key.to_string());
        }

        // 2. Environment variable
        let env_vars: &[&str] = match service {
            "coze" => &["COZE_API_KEY"],
            "copywriting" => &["COPYWRITING_API_KEY", "SILICONFLOW_API_KEY"],
            _ => &[],
        };
        if let Some(key) = env_vars.iter().find_map(|k| env_nonempty(k)) {
            return Some(key);
        }

        // 3. Config file
        self.api_keys.get(service).cloned()
    }

    /// Priority: cli_override > COZE_BOT_ID > config file > built-in default.
    pub fn resolve_bot_id(&self, cli_override: Option<&str>) -> String {
        cli_override
            .map(str::to_string)
            .or_else(|| env_nonempty("COZE_BOT_ID"))
            .or_else(|| self.bot_id.clone())
            .unwrap_or_else(|| DEFAULT_COZE_BOT_ID.to_string())
    }

    /// Priority: cli_override > DELTAFLOW_RELAY_URL > config file.
    pub fn resolve_relay(&self, cli_override: Option<&str>) -> Option<String> {
        cli_override
            .map(str::to_string)
            .or_else(|| env_nonempty("DELTAFLOW_RELAY_URL"))
            .or_else(|| self.relay_url.clone())
    }

    pub fn resolve_relay_token(&self) -> Option<String> {
        env_nonempty("DELTAFLOW_RELAY_TOKEN").or_else(|| self.relay_token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CliConfig::default();
        assert!(config.bot_id.is_none());
        assert!(config.api_keys.is_empty());
    }

    #[test]
    fn test_parse_file() {
        let config = CliConfig::parse(
            r#"
            bot_id = "123"
            relay_url = "http://localhost:3001"

            [api_keys]
            coze = "pat_file"
            "#,
        )
        .unwrap();
        assert_eq!(config.bot_id.as_deref(), Some("123"));
        assert_eq!(config.relay_url.as_deref(), Some("http://localhost:3001"));
        assert_eq!(config.api_keys["coze"], "pat_file");
    }

    #[test]
    fn test_resolve_api_key_from_config() {
        // A service with no env var mapping, so the config file value is used.
        let mut config = CliConfig::default();
        config
            .api_keys
            .insert("custom-service".to_string(), "sk-test-123".to_string());
        assert_eq!(
            config.resolve_api_key("custom-service", None),
            Some("sk-test-123".to_string())
        );
    }

    #[test]
    fn test_resolve_api_key_cli_override() {
        let config = CliConfig::default();
        assert_eq!(
            config.resolve_api_key("coze", Some("cli-key")),
            Some("cli-key".to_string())
        );
    }

    #[test]
    fn test_resolve_bot_id_cli_override() {
        let config = CliConfig {
            bot_id: Some("from-file".into()),
            ..Default::default()
        };
        assert_eq!(config.resolve_bot_id(Some("from-flag")), "from-flag");
    }

    #[test]
    fn test_resolve_relay_cli_override() {
        let config = CliConfig {
            relay_url: Some("http://file".into()),
            ..Default::default()
        };
        assert_eq!(config.resolve_relay(Some("http://flag")).as_deref(), Some("http://flag"));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = CliConfig::load(Some("/nonexistent/deltaflow/config.toml")).unwrap();
        assert!(config.relay_url.is_none());
    }

    #[test]
    fn test_toml_roundtrip() {
        let mut config = CliConfig::default();
        config.bot_id = Some("42".into());
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: CliConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.bot_id, config.bot_id);
    }
}
