use std::env;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u16(profile: &str, key: &str, default: u16) -> u16 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub server: ServerConfig,
    pub coze: CozeConfig,
    pub stream: StreamConfig,
    pub copywriting: CopywritingConfig,
    pub http: HttpConfig,
}

/// Well-known env keys that identify a profile when prefixed.
const PROFILE_MARKER_KEYS: &[&str] = &["COZE_API_KEY", "COZE_BOT_ID", "COPYWRITING_API_KEY", "PORT"];

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `DELTAFLOW_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("DELTAFLOW_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            server: ServerConfig::from_env_profiled(p),
            coze: CozeConfig::from_env_profiled(p),
            stream: StreamConfig::from_env_profiled(p),
            copywriting: CopywritingConfig::from_env_profiled(p),
            http: HttpConfig::from_env_profiled(p),
        }
    }

    /// Discover available profiles by scanning env vars for `{PREFIX}_{MARKER_KEY}` patterns.
    /// Always includes "default" (the unprefixed config).
    pub fn available_profiles() -> Vec<String> {
        let mut profiles = std::collections::BTreeSet::new();
        profiles.insert("default".to_string());

        for (key, _) in env::vars() {
            for marker in PROFILE_MARKER_KEYS {
                if let Some(prefix) = key.strip_suffix(&format!("_{}", marker)) {
                    if !prefix.is_empty()
                        && prefix.chars().all(|c| c.is_ascii_uppercase() || c == '_')
                    {
                        profiles.insert(prefix.to_string());
                    }
                }
            }
        }

        profiles.into_iter().collect()
    }

    /// Reject values that would make the stream classifier or server unusable.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.stream.delta_event.trim().is_empty() {
            return Err(CoreError::InvalidConfig {
                key: "STREAM_DELTA_EVENT".into(),
                reason: "must not be empty".into(),
            });
        }
        if self.stream.done_sentinel.trim().is_empty() {
            return Err(CoreError::InvalidConfig {
                key: "STREAM_DONE_SENTINEL".into(),
                reason: "must not be empty".into(),
            });
        }
        if self.server.port == 0 {
            return Err(CoreError::InvalidConfig {
                key: "PORT".into(),
                reason: "must be a non-zero port".into(),
            });
        }
        Ok(())
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  server:      {}:{}", self.server.host, self.server.port);
        tracing::info!(
            "  coze:        base_url={}, bot_id={}, configured={}",
            self.coze.base_url,
            self.coze.bot_id,
            self.coze.is_configured()
        );
        tracing::info!(
            "  stream:      delta_event={}, sentinel={}",
            self.stream.delta_event,
            self.stream.done_sentinel
        );
        tracing::info!(
            "  copywriting: model={}, configured={}",
            self.copywriting.model,
            self.copywriting.is_configured()
        );
        tracing::info!("  http:        connect_timeout={}s", self.http.connect_timeout_secs);
    }

    /// Return a redacted view safe for API responses (no secrets).
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "server": { "host": self.server.host, "port": self.server.port },
            "coze": {
                "base_url": self.coze.base_url,
                "bot_id": self.coze.bot_id,
                "configured": self.coze.is_configured(),
            },
            "stream": {
                "delta_event": self.stream.delta_event,
                "done_sentinel": self.stream.done_sentinel,
                "done_event": self.stream.done_event,
            },
            "copywriting": {
                "base_url": self.copywriting.base_url,
                "model": self.copywriting.model,
                "configured": self.copywriting.is_configured(),
            },
            "http": { "connect_timeout_secs": self.http.connect_timeout_secs },
        })
    }
}

// ── Server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origin: String,
}

impl ServerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "HOST", "0.0.0.0"),
            port: profiled_env_u16(p, "PORT", 3001),
            cors_origin: profiled_env_or(p, "CORS_ORIGIN", "*"),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            cors_origin: "*".to_string(),
        }
    }
}

// ── Coze (agent chat API) ─────────────────────────────────────

pub const DEFAULT_COZE_BASE_URL: &str = "https://api.coze.cn";
pub const DEFAULT_COZE_BOT_ID: &str = "7603961930159505435";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CozeConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub bot_id: String,
}

impl CozeConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            api_key: profiled_env_opt(p, "COZE_API_KEY"),
            base_url: profiled_env_or(p, "COZE_BASE_URL", DEFAULT_COZE_BASE_URL),
            bot_id: profiled_env_or(p, "COZE_BOT_ID", DEFAULT_COZE_BOT_ID),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// The API key, or a `NotConfigured` error naming the env var to set.
    pub fn require_api_key(&self) -> Result<&str, CoreError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| CoreError::NotConfigured("COZE_API_KEY not set".into()))
    }
}

impl Default for CozeConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_COZE_BASE_URL.to_string(),
            bot_id: DEFAULT_COZE_BOT_ID.to_string(),
        }
    }
}

// ── Stream reconstruction ─────────────────────────────────────

pub const DEFAULT_DELTA_EVENT: &str = "conversation.message.delta";
pub const DEFAULT_DONE_SENTINEL: &str = "[DONE]";
pub const DEFAULT_DONE_EVENT: &str = "done";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Event type whose payload carries visible delta text.
    pub delta_event: String,
    /// Non-JSON `data:` value that terminates the stream.
    pub done_sentinel: String,
    /// Event type that terminates the stream regardless of its data.
    pub done_event: Option<String>,
}

impl StreamConfig {
    fn from_env_profiled(p: &str) -> Self {
        let done_event = profiled_env_or(p, "STREAM_DONE_EVENT", DEFAULT_DONE_EVENT);
        Self {
            delta_event: profiled_env_or(p, "STREAM_DELTA_EVENT", DEFAULT_DELTA_EVENT),
            done_sentinel: profiled_env_or(p, "STREAM_DONE_SENTINEL", DEFAULT_DONE_SENTINEL),
            // "none" disables the event-based terminator
            done_event: (!done_event.eq_ignore_ascii_case("none")).then_some(done_event),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            delta_event: DEFAULT_DELTA_EVENT.to_string(),
            done_sentinel: DEFAULT_DONE_SENTINEL.to_string(),
            done_event: Some(DEFAULT_DONE_EVENT.to_string()),
        }
    }
}

// ── Copywriting (OpenAI-compatible completions) ──────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopywritingConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl CopywritingConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            api_key: profiled_env_opt(p, "COPYWRITING_API_KEY")
                .or_else(|| profiled_env_opt(p, "SILICONFLOW_API_KEY")),
            base_url: profiled_env_or(p, "COPYWRITING_BASE_URL", "https://api.siliconflow.cn"),
            model: profiled_env_or(p, "COPYWRITING_MODEL", "deepseek-ai/DeepSeek-V2.5"),
            temperature: profiled_env_or(p, "COPYWRITING_TEMPERATURE", "0.7")
                .parse()
                .unwrap_or(0.7),
            max_tokens: profiled_env_u32(p, "COPYWRITING_MAX_TOKENS", 2048),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

impl Default for CopywritingConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.siliconflow.cn".to_string(),
            model: "deepseek-ai/DeepSeek-V2.5".to_string(),
            temperature: 0.7,
            max_tokens: 2048,
        }
    }
}

// ── HTTP client ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub connect_timeout_secs: u64,
}

impl HttpConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            connect_timeout_secs: profiled_env_u64(p, "HTTP_CONNECT_TIMEOUT_SECS", 10),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { connect_timeout_secs: 10 }
    }
}
