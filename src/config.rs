use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

pub const ENV_BOT_TOKEN: &str = "BOT_TOKEN";
pub const ENV_GEMINI_API_KEY: &str = "GEMINI_API_KEY";
pub const ENV_PORT: &str = "PORT";
pub const ENV_GEMINI_MODEL: &str = "GEMINI_MODEL";
pub const ENV_GEMINI_BASE_URL: &str = "GEMINI_BASE_URL";
pub const ENV_GEMINI_TIMEOUT_SECS: &str = "GEMINI_TIMEOUT_SECS";
pub const ENV_PORT_FALLBACK: &str = "PORT_FALLBACK";
pub const ENV_ERROR_DETAIL: &str = "ERROR_DETAIL";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub gemini: GeminiConfig,
    #[serde(default)]
    pub liveness: LivenessConfig,
    #[serde(default)]
    pub relay: RelayConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeminiConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LivenessConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Allow binding an ephemeral port when `port` is already taken.
    /// Must stay off where the hosting platform requires the exact port.
    #[serde(default)]
    pub port_fallback: bool,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            port_fallback: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RelayConfig {
    /// Put the raw inference error into the chat reply. Debug use only.
    #[serde(default)]
    pub error_detail: bool,
}

fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_port() -> u16 {
    10000
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("{name} must be a boolean flag, got {other:?}"),
    }
}

impl Config {
    /// Load configuration from the process environment, optionally layered
    /// over a TOML file.
    pub fn from_env(path: Option<&Path>) -> Result<Self> {
        Self::load(path, |name| std::env::var(name).ok())
    }

    /// Read the optional TOML file, overlay `env`, then validate.
    /// Credentials must be present after the overlay or loading fails.
    pub fn load<F>(path: Option<&Path>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?;
                toml::from_str(&content)
                    .with_context(|| format!("Failed to parse config file: {}", path.display()))?
            }
            None => Config::default(),
        };

        config.apply_env(&env)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env<F>(&mut self, env: &F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Empty values count as unset.
        let var = |name: &str| env(name).filter(|v| !v.trim().is_empty());

        if let Some(token) = var(ENV_BOT_TOKEN) {
            self.telegram.bot_token = token;
        }
        if let Some(key) = var(ENV_GEMINI_API_KEY) {
            self.gemini.api_key = key;
        }
        if let Some(model) = var(ENV_GEMINI_MODEL) {
            self.gemini.model = model.trim().to_string();
        }
        if let Some(url) = var(ENV_GEMINI_BASE_URL) {
            self.gemini.base_url = url.trim().to_string();
        }
        if let Some(secs) = var(ENV_GEMINI_TIMEOUT_SECS) {
            self.gemini.timeout_secs = secs.trim().parse().with_context(|| {
                format!("{ENV_GEMINI_TIMEOUT_SECS} must be a number of seconds, got {secs:?}")
            })?;
        }
        if let Some(port) = var(ENV_PORT) {
            self.liveness.port = port
                .trim()
                .parse()
                .with_context(|| format!("{ENV_PORT} must be a port number, got {port:?}"))?;
        }
        if let Some(flag) = var(ENV_PORT_FALLBACK) {
            self.liveness.port_fallback = parse_flag(ENV_PORT_FALLBACK, &flag)?;
        }
        if let Some(flag) = var(ENV_ERROR_DETAIL) {
            self.relay.error_detail = parse_flag(ENV_ERROR_DETAIL, &flag)?;
        }

        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.trim().is_empty() {
            bail!("{ENV_BOT_TOKEN} missing");
        }
        if self.gemini.api_key.trim().is_empty() {
            bail!("{ENV_GEMINI_API_KEY} missing");
        }
        if self.gemini.model.trim().is_empty() {
            bail!("Gemini model name must not be empty");
        }
        if self.gemini.timeout_secs == 0 {
            bail!("{ENV_GEMINI_TIMEOUT_SECS} must be greater than zero");
        }
        Ok(())
    }
}
