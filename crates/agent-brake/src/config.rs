use anyhow::{Context, Result};
use brake_runtime::{NotificationsConfig, PoliciesConfig, TrustLevel};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Looked up in the working directory when no path is given
const DEFAULT_CONFIG_FILE: &str = "agent-brake.toml";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub policies: PoliciesConfig,

    #[serde(default)]
    pub notifications: NotificationsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentConfig {
    #[serde(default = "default_agent_name")]
    pub name: String,

    #[serde(default)]
    pub trust_level: TrustLevel,
}

fn default_version() -> String {
    "2.0".to_string()
}

fn default_agent_name() -> String {
    "unknown-agent".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            agent: AgentConfig::default(),
            policies: PoliciesConfig::default(),
            notifications: NotificationsConfig::default(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            trust_level: TrustLevel::default(),
        }
    }
}

/// Load config from `path`, else `./agent-brake.toml`, else defaults.
/// `WEBHOOK_URL` fills in a missing webhook.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(path) => Some(path.to_path_buf()),
        None => {
            let local = PathBuf::from(DEFAULT_CONFIG_FILE);
            local.exists().then_some(local)
        }
    };

    let config = match path {
        Some(path) => {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            parse_config(&content, &path)?
        }
        None => Config::default(),
    };

    Ok(with_webhook_fallback(config, std::env::var("WEBHOOK_URL").ok()))
}

fn parse_config(content: &str, path: &Path) -> Result<Config> {
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    if is_json {
        serde_json::from_str(content).context("Failed to parse JSON config")
    } else {
        toml::from_str(content).context("Failed to parse TOML config")
    }
}

fn with_webhook_fallback(mut config: Config, env_url: Option<String>) -> Config {
    if config.notifications.webhook_url.is_none() {
        config.notifications.webhook_url = env_url.filter(|url| !url.trim().is_empty());
    }
    config
}
