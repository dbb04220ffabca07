use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Optional bearer token sent with every request.
    pub api_key: Option<String>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// Where the session/context cache is persisted between invocations.
    #[serde(default = "default_cache_file")]
    pub cache_file: String,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8080".to_string()
}
fn default_request_timeout() -> u64 {
    30
}
fn default_cache_file() -> String {
    ".fylle/session.json".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            request_timeout_seconds: default_request_timeout(),
            cache_file: default_cache_file(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Path::new("config.yml");
        if !path.exists() {
            anyhow::bail!("config.yml not found. Please create one.");
        }

        let content = fs::read_to_string(path).context("Failed to read config.yml")?;
        let config: Config =
            serde_yaml_ng::from_str(&content).context("Failed to parse config.yml")?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let content = serde_yaml_ng::to_string(self)?;
        fs::write("config.yml", content).context("Failed to write config.yml")?;
        Ok(())
    }
}
