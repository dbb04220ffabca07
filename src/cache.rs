use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Identifiers remembered between invocations so the wizard can offer to
/// resume an interrupted onboarding session. Loading never fails hard: a
/// missing or unreadable cache just yields an empty one.
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct SessionCache {
    pub session_id: Option<String>,
    pub context_id: Option<String>,
}

impl SessionCache {
    pub fn load(path: &str) -> Self {
        match fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(cache) => cache,
                Err(e) => {
                    log::warn!("Discarding unreadable session cache at {}: {}", path, e);
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self, path: &str) -> Result<()> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).context("Failed to write session cache")?;
        Ok(())
    }
}
