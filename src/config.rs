use crate::error::{MirrorError, Result};
use crate::probe::PROBE_TIMEOUT;
use crate::types::Mirror;
use directories::ProjectDirs;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{error, info, warn};

// Include the JSON file at compile time
const MIRRORS_JSON: &str = include_str!("../assets/mirrors.json");

// Global cache for parsed mirrors
static MIRRORS_CACHE: OnceLock<HashMap<String, Vec<Mirror>>> = OnceLock::new();

fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "mirrank").map(|dirs| dirs.config_dir().to_path_buf())
}

pub fn parse_candidates(json: &str) -> Result<HashMap<String, Vec<Mirror>>> {
    Ok(serde_json::from_str(json)?)
}

/// Retrieve the built-in mirror candidates for a distribution key
/// Strategy:
/// 1. Try to load from User Config (~/.config/mirrank/mirrors.json)
/// 2. Fallback to built-in assets/mirrors.json
pub fn get_candidates(distro_key: &str) -> Vec<Mirror> {
    let mirrors = MIRRORS_CACHE.get_or_init(|| {
        // 1. Try local config
        if let Some(path) = config_dir().map(|dir| dir.join("mirrors.json")) {
            if path.exists() {
                let parsed = fs::read_to_string(&path)
                    .map_err(MirrorError::from)
                    .and_then(|content| parse_candidates(&content));
                match parsed {
                    Ok(parsed) => {
                        info!(path = %path.display(), "loaded mirrors from local config");
                        return parsed;
                    }
                    Err(e) => warn!(path = %path.display(), error = %e, "ignoring local mirrors file"),
                }
            }
        }

        // 2. Fallback
        parse_candidates(MIRRORS_JSON).unwrap_or_else(|e| {
            error!(error = %e, "built-in mirror list is malformed");
            HashMap::new()
        })
    });

    mirrors.get(distro_key).cloned().unwrap_or_default()
}

/// Defaults read from `config.toml`; command-line flags take precedence.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Probe rounds per run
    pub rounds: u32,
    /// Per-probe timeout in seconds
    pub timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            rounds: 1,
            timeout_secs: PROBE_TIMEOUT.as_secs(),
        }
    }
}

impl Settings {
    /// Load `~/.config/mirrank/config.toml`, or defaults when it is absent.
    pub fn load() -> Result<Self> {
        match config_dir() {
            Some(dir) => Self::load_from(&dir.join("config.toml")),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        settings.validate()?;
        info!(path = %path.display(), "loaded settings");
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.rounds == 0 {
            return Err(MirrorError::InvalidRounds(self.rounds));
        }
        if self.timeout_secs == 0 {
            return Err(MirrorError::InvalidTimeout(self.timeout()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
