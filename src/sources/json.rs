use crate::error::{MirrorError, Result};
use crate::sources::Distribution;
use crate::traits::MirrorSource;
use crate::types::Mirror;
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use tokio::fs;
use tracing::{info, warn};

/// Reads `{"urls": [{"url": ..., "country": ..., ...}, ...]}`.
pub struct JsonFileSource {
    distribution: Distribution,
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(distribution: Distribution, path: PathBuf) -> Self {
        Self { distribution, path }
    }
}

/// Entries that fail to parse are skipped, not fatal.
pub fn parse_mirror_list(content: &str) -> Result<Vec<Mirror>> {
    let doc: Value = serde_json::from_str(content)?;
    let urls = doc
        .get("urls")
        .and_then(Value::as_array)
        .ok_or_else(|| MirrorError::Custom("mirror list has no \"urls\" array".to_string()))?;

    let mirrors = urls
        .iter()
        .enumerate()
        .filter_map(|(i, entry)| match serde_json::from_value::<Mirror>(entry.clone()) {
            Ok(m) => Some(m),
            Err(e) => {
                warn!(entry = i, error = %e, "skipping invalid mirror entry");
                None
            }
        })
        .collect();

    Ok(mirrors)
}

#[async_trait]
impl MirrorSource for JsonFileSource {
    fn name(&self) -> &str {
        self.distribution.name()
    }

    async fn mirrors(&self) -> Result<Vec<Mirror>> {
        let content = fs::read_to_string(&self.path).await?;
        let mirrors = parse_mirror_list(&content)?;
        info!(path = %self.path.display(), count = mirrors.len(), "read mirrors from JSON file");
        Ok(mirrors)
    }
}
