use crate::error::Result;
use crate::sources::Distribution;
use crate::traits::MirrorSource;
use crate::types::Mirror;
use async_trait::async_trait;
use regex::Regex;
use std::path::PathBuf;
use tokio::fs;
use tracing::{info, warn};

/// Plain mirror list: one URL per line, or pacman-style `Server = URL` lines.
pub struct TextFileSource {
    distribution: Distribution,
    path: PathBuf,
}

impl TextFileSource {
    pub fn new(distribution: Distribution, path: PathBuf) -> Self {
        Self { distribution, path }
    }
}

pub fn parse_mirror_lines(content: &str) -> Result<Vec<Mirror>> {
    // pacman mirrorlist: Server = https://host/archlinux/$repo/os/$arch
    let server_re = Regex::new(r"^Server\s*=\s*(?P<url>\S+)")?;

    let mut mirrors = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let url = match server_re.captures(line) {
            Some(caps) => {
                let url = caps.name("url").map_or("", |m| m.as_str());
                // Keep the mirror root, drop the repo/arch template
                url.split("$repo").next().unwrap_or(url).to_string()
            }
            None => line.to_string(),
        };

        match Mirror::new(&url) {
            Ok(m) => mirrors.push(m),
            Err(e) => warn!(line = lineno + 1, error = %e, "skipping invalid mirror line"),
        }
    }

    Ok(mirrors)
}

#[async_trait]
impl MirrorSource for TextFileSource {
    fn name(&self) -> &str {
        self.distribution.name()
    }

    async fn mirrors(&self) -> Result<Vec<Mirror>> {
        let content = fs::read_to_string(&self.path).await?;
        let mirrors = parse_mirror_lines(&content)?;
        info!(path = %self.path.display(), count = mirrors.len(), "read mirrors from text file");
        Ok(mirrors)
    }
}
