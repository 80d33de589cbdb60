pub mod builtin;
pub mod json;
pub mod text;

use crate::error::{MirrorError, Result};
use crate::traits::MirrorSource;
use crate::types::Mirror;
use clap::ValueEnum;
use std::fmt;
use std::path::PathBuf;

pub const SUPPORTED_DISTRIBUTIONS: &[&str] = &["Ubuntu", "Debian", "Arch"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Distribution {
    Ubuntu,
    Debian,
    Arch,
    /// Any other distribution; its mirrors must come from a file.
    Custom(String),
}

impl Distribution {
    pub fn parse(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "ubuntu" => Distribution::Ubuntu,
            "debian" => Distribution::Debian,
            "arch" | "archlinux" => Distribution::Arch,
            _ => Distribution::Custom(name.trim().to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Distribution::Ubuntu => "Ubuntu",
            Distribution::Debian => "Debian",
            Distribution::Arch => "Arch",
            Distribution::Custom(name) => name,
        }
    }

    /// Key of the built-in candidate list, if there is one.
    pub fn builtin_key(&self) -> Option<&'static str> {
        match self {
            Distribution::Ubuntu => Some("ubuntu"),
            Distribution::Debian => Some("debian"),
            Distribution::Arch => Some("arch"),
            Distribution::Custom(_) => None,
        }
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where the mirror list is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceKind {
    /// Built-in candidates (or the user's mirrors.json override)
    Builtin,
    /// JSON file with a top-level "urls" array
    Json,
    /// Text file, one URL or `Server = URL` line per mirror
    Txt,
}

pub fn get_source(
    distribution: Distribution,
    kind: SourceKind,
    file: Option<PathBuf>,
) -> Result<Box<dyn MirrorSource>> {
    match (kind, file) {
        (SourceKind::Builtin, Some(path)) => Err(MirrorError::InvalidSource(format!(
            "file {:?} given without a file source type (json or txt)",
            path
        ))),
        (SourceKind::Builtin, None) => {
            if distribution.builtin_key().is_none() {
                return Err(MirrorError::UnknownDistribution(format!(
                    "No built-in mirrors for '{}'. Available: {}. Use a json or txt source instead.",
                    distribution,
                    SUPPORTED_DISTRIBUTIONS.join(", ")
                )));
            }
            Ok(Box::new(builtin::BuiltinSource::new(distribution)))
        }
        (SourceKind::Json, Some(path)) => Ok(Box::new(json::JsonFileSource::new(distribution, path))),
        (SourceKind::Txt, Some(path)) => Ok(Box::new(text::TextFileSource::new(distribution, path))),
        (kind, None) => Err(MirrorError::InvalidSource(format!(
            "no mirror file given for source type {:?}",
            kind
        ))),
    }
}

/// Keep mirrors located in `country` (name or two-letter code).
pub fn filter_by_country(mirrors: Vec<Mirror>, country: &str) -> Vec<Mirror> {
    mirrors
        .into_iter()
        .filter(|m| m.is_in_country(country))
        .collect()
}
