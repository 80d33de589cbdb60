use crate::country;
use crate::error::{MirrorError, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// 传输协议, 以知名端口标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Protocol {
    Http,
    Https,
    Ftp,
    Rsync,
}

impl Protocol {
    /// Well-known port used to identify the protocol.
    pub fn port(self) -> u16 {
        match self {
            Protocol::Http => 80,
            Protocol::Https => 443,
            Protocol::Ftp => 21,
            Protocol::Rsync => 22,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::Ftp => "ftp",
            Protocol::Rsync => "rsync",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            "ftp" => Ok(Protocol::Ftp),
            "rsync" => Ok(Protocol::Rsync),
            _ => Err(MirrorError::UnknownProtocol(s.to_string())),
        }
    }
}

impl TryFrom<String> for Protocol {
    type Error = MirrorError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Protocol> for String {
    fn from(p: Protocol) -> Self {
        p.as_str().to_string()
    }
}

/// 镜像源定义
///
/// Address and locale are fixed once the mirror is built; sources construct
/// mirrors and the ranking engine only reads them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "MirrorRecord", into = "MirrorRecord")]
pub struct Mirror {
    url: Url,
    protocol: Protocol,
    country: Option<String>,
    country_code: Option<String>,
    architectures: Option<String>,
}

impl Mirror {
    /// Parse `url` and infer the protocol from its scheme.
    pub fn new(url: &str) -> Result<Self> {
        let parsed = Url::parse(url.trim()).map_err(|e| MirrorError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        let protocol = parsed.scheme().parse()?;

        Ok(Self {
            url: parsed,
            protocol,
            country: None,
            country_code: None,
            architectures: None,
        })
    }

    pub fn with_country(mut self, country: &str, country_code: Option<&str>) -> Self {
        self.country = Some(country.to_string());
        self.country_code = country_code
            .map(|c| c.to_uppercase())
            .or_else(|| country::country_code(country).map(str::to_string));
        self
    }

    pub fn with_architectures(mut self, architectures: &str) -> Self {
        self.architectures = Some(architectures.to_string());
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn country(&self) -> Option<&str> {
        self.country.as_deref()
    }

    pub fn country_code(&self) -> Option<&str> {
        self.country_code.as_deref()
    }

    pub fn architectures(&self) -> Option<&str> {
        self.architectures.as_deref()
    }

    /// Matches either the country name or the two-letter code, ignoring case.
    pub fn is_in_country(&self, country: &str) -> bool {
        let matches = |v: &Option<String>| {
            v.as_deref()
                .is_some_and(|v| v.eq_ignore_ascii_case(country.trim()))
        };
        matches(&self.country) || matches(&self.country_code)
    }
}

impl fmt::Display for Mirror {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// Wire form of a mirror in JSON mirror lists.
#[derive(Serialize, Deserialize)]
struct MirrorRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    country_code: Option<String>,
    url: String,
    #[serde(default)]
    protocol: Option<Protocol>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    architectures: Option<String>,
}

impl TryFrom<MirrorRecord> for Mirror {
    type Error = MirrorError;

    fn try_from(record: MirrorRecord) -> Result<Self> {
        let mut mirror = Mirror::new(&record.url)?;
        // An explicit protocol wins over the URL scheme
        if let Some(protocol) = record.protocol {
            mirror.protocol = protocol;
        }
        mirror.country = record.country.filter(|c| !c.is_empty());
        mirror.country_code = record
            .country_code
            .filter(|c| !c.is_empty())
            .map(|c| c.to_uppercase())
            .or_else(|| {
                let country = mirror.country.as_deref()?;
                country::country_code(country).map(str::to_string)
            });
        mirror.architectures = record.architectures.filter(|a| !a.is_empty());
        Ok(mirror)
    }
}

impl From<Mirror> for MirrorRecord {
    fn from(m: Mirror) -> Self {
        Self {
            country: m.country,
            country_code: m.country_code,
            url: m.url.to_string(),
            protocol: Some(m.protocol),
            architectures: m.architectures,
        }
    }
}

/// 单次测速结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// A full response was received.
    Reached(Duration),
    /// Timeout or connection error; carries the time spent until the failure.
    Failed(Duration),
    /// The protocol cannot be probed. No network call was made.
    Unsupported,
}

impl ProbeOutcome {
    /// Duration recorded as a sample; `Unsupported` is `Duration::MAX`.
    pub fn duration(&self) -> Duration {
        match self {
            ProbeOutcome::Reached(d) | ProbeOutcome::Failed(d) => *d,
            ProbeOutcome::Unsupported => Duration::MAX,
        }
    }

    pub fn is_measured(&self) -> bool {
        !matches!(self, ProbeOutcome::Unsupported)
    }
}

/// Per-mirror statistics for one ranking run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MirrorStatistics {
    #[serde(rename = "last_response_ns", serialize_with = "serialize_nanos")]
    pub last_response: Duration,
    /// `None` until a measured sample exists; such mirrors rank last.
    #[serde(
        rename = "avg_response_ns",
        serialize_with = "serialize_opt_nanos",
        skip_serializing_if = "Option::is_none"
    )]
    pub avg_response: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reachable: Option<bool>,
}

fn saturating_nanos(d: &Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

fn serialize_nanos<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(saturating_nanos(d))
}

fn serialize_opt_nanos<S: Serializer>(
    d: &Option<Duration>,
    s: S,
) -> std::result::Result<S::Ok, S::Error> {
    match d {
        Some(d) => s.serialize_u64(saturating_nanos(d)),
        None => s.serialize_none(),
    }
}

/// A mirror paired with its statistics, the unit handed to output code.
#[derive(Debug, Clone, Serialize)]
pub struct MirrorReport<'a> {
    #[serde(flatten)]
    pub mirror: &'a Mirror,
    pub statistics: &'a MirrorStatistics,
}
