//! Rank distribution mirrors by response time.
//!
//! A [`RankingEngine`] probes every mirror over one or more rounds of
//! concurrent requests and produces a [`Ranking`]: a full ordering by average
//! response time, or the single best mirror. Mirror lists come from any
//! [`MirrorSource`].

pub mod config;
pub mod country;
pub mod error;
pub mod probe;
pub mod ranking;
pub mod sources;
pub mod traits;
pub mod types;

pub use error::{MirrorError, Result};
pub use probe::{NetworkProber, Prober, PROBE_TIMEOUT};
pub use ranking::{Ranking, RankingEngine};
pub use traits::MirrorSource;
pub use types::{Mirror, MirrorReport, MirrorStatistics, ProbeOutcome, Protocol};
