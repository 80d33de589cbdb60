use crate::config;
use crate::error::{MirrorError, Result};
use crate::sources::Distribution;
use crate::traits::MirrorSource;
use crate::types::Mirror;
use async_trait::async_trait;

/// Candidates shipped with the binary, or the user's override file.
pub struct BuiltinSource {
    distribution: Distribution,
}

impl BuiltinSource {
    pub fn new(distribution: Distribution) -> Self {
        Self { distribution }
    }
}

#[async_trait]
impl MirrorSource for BuiltinSource {
    fn name(&self) -> &str {
        self.distribution.name()
    }

    async fn mirrors(&self) -> Result<Vec<Mirror>> {
        let key = self
            .distribution
            .builtin_key()
            .ok_or_else(|| MirrorError::UnknownDistribution(self.distribution.to_string()))?;
        Ok(config::get_candidates(key))
    }
}
