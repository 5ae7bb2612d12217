//! Engine configuration
//!
//! Loaded from TOML or built in code. Algorithm choices are closed enums so
//! an unknown algorithm name is a parse error rather than a silent default.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{RatchetError, RatchetResult};

/// Upper bound accepted for [`EngineConfig::skipped_key_cache_limit`]
pub const MAX_SKIPPED_KEY_CACHE_LIMIT: u32 = 100_000;

/// Post-quantum KEM parameter set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KemAlgorithm {
    #[default]
    #[serde(rename = "KYBER_768", alias = "KYBER768")]
    Kyber768,
}

/// Post-quantum signature parameter set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
    #[default]
    #[serde(rename = "DILITHIUM_2", alias = "DILITHIUM2")]
    Dilithium2,
}

/// Configuration for a [`SessionManager`](crate::SessionManager)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub kem_algorithm: KemAlgorithm,

    pub signature_algorithm: SignatureAlgorithm,

    /// Minimum messages sent on a chain before the next hybrid ratchet step
    /// is allowed. A step also needs a fresh ratchet key from the peer.
    pub rekey_every_n_messages: u32,

    /// Maximum cached keys for skipped (out-of-order or lost) messages
    pub skipped_key_cache_limit: u32,

    /// Sign every envelope with the identity key. Gives the recipient proof
    /// of authorship at the cost of deniability.
    pub sealed_sender_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kem_algorithm: KemAlgorithm::Kyber768,
            signature_algorithm: SignatureAlgorithm::Dilithium2,
            rekey_every_n_messages: 1,
            skipped_key_cache_limit: 1000,
            sealed_sender_enabled: false,
        }
    }
}

impl EngineConfig {
    pub fn with_rekey_every(mut self, n: u32) -> Self {
        self.rekey_every_n_messages = n;
        self
    }

    pub fn with_skipped_key_cache_limit(mut self, limit: u32) -> Self {
        self.skipped_key_cache_limit = limit;
        self
    }

    pub fn with_sealed_sender(mut self, enabled: bool) -> Self {
        self.sealed_sender_enabled = enabled;
        self
    }

    /// Check value ranges
    pub fn validate(&self) -> RatchetResult<()> {
        if self.rekey_every_n_messages == 0 {
            return Err(RatchetError::Config(
                "rekey_every_n_messages must be at least 1".to_string(),
            ));
        }
        if self.skipped_key_cache_limit == 0 || self.skipped_key_cache_limit > MAX_SKIPPED_KEY_CACHE_LIMIT {
            return Err(RatchetError::Config(format!(
                "skipped_key_cache_limit must be between 1 and {}",
                MAX_SKIPPED_KEY_CACHE_LIMIT
            )));
        }
        Ok(())
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(s: &str) -> RatchetResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| RatchetError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> RatchetResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| RatchetError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&contents)
    }

    pub fn to_toml_string(&self) -> RatchetResult<String> {
        toml::to_string_pretty(self).map_err(|e| RatchetError::Config(e.to_string()))
    }
}
