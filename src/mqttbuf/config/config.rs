use serde::Deserialize;

use crate::mqttbuf::common::{Error, Result};

/// Tunable sizing knobs for the buffering core. Unlike the rest of a client's
/// configuration (broker address, keepalive interval, credentials) these are
/// pure capacity hints: a socket and protocol layer can run correctly with the
/// defaults, and only needs to override them to trade memory for fewer
/// reallocations on constrained devices.
#[derive(Debug, Clone, Deserialize)]
pub struct BufferConfig {
    /// Seed capacity for the default inbound queue's payload buffer.
    #[serde(default = "default_initial_buffer_size")]
    pub initial_buffer_size: usize,
    /// Upper bound on the number of scatter/gather segments a single
    /// `PendingWrite` may carry. The protocol's largest frame (a QoS 0
    /// PUBLISH split into header/properties/topic/payload) needs 4.
    #[serde(default = "default_max_scatter_segments")]
    pub max_scatter_segments: usize,
}

const fn default_initial_buffer_size() -> usize { 1000 }
const fn default_max_scatter_segments() -> usize { 4 }

impl Default for BufferConfig {
    fn default() -> Self {
        BufferConfig {
            initial_buffer_size: default_initial_buffer_size(),
            max_scatter_segments: default_max_scatter_segments(),
        }
    }
}

impl BufferConfig {
    /// Parses a `BufferConfig` from a YAML document, applying the same
    /// defaults as [`BufferConfig::default`] for any field left unspecified.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: BufferConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.max_scatter_segments < 4 {
            return Err(Error::new("max_scatter_segments must be at least 4"));
        }
        if self.initial_buffer_size == 0 {
            return Err(Error::new("initial_buffer_size must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_env_log::test;

    #[test]
    fn test_default_config_is_valid() {
        let config = BufferConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_yaml_applies_defaults() {
        let config = BufferConfig::from_yaml_str("initial_buffer_size: 2048").unwrap();
        assert_eq!(config.initial_buffer_size, 2048);
        assert_eq!(config.max_scatter_segments, 4);
    }

    #[test]
    fn test_rejects_too_few_scatter_segments() {
        let err = BufferConfig::from_yaml_str("max_scatter_segments: 2").unwrap_err();
        assert!(err.to_string().contains("max_scatter_segments"));
    }
}
