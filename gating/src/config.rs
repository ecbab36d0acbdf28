use crate::error::{GatingError, Result};
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for cluster-centroid (DAFi) gating
///
/// # Example
///
/// ```rust
/// use flow_gating::DafiConfig;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = DafiConfig::new().cluster_count(50usize).seed(7u64).build()?;
/// assert_eq!(config.iterations, 10);
/// # Ok(())
/// # }
/// ```
#[derive(Builder, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[builder(default, build_fn(validate = "Self::validate"))]
#[serde(default)]
pub struct DafiConfig {
    /// Number of seed clusters (K)
    pub cluster_count: usize,

    /// Lloyd iterations (assignment then reduction) run after seeding; at least 1
    pub iterations: usize,

    /// Master seed from which every parameter's seed is derived
    pub seed: u64,
}

impl Default for DafiConfig {
    fn default() -> Self {
        Self {
            cluster_count: 100,
            iterations: 10,
            seed: 1,
        }
    }
}

impl DafiConfigBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        match (self.cluster_count, self.iterations) {
            (Some(0), _) => Err("cluster_count must be at least 1".to_string()),
            (_, Some(0)) => Err("iterations must be at least 1".to_string()),
            _ => Ok(()),
        }
    }
}

impl DafiConfig {
    /// Create a new builder for DafiConfig
    pub fn new() -> DafiConfigBuilder {
        DafiConfigBuilder::default()
    }

    /// # Errors
    /// Returns `GatingError::InvalidArgument` when `cluster_count` or `iterations` is zero
    pub fn validate(&self) -> Result<()> {
        if self.cluster_count == 0 {
            return Err(GatingError::invalid_argument("cluster_count must be at least 1"));
        }
        // without an assignment pass no event belongs to a cluster
        if self.iterations == 0 {
            return Err(GatingError::invalid_argument("iterations must be at least 1"));
        }
        Ok(())
    }

    /// Load a configuration from a JSON file; absent fields keep their defaults
    /// # Errors
    /// Returns an error if the file cannot be read, is not valid JSON, or fails validation
    pub fn from_json_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| GatingError::invalid_argument(format!("DAFi configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }
}
