//! TOML configuration for a transpose group.
//!
//! ```toml
//! [bridge]
//! poll_batch = 64
//! idle_wait_ms = 100
//! idle_backoff_us = 50
//!
//! [limits]
//! max_beamlets = 512
//! max_metadata_bytes = 4096
//! max_flag_ranges = 1024
//! max_block_samples = 1048576
//!
//! [block]
//! bytes_per_sample = 4
//!
//! [[stations]]
//! rank = 0
//! beamlets = [0, 1, 2, 3]
//!
//! [[distribution]]
//! rank = 4
//! beamlets = [0, 1, 2]
//! ```
//!
//! Every section is optional except `stations` and `distribution`, which
//! describe the group and are checked by [`TransposeConfig::validate`].

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use transport::Rank;
use transport_bridge::BridgeConfig;
use transpose_codecs::HeaderLimits;

use crate::distribution::{BeamletDistribution, StationLayout, Topology};
use crate::error::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransposeConfig {
    pub bridge: BridgeSection,
    pub limits: LimitsSection,
    pub block: BlockSection,
    pub stations: Vec<StationSection>,
    pub distribution: Vec<DistributionSection>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSection {
    /// Outstanding requests tested per poll call.
    pub poll_batch: usize,
    /// Longest sleep while nothing is outstanding.
    pub idle_wait_ms: u64,
    /// Pause after a poll that completed nothing. 0 = yield.
    pub idle_backoff_us: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsSection {
    pub max_beamlets: u32,
    pub max_metadata_bytes: u32,
    pub max_flag_ranges: u32,
    pub max_block_samples: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockSection {
    pub bytes_per_sample: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationSection {
    pub rank: u32,
    /// Global beamlet id per station-local slot.
    pub beamlets: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionSection {
    pub rank: u32,
    /// Global beamlet ids consumed by `rank`, in delivery order.
    pub beamlets: Vec<u32>,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for BridgeSection {
    fn default() -> Self {
        let defaults = BridgeConfig::default();
        Self {
            poll_batch: defaults.poll_batch,
            idle_wait_ms: defaults.idle_wait.as_millis() as u64,
            idle_backoff_us: defaults.idle_backoff.as_micros() as u64,
        }
    }
}

impl Default for LimitsSection {
    fn default() -> Self {
        let defaults = HeaderLimits::default();
        Self {
            max_beamlets: defaults.max_beamlets,
            max_metadata_bytes: defaults.max_metadata_bytes,
            max_flag_ranges: defaults.max_flag_ranges,
            max_block_samples: defaults.max_block_samples,
        }
    }
}

impl Default for BlockSection {
    fn default() -> Self {
        // Complex 16-bit samples.
        Self {
            bytes_per_sample: 4,
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl TransposeConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: TransposeConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates the TOML file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(
            path = %path.display(),
            stations = config.stations.len(),
            destinations = config.distribution.len(),
            "loaded transpose configuration"
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.topology().map(drop)
    }

    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            poll_batch: self.bridge.poll_batch,
            idle_wait: Duration::from_millis(self.bridge.idle_wait_ms),
            idle_backoff: Duration::from_micros(self.bridge.idle_backoff_us),
        }
    }

    pub fn header_limits(&self) -> HeaderLimits {
        HeaderLimits {
            max_beamlets: self.limits.max_beamlets,
            max_metadata_bytes: self.limits.max_metadata_bytes,
            max_flag_ranges: self.limits.max_flag_ranges,
            max_block_samples: self.limits.max_block_samples,
        }
    }

    /// Builds the validated group layout shared by senders and receivers.
    pub fn topology(&self) -> Result<Topology, ConfigError> {
        if self.bridge.poll_batch == 0 {
            return Err(ConfigError::ZeroLimit("bridge.poll_batch"));
        }
        if self.limits.max_beamlets == 0 {
            return Err(ConfigError::ZeroLimit("limits.max_beamlets"));
        }
        if self.limits.max_flag_ranges == 0 {
            return Err(ConfigError::ZeroLimit("limits.max_flag_ranges"));
        }
        if self.limits.max_block_samples == 0 {
            return Err(ConfigError::ZeroLimit("limits.max_block_samples"));
        }

        let distribution = BeamletDistribution::new(
            self.distribution
                .iter()
                .map(|entry| (Rank(entry.rank), entry.beamlets.clone())),
        )?;
        let stations = self
            .stations
            .iter()
            .map(|entry| StationLayout::new(Rank(entry.rank), entry.beamlets.clone()))
            .collect();
        Topology::new(
            stations,
            distribution,
            self.header_limits(),
            self.block.bytes_per_sample,
        )
    }
}
