//! Synth configuration
//!
//! Loaded from JSON or built in code. Missing fields take their defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Mt32Error, Result};
use crate::memory::PART_COUNT;

/// Partials on the real hardware
pub const DEFAULT_PARTIAL_COUNT: usize = 32;
/// Output sample rate of the LA32
pub const SAMPLE_RATE: u32 = 32000;

/// Upper bound on the partial pool
const MAX_PARTIAL_COUNT: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct SynthConfig {
    /// Size of the partial pool
    pub partial_count: usize,
    /// Swap left and right output channels
    pub reversed_stereo: bool,
    /// Correct amplitude ramp direction when a sustain level changes
    pub nice_amp_ramp: bool,
    /// Initial master volume, 0-100; `None` keeps the power-on value
    pub master_volume: Option<u8>,
    /// Initial master tune, 0-127 with 64 at 440 Hz; `None` keeps the power-on value
    pub master_tune: Option<u8>,
    /// Partial reserve of parts 1-8 and rhythm; `None` keeps the power-on value
    pub reserve: Option<[u8; PART_COUNT]>,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            partial_count: DEFAULT_PARTIAL_COUNT,
            reversed_stereo: false,
            nice_amp_ramp: true,
            master_volume: None,
            master_tune: None,
            reserve: None,
        }
    }
}

impl SynthConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: SynthConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.partial_count == 0 || self.partial_count > MAX_PARTIAL_COUNT {
            return Err(Mt32Error::InvalidConfig(format!(
                "partial_count must be 1-{MAX_PARTIAL_COUNT}, got {}",
                self.partial_count
            )));
        }
        if let Some(volume) = self.master_volume.filter(|&volume| volume > 100) {
            return Err(Mt32Error::InvalidConfig(format!(
                "master_volume must be 0-100, got {volume}"
            )));
        }
        if let Some(tune) = self.master_tune.filter(|&tune| tune > 127) {
            return Err(Mt32Error::InvalidConfig(format!(
                "master_tune must be 0-127, got {tune}"
            )));
        }
        if let Some(reserve) = self.reserve {
            if let Some(value) = reserve.iter().find(|&&value| value > 32) {
                return Err(Mt32Error::InvalidConfig(format!(
                    "reserve entries must be 0-32, got {value}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let config = SynthConfig::from_json("{}").unwrap();
        assert_eq!(config, SynthConfig::default());
        assert_eq!(config.partial_count, 32);
        assert!(config.nice_amp_ramp);
    }

    #[test]
    fn test_partial_json() {
        let config =
            SynthConfig::from_json(r#"{"partial_count": 64, "reversed_stereo": true, "master_tune": 70}"#)
                .unwrap();
        assert_eq!(config.partial_count, 64);
        assert!(config.reversed_stereo);
        assert_eq!(config.master_tune, Some(70));
        assert_eq!(config.reserve, None);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(
            SynthConfig::from_json(r#"{"partial_count": 0}"#),
            Err(Mt32Error::InvalidConfig(_))
        ));
        assert!(matches!(
            SynthConfig::from_json(r#"{"master_volume": 101}"#),
            Err(Mt32Error::InvalidConfig(_))
        ));
        assert!(matches!(
            SynthConfig::from_json(r#"{"partial_count": "many"}"#),
            Err(Mt32Error::Json(_))
        ));
    }

    #[test]
    fn test_json_round_trip() {
        let config = SynthConfig {
            reserve: Some([1, 2, 3, 4, 5, 6, 7, 8, 9]),
            ..SynthConfig::default()
        };
        assert_eq!(SynthConfig::from_json(&config.to_json().unwrap()).unwrap(), config);
    }
}
