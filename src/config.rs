// src/config.rs
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::channels::{DomainErrorPolicy, MathKind};
use crate::data::DEFAULT_CHUNK_SIZE;
use crate::error::ConfigError;
use crate::types::ChannelConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Samples per sealed chunk in every store of the session.
    pub chunk_size: usize,
    pub domain_error_policy: DomainErrorPolicy,
    pub sources: Vec<SourceConfig>,
    pub math_channels: Vec<MathChannelConfig>,
    /// Where the demo binary records derived channels, if anywhere.
    pub record_dir: Option<PathBuf>,
    pub run_seconds: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub channel: ChannelConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Math channel whose inputs are referenced by channel name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MathChannelConfig {
    pub channel: ChannelConfig,
    pub kind: MathKind<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub amplitude: f64,
    pub frequency_hz: f64,
    pub offset: f64,
    pub sample_rate_hz: f64,
    pub batch_size: usize,
    pub max_samples: Option<u64>,
    /// Peak amplitude of uniform noise added to every sample.
    pub noise: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            amplitude: 1.0,
            frequency_hz: 1.0,
            offset: 0.0,
            sample_rate_hz: 100.0,
            batch_size: 10,
            max_samples: None,
            noise: 0.0,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        let source = |name: &str, quantity: &str, unit: &str, sim: SimulationConfig| SourceConfig {
            channel: ChannelConfig {
                channel_group: "PSU".into(),
                ..ChannelConfig::new(name).with_quantity(quantity, unit)
            },
            simulation: sim,
        };
        let math = |name: &str, quantity: &str, unit: &str, kind: MathKind<String>| {
            MathChannelConfig {
                channel: ChannelConfig {
                    channel_group: "Math".into(),
                    ..ChannelConfig::new(name).with_quantity(quantity, unit)
                },
                kind,
            }
        };
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            domain_error_policy: DomainErrorPolicy::Skip,
            sources: vec![
                source(
                    "V",
                    "voltage",
                    "V",
                    SimulationConfig {
                        amplitude: 2.0,
                        frequency_hz: 0.5,
                        offset: 5.0,
                        sample_rate_hz: 200.0,
                        batch_size: 20,
                        noise: 0.01,
                        ..SimulationConfig::default()
                    },
                ),
                source(
                    "I",
                    "current",
                    "A",
                    SimulationConfig {
                        amplitude: 0.5,
                        frequency_hz: 0.25,
                        offset: 0.5,
                        sample_rate_hz: 200.0,
                        batch_size: 7,
                        ..SimulationConfig::default()
                    },
                ),
            ],
            math_channels: vec![
                math(
                    "R",
                    "resistance",
                    "Ohm",
                    MathKind::Divide {
                        dividend: "V".into(),
                        divisor: "I".into(),
                    },
                ),
                math(
                    "P",
                    "power",
                    "W",
                    MathKind::Multiply {
                        a: "V".into(),
                        b: "I".into(),
                    },
                ),
                math(
                    "E",
                    "energy",
                    "J",
                    MathKind::Integrate {
                        input: "P".into(),
                        y0: 0.0,
                    },
                ),
            ],
            record_dir: None,
            run_seconds: 3.0,
        }
    }
}

impl SessionConfig {
    /// Checks names are unique and every math input names a channel defined
    /// before it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be > 0".into()));
        }
        if !self.run_seconds.is_finite() || self.run_seconds < 0.0 {
            return Err(ConfigError::Invalid("run_seconds must be finite and not negative".into()));
        }
        let mut known = HashSet::new();
        for src in &self.sources {
            if src.simulation.sample_rate_hz <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "source {}: sample rate must be greater than zero",
                    src.channel.name
                )));
            }
            if !known.insert(src.channel.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate channel name {}",
                    src.channel.name
                )));
            }
        }
        for math in &self.math_channels {
            let inputs = math.kind.inputs();
            if let Some(missing) = inputs.into_iter().find(|n| !known.contains(n.as_str())) {
                return Err(ConfigError::Invalid(format!(
                    "math channel {} reads unknown channel {missing}",
                    math.channel.name
                )));
            }
            if !known.insert(math.channel.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate channel name {}",
                    math.channel.name
                )));
            }
        }
        Ok(())
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<SessionConfig, ConfigError> {
    let text = fs::read_to_string(path)?;
    let config: SessionConfig = serde_json::from_str(&text)?;
    config.validate()?;
    Ok(config)
}

pub fn save_config<P: AsRef<Path>>(config: &SessionConfig, path: P) -> Result<(), ConfigError> {
    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid_and_round_trips_through_disk() {
        let config = SessionConfig::default();
        config.validate().unwrap();
        let path = std::env::temp_dir()
            .join(format!("mathstream-config-{}.json", std::process::id()));
        save_config(&config, &path).unwrap();
        let loaded = load_config(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded.math_channels.len(), 3);
        assert_eq!(loaded.sources[1].channel.name, "I");
        assert_eq!(loaded.domain_error_policy, DomainErrorPolicy::Skip);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let json = r#"{
            "domain_error_policy": { "mode": "sentinel", "value": -1.0 },
            "sources": [ { "channel": { "name": "A" } } ],
            "math_channels": [
                { "channel": { "name": "A2" },
                  "kind": { "op": "scale_offset", "input": "A", "scale": 2.0, "offset": 0.0 } }
            ]
        }"#;
        let config: SessionConfig = serde_json::from_str(json).unwrap();
        config.validate().unwrap();
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.domain_error_policy, DomainErrorPolicy::Sentinel(-1.0));
        assert_eq!(config.sources[0].simulation.sample_rate_hz, 100.0);
    }

    #[test]
    fn rejects_forward_and_unknown_references() {
        let mut config = SessionConfig::default();
        config.math_channels.swap(0, 2);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = SessionConfig::default();
        config.sources[1].channel.name = "V".into();
        assert!(config.validate().is_err());
    }
}
