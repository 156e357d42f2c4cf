// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::path::Path;

use config::{Config, File};
use serde::{Deserialize, Serialize};

use super::error::ConfigError;

/// Default sample rate for the render path.
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Default maximum frames per render cycle.
pub const DEFAULT_BLOCK_FRAMES: usize = 512;

/// Default name of the bus whose sum is the engine output.
pub const DEFAULT_OUTPUT_BUS: &str = "master";

/// Sizing and format of the render path. Every buffer on the render side is
/// allocated from these values up front.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct EngineConfig {
    /// Output sample rate. Samples are transcoded to it on load.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Interleaved output channels.
    #[serde(default = "default_channels")]
    pub channels: u16,

    /// Maximum frames per render cycle. Larger requests are clamped.
    #[serde(default = "default_block_frames")]
    pub block_frames: usize,

    /// Capacity of the control-plane command queue.
    #[serde(default = "default_command_queue_capacity")]
    pub command_queue_capacity: usize,

    /// Control-plane mutations applied at each cycle boundary.
    #[serde(default = "default_commands_per_cycle")]
    pub commands_per_cycle: usize,

    #[serde(default = "default_max_tracks")]
    pub max_tracks: usize,

    #[serde(default = "default_max_sources")]
    pub max_sources: usize,

    /// The bus rendered to the output.
    #[serde(default = "default_output_bus")]
    pub output_bus: String,
}

fn default_sample_rate() -> u32 {
    DEFAULT_SAMPLE_RATE
}

fn default_channels() -> u16 {
    2
}

fn default_block_frames() -> usize {
    DEFAULT_BLOCK_FRAMES
}

fn default_command_queue_capacity() -> usize {
    1024
}

fn default_commands_per_cycle() -> usize {
    1
}

fn default_max_tracks() -> usize {
    64
}

fn default_max_sources() -> usize {
    128
}

fn default_output_bus() -> String {
    DEFAULT_OUTPUT_BUS.to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            block_frames: default_block_frames(),
            command_queue_capacity: default_command_queue_capacity(),
            commands_per_cycle: default_commands_per_cycle(),
            max_tracks: default_max_tracks(),
            max_sources: default_max_sources(),
            output_bus: default_output_bus(),
        }
    }
}

impl EngineConfig {
    /// Parse an engine configuration from a YAML file.
    pub fn deserialize(path: &Path) -> Result<EngineConfig, ConfigError> {
        let config = Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize::<EngineConfig>()?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the render path cannot be sized from.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            (self.sample_rate == 0, "sample_rate must be positive"),
            (self.channels == 0, "channels must be positive"),
            (self.block_frames == 0, "block_frames must be positive"),
            (
                self.command_queue_capacity == 0,
                "command_queue_capacity must be positive",
            ),
            (
                self.commands_per_cycle == 0,
                "commands_per_cycle must be positive",
            ),
            (self.max_tracks == 0, "max_tracks must be positive"),
            (self.max_sources == 0, "max_sources must be positive"),
            (self.output_bus.is_empty(), "output_bus must be named"),
        ];
        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, reason)) => Err(ConfigError::Invalid(reason.to_string())),
            None => Ok(()),
        }
    }

    /// Samples in one full block.
    pub fn block_samples(&self) -> usize {
        self.block_frames * self.channels as usize
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use config::FileFormat;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.channels, 2);
        assert_eq!(config.block_frames, 512);
        assert_eq!(config.commands_per_cycle, 1);
        assert_eq!(config.output_bus, "master");
        assert_eq!(config.block_samples(), 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: EngineConfig = Config::builder()
            .add_source(File::from_str(
                "sample_rate: 44100\nblock_frames: 256\n",
                FileFormat::Yaml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.block_frames, 256);
        assert_eq!(config.channels, 2);
        assert_eq!(config.max_sources, 128);
    }

    #[test]
    fn test_validate_rejects_zero() {
        let config = EngineConfig {
            block_frames: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = EngineConfig {
            output_bus: String::new(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_deserialize_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "channels: 1\ncommands_per_cycle: 4").unwrap();

        let config = EngineConfig::deserialize(file.path()).unwrap();
        assert_eq!(config.channels, 1);
        assert_eq!(config.commands_per_cycle, 4);

        let mut bad = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(bad, "channels: 0").unwrap();
        assert!(matches!(
            EngineConfig::deserialize(bad.path()),
            Err(ConfigError::Invalid(_))
        ));
    }
}
