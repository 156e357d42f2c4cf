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
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use config::{Config, File, FileFormat};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::engine::EngineConfig;
use super::error::ConfigError;
use crate::engine::Controller;
use crate::error::{Error, Result};
use crate::graph::{BeatCounter, BusId, SourceId};
use crate::sequencer::{Payload, DEFAULT_TEMPO_BPM};

/// Track id used for the beat counter.
pub const BEAT_COUNTER_TRACK: &str = "beat-counter";

/// Length of each beat counter note, in beats.
const BEAT_COUNTER_NOTE_BEATS: f64 = 0.1;

/// A YAML description of a complete loop setup.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct LoopSet {
    #[serde(default = "default_tempo")]
    tempo: f64,

    /// Engine sizing. Defaults apply when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    engine: Option<EngineConfig>,

    #[serde(default)]
    samples: Vec<SampleConfig>,

    #[serde(default)]
    buses: Vec<BusConfig>,

    #[serde(default)]
    voices: Vec<VoiceConfig>,

    #[serde(default)]
    tracks: Vec<TrackConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    beat_counter: Option<BeatCounterConfig>,

    /// Relative sample files are resolved against this directory.
    #[serde(skip)]
    directory: Option<PathBuf>,
}

fn default_tempo() -> f64 {
    DEFAULT_TEMPO_BPM
}

/// A sample file loaded into the bank under `id`.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct SampleConfig {
    pub id: String,
    pub file: String,
}

/// A bus. Without a parent it feeds the output bus.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct BusConfig {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

/// A voice playing a loaded sample. Without a bus it feeds the output bus.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct VoiceConfig {
    pub id: String,
    pub sample: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bus: Option<String>,
}

/// A looping track bound to a voice.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct TrackConfig {
    pub id: String,
    /// The voice id this track triggers.
    pub source: String,
    /// Loop length in beats.
    pub length: f64,
    #[serde(default)]
    pub events: Vec<EventConfig>,
    /// Plays the voice once per loop, for the whole loop.
    #[serde(default)]
    pub full_loop: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct EventConfig {
    pub position: f64,
    pub duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<u8>,
}

/// A callback trigger firing on every beat of the loop.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct BeatCounterConfig {
    /// Loop length in beats.
    pub length: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bus: Option<String>,
}

/// What [`LoopSet::install`] created.
#[derive(Debug, Default)]
pub struct Installed {
    /// Voice ids from the loop set mapped to their sources.
    pub voices: HashMap<String, SourceId>,
    pub beat_counter: Option<Arc<BeatCounter>>,
}

impl LoopSet {
    /// Creates an empty loop set at the given tempo.
    pub fn new(tempo: f64) -> LoopSet {
        LoopSet {
            tempo,
            engine: None,
            samples: Vec::new(),
            buses: Vec::new(),
            voices: Vec::new(),
            tracks: Vec::new(),
            beat_counter: None,
            directory: None,
        }
    }

    /// Parse a loop set from a YAML file.
    pub fn deserialize(path: &Path) -> std::result::Result<LoopSet, ConfigError> {
        let mut loop_set = Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize::<LoopSet>()?;
        loop_set.directory = path.parent().map(Path::to_path_buf);
        Ok(loop_set)
    }

    /// Parse a loop set from a YAML string. Sample files resolve against the
    /// working directory.
    pub fn from_yaml(yaml: &str) -> std::result::Result<LoopSet, ConfigError> {
        Ok(Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize::<LoopSet>()?)
    }

    /// Serialize and save the loop set to a file at the given path.
    pub fn save(&self, path: &Path) -> std::result::Result<(), ConfigError> {
        let serialized = serde_yml::to_string(self)?;
        let mut file = std::fs::File::create(path)?;
        file.write_all(serialized.as_bytes())?;
        info!(path = %path.display(), "Saved loop set");
        Ok(())
    }

    pub fn tempo(&self) -> f64 {
        self.tempo
    }

    /// The engine configuration, falling back to defaults. The command queue
    /// is grown to hold every mutation [`LoopSet::install`] queues.
    pub fn engine_config(&self) -> EngineConfig {
        let mut config = self.engine.clone().unwrap_or_default();
        config.command_queue_capacity = config.command_queue_capacity.max(self.command_count());
        config
    }

    /// How many control mutations [`LoopSet::install`] queues.
    pub fn command_count(&self) -> usize {
        let tracks: usize = self
            .tracks
            .iter()
            .map(|track| 1 + usize::from(track.full_loop) + track.events.len())
            .sum();
        let beat_counter = self
            .beat_counter
            .as_ref()
            .map_or(0, |counter| 3 + counter.length as usize);
        1 + 2 * self.buses.len() + 2 * self.voices.len() + tracks + beat_counter
    }

    pub fn samples(&self) -> &[SampleConfig] {
        &self.samples
    }

    pub fn tracks(&self) -> &[TrackConfig] {
        &self.tracks
    }

    pub fn with_sample(mut self, id: &str, file: &str) -> Self {
        self.samples.push(SampleConfig {
            id: id.to_string(),
            file: file.to_string(),
        });
        self
    }

    pub fn with_voice(mut self, id: &str, sample: &str, bus: Option<&str>) -> Self {
        self.voices.push(VoiceConfig {
            id: id.to_string(),
            sample: sample.to_string(),
            bus: bus.map(str::to_string),
        });
        self
    }

    pub fn with_track(mut self, track: TrackConfig) -> Self {
        self.tracks.push(track);
        self
    }

    pub fn with_beat_counter(mut self, length: u32) -> Self {
        self.beat_counter = Some(BeatCounterConfig { length, bus: None });
        self
    }

    fn resolve(&self, file: &str) -> String {
        match &self.directory {
            Some(directory) if Path::new(file).is_relative() => {
                directory.join(file).to_string_lossy().into_owned()
            }
            _ => file.to_string(),
        }
    }

    /// Applies the loop set through the controller: tempo, samples, buses,
    /// voices, tracks, then the beat counter. Stops at the first error.
    pub fn install(&self, controller: &Controller) -> Result<Installed> {
        let output = controller.output_bus();
        let mut installed = Installed::default();

        controller.set_tempo(self.tempo)?;

        for sample in &self.samples {
            controller.load_sample(&sample.id, &self.resolve(&sample.file))?;
        }

        for bus in &self.buses {
            controller.add_bus(&bus.id)?;
        }
        for bus in &self.buses {
            let parent = bus.parent.as_deref().unwrap_or(&output);
            controller.connect(BusId::new(&bus.id), parent)?;
        }

        for voice in &self.voices {
            if installed.voices.contains_key(&voice.id) {
                return Err(Error::Conflict {
                    id: voice.id.clone(),
                });
            }
            let source = controller.bind(&voice.sample)?;
            controller.connect(source, voice.bus.as_deref().unwrap_or(&output))?;
            installed.voices.insert(voice.id.clone(), source);
        }

        for track in &self.tracks {
            let Some(source) = installed.voices.get(&track.source) else {
                return Err(Error::not_found("voice", track.source.as_str()));
            };
            controller.add_track(&track.id, *source, track.length)?;
            if track.full_loop {
                controller.schedule_loop(&track.id)?;
            }
            for event in &track.events {
                let payload = event.note.map(Payload::Note).unwrap_or_default();
                controller.add_event(&track.id, event.position, event.duration, payload)?;
            }
        }

        if let Some(beat_counter) = &self.beat_counter {
            let counter = BeatCounter::new();
            let source = controller.add_callback(counter.observer())?;
            controller.connect(source, beat_counter.bus.as_deref().unwrap_or(&output))?;
            controller.add_track(BEAT_COUNTER_TRACK, source, beat_counter.length as f64)?;
            for beat in 0..beat_counter.length {
                controller.add_event(
                    BEAT_COUNTER_TRACK,
                    beat as f64,
                    BEAT_COUNTER_NOTE_BEATS,
                    Payload::Note((beat % 128) as u8),
                )?;
            }
            installed.beat_counter = Some(counter);
        }

        info!(
            tempo = self.tempo,
            samples = self.samples.len(),
            voices = installed.voices.len(),
            tracks = self.tracks.len(),
            "Installed loop set"
        );
        Ok(installed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine;
    use crate::samples::MemoryLoader;

    const YAML: &str = r#"
tempo: 90
engine:
  channels: 1
  commands_per_cycle: 64
samples:
  - id: kick
    file: kick.wav
buses:
  - id: drums
voices:
  - id: kick-voice
    sample: kick
    bus: drums
tracks:
  - id: kicks
    source: kick-voice
    length: 4
    events:
      - position: 0
        duration: 0.5
        note: 36
      - position: 2
        duration: 0.5
beat_counter:
  length: 4
"#;

    fn controller(loop_set: &LoopSet) -> (Controller, engine::Renderer) {
        let loader = MemoryLoader::new().with("kick.wav", vec![1.0, 0.5], 1, 48000);
        engine::new(loop_set.engine_config(), Box::new(loader)).unwrap()
    }

    #[test]
    fn test_parse() {
        let loop_set = LoopSet::from_yaml(YAML).unwrap();

        assert_eq!(loop_set.tempo(), 90.0);
        assert_eq!(loop_set.engine_config().channels, 1);
        assert_eq!(loop_set.engine_config().sample_rate, 48000);
        assert_eq!(loop_set.samples().len(), 1);
        assert_eq!(loop_set.tracks()[0].events.len(), 2);
        assert_eq!(loop_set.tracks()[0].events[0].note, Some(36));
        assert_eq!(loop_set.tracks()[0].events[1].note, None);
        assert!(!loop_set.tracks()[0].full_loop);
    }

    #[test]
    fn test_install() {
        let loop_set = LoopSet::from_yaml(YAML).unwrap();
        let (controller, mut renderer) = controller(&loop_set);

        let installed = loop_set.install(&controller).unwrap();

        assert_eq!(controller.tempo(), 90.0);
        let voice = installed.voices["kick-voice"];
        let graph = controller.graph();
        assert_eq!(graph.owner(&voice.into()), Some(&BusId::new("drums")));
        assert!(graph.is_routed(voice));
        assert_eq!(controller.track("kicks").unwrap().events().len(), 2);
        assert_eq!(
            controller.track(BEAT_COUNTER_TRACK).unwrap().events().len(),
            4
        );

        let counter = installed.beat_counter.unwrap();
        controller.start().unwrap();
        let block = renderer.render_cycle(512);
        assert_eq!(&block[..3], &[1.0, 0.5, 0.0]);
        assert_eq!(counter.last_beat(), Some(0));
    }

    #[test]
    fn test_install_unknown_voice() {
        let loop_set = LoopSet::new(120.0).with_track(TrackConfig {
            id: "t".to_string(),
            source: "nope".to_string(),
            length: 4.0,
            events: Vec::new(),
            full_loop: false,
        });
        let (controller, _renderer) = controller(&loop_set);

        assert!(matches!(
            loop_set.install(&controller),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn test_full_loop_track() {
        let loop_set = LoopSet::new(120.0)
            .with_sample("kick", "kick.wav")
            .with_voice("v", "kick", None)
            .with_track(TrackConfig {
                id: "loop".to_string(),
                source: "v".to_string(),
                length: 16.0,
                events: Vec::new(),
                full_loop: true,
            });
        let (controller, _renderer) = controller(&loop_set);

        loop_set.install(&controller).unwrap();

        let events = controller.track("loop").unwrap().events().to_vec();
        assert_eq!(events.len(), 1);
        assert!((events[0].duration - 15.99).abs() < 1e-9);
    }

    #[test]
    fn test_queue_holds_large_install() {
        let loop_set = LoopSet::new(120.0)
            .with_sample("kick", "kick.wav")
            .with_voice("v", "kick", None)
            .with_beat_counter(1100);
        assert_eq!(loop_set.command_count(), 1 + 2 + 3 + 1100);
        assert_eq!(loop_set.engine_config().command_queue_capacity, 1106);
        let (controller, mut renderer) = controller(&loop_set);

        loop_set.install(&controller).unwrap();
        renderer.flush();

        assert_eq!(
            controller.track(BEAT_COUNTER_TRACK).unwrap().events().len(),
            1100
        );
        assert_eq!(renderer.pending_commands(), 0);
    }

    #[test]
    fn test_small_install_keeps_configured_queue() {
        let loop_set = LoopSet::from_yaml(YAML).unwrap();

        assert_eq!(
            loop_set.engine_config().command_queue_capacity,
            EngineConfig::default().command_queue_capacity
        );
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("set.yaml");
        let loop_set = LoopSet::new(100.0)
            .with_sample("kick", "kick.wav")
            .with_voice("v", "kick", None)
            .with_beat_counter(8);

        loop_set.save(&path).unwrap();
        let reloaded = LoopSet::deserialize(&path).unwrap();

        assert_eq!(reloaded.tempo(), 100.0);
        assert_eq!(reloaded.samples(), loop_set.samples());
        assert_eq!(reloaded.beat_counter, loop_set.beat_counter);
        assert_eq!(reloaded.resolve("kick.wav"), dir.path().join("kick.wav").to_string_lossy());
    }
}
