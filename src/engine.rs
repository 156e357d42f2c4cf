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

//! The render path and its control plane.
//!
//! [`new`] splits an engine into a [`Controller`], which validates and stages
//! every mutation, and a [`Renderer`], which owns the render-side state and is
//! driven by the host at a fixed cadence. They only talk through bounded
//! channels: commands flow to the renderer, replaced values flow back to be
//! dropped off the render thread.

use std::collections::HashMap;

use crossbeam_channel::{Receiver, Sender};
use tracing::info;

use crate::config::{ConfigError, EngineConfig};
use crate::graph::{MixGraph, Source, SourceId, Trigger};
use crate::samples::SampleLoader;
use crate::sequencer::{Clock, Track};

mod command;
mod controller;

pub(crate) use command::{Command, Retired};
pub use controller::Controller;

/// Creates a connected controller and renderer pair.
pub fn new(
    config: EngineConfig,
    loader: Box<dyn SampleLoader>,
) -> Result<(Controller, Renderer), ConfigError> {
    config.validate()?;

    let (command_tx, command_rx) = crossbeam_channel::bounded(config.command_queue_capacity);
    let (retire_tx, retire_rx) = crossbeam_channel::bounded(config.command_queue_capacity);

    info!(
        sample_rate = config.sample_rate,
        channels = config.channels,
        block_frames = config.block_frames,
        output_bus = %config.output_bus,
        "Creating engine"
    );

    let renderer = Renderer {
        engine: Engine::new(&config),
        commands: command_rx,
        retired: retire_tx,
        commands_per_cycle: config.commands_per_cycle,
    };
    let controller = Controller::new(config, loader, command_tx, retire_rx);
    Ok((controller, renderer))
}

/// Render-side state. Everything here is sized at construction, so a cycle
/// neither allocates nor frees.
pub struct Engine {
    clock: Clock,
    graph: Box<MixGraph>,
    /// In registration order.
    tracks: Vec<Box<Track>>,
    sources: HashMap<SourceId, Box<Source>>,
    output: Vec<f32>,
    sample_rate: u32,
    channels: usize,
    block_frames: usize,
}

impl Engine {
    fn new(config: &EngineConfig) -> Self {
        Self {
            clock: Clock::new(),
            graph: Box::new(MixGraph::new(&config.output_bus)),
            tracks: Vec::with_capacity(config.max_tracks),
            sources: HashMap::with_capacity(config.max_sources),
            output: vec![0.0; config.block_samples()],
            sample_rate: config.sample_rate,
            channels: config.channels as usize,
            block_frames: config.block_frames,
        }
    }

    pub(crate) fn apply(&mut self, command: Command) -> Option<Retired> {
        match command {
            Command::SetTempo(bpm) => {
                // Validated by the controller.
                let _ = self.clock.set_tempo(bpm);
                None
            }
            Command::Start => {
                self.clock.start();
                None
            }
            Command::Stop => {
                self.clock.stop();
                None
            }
            Command::Seek(beat) => {
                let _ = self.clock.seek(beat);
                None
            }
            Command::InsertSource(id, source) => {
                self.sources.insert(id, source);
                None
            }
            Command::SetTrack(track) => {
                match self.tracks.iter_mut().find(|t| t.id() == track.id()) {
                    Some(slot) => Some(Retired::Track(std::mem::replace(slot, track))),
                    None => {
                        self.tracks.push(track);
                        None
                    }
                }
            }
            Command::SetTopology(graph) => Some(Retired::Topology(std::mem::replace(
                &mut self.graph,
                graph,
            ))),
        }
    }

    /// Advances the clock by `frames`, triggers every due event, and renders the
    /// output bus. `frames` is clamped to the block size. Triggers for a cycle
    /// are all applied before any audio is pulled.
    pub fn render_cycle(&mut self, frames: usize) -> &[f32] {
        let frames = frames.min(self.block_frames);
        let window = self.clock.advance(frames, self.sample_rate);

        if !window.is_empty() {
            for track in self.tracks.iter() {
                let source_id = track.source();
                if !self.graph.is_routed(source_id) {
                    continue;
                }
                let Some(source) = self.sources.get_mut(&source_id) else {
                    continue;
                };
                for due in track.due_events(window.start, window.end) {
                    source.trigger(&Trigger {
                        delay_frames: window.frame_offset(due.beat, frames),
                        duration_frames: window.beats_to_frames(due.event.duration),
                        beat: due.beat,
                        payload: due.event.payload,
                    });
                }
            }
        }

        let out = &mut self.output[..frames * self.channels];
        self.graph.render_output(&mut self.sources, out, self.channels);
        out
    }

    pub fn current_beat(&self) -> f64 {
        self.clock.current_beat()
    }

    pub fn is_playing(&self) -> bool {
        self.clock.is_playing()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("clock", &self.clock)
            .field("tracks", &self.tracks.len())
            .field("sources", &self.sources.len())
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("block_frames", &self.block_frames)
            .finish()
    }
}

/// The render path, handed to whatever drives the output device.
pub struct Renderer {
    engine: Engine,
    commands: Receiver<Command>,
    retired: Sender<Retired>,
    commands_per_cycle: usize,
}

impl Renderer {
    /// Applies pending control-plane mutations, then renders one cycle of at
    /// most `block_frames` frames. Never blocks.
    pub fn render_cycle(&mut self, frames: usize) -> &[f32] {
        for command in self.commands.try_iter().take(self.commands_per_cycle) {
            if let Some(retired) = self.engine.apply(command) {
                // Sized to the command queue, so this only fails if the
                // controller is gone.
                let _ = self.retired.try_send(retired);
            }
        }
        self.engine.render_cycle(frames)
    }

    /// Commands waiting for a cycle boundary.
    pub fn pending_commands(&self) -> usize {
        self.commands.len()
    }

    /// Applies every pending command through zero-length cycles, so the clock
    /// does not move. For offline use.
    pub fn flush(&mut self) {
        while !self.commands.is_empty() {
            self.render_cycle(0);
        }
    }

    /// Fills an interleaved device buffer of any length, one cycle per block.
    pub fn fill(&mut self, out: &mut [f32]) {
        let block_samples = self.engine.block_frames * self.engine.channels;
        let channels = self.engine.channels;
        for chunk in out.chunks_mut(block_samples) {
            let rendered = self.render_cycle(chunk.len() / channels);
            let len = rendered.len();
            chunk[..len].copy_from_slice(rendered);
            chunk[len..].fill(0.0);
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.engine.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.engine.channels as u16
    }

    pub fn block_frames(&self) -> usize {
        self.engine.block_frames
    }

    pub fn current_beat(&self) -> f64 {
        self.engine.current_beat()
    }

    pub fn is_playing(&self) -> bool {
        self.engine.is_playing()
    }
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("engine", &self.engine)
            .field("pending_commands", &self.commands.len())
            .finish()
    }
}
