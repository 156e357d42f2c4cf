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
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{Command, Retired};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::graph::{CallbackTrigger, MixGraph, NodeId, Source, SourceId};
use crate::samples::{SampleBank, SampleBuffer, SampleLoader, Voice};
use crate::sequencer::{validate_beat, validate_tempo, Clock, Payload, Track};

/// Trailing gap left by [`Controller::schedule_loop`] so a loop's note ends
/// before it is triggered again.
const LOOP_TAIL_BEATS: f64 = 0.01;

/// What the control plane knows about a registered source.
#[derive(Debug, Clone)]
struct SourceEntry {
    /// The sample a voice plays. None for callback triggers.
    sample: Option<String>,
    /// The track bound to this source, if any.
    track: Option<String>,
}

/// The control plane's copy of everything the renderer owns, plus the bank.
struct ControlState {
    config: EngineConfig,
    clock: Clock,
    graph: MixGraph,
    tracks: Vec<Track>,
    sources: HashMap<SourceId, SourceEntry>,
    bank: SampleBank,
    commands: Sender<Command>,
    retired: Receiver<Retired>,
}

impl ControlState {
    /// Drops everything the renderer has swapped out since the last call.
    fn collect_retired(&mut self) {
        for retired in self.retired.try_iter() {
            match retired {
                Retired::Track(track) => debug!(track = track.id(), "Retired track"),
                Retired::Topology(_) => debug!("Retired topology"),
            }
        }
    }

    /// Fails with QueueFull before anything is validated or staged.
    fn ensure_capacity(&mut self) -> Result<()> {
        self.collect_retired();
        if self.commands.is_full() {
            warn!("Command queue is full");
            return Err(Error::QueueFull);
        }
        Ok(())
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.try_send(command).map_err(|e| match e {
            TrySendError::Full(_) | TrySendError::Disconnected(_) => Error::QueueFull,
        })
    }

    fn track_index(&self, id: &str) -> Result<usize> {
        self.tracks
            .iter()
            .position(|track| track.id() == id)
            .ok_or_else(|| Error::not_found("track", id))
    }

    fn register_source(&mut self, source: Source, sample: Option<String>) -> Result<SourceId> {
        if self.sources.len() >= self.config.max_sources {
            return Err(Error::Range(format!(
                "no more than {} sources may be registered",
                self.config.max_sources
            )));
        }
        let id = SourceId::next();
        self.send(Command::InsertSource(id, Box::new(source)))?;
        self.sources.insert(id, SourceEntry { sample, track: None });
        Ok(id)
    }

    /// Stages an edited copy of a track and swaps it in on both sides.
    fn replace_track(&mut self, index: usize, track: Track) -> Result<()> {
        self.send(Command::SetTrack(Box::new(track.clone())))?;
        self.tracks[index] = track;
        Ok(())
    }

    fn replace_graph(&mut self, graph: MixGraph) -> Result<()> {
        self.send(Command::SetTopology(Box::new(graph.clone())))?;
        self.graph = graph;
        Ok(())
    }
}

/// The control plane. Every operation is validated synchronously against the
/// shadow state, then staged for the renderer. Cloning shares the same engine.
#[derive(Clone)]
pub struct Controller {
    state: Arc<Mutex<ControlState>>,
}

impl Controller {
    pub(super) fn new(
        config: EngineConfig,
        loader: Box<dyn SampleLoader>,
        commands: Sender<Command>,
        retired: Receiver<Retired>,
    ) -> Self {
        let state = ControlState {
            clock: Clock::new(),
            graph: MixGraph::new(&config.output_bus),
            tracks: Vec::new(),
            sources: HashMap::new(),
            bank: SampleBank::new(loader, config.sample_rate),
            config,
            commands,
            retired,
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Decodes a sample into the bank. See [`SampleBank::load`].
    pub fn load_sample(&self, id: &str, source: &str) -> Result<Arc<SampleBuffer>> {
        self.state.lock().bank.load(id, source)
    }

    pub fn sample(&self, id: &str) -> Result<Arc<SampleBuffer>> {
        self.state.lock().bank.get(id)
    }

    /// Registers a new voice playing `sample_id`.
    pub fn bind(&self, sample_id: &str) -> Result<SourceId> {
        let mut state = self.state.lock();
        state.ensure_capacity()?;
        let sample = state.bank.get(sample_id)?;
        let id = state.register_source(
            Source::Voice(Voice::new(sample_id, sample)),
            Some(sample_id.to_string()),
        )?;
        info!(source = %id, sample = sample_id, "Bound voice");
        Ok(id)
    }

    /// Registers a callback trigger. `on_fire` runs on the render thread and
    /// must not block.
    pub fn add_callback(&self, on_fire: impl FnMut(u64) + Send + 'static) -> Result<SourceId> {
        let mut state = self.state.lock();
        state.ensure_capacity()?;
        let id = state.register_source(Source::Callback(CallbackTrigger::new(on_fire)), None)?;
        info!(source = %id, "Added callback trigger");
        Ok(id)
    }

    /// Creates an empty looping track bound to `source`. A source can be bound
    /// by one track only.
    pub fn add_track(&self, id: &str, source: SourceId, length_beats: f64) -> Result<()> {
        let mut state = self.state.lock();
        state.ensure_capacity()?;

        let Some(entry) = state.sources.get(&source) else {
            return Err(Error::not_found("source", source.to_string()));
        };
        if let Some(bound) = &entry.track {
            return Err(Error::Conflict {
                id: format!("{} (bound to track '{}')", source, bound),
            });
        }
        if state.tracks.iter().any(|track| track.id() == id) {
            return Err(Error::Conflict { id: id.to_string() });
        }
        if state.tracks.len() >= state.config.max_tracks {
            return Err(Error::Range(format!(
                "no more than {} tracks may be registered",
                state.config.max_tracks
            )));
        }
        let track = Track::new(id, source, length_beats)?;

        state.send(Command::SetTrack(Box::new(track.clone())))?;
        state.tracks.push(track);
        if let Some(entry) = state.sources.get_mut(&source) {
            entry.track = Some(id.to_string());
        }
        info!(track = id, source = %source, length_beats, "Added track");
        Ok(())
    }

    pub fn add_event(
        &self,
        track: &str,
        position_beats: f64,
        duration_beats: f64,
        payload: Payload,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.ensure_capacity()?;
        let index = state.track_index(track)?;
        let mut staged = state.tracks[index].clone();
        staged.add_event(position_beats, duration_beats, payload)?;
        state.replace_track(index, staged)?;
        debug!(track, position_beats, duration_beats, "Added event");
        Ok(())
    }

    /// Removes every event from a track. The binding and length stay.
    pub fn clear(&self, track: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.ensure_capacity()?;
        let index = state.track_index(track)?;
        let mut staged = state.tracks[index].clone();
        staged.clear();
        state.replace_track(index, staged)?;
        debug!(track, "Cleared track");
        Ok(())
    }

    /// Replaces a track's events with one note at beat 0 spanning the loop.
    pub fn schedule_loop(&self, track: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.ensure_capacity()?;
        let index = state.track_index(track)?;
        let mut staged = state.tracks[index].clone();
        staged.clear();
        let duration = if staged.length() > LOOP_TAIL_BEATS {
            staged.length() - LOOP_TAIL_BEATS
        } else {
            staged.length()
        };
        staged.add_event(0.0, duration, Payload::Note(60))?;
        state.replace_track(index, staged)?;
        info!(track, duration, "Scheduled loop");
        Ok(())
    }

    /// Connects a source or bus into `bus`. Each node feeds exactly one bus.
    pub fn connect(&self, node: impl Into<NodeId>, bus: &str) -> Result<()> {
        let node = node.into();
        let mut state = self.state.lock();
        state.ensure_capacity()?;
        if let NodeId::Source(id) = &node {
            if !state.sources.contains_key(id) {
                return Err(Error::not_found("source", id.to_string()));
            }
        }
        let mut staged = state.graph.clone();
        if let Err(e) = staged.connect(node.clone(), bus) {
            warn!(node = %node, bus, err = %e, "Rejected connection");
            return Err(e);
        }
        state.replace_graph(staged)?;
        info!(node = %node, bus, "Connected");
        Ok(())
    }

    /// Disconnects a node from its bus. Returns whether it was connected.
    pub fn disconnect(&self, node: impl Into<NodeId>) -> Result<bool> {
        let node = node.into();
        let mut state = self.state.lock();
        if state.graph.owner(&node).is_none() {
            return Ok(false);
        }
        state.ensure_capacity()?;
        let mut staged = state.graph.clone();
        staged.disconnect(node.clone());
        state.replace_graph(staged)?;
        info!(node = %node, "Disconnected");
        Ok(true)
    }

    /// Adds an unconnected bus.
    pub fn add_bus(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.ensure_capacity()?;
        let mut staged = state.graph.clone();
        staged.add_bus(id)?;
        state.replace_graph(staged)?;
        info!(bus = id, "Added bus");
        Ok(())
    }

    /// Sets the tempo for the next cycle.
    pub fn set_tempo(&self, bpm: f64) -> Result<()> {
        let mut state = self.state.lock();
        state.ensure_capacity()?;
        validate_tempo(bpm)?;
        state.send(Command::SetTempo(bpm))?;
        state.clock.set_tempo(bpm)?;
        info!(tempo = bpm, "Tempo set");
        Ok(())
    }

    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.ensure_capacity()?;
        state.send(Command::Start)?;
        state.clock.start();
        info!("Transport started");
        Ok(())
    }

    /// Stops the transport at the next cycle boundary. The position is kept.
    pub fn stop(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.ensure_capacity()?;
        state.send(Command::Stop)?;
        state.clock.stop();
        info!("Transport stopped");
        Ok(())
    }

    /// Starts a stopped transport or stops a running one. Returns whether it
    /// is now playing.
    pub fn toggle_playing(&self) -> Result<bool> {
        let mut state = self.state.lock();
        state.ensure_capacity()?;
        let playing = !state.clock.is_playing();
        if playing {
            state.send(Command::Start)?;
            state.clock.start();
        } else {
            state.send(Command::Stop)?;
            state.clock.stop();
        }
        info!(playing, "Transport toggled");
        Ok(playing)
    }

    /// Moves the transport to `beat`.
    pub fn seek(&self, beat: f64) -> Result<()> {
        let mut state = self.state.lock();
        state.ensure_capacity()?;
        validate_beat(beat)?;
        state.send(Command::Seek(beat))?;
        state.clock.seek(beat)?;
        info!(beat, "Seek");
        Ok(())
    }

    pub fn tempo(&self) -> f64 {
        self.state.lock().clock.tempo()
    }

    /// Whether the transport is playing, as last requested.
    pub fn is_playing(&self) -> bool {
        self.state.lock().clock.is_playing()
    }

    /// A snapshot of the topology.
    pub fn graph(&self) -> MixGraph {
        self.state.lock().graph.clone()
    }

    /// A snapshot of a track.
    pub fn track(&self, id: &str) -> Result<Track> {
        let state = self.state.lock();
        let index = state.track_index(id)?;
        Ok(state.tracks[index].clone())
    }

    /// Track ids in registration order.
    pub fn track_ids(&self) -> Vec<String> {
        self.state
            .lock()
            .tracks
            .iter()
            .map(|track| track.id().to_string())
            .collect()
    }

    /// The sample a voice plays, or None for callback triggers.
    pub fn source_sample(&self, id: SourceId) -> Result<Option<String>> {
        self.state
            .lock()
            .sources
            .get(&id)
            .map(|entry| entry.sample.clone())
            .ok_or_else(|| Error::not_found("source", id.to_string()))
    }

    pub fn output_bus(&self) -> String {
        self.state.lock().graph.output().to_string()
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Controller")
            .field("clock", &state.clock)
            .field("tracks", &state.tracks.len())
            .field("sources", &state.sources.len())
            .field("bank", &state.bank)
            .finish()
    }
}
