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

use crate::graph::{MixGraph, Source, SourceId};
use crate::sequencer::Track;

/// A control-plane mutation, already validated, applied by the renderer at a
/// cycle boundary. Large values are boxed so applying one only moves pointers.
#[derive(Debug)]
pub(crate) enum Command {
    SetTempo(f64),
    Start,
    Stop,
    Seek(f64),
    InsertSource(SourceId, Box<Source>),
    /// Replaces the track with the same id, or appends it.
    SetTrack(Box<Track>),
    SetTopology(Box<MixGraph>),
}

/// Values swapped out by the renderer, dropped on the control side.
#[derive(Debug)]
pub(crate) enum Retired {
    Track(Box<Track>),
    Topology(Box<MixGraph>),
}
