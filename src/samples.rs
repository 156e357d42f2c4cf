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

//! Sample storage and playback.
//!
//! This module provides:
//! - Decoding through a pluggable [`SampleLoader`]
//! - An in-memory [`SampleBank`] shared by every voice
//! - Monophonic [`Voice`] playback with sample-accurate scheduling

mod bank;
mod loader;
mod voice;

pub use bank::{SampleBank, SampleBuffer};
pub use loader::{transcode_linear, DecodedSample, FileLoader, LoadError, MemoryLoader, SampleLoader};
pub use voice::Voice;
