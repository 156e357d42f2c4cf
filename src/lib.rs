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

//! A beat-synchronized loop sequencer feeding a real-time mixing graph.
//!
//! Build an engine with [`engine::new`], drive the [`engine::Renderer`] from an
//! audio callback, and edit everything else through the [`engine::Controller`].

pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod samples;
pub mod sequencer;

pub use engine::{Controller, Renderer};
pub use error::{Error, Result};
