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

//! Control-plane errors. The render path never produces these.

/// Errors returned synchronously by control-plane operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An unknown sample, track, bus, or source was referenced.
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    /// An id is already taken by something incompatible.
    #[error("'{id}' already exists with different content")]
    Conflict { id: String },

    /// A tempo, beat position, duration, or capacity was out of range.
    #[error("value out of range: {0}")]
    Range(String),

    /// The node already feeds a bus. Each node may feed exactly one bus.
    #[error("{node} is already connected to bus '{bus}'")]
    AlreadyConnected { node: String, bus: String },

    /// The external loader failed to decode a sample.
    #[error("unable to decode '{sample}': {reason}")]
    Decode { sample: String, reason: String },

    /// The connection would create a cycle or reroute the output bus.
    #[error("invalid route: {0}")]
    InvalidRoute(String),

    /// The command queue to the render path is full.
    #[error("command queue is full")]
    QueueFull,
}

impl Error {
    pub(crate) fn not_found(kind: &'static str, id: impl Into<String>) -> Error {
        Error::NotFound {
            kind,
            id: id.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
