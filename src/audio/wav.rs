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

//! Offline rendering to a WAV file.

use std::path::Path;

use hound::{SampleFormat, WavSpec, WavWriter};
use tracing::info;

use crate::engine::Renderer;

/// Frames covered by `beats` at `tempo_bpm`.
pub fn beats_to_frames(beats: f64, tempo_bpm: f64, sample_rate: u32) -> usize {
    (beats * 60.0 / tempo_bpm * sample_rate as f64).ceil() as usize
}

/// Renders `frames` frames from `renderer` into a 32-bit float WAV file.
/// Pending commands are applied first, so a started transport starts at the
/// first written frame.
pub fn bounce(renderer: &mut Renderer, path: &Path, frames: usize) -> Result<usize, hound::Error> {
    let spec = WavSpec {
        channels: renderer.channels(),
        sample_rate: renderer.sample_rate(),
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(path, spec)?;

    let channels = renderer.channels() as usize;
    let block_frames = renderer.block_frames();
    renderer.flush();
    let mut remaining = frames;
    while remaining > 0 {
        let block = renderer.render_cycle(remaining.min(block_frames));
        for sample in block {
            writer.write_sample(*sample)?;
        }
        remaining -= block.len() / channels;
    }
    writer.finalize()?;

    info!(path = %path.display(), frames, "Rendered to file");
    Ok(frames)
}
