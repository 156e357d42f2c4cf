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

use crate::error::{Error, Result};

pub const DEFAULT_TEMPO_BPM: f64 = 120.0;

/// Absorbs floating point error when converting between beats and frames.
const FRAME_EPSILON: f64 = 1e-6;

/// The beat span covered by one render cycle.
///
/// `[start, end)` decides which events belong to the cycle. Both bounds sit a
/// hair before the beat of their frame, so a beat that lands exactly on a block
/// boundary always belongs to the later cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeatWindow {
    pub start: f64,
    pub end: f64,
    /// The beat at the first frame of the cycle.
    pub origin: f64,
    /// Frames per beat at the tempo the window was advanced with.
    pub frames_per_beat: f64,
}

impl BeatWindow {
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// The frame within the block at which `beat` falls.
    pub fn frame_offset(&self, beat: f64, block_frames: usize) -> usize {
        let offset = ((beat - self.origin) * self.frames_per_beat + FRAME_EPSILON).floor();
        (offset.max(0.0) as usize).min(block_frames.saturating_sub(1))
    }

    /// Converts a beat duration into frames at this window's tempo. Never zero.
    pub fn beats_to_frames(&self, beats: f64) -> usize {
        ((beats * self.frames_per_beat).round() as usize).max(1)
    }
}

/// Global tempo and transport.
///
/// Position is an integer frame count since the last anchor (a seek, a tempo
/// change or a new sample rate), so beats are computed rather than accumulated
/// and never drift. The beat position grows monotonically while playing.
/// Tracks wrap it to their own loop lengths, so the clock itself never resets
/// on a loop boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct Clock {
    tempo_bpm: f64,
    sample_rate: u32,
    playing: bool,
    anchor_beat: f64,
    frames_since_anchor: u64,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock {
    pub fn new() -> Self {
        Self {
            tempo_bpm: DEFAULT_TEMPO_BPM,
            sample_rate: 0,
            playing: false,
            anchor_beat: 0.0,
            frames_since_anchor: 0,
        }
    }

    pub fn tempo(&self) -> f64 {
        self.tempo_bpm
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn current_beat(&self) -> f64 {
        self.beat_at(self.frames_since_anchor as f64)
    }

    fn frames_per_beat(&self) -> f64 {
        self.sample_rate as f64 * 60.0 / self.tempo_bpm
    }

    /// The beat at a (possibly fractional) frame past the anchor.
    fn beat_at(&self, frame: f64) -> f64 {
        if self.sample_rate == 0 {
            return self.anchor_beat;
        }
        self.anchor_beat + frame * self.tempo_bpm / (60.0 * self.sample_rate as f64)
    }

    /// Where the cycle starting at `frame` begins for event membership.
    fn boundary_at(&self, frame: u64) -> f64 {
        self.beat_at(frame as f64 - FRAME_EPSILON).max(0.0)
    }

    fn reanchor(&mut self, beat: f64) {
        self.anchor_beat = beat;
        self.frames_since_anchor = 0;
    }

    /// Sets the tempo used by the next advance. The current position is kept.
    pub fn set_tempo(&mut self, bpm: f64) -> Result<()> {
        validate_tempo(bpm)?;
        let beat = self.current_beat();
        self.reanchor(beat);
        self.tempo_bpm = bpm;
        Ok(())
    }

    pub fn start(&mut self) {
        self.playing = true;
    }

    /// Stops the transport. The beat position is kept.
    pub fn stop(&mut self) {
        self.playing = false;
    }

    pub fn seek(&mut self, beat: f64) -> Result<()> {
        validate_beat(beat)?;
        self.reanchor(beat);
        Ok(())
    }

    /// Advances by `frame_count` frames and returns the traversed window.
    /// A stopped clock returns an empty window at the current position.
    pub fn advance(&mut self, frame_count: usize, sample_rate: u32) -> BeatWindow {
        if sample_rate != self.sample_rate {
            let beat = self.current_beat();
            self.reanchor(beat);
            self.sample_rate = sample_rate;
        }
        let frames_per_beat = self.frames_per_beat();
        let origin = self.current_beat();
        if !self.playing || self.sample_rate == 0 || frame_count == 0 {
            return BeatWindow {
                start: origin,
                end: origin,
                origin,
                frames_per_beat,
            };
        }

        let first = self.frames_since_anchor;
        self.frames_since_anchor += frame_count as u64;
        BeatWindow {
            start: self.boundary_at(first),
            end: self.boundary_at(self.frames_since_anchor),
            origin,
            frames_per_beat,
        }
    }
}

pub(crate) fn validate_tempo(bpm: f64) -> Result<()> {
    if !bpm.is_finite() || bpm <= 0.0 {
        return Err(Error::Range(format!("tempo must be positive, got {}", bpm)));
    }
    Ok(())
}

pub(crate) fn validate_beat(beat: f64) -> Result<()> {
    if !beat.is_finite() || beat < 0.0 {
        return Err(Error::Range(format!(
            "beat position must be non-negative, got {}",
            beat
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stopped_clock_returns_empty_window() {
        let mut clock = Clock::new();

        let window = clock.advance(512, 48000);

        assert!(window.is_empty());
        assert_eq!(clock.current_beat(), 0.0);
    }

    #[test]
    fn test_advance_delta() {
        let mut clock = Clock::new();
        clock.start();

        let window = clock.advance(512, 48000);

        // 512 / 48000 * 120 / 60
        assert_eq!(window.start, 0.0);
        assert_eq!(window.origin, 0.0);
        assert!((window.end - 0.021333333).abs() < 1e-6);
        assert_eq!(window.frames_per_beat, 24000.0);
    }

    #[test]
    fn test_windows_are_contiguous() {
        let mut clock = Clock::new();
        clock.start();

        let first = clock.advance(100, 48000);
        let second = clock.advance(100, 48000);

        assert_eq!(first.end, second.start);
    }

    #[test]
    fn test_boundary_beat_belongs_to_later_window() {
        for block in [64, 100, 128, 192, 256, 384, 480, 500, 512] {
            let mut clock = Clock::new();
            clock.start();
            let mut frame = 0;
            while frame < 48000 * 4 {
                let window = clock.advance(block, 48000);
                for beat in [1.0, 2.0, 3.0, 4.0, 5.0] {
                    let exact = beat as usize * 24000;
                    let owned = beat >= window.start && beat < window.end;
                    assert_eq!(
                        owned,
                        exact >= frame && exact < frame + block,
                        "block {} beat {}",
                        block,
                        beat
                    );
                    if owned {
                        assert_eq!(window.frame_offset(beat, block), exact - frame);
                    }
                }
                frame += block;
            }
        }
    }

    #[test]
    fn test_position_does_not_drift() {
        let mut clock = Clock::new();
        clock.start();
        for _ in 0..(48000 * 60 / 480) {
            clock.advance(480, 48000);
        }

        // One minute at 120 BPM.
        assert_eq!(clock.current_beat(), 120.0);
    }

    #[test]
    fn test_stop_preserves_position() {
        let mut clock = Clock::new();
        clock.start();
        clock.advance(48000, 48000);
        clock.stop();
        let position = clock.current_beat();

        assert!(clock.advance(48000, 48000).is_empty());
        assert_eq!(clock.current_beat(), position);

        clock.start();
        let window = clock.advance(48000, 48000);
        assert_eq!(window.origin, position);
        assert!((window.start - position).abs() < 1e-9);
        assert!((window.end - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_tempo() {
        let mut clock = Clock::new();

        assert!(matches!(clock.set_tempo(0.0), Err(Error::Range(_))));
        assert!(matches!(clock.set_tempo(-10.0), Err(Error::Range(_))));
        assert!(matches!(clock.set_tempo(f64::NAN), Err(Error::Range(_))));
        assert_eq!(clock.tempo(), DEFAULT_TEMPO_BPM);
    }

    #[test]
    fn test_tempo_applies_to_next_advance() {
        let mut clock = Clock::new();
        clock.start();
        let before = clock.advance(48000, 48000);
        clock.set_tempo(60.0).unwrap();
        let after = clock.advance(48000, 48000);

        assert!((before.end - before.start - 2.0).abs() < 1e-9);
        assert_eq!(after.origin, 2.0);
        assert!((after.end - after.start - 1.0).abs() < 1e-9);
        assert_eq!(clock.current_beat(), 3.0);
    }

    #[test]
    fn test_seek() {
        let mut clock = Clock::new();
        clock.seek(8.0).unwrap();
        assert_eq!(clock.current_beat(), 8.0);
        assert!(clock.seek(-1.0).is_err());

        clock.start();
        let window = clock.advance(24000, 48000);
        assert_eq!(window.origin, 8.0);
        assert!(window.start <= 8.0);
        assert_eq!(clock.current_beat(), 9.0);
    }

    #[test]
    fn test_frame_offset() {
        let window = BeatWindow {
            start: 1.0,
            end: 1.5,
            origin: 1.0,
            frames_per_beat: 1000.0,
        };

        assert_eq!(window.frame_offset(1.0, 500), 0);
        assert_eq!(window.frame_offset(1.25, 500), 250);
        assert_eq!(window.frame_offset(1.4999999, 500), 499);
        assert_eq!(window.beats_to_frames(0.5), 500);
        assert_eq!(window.beats_to_frames(0.0), 1);
    }
}
