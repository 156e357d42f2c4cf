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

//! Monophonic sample playback.
//!
//! A voice plays one region of one sample. Triggering it again restarts the
//! playhead; polyphony comes from binding several voices to the same sample.

use std::sync::Arc;

use super::bank::SampleBuffer;

/// Upper bound on starts queued for one voice. Past it, the latest start
/// replaces the last queued one.
const MAX_PENDING_STARTS: usize = 64;

/// A playback restart waiting for its frame.
#[derive(Debug, Clone, Copy, PartialEq)]
struct PendingStart {
    /// Frames into the next rendered block.
    delay: usize,
    offset: usize,
    duration: usize,
}

pub struct Voice {
    /// The bank id of the bound sample.
    sample_id: String,
    sample: Arc<SampleBuffer>,
    /// Next frame to read, or None when idle. Always inside the sample.
    playhead: Option<usize>,
    /// Frames left before the triggered duration runs out.
    remaining: usize,
    /// Scheduled restarts in frame order. Reserved up front.
    pending: Vec<PendingStart>,
}

impl Voice {
    pub fn new(sample_id: &str, sample: Arc<SampleBuffer>) -> Self {
        Self {
            sample_id: sample_id.to_string(),
            sample,
            playhead: None,
            remaining: 0,
            pending: Vec::with_capacity(MAX_PENDING_STARTS),
        }
    }

    pub fn sample_id(&self) -> &str {
        &self.sample_id
    }

    pub fn playhead(&self) -> Option<usize> {
        self.playhead
    }

    /// Whether the voice is sounding or has a start scheduled.
    pub fn is_active(&self) -> bool {
        self.playhead.is_some() || !self.pending.is_empty()
    }

    /// Starts playback now at `offset_frames` into the sample for at most
    /// `duration_frames`. Drops any scheduled starts.
    pub fn trigger(&mut self, offset_frames: usize, duration_frames: usize) {
        self.pending.clear();
        self.restart(offset_frames, duration_frames);
    }

    /// Restarts playback `delay_frames` into the next rendered block. Until
    /// then the current note keeps sounding. Several starts may be queued;
    /// they must arrive in frame order.
    pub fn schedule(&mut self, delay_frames: usize, offset_frames: usize, duration_frames: usize) {
        let start = PendingStart {
            delay: delay_frames,
            offset: offset_frames,
            duration: duration_frames,
        };
        if self.pending.len() < self.pending.capacity() {
            self.pending.push(start);
        } else if let Some(last) = self.pending.last_mut() {
            *last = start;
        }
    }

    fn restart(&mut self, offset_frames: usize, duration_frames: usize) {
        let frame_count = self.sample.frame_count();
        if frame_count == 0 || duration_frames == 0 {
            self.playhead = None;
            self.remaining = 0;
            return;
        }
        self.playhead = Some(offset_frames.min(frame_count - 1));
        self.remaining = duration_frames;
    }

    /// Adds this voice's next `out.len() / channels` frames into `out`,
    /// switching to each scheduled start at its frame.
    pub fn mix_into(&mut self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let frames = out.len() / channels;

        let mut cursor = 0;
        let mut started = 0;
        while let Some(&start) = self.pending.get(started) {
            if start.delay >= frames {
                break;
            }
            let at = start.delay.max(cursor);
            self.play(&mut out[cursor * channels..at * channels], channels);
            self.restart(start.offset, start.duration);
            cursor = at;
            started += 1;
        }
        self.play(&mut out[cursor * channels..frames * channels], channels);

        self.pending.drain(..started);
        for start in self.pending.iter_mut() {
            start.delay -= frames;
        }
    }

    /// Plays the current note into every frame of `out`.
    fn play(&mut self, out: &mut [f32], channels: usize) {
        let Some(mut playhead) = self.playhead else {
            return;
        };
        let frame_count = self.sample.frame_count();
        for frame in out.chunks_exact_mut(channels) {
            if self.remaining == 0 || playhead >= frame_count {
                break;
            }
            for (channel, sample) in frame.iter_mut().enumerate() {
                *sample += self.sample.read(playhead, channel);
            }
            playhead += 1;
            self.remaining -= 1;
        }

        self.playhead = if self.remaining == 0 || playhead >= frame_count {
            None
        } else {
            Some(playhead)
        };
    }

    /// Renders the next block into `out`, replacing its contents.
    pub fn render_block(&mut self, out: &mut [f32], channels: usize) {
        out.fill(0.0);
        self.mix_into(out, channels);
    }
}

impl std::fmt::Debug for Voice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Voice")
            .field("sample_id", &self.sample_id)
            .field("playhead", &self.playhead)
            .field("remaining", &self.remaining)
            .field("pending", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voice(data: Vec<f32>, channels: u16) -> Voice {
        Voice::new("test", Arc::new(SampleBuffer::new(data, channels, 48000)))
    }

    #[test]
    fn test_idle_voice_is_silent() {
        let mut voice = voice(vec![1.0, 1.0, 1.0], 1);
        let mut out = vec![0.0; 4];

        voice.render_block(&mut out, 1);

        assert_eq!(out, vec![0.0; 4]);
        assert!(!voice.is_active());
    }

    #[test]
    fn test_plays_to_end_of_sample() {
        let mut voice = voice(vec![1.0, 2.0, 3.0], 1);
        voice.trigger(0, 100);
        let mut out = vec![0.0; 5];

        voice.render_block(&mut out, 1);

        assert_eq!(out, vec![1.0, 2.0, 3.0, 0.0, 0.0]);
        assert!(!voice.is_active());
    }

    #[test]
    fn test_duration_limits_playback() {
        let mut voice = voice(vec![1.0, 2.0, 3.0, 4.0], 1);
        voice.trigger(1, 2);
        let mut out = vec![0.0; 4];

        voice.render_block(&mut out, 1);

        assert_eq!(out, vec![2.0, 3.0, 0.0, 0.0]);
        assert!(voice.playhead().is_none());
    }

    #[test]
    fn test_offset_is_clamped_into_sample() {
        let mut voice = voice(vec![1.0, 2.0, 3.0], 1);
        voice.trigger(50, 10);

        assert_eq!(voice.playhead(), Some(2));
    }

    #[test]
    fn test_retrigger_restarts_playhead() {
        let mut voice = voice(vec![1.0, 2.0, 3.0, 4.0], 1);
        voice.trigger(0, 10);
        let mut out = vec![0.0; 2];
        voice.render_block(&mut out, 1);
        assert_eq!(out, vec![1.0, 2.0]);

        voice.trigger(0, 10);
        voice.render_block(&mut out, 1);
        assert_eq!(out, vec![1.0, 2.0]);
    }

    #[test]
    fn test_playback_spans_blocks() {
        let mut voice = voice(vec![1.0, 2.0, 3.0], 1);
        voice.trigger(0, 10);
        let mut out = vec![0.0; 2];

        voice.render_block(&mut out, 1);
        assert_eq!(out, vec![1.0, 2.0]);
        voice.render_block(&mut out, 1);
        assert_eq!(out, vec![3.0, 0.0]);
        voice.render_block(&mut out, 1);
        assert_eq!(out, vec![0.0, 0.0]);
    }

    #[test]
    fn test_scheduled_delay() {
        let mut voice = voice(vec![1.0, 1.0, 1.0], 1);
        voice.schedule(2, 0, 10);
        let mut out = vec![0.0; 4];

        voice.render_block(&mut out, 1);
        assert_eq!(out, vec![0.0, 0.0, 1.0, 1.0]);
        voice.render_block(&mut out, 1);
        assert_eq!(out, vec![1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_scheduled_restart_lets_current_note_run() {
        let mut voice = voice((1..=100).map(|v| v as f32).collect(), 1);
        voice.trigger(0, 100);
        let mut out = vec![0.0; 4];
        voice.render_block(&mut out, 1);
        assert_eq!(out, vec![1.0, 2.0, 3.0, 4.0]);

        voice.schedule(2, 0, 100);
        voice.render_block(&mut out, 1);

        assert_eq!(out, vec![5.0, 6.0, 1.0, 2.0]);
        assert_eq!(voice.playhead(), Some(2));
    }

    #[test]
    fn test_every_start_in_a_block_sounds() {
        let mut voice = voice(vec![1.0, 2.0], 1);
        voice.schedule(0, 0, 10);
        voice.schedule(5, 0, 10);
        let mut out = vec![0.0; 8];

        voice.render_block(&mut out, 1);

        assert_eq!(out, vec![1.0, 2.0, 0.0, 0.0, 0.0, 1.0, 2.0, 0.0]);
        assert!(!voice.is_active());
    }

    #[test]
    fn test_scheduled_zero_duration_stops_at_its_frame() {
        let mut voice = voice(vec![1.0; 10], 1);
        voice.trigger(0, 10);
        voice.schedule(2, 0, 0);
        let mut out = vec![0.0; 4];

        voice.render_block(&mut out, 1);

        assert_eq!(out, vec![1.0, 1.0, 0.0, 0.0]);
        assert!(!voice.is_active());
    }

    #[test]
    fn test_delay_longer_than_block() {
        let mut voice = voice(vec![1.0], 1);
        voice.schedule(5, 0, 1);
        let mut out = vec![0.0; 4];

        voice.render_block(&mut out, 1);
        assert_eq!(out, vec![0.0; 4]);
        voice.render_block(&mut out, 1);
        assert_eq!(out, vec![0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_mono_feeds_all_output_channels() {
        let mut voice = voice(vec![0.5, 0.25], 1);
        voice.trigger(0, 10);
        let mut out = vec![0.0; 4];

        voice.render_block(&mut out, 2);

        assert_eq!(out, vec![0.5, 0.5, 0.25, 0.25]);
    }

    #[test]
    fn test_mix_into_sums() {
        let mut voice = voice(vec![1.0, 1.0], 1);
        voice.trigger(0, 10);
        let mut out = vec![0.5; 3];

        voice.mix_into(&mut out, 1);

        assert_eq!(out, vec![1.5, 1.5, 0.5]);
    }

    #[test]
    fn test_empty_sample_never_activates() {
        let mut voice = voice(Vec::new(), 1);
        voice.trigger(0, 10);

        assert!(!voice.is_active());
    }
}
