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

//! Decoded sample storage.
//!
//! Samples are decoded once and held in memory behind an [`Arc`] so every
//! voice bound to a sample shares the same immutable buffer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::loader::SampleLoader;
use crate::error::{Error, Result};

/// An immutable decoded sample.
#[derive(Debug, PartialEq)]
pub struct SampleBuffer {
    /// Interleaved samples.
    data: Vec<f32>,
    channel_count: u16,
    sample_rate: u32,
    frame_count: usize,
}

impl SampleBuffer {
    /// Creates a buffer from interleaved samples. A trailing partial frame is dropped.
    pub fn new(mut data: Vec<f32>, channel_count: u16, sample_rate: u32) -> Self {
        let channels = channel_count.max(1) as usize;
        let frame_count = data.len() / channels;
        data.truncate(frame_count * channels);
        Self {
            data,
            channel_count: channel_count.max(1),
            sample_rate,
            frame_count,
        }
    }

    pub fn channel_count(&self) -> u16 {
        self.channel_count
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn is_empty(&self) -> bool {
        self.frame_count == 0
    }

    /// Reads the sample feeding `output_channel` at `frame`. Output channels wrap
    /// around the sample's channels, so mono feeds every output.
    #[inline]
    pub fn read(&self, frame: usize, output_channel: usize) -> f32 {
        let channels = self.channel_count as usize;
        self.data[frame * channels + output_channel % channels]
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frame_count as f64 / self.sample_rate as f64)
    }

    /// Returns the memory size in bytes.
    pub fn memory_size(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }
}

struct BankEntry {
    /// The source identifier the buffer was decoded from.
    source: String,
    buffer: Arc<SampleBuffer>,
}

/// Maps sample ids to decoded buffers.
pub struct SampleBank {
    loader: Box<dyn SampleLoader>,
    entries: HashMap<String, BankEntry>,
    /// Sample rate the engine renders at. Mismatches are reported, not resampled.
    target_sample_rate: u32,
}

impl SampleBank {
    pub fn new(loader: Box<dyn SampleLoader>, target_sample_rate: u32) -> Self {
        Self {
            loader,
            entries: HashMap::new(),
            target_sample_rate,
        }
    }

    /// Decodes `source` and stores it under `id`.
    ///
    /// Loading the same source under the same id again returns the cached buffer.
    /// Loading a different source under an existing id fails, since voices may
    /// still hold the old buffer. A failed decode leaves no entry behind.
    pub fn load(&mut self, id: &str, source: &str) -> Result<Arc<SampleBuffer>> {
        if let Some(entry) = self.entries.get(id) {
            if entry.source == source {
                debug!(id, source, "Using cached sample");
                return Ok(entry.buffer.clone());
            }
            return Err(Error::Conflict { id: id.to_string() });
        }

        let decoded = self.loader.decode(source).map_err(|e| Error::Decode {
            sample: source.to_string(),
            reason: e.to_string(),
        })?;
        if decoded.channel_count == 0 {
            return Err(Error::Decode {
                sample: source.to_string(),
                reason: "sample has no channels".to_string(),
            });
        }
        if decoded.sample_rate != self.target_sample_rate {
            warn!(
                id,
                sample_rate = decoded.sample_rate,
                engine_rate = self.target_sample_rate,
                "Sample rate differs from engine rate, playback speed will be off"
            );
        }

        let buffer = Arc::new(SampleBuffer::new(
            decoded.data,
            decoded.channel_count,
            decoded.sample_rate,
        ));

        info!(
            id,
            source,
            channels = buffer.channel_count(),
            frames = buffer.frame_count(),
            duration_ms = buffer.duration().as_millis(),
            memory_kb = buffer.memory_size() / 1024,
            "Sample loaded"
        );

        self.entries.insert(
            id.to_string(),
            BankEntry {
                source: source.to_string(),
                buffer: buffer.clone(),
            },
        );
        Ok(buffer)
    }

    pub fn get(&self, id: &str) -> Result<Arc<SampleBuffer>> {
        self.entries
            .get(id)
            .map(|entry| entry.buffer.clone())
            .ok_or_else(|| Error::not_found("sample", id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the total memory used by loaded samples.
    pub fn total_memory_usage(&self) -> usize {
        self.entries.values().map(|e| e.buffer.memory_size()).sum()
    }
}

impl std::fmt::Debug for SampleBank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleBank")
            .field("samples", &self.entries.len())
            .field("target_sample_rate", &self.target_sample_rate)
            .field("total_memory_kb", &(self.total_memory_usage() / 1024))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::samples::loader::MemoryLoader;

    fn bank() -> SampleBank {
        let loader = MemoryLoader::new()
            .with("tone.wav", vec![1.0, 1.0, 1.0], 1, 48000)
            .with("other.wav", vec![0.5, 0.5], 1, 48000)
            .with("stereo.wav", vec![0.1, 0.2, 0.3, 0.4, 0.5], 2, 48000);
        SampleBank::new(Box::new(loader), 48000)
    }

    #[test]
    fn test_load_and_get() {
        let mut bank = bank();
        let buffer = bank.load("tone", "tone.wav").unwrap();

        assert_eq!(buffer.frame_count(), 3);
        assert_eq!(buffer.channel_count(), 1);
        assert!(Arc::ptr_eq(&buffer, &bank.get("tone").unwrap()));
    }

    #[test]
    fn test_reload_same_source_is_cached() {
        let mut bank = bank();
        let first = bank.load("tone", "tone.wav").unwrap();
        let second = bank.load("tone", "tone.wav").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(bank.len(), 1);
    }

    #[test]
    fn test_reload_different_source_conflicts() {
        let mut bank = bank();
        let first = bank.load("tone", "tone.wav").unwrap();

        assert!(matches!(
            bank.load("tone", "other.wav"),
            Err(Error::Conflict { .. })
        ));
        assert!(Arc::ptr_eq(&first, &bank.get("tone").unwrap()));
    }

    #[test]
    fn test_decode_failure_leaves_no_entry() {
        let mut bank = bank();

        assert!(matches!(
            bank.load("missing", "missing.wav"),
            Err(Error::Decode { .. })
        ));
        assert!(!bank.contains("missing"));
        assert!(matches!(bank.get("missing"), Err(Error::NotFound { .. })));
    }

    #[test]
    fn test_partial_frame_is_dropped() {
        let mut bank = bank();
        let buffer = bank.load("stereo", "stereo.wav").unwrap();

        assert_eq!(buffer.frame_count(), 2);
        assert_eq!(buffer.read(1, 0), 0.3);
        assert_eq!(buffer.read(1, 1), 0.4);
        // Output channel 2 wraps back to sample channel 0.
        assert_eq!(buffer.read(1, 2), 0.3);
    }
}
