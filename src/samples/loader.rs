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

//! External sample decoding.
//!
//! The sample bank never touches files itself. It asks a [`SampleLoader`] to
//! turn a source identifier into decoded, interleaved f32 audio.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer as DecodeBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};
use tracing::{debug, info, warn};

/// Errors produced while decoding a sample source.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Audio file error: {0}")]
    Audio(#[from] SymphoniaError),

    #[error("Unsupported audio: {0}")]
    Unsupported(String),

    #[error("No sample registered for '{0}'")]
    Missing(String),
}

/// Decoded audio handed back by a loader.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedSample {
    /// Interleaved samples.
    pub data: Vec<f32>,
    pub channel_count: u16,
    pub sample_rate: u32,
}

/// Turns a source identifier into decoded audio.
pub trait SampleLoader: Send {
    fn decode(&self, source: &str) -> Result<DecodedSample, LoadError>;
}

/// Decodes audio files with symphonia and transcodes them to the engine rate.
#[derive(Debug, Clone)]
pub struct FileLoader {
    target_sample_rate: u32,
}

impl FileLoader {
    pub fn new(target_sample_rate: u32) -> Self {
        Self { target_sample_rate }
    }

    fn decode_file(&self, path: &Path) -> Result<DecodedSample, LoadError> {
        let file = File::open(path).map_err(|e| {
            LoadError::Io(std::io::Error::new(
                e.kind(),
                format!("{}: {}", path.display(), e),
            ))
        })?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
            hint.with_extension(extension);
        }

        let probed = get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;
        let mut format_reader = probed.format;

        let track = format_reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| LoadError::Unsupported("no audio track found".to_string()))?;
        let track_id = track.id;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| LoadError::Unsupported("sample rate not specified".to_string()))?;

        let mut decoder = get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

        let mut samples = Vec::new();
        let mut channel_count: u16 = track
            .codec_params
            .channels
            .map(|c| c.count() as u16)
            .unwrap_or(0);
        let mut decode_buffer: Option<DecodeBuffer<f32>> = None;
        let mut decode_capacity = 0usize;

        loop {
            let packet = match format_reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => return Err(e.into()),
            };
            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!(path = ?path, error = e, "Skipping undecodable packet");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let spec = *decoded.spec();
            if channel_count == 0 {
                channel_count = spec.channels.count() as u16;
            }
            if decode_buffer.is_none() || decoded.capacity() > decode_capacity {
                decode_capacity = decoded.capacity();
                decode_buffer = Some(DecodeBuffer::<f32>::new(decode_capacity as u64, spec));
            }
            if let Some(buffer) = decode_buffer.as_mut() {
                buffer.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buffer.samples());
            }
        }

        if channel_count == 0 {
            return Err(LoadError::Unsupported(
                "unable to determine channel count".to_string(),
            ));
        }

        Ok(DecodedSample {
            data: samples,
            channel_count,
            sample_rate,
        })
    }
}

impl SampleLoader for FileLoader {
    fn decode(&self, source: &str) -> Result<DecodedSample, LoadError> {
        let path = Path::new(source);
        info!(path = ?path, "Decoding sample");

        let decoded = self.decode_file(path)?;
        if decoded.sample_rate == self.target_sample_rate {
            return Ok(decoded);
        }

        info!(
            source_rate = decoded.sample_rate,
            target_rate = self.target_sample_rate,
            "Transcoding sample"
        );
        Ok(DecodedSample {
            data: transcode_linear(
                &decoded.data,
                decoded.channel_count,
                decoded.sample_rate,
                self.target_sample_rate,
            ),
            channel_count: decoded.channel_count,
            sample_rate: self.target_sample_rate,
        })
    }
}

/// Serves pre-decoded audio from memory. Useful for generated tones and tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryLoader {
    samples: HashMap<String, DecodedSample>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers interleaved audio under a source identifier.
    pub fn insert(&mut self, source: &str, data: Vec<f32>, channel_count: u16, sample_rate: u32) {
        debug!(source, channel_count, sample_rate, "Registered in-memory sample");
        self.samples.insert(
            source.to_string(),
            DecodedSample {
                data,
                channel_count,
                sample_rate,
            },
        );
    }

    /// Builder-style variant of [`MemoryLoader::insert`].
    pub fn with(mut self, source: &str, data: Vec<f32>, channel_count: u16, sample_rate: u32) -> Self {
        self.insert(source, data, channel_count, sample_rate);
        self
    }
}

impl SampleLoader for MemoryLoader {
    fn decode(&self, source: &str) -> Result<DecodedSample, LoadError> {
        self.samples
            .get(source)
            .cloned()
            .ok_or_else(|| LoadError::Missing(source.to_string()))
    }
}

/// Resamples interleaved audio with linear interpolation.
/// Good enough for loops and one-shots; not meant for mastering.
pub fn transcode_linear(
    samples: &[f32],
    channel_count: u16,
    source_rate: u32,
    target_rate: u32,
) -> Vec<f32> {
    let channels = channel_count.max(1) as usize;
    if source_rate == target_rate || source_rate == 0 {
        return samples.to_vec();
    }

    let ratio = target_rate as f64 / source_rate as f64;
    let source_frames = samples.len() / channels;
    let target_frames = (source_frames as f64 * ratio).ceil() as usize;
    let mut output = Vec::with_capacity(target_frames * channels);

    for target_frame in 0..target_frames {
        let source_pos = target_frame as f64 / ratio;
        let source_frame = source_pos.floor() as usize;
        let frac = source_pos.fract() as f32;

        for channel in 0..channels {
            let s0 = samples
                .get(source_frame * channels + channel)
                .copied()
                .unwrap_or(0.0);
            let s1 = samples
                .get((source_frame + 1) * channels + channel)
                .copied()
                .unwrap_or(s0);
            output.push(s0 + (s1 - s0) * frac);
        }
    }

    output
}
