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
use std::{error::Error, fmt};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SizedSample};
use tracing::{error, info};

use crate::engine::Renderer;

/// An output device as reported by cpal.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub host: String,
    /// The maximum number of channels the device supports.
    pub max_channels: u16,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}) ({})",
            self.name, self.max_channels, self.host
        )
    }
}

#[allow(deprecated)]
fn device_name(device: &cpal::Device) -> Option<String> {
    device.name().ok()
}

/// Lists output devices across every available host.
pub fn list_devices() -> Result<Vec<DeviceInfo>, Box<dyn Error>> {
    let mut devices = Vec::new();
    for host_id in cpal::available_hosts() {
        let host_devices = match cpal::host_from_id(host_id)?.output_devices() {
            Ok(host_devices) => host_devices,
            Err(e) => {
                error!(
                    err = e.to_string(),
                    host = host_id.name(),
                    "Unable to list devices for host"
                );
                continue;
            }
        };

        for device in host_devices {
            let Ok(output_configs) = device.supported_output_configs() else {
                continue;
            };
            let max_channels = output_configs
                .map(|config| config.channels())
                .max()
                .unwrap_or(0);
            if max_channels == 0 {
                continue;
            }
            let Some(name) = device_name(&device) else {
                continue;
            };
            devices.push(DeviceInfo {
                name,
                host: host_id.name().to_string(),
                max_channels,
            });
        }
    }

    devices.sort_by_key(|device| device.name.to_string());
    Ok(devices)
}

/// Finds an output device by name, or the default output device.
fn find_device(name: Option<&str>) -> Result<cpal::Device, Box<dyn Error>> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_output_device()
            .ok_or_else(|| "no default output device".into()),
        Some(name) => host
            .output_devices()?
            .find(|device| device_name(device).is_some_and(|n| n.trim() == name))
            .ok_or_else(|| format!("no device found with name {}", name).into()),
    }
}

/// A running output stream. Playback stops when this is dropped.
pub struct Output {
    _stream: cpal::Stream,
    device: String,
}

impl Output {
    pub fn device(&self) -> &str {
        &self.device
    }
}

/// Opens a stream on the named (or default) device and drives `renderer`
/// from its callback.
pub fn start_output(
    requested: Option<&str>,
    mut renderer: Renderer,
) -> Result<Output, Box<dyn Error>> {
    let device = find_device(requested)?;
    let name = device_name(&device).unwrap_or_else(|| "unknown".to_string());
    let sample_format = device.default_output_config()?.sample_format();
    let config = cpal::StreamConfig {
        channels: renderer.channels(),
        sample_rate: renderer.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = match sample_format {
        cpal::SampleFormat::F32 => device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| renderer.fill(data),
            |err| error!("CPAL output stream error: {}", err),
            None,
        )?,
        cpal::SampleFormat::I16 => build_converting_stream::<i16>(&device, &config, renderer)?,
        cpal::SampleFormat::I32 => build_converting_stream::<i32>(&device, &config, renderer)?,
        other => return Err(format!("unsupported sample format {}", other).into()),
    };
    stream.play()?;

    info!(
        device = name,
        channels = config.channels,
        sample_rate = config.sample_rate,
        "CPAL output stream started"
    );
    Ok(Output {
        _stream: stream,
        device: name,
    })
}

/// Renders into a float scratch buffer and converts to the device format.
fn build_converting_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut renderer: Renderer,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<f32>,
{
    let mut scratch = vec![0.0f32; renderer.block_frames() * renderer.channels() as usize];
    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            for chunk in data.chunks_mut(scratch.len()) {
                let scratch = &mut scratch[..chunk.len()];
                renderer.fill(scratch);
                for (dst, &src) in chunk.iter_mut().zip(scratch.iter()) {
                    *dst = T::from_sample(src);
                }
            }
        },
        |err| error!("CPAL output stream error: {}", err),
        None,
    )
}
