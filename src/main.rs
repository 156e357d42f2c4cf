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
use std::error::Error;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use clap::{crate_version, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use loopmix::config::{Installed, LoopSet};
use loopmix::samples::FileLoader;
use loopmix::{audio, engine, Controller, Renderer};

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A beat-synchronized loop sequencer."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the available audio output devices.
    Devices {},
    /// Loads a loop set and checks that it installs cleanly.
    Verify {
        /// The path to the loop set.
        loop_set: PathBuf,
    },
    /// Renders a loop set to a WAV file.
    Render {
        /// The path to the loop set.
        loop_set: PathBuf,
        /// The WAV file to write.
        output: PathBuf,
        /// How many beats to render.
        #[arg(short, long, default_value_t = 16.0)]
        beats: f64,
    },
    /// Plays a loop set through an audio device.
    Play {
        /// The path to the loop set.
        loop_set: PathBuf,
        /// The device name to play through. Uses the default device if absent.
        #[arg(short, long)]
        device: Option<String>,
        /// Stop after this many beats. Plays until interrupted if absent.
        #[arg(short, long)]
        beats: Option<f64>,
    },
}

/// Loads a loop set and installs it into a fresh engine.
fn load(path: &Path) -> Result<(LoopSet, Controller, Renderer, Installed), Box<dyn Error>> {
    let loop_set = LoopSet::deserialize(path)?;
    let config = loop_set.engine_config();
    let loader = FileLoader::new(config.sample_rate);
    let (controller, mut renderer) = engine::new(config, Box::new(loader))?;
    let installed = loop_set.install(&controller)?;
    renderer.flush();
    Ok((loop_set, controller, renderer, installed))
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices {} => {
            let devices = audio::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Verify { loop_set } => {
            let (parsed, controller, _renderer, installed) = load(&loop_set)?;

            println!("Loop set {} (tempo: {}):", loop_set.display(), parsed.tempo());
            for sample in parsed.samples() {
                println!("- sample {} ({})", sample.id, sample.file);
            }
            for id in controller.track_ids() {
                let track = controller.track(&id)?;
                let source = match controller.source_sample(track.source())? {
                    Some(sample) => format!("sample {}", sample),
                    None => "callback".to_string(),
                };
                println!(
                    "- track {} ({} beats, {} events, {})",
                    id,
                    track.length(),
                    track.events().len(),
                    source
                );
            }
            if installed.beat_counter.is_some() {
                println!("- beat counter");
            }
        }
        Commands::Render {
            loop_set,
            output,
            beats,
        } => {
            let (_, controller, mut renderer, _) = load(&loop_set)?;
            controller.start()?;

            let frames = audio::beats_to_frames(beats, controller.tempo(), renderer.sample_rate());
            audio::bounce(&mut renderer, &output, frames)?;
            println!("Rendered {} beats to {}.", beats, output.display());
        }
        Commands::Play {
            loop_set,
            device,
            beats,
        } => {
            let (_, controller, renderer, installed) = load(&loop_set)?;
            controller.start()?;
            let output = audio::start_output(device.as_deref(), renderer)?;
            info!(device = output.device(), "Playing");

            let deadline = beats
                .map(|beats| Duration::from_secs_f64(beats.max(0.0) * 60.0 / controller.tempo()))
                .map(|duration| Instant::now() + duration);
            let mut last_beat = None;
            while deadline.is_none_or(|deadline| Instant::now() < deadline) {
                if let Some(counter) = &installed.beat_counter {
                    let beat = counter.last_beat();
                    if beat != last_beat {
                        if let Some(beat) = beat {
                            info!(beat, "Beat");
                        }
                        last_beat = beat;
                    }
                }
                thread::sleep(Duration::from_millis(10));
            }

            controller.stop()?;
            drop(output);
        }
    }

    Ok(())
}
