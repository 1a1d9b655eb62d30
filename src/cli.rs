use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use crate::config::{parse_sound_driver, parse_volume, AudioConfig};

/// Streaming audio player for scene resources
#[derive(Parser, Debug, Default)]
#[command(name = "scene-audio")]
#[command(version = "0.8.0")]
#[command(about = "Stream an audio resource through the scene audio core", long_about = None)]
pub struct Cli {
    /// Audio resource: a file name, or a stem to pick a numbered variant
    #[arg(value_name = "RESOURCE")]
    pub resource: String,

    /// Configuration file (KEY = value lines)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Resource root directory
    #[arg(short, long, value_name = "DIR")]
    pub resources: Option<PathBuf>,

    /// Loop until the duration elapses
    #[arg(short, long = "loop")]
    pub looping: bool,

    /// Start muted
    #[arg(short, long)]
    pub mute: bool,

    /// Volume (0-100)
    #[arg(long, value_name = "VOLUME")]
    pub volume: Option<String>,

    /// Size in bytes of each streaming buffer
    #[arg(short, long = "audiobuffer", value_name = "BYTES")]
    pub audio_buffer: Option<usize>,

    /// Output driver (device, null)
    #[arg(short, long, value_name = "DRIVER")]
    pub driver: Option<String>,

    /// Stop after this many seconds
    #[arg(short = 't', long, value_name = "SECONDS")]
    pub duration: Option<f64>,

    /// Fade in from silence
    #[arg(long = "fadein")]
    pub fade_in: bool,

    /// Increase log verbosity (repeatable)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Merge CLI arguments into the configuration
    pub fn merge_into_config(&self, mut config: AudioConfig) -> Result<AudioConfig> {
        if let Some(ref root) = self.resources {
            config = config.with_resource_root(root.clone());
        }

        if self.mute {
            config.set_mute(true);
        }

        if let Some(ref vol) = self.volume {
            let int_vol: i32 = vol.parse().context("Invalid volume")?;
            config = config.with_volume(parse_volume(int_vol));
        }

        if let Some(bytes) = self.audio_buffer {
            config = config.with_audio_buffer(bytes);
        }

        if let Some(ref driver) = self.driver {
            config = config.with_driver(parse_sound_driver(driver)?);
        }

        if let Some(duration) = self.duration {
            if !duration.is_finite() || duration < 0.0 {
                anyhow::bail!("Invalid duration: {}", duration);
            }
        }

        Ok(config)
    }
}
