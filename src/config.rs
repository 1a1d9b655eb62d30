use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};

use crate::logging::LogModule;
use crate::resource::propfile::parse_propfile;
use crate::sound::fade::DEFAULT_FADE_STEP;
use crate::log_warning;

/// Default size in bytes of one streaming buffer
pub const DEFAULT_AUDIO_BUFFER: usize = 32768;

/// Smallest streaming buffer accepted from configuration
pub const MIN_AUDIO_BUFFER: usize = 1024;

/// Subdirectory of the resource root holding audio files
pub const AUDIO_DIR: &str = "audio";

/// Output driver used by the player
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundDriver {
    /// Real output device (rodio)
    Device,
    /// Software mixer consuming audio at real-time pace without output
    Null,
}

/// Audio configuration shared by the manager and every audio object
///
/// Everything but the mute flag is fixed once playback starts; mute can be
/// toggled from any thread.
#[derive(Debug)]
pub struct AudioConfig {
    mute: AtomicBool,
    audio_buffer: usize,
    resource_root: PathBuf,
    fade_step: f32,
    volume: f32,
    driver: SoundDriver,
}

impl AudioConfig {
    pub fn new(resource_root: impl Into<PathBuf>) -> Self {
        Self {
            resource_root: resource_root.into(),
            ..Self::default()
        }
    }

    pub fn with_audio_buffer(mut self, bytes: usize) -> Self {
        self.audio_buffer = normalize_audio_buffer(bytes);
        self
    }

    pub fn with_fade_step(mut self, step: f32) -> Self {
        self.fade_step = step.abs();
        self
    }

    pub fn with_mute(self, mute: bool) -> Self {
        self.set_mute(mute);
        self
    }

    /// Default fade level for new audio objects (0.0-1.0)
    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume.clamp(0.0, 1.0);
        self
    }

    pub fn with_driver(mut self, driver: SoundDriver) -> Self {
        self.driver = driver;
        self
    }

    pub fn with_resource_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.resource_root = root.into();
        self
    }

    pub fn mute(&self) -> bool {
        self.mute.load(Ordering::Acquire)
    }

    pub fn set_mute(&self, mute: bool) {
        self.mute.store(mute, Ordering::Release);
    }

    /// Size in bytes of each streaming buffer (always a multiple of 4)
    pub fn audio_buffer(&self) -> usize {
        self.audio_buffer
    }

    pub fn fade_step(&self) -> f32 {
        self.fade_step
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn driver(&self) -> SoundDriver {
        self.driver
    }

    pub fn resource_root(&self) -> &Path {
        &self.resource_root
    }

    /// Map an audio file name to its location on disk
    ///
    /// Looks in the audio subdirectory first and falls back to the root.
    pub fn resource_path(&self, file_name: &str) -> PathBuf {
        let in_kind_dir = self.resource_root.join(AUDIO_DIR).join(file_name);
        if in_kind_dir.exists() {
            in_kind_dir
        } else {
            self.resource_root.join(file_name)
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            mute: AtomicBool::new(false),
            audio_buffer: DEFAULT_AUDIO_BUFFER,
            resource_root: PathBuf::from("."),
            fade_step: DEFAULT_FADE_STEP,
            volume: 1.0,
            driver: SoundDriver::Device,
        }
    }
}

/// Round a buffer size down to whole 16-bit stereo frames
fn normalize_audio_buffer(bytes: usize) -> usize {
    bytes.max(MIN_AUDIO_BUFFER) & !3
}

/// Load configuration from a `KEY = value` property file
///
/// A missing `path` yields the defaults. Unknown keys are ignored with a
/// warning; malformed values are errors.
pub fn load_config(path: Option<&Path>) -> Result<AudioConfig> {
    let Some(path) = path else {
        return Ok(AudioConfig::default());
    };

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Unable to read config file {}", path.display()))?;
    parse_config(&text)
}

/// Parse configuration text in property-file form
pub fn parse_config(text: &str) -> Result<AudioConfig> {
    let mut entries = Vec::new();
    parse_propfile(text, &mut |key, value| entries.push((key.to_uppercase(), value.to_string())), None);

    let mut config = AudioConfig::default();
    for (key, value) in entries {
        match key.as_str() {
            "MUTE" => config.set_mute(parse_bool(&value)?),
            "AUDIOBUFFER" => {
                let bytes: usize = value.parse().context("Invalid audio buffer size")?;
                config = config.with_audio_buffer(bytes);
            }
            "RESOURCES" => config = config.with_resource_root(value),
            "FADESTEP" => {
                let step: f32 = value.parse().context("Invalid fade step")?;
                config = config.with_fade_step(step);
            }
            "VOLUME" => {
                let volume: i32 = value.parse().context("Invalid volume")?;
                config = config.with_volume(parse_volume(volume));
            }
            "DRIVER" => config = config.with_driver(parse_sound_driver(&value)?),
            _ => log_warning!(LogModule::Config, "Unknown configuration key: {}", key),
        }
    }

    Ok(config)
}

/// Parse a boolean setting (`true/false`, `yes/no`, `on/off`, `1/0`)
pub fn parse_bool(s: &str) -> Result<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        other => anyhow::bail!("Invalid boolean value: {}", other),
    }
}

/// Parse a volume value (0-100) to a float (0.0-1.0)
pub fn parse_volume(vol: i32) -> f32 {
    if vol < 0 {
        return 0.0;
    }
    if vol > 100 {
        return 1.0;
    }
    vol as f32 / 100.0
}

/// Parse a sound driver name
pub fn parse_sound_driver(s: &str) -> Result<SoundDriver> {
    match s.trim().to_ascii_lowercase().as_str() {
        "device" | "rodio" => Ok(SoundDriver::Device),
        "null" | "none" | "mixer" => Ok(SoundDriver::Null),
        other => anyhow::bail!("Unknown sound driver: {}", other),
    }
}
