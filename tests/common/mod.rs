//! Shared fixtures for the playback integration tests
//!
//! Clips are 8000 Hz mono 16-bit WAV files; with a 4000-byte audio buffer
//! each streaming buffer holds 0.25 s, so three primed buffers put the
//! decode cursor 0.75 s ahead of playback.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hound::{SampleFormat, WavSpec, WavWriter};
use tempfile::TempDir;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::Registry;

use scene_audio::config::AudioConfig;
use scene_audio::sound::{Audio, AudioBackend, AudioManager, MixerBackend};

pub const RATE: u32 = 8000;
pub const AUDIO_BUFFER: usize = 4000;
pub const PRIME_LEAD: f64 = 0.75;
pub const TICK: Duration = Duration::from_millis(50);

/// Write a sawtooth WAV of `seconds` length
pub fn write_clip(path: &Path, channels: u16, seconds: f64) {
    let spec = WavSpec {
        channels,
        sample_rate: RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let frames = (seconds * RATE as f64) as usize;
    let mut writer = WavWriter::create(path, spec).unwrap();
    for i in 0..frames {
        for _ in 0..channels {
            writer.write_sample(((i % 100) as i16 - 50) * 100).unwrap();
        }
    }
    writer.finalize().unwrap();
}

pub struct Stage {
    pub dir: TempDir,
    pub config: Arc<AudioConfig>,
    pub mixer: Arc<MixerBackend>,
    pub manager: AudioManager,
}

impl Stage {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        write_clip(&dir.path().join("clip.wav"), 1, 2.0);
        write_clip(&dir.path().join("short.wav"), 1, 0.4);
        write_clip(&dir.path().join("quad.wav"), 4, 0.1);

        let config = Arc::new(AudioConfig::new(dir.path()).with_audio_buffer(AUDIO_BUFFER));
        let mixer = Arc::new(MixerBackend::new(RATE));
        let backend: Arc<dyn AudioBackend> = mixer.clone();
        let manager = AudioManager::new(Arc::clone(&config), backend);

        Self {
            dir,
            config,
            mixer,
            manager,
        }
    }

    pub fn audio(&self, name: &str) -> Arc<Audio> {
        self.manager.create_audio(name)
    }

    /// Consume one tick of output and update every object
    pub fn tick(&self) {
        self.mixer.advance_time(TICK);
        self.manager.update();
    }

    pub fn run_for(&self, seconds: f64) {
        let ticks = (seconds / TICK.as_secs_f64()).round() as usize;
        for _ in 0..ticks {
            self.tick();
        }
    }
}

struct ErrorCounter {
    errors: Arc<AtomicUsize>,
}

impl<S: Subscriber> Layer<S> for ErrorCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::ERROR {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Run `f` and return its result with the number of errors it logged
pub fn count_errors<R>(f: impl FnOnce() -> R) -> (R, usize) {
    let errors = Arc::new(AtomicUsize::new(0));
    let subscriber = Registry::default().with(ErrorCounter {
        errors: Arc::clone(&errors),
    });
    let result = tracing::subscriber::with_default(subscriber, f);
    (result, errors.load(Ordering::SeqCst))
}
