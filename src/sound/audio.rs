//! Streaming audio objects
//!
//! An [`Audio`] owns one encoded resource, its decoder and a [`BufferRing`]
//! on the shared backend. All of its state lives in one [`AudioInner`]
//! behind a [`GuardedState`]; every public operation takes that lock once,
//! with a bounded wait, and gives up with a logged error if it cannot.
//!
//! Lifecycle: `Initial` (optionally loaded) -> `Playing` / `Paused` /
//! `Stopped` -> `unload` -> `Initial`. Playback operations never return
//! errors; failures are logged and leave the object in a consistent state.

use std::sync::{Arc, Weak};

use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;

use crate::config::AudioConfig;
use crate::logging::LogModule;
use crate::resource::{resolve_file_name, AudioResource, LoaderError};
use crate::sound::backend::{verify, AudioBackend, SourceId, Vec3};
use crate::sound::decoder::{open_decoder, DecodeError, StreamDecoder};
use crate::sound::fade::FadeEnvelope;
use crate::sound::ring::{BufferRing, RingError, RingStatus, StreamHealth};
use crate::threading::GuardedState;
use crate::{log_debug, log_error, log_info, log_warning};

/// Edge length of a cube-face texture, in texels
pub const TEXTURE_SIZE: f32 = 2048.0;

/// Playback state of an audio object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioState {
    #[default]
    Initial,
    Playing,
    Paused,
    Stopped,
}

/// Face of the surrounding cube a sound is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Face {
    North,
    East,
    South,
    West,
    Up,
    Down,
}

impl Face {
    /// Face for a raw index in north, east, south, west, up, down order
    ///
    /// # Panics
    /// Panics if `index` is not a face index.
    pub fn from_index(index: u32) -> Self {
        match index {
            0 => Face::North,
            1 => Face::East,
            2 => Face::South,
            3 => Face::West,
            4 => Face::Up,
            5 => Face::Down,
            _ => panic!("invalid cube face index {}", index),
        }
    }

    /// Listener-relative position of `origin` on this face
    pub fn position(self, origin: Point) -> Vec3 {
        let x = origin.x / TEXTURE_SIZE;
        let y = origin.y / TEXTURE_SIZE;
        match self {
            Face::North => [x, y, -1.0],
            Face::East => [1.0, y, x],
            Face::South => [-x, y, 1.0],
            Face::West => [-1.0, y, -x],
            Face::Up => [0.0, 1.0, 0.0],
            Face::Down => [0.0, -1.0, 0.0],
        }
    }
}

/// Point on a face texture
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Error)]
enum LoadError {
    #[error(transparent)]
    Resource(#[from] LoaderError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Ring(#[from] RingError),
}

/// Everything that exists only while loaded
struct Loaded {
    decoder: Box<dyn StreamDecoder>,
    ring: BufferRing,
    file_name: String,
}

struct AudioInner {
    config: Arc<AudioConfig>,
    backend: Arc<dyn AudioBackend>,
    health: StreamHealth,
    rng: StdRng,
    resource_name: String,
    loaded: Option<Loaded>,
    looping: bool,
    state: AudioState,
    fade: FadeEnvelope,
    position: Vec3,
    matched: Option<Weak<Audio>>,
}

impl AudioInner {
    fn initial_gain(&self) -> f32 {
        if self.config.mute() || self.fade.level() < 0.0 {
            0.0
        } else {
            self.fade.level()
        }
    }

    fn load(&mut self) {
        if self.loaded.is_some() {
            return;
        }

        let file_name = resolve_file_name(&self.resource_name, &mut self.rng);
        match self.open(&file_name) {
            Ok(loaded) => {
                log_debug!(LogModule::Audio, "Loaded audio {}", file_name);
                self.loaded = Some(loaded);
            }
            Err(e) => log_error!(LogModule::Audio, "Unable to load audio {}: {}", file_name, e),
        }
    }

    fn open(&self, file_name: &str) -> Result<Loaded, LoadError> {
        let resource = AudioResource::load(self.config.resource_path(file_name))?;
        let mut decoder = open_decoder(Box::new(resource))?;

        let mut ring = BufferRing::new(
            Arc::clone(&self.backend),
            self.health.clone(),
            decoder.as_ref(),
            self.config.audio_buffer(),
            file_name,
        )?;
        match ring.prime(decoder.as_mut(), self.looping) {
            Ok(()) => {}
            // The object stays loaded; it plays whatever was buffered
            Err(e @ (RingError::StreamBroken | RingError::Decode(_))) => {
                log_warning!(LogModule::Audio, "{}: prebuffer failed: {}", file_name, e);
            }
            Err(e) => return Err(e.into()),
        }

        let source = ring.source();
        verify("gain", self.backend.set_gain(source, self.initial_gain()));
        verify("position", self.backend.set_position(source, self.position));

        Ok(Loaded {
            decoder,
            ring,
            file_name: file_name.to_string(),
        })
    }

    fn play(&mut self, peer_cursor: Option<f64>) {
        if self.state == AudioState::Playing {
            return;
        }
        let Some(loaded) = self.loaded.as_mut() else {
            return;
        };

        let restart = match peer_cursor {
            Some(seconds) => {
                // The peer is audible one full ring behind its decode cursor;
                // after priming, both cursors and both outputs line up
                let target = (seconds - loaded.ring.lead_time()).max(0.0);
                if let Err(e) = loaded.decoder.time_seek(target) {
                    log_warning!(LogModule::Audio, "{}: matched seek failed: {}", loaded.file_name, e);
                }
                true
            }
            None => self.state == AudioState::Stopped,
        };
        if restart {
            if let Err(e) = loaded.ring.restart(loaded.decoder.as_mut(), self.looping) {
                report_ring_error(&loaded.file_name, e);
            }
        }

        verify("play", self.backend.play(loaded.ring.source()));
        self.state = AudioState::Playing;
    }

    fn pause(&mut self) {
        if self.state != AudioState::Playing {
            return;
        }
        if let Some(loaded) = &self.loaded {
            verify("pause", self.backend.pause(loaded.ring.source()));
        }
        self.state = AudioState::Paused;
    }

    fn stop(&mut self) {
        if !matches!(self.state, AudioState::Playing | AudioState::Paused) {
            return;
        }
        if let Some(loaded) = self.loaded.as_mut() {
            verify("stop", self.backend.stop(loaded.ring.source()));
            if let Err(e) = loaded.decoder.rewind() {
                log_warning!(LogModule::Audio, "{}: rewind failed: {}", loaded.file_name, e);
            }
        }
        self.state = AudioState::Stopped;
    }

    fn unload(&mut self) {
        let Some(mut loaded) = self.loaded.take() else {
            return;
        };

        if self.state == AudioState::Playing {
            verify("stop", self.backend.stop(loaded.ring.source()));
            if let Err(e) = loaded.decoder.rewind() {
                log_warning!(LogModule::Audio, "{}: rewind failed: {}", loaded.file_name, e);
            }
        }
        if let Err(e) = loaded.ring.drain_processed() {
            report_ring_error(&loaded.file_name, e);
        }
        loaded.decoder.close();
        log_debug!(LogModule::Audio, "Unloaded audio {}", loaded.file_name);
        drop(loaded);

        self.state = AudioState::Initial;
        self.fade.set_level(self.fade.default_level());
    }

    fn update(&mut self) {
        if self.state != AudioState::Playing {
            return;
        }
        let Some(loaded) = self.loaded.as_mut() else {
            return;
        };
        let source = loaded.ring.source();

        match loaded.ring.recycle(loaded.decoder.as_mut(), self.looping) {
            Ok(RingStatus::Streaming) => {}
            Ok(RingStatus::Ended) => {
                log_debug!(LogModule::Audio, "{}: finished", loaded.file_name);
                verify("stop", self.backend.stop(source));
                self.state = AudioState::Stopped;
                return;
            }
            Err(e) => report_ring_error(&loaded.file_name, e),
        }

        let level = self.fade.tick();
        if self.config.mute() {
            verify("gain", self.backend.set_gain(source, 0.0));
        } else if level > 0.0 {
            verify("gain", self.backend.set_gain(source, level));
        } else {
            verify("pause", self.backend.pause(source));
            self.state = AudioState::Paused;
        }
    }

    fn cursor(&self) -> f64 {
        self.loaded
            .as_ref()
            .map_or(0.0, |loaded| loaded.decoder.time_tell())
    }
}

fn report_ring_error(name: &str, e: RingError) {
    match e {
        RingError::StreamBroken => log_debug!(LogModule::Audio, "{}: {}", name, e),
        _ => log_error!(LogModule::Audio, "{}: {}", name, e),
    }
}

/// One streaming sound
pub struct Audio {
    inner: GuardedState<AudioInner>,
}

impl Audio {
    pub fn new(
        resource_name: impl Into<String>,
        config: Arc<AudioConfig>,
        backend: Arc<dyn AudioBackend>,
        health: StreamHealth,
    ) -> Self {
        let resource_name = resource_name.into();
        let fade = FadeEnvelope::with_default_level(config.fade_step(), config.volume());
        let lock_name = format!("audio {}", resource_name);

        Self {
            inner: GuardedState::new(
                AudioInner {
                    config,
                    backend,
                    health,
                    rng: StdRng::from_entropy(),
                    resource_name,
                    loaded: None,
                    looping: false,
                    state: AudioState::Initial,
                    fade,
                    position: [0.0, 0.0, 0.0],
                    matched: None,
                },
                lock_name,
            ),
        }
    }

    fn with_state<R>(&self, op: &str, f: impl FnOnce(&mut AudioInner) -> R) -> Option<R> {
        match self.inner.lock() {
            Ok(mut inner) => Some(f(&mut inner)),
            Err(e) => {
                log_error!(LogModule::Audio, "{}: {}", op, e);
                None
            }
        }
    }

    /// Read the file, open its decoder and prime the buffers
    pub fn load(&self) {
        self.with_state("load", AudioInner::load);
    }

    /// Start or resume playback
    ///
    /// A matched object first seeks to its peer's current position.
    pub fn play(&self) {
        let peer_cursor = self.matched_cursor();
        self.with_state("play", |inner| inner.play(peer_cursor));
    }

    pub fn pause(&self) {
        self.with_state("pause", AudioInner::pause);
    }

    /// Stop and rewind to the start
    pub fn stop(&self) {
        self.with_state("stop", AudioInner::stop);
    }

    /// Release the decoder, buffers and file bytes
    pub fn unload(&self) {
        self.with_state("unload", AudioInner::unload);
    }

    /// Refill buffers and advance the fade; called once per frame
    pub fn update(&self) {
        self.with_state("update", AudioInner::update);
    }

    pub fn set_position(&self, face: Face, origin: Point) {
        let position = face.position(origin);
        self.with_state("position", |inner| {
            inner.position = position;
            if let Some(loaded) = &inner.loaded {
                verify("position", inner.backend.set_position(loaded.ring.source(), position));
            }
        });
    }

    /// Align to `other`'s position whenever this object starts playing
    pub fn match_with(self: &Arc<Self>, other: &Arc<Audio>) {
        if Arc::ptr_eq(self, other) {
            log_warning!(LogModule::Audio, "Refusing to match audio with itself");
            return;
        }
        self.with_state("match", |inner| inner.matched = Some(Arc::downgrade(other)));
    }

    pub fn unmatch(&self) {
        self.with_state("unmatch", |inner| inner.matched = None);
    }

    pub fn is_matched(&self) -> bool {
        self.with_state("is matched", |inner| inner.matched.is_some())
            .unwrap_or(false)
    }

    fn matched_cursor(&self) -> Option<f64> {
        let peer = self
            .with_state("play", |inner| inner.matched.as_ref().and_then(Weak::upgrade))
            .flatten()?;
        if std::ptr::eq(Arc::as_ptr(&peer), self) {
            return None;
        }
        let cursor = peer.with_state("peer cursor", |inner| {
            inner.loaded.as_ref().map(|_| inner.cursor())
        });
        let cursor = cursor.flatten();
        if let Some(seconds) = cursor {
            log_info!(LogModule::Audio, "Matching peer position {:.3}s", seconds);
        }
        cursor
    }

    /// Decode position in seconds, 0 when unloaded
    pub fn cursor(&self) -> f64 {
        self.with_state("cursor", |inner| inner.cursor()).unwrap_or(0.0)
    }

    pub fn state(&self) -> AudioState {
        self.with_state("state", |inner| inner.state)
            .unwrap_or_default()
    }

    pub fn is_loaded(&self) -> bool {
        self.with_state("is loaded", |inner| inner.loaded.is_some())
            .unwrap_or(false)
    }

    pub fn is_playing(&self) -> bool {
        self.state() == AudioState::Playing
    }

    pub fn is_loopable(&self) -> bool {
        self.with_state("is loopable", |inner| inner.looping)
            .unwrap_or(false)
    }

    pub fn set_loopable(&self, looping: bool) {
        self.with_state("set loopable", |inner| inner.looping = looping);
    }

    pub fn resource_name(&self) -> String {
        self.with_state("resource name", |inner| inner.resource_name.clone())
            .unwrap_or_default()
    }

    /// Takes effect on the next load
    pub fn set_resource(&self, name: impl Into<String>) {
        let name = name.into();
        self.with_state("set resource", |inner| inner.resource_name = name);
    }

    /// Backend source while loaded
    pub fn source(&self) -> Option<SourceId> {
        self.with_state("source", |inner| {
            inner.loaded.as_ref().map(|loaded| loaded.ring.source())
        })
        .flatten()
    }

    /// Seed the generator used to pick among numbered variants
    pub fn seed_variants(&self, seed: u64) {
        self.with_state("seed", |inner| inner.rng = StdRng::seed_from_u64(seed));
    }

    // Fade envelope

    pub fn fade_level(&self) -> f32 {
        self.with_state("fade level", |inner| inner.fade.level())
            .unwrap_or(0.0)
    }

    pub fn fade_in(&self) {
        self.with_state("fade in", |inner| inner.fade.fade_in());
    }

    pub fn fade_out(&self) {
        self.with_state("fade out", |inner| inner.fade.fade_out());
    }

    pub fn set_fade_target(&self, level: f32) {
        self.with_state("fade target", |inner| inner.fade.set_target(level));
    }

    pub fn set_fade_level(&self, level: f32) {
        self.with_state("fade level", |inner| inner.fade.set_level(level));
    }

    pub fn set_fade_step(&self, step: f32) {
        self.with_state("fade step", |inner| inner.fade.set_step(step));
    }

    /// Per-object volume; the level `fade_in` returns to
    pub fn set_default_level(&self, level: f32) {
        self.with_state("default level", |inner| inner.fade.set_default_level(level));
    }

    pub fn is_fading(&self) -> bool {
        self.with_state("is fading", |inner| inner.fade.is_fading())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::capture::count_errors;
    use crate::sound::mixer::MixerBackend;
    use crate::sound::test_support::wav_bytes;
    use std::time::Duration;

    /// 8000 Hz mono, 4000-byte buffers (0.25 s each)
    struct Fixture {
        _dir: tempfile::TempDir,
        config: Arc<AudioConfig>,
        mixer: Arc<MixerBackend>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            std::fs::write(dir.path().join("clip.wav"), wav_bytes(1, 8000, 16_000)).unwrap();
            std::fs::write(dir.path().join("quad.wav"), wav_bytes(4, 8000, 100)).unwrap();
            let config = Arc::new(AudioConfig::new(dir.path()).with_audio_buffer(4000));
            Self {
                _dir: dir,
                config,
                mixer: Arc::new(MixerBackend::new(8000)),
            }
        }

        fn audio(&self, name: &str) -> Arc<Audio> {
            let backend: Arc<dyn AudioBackend> = self.mixer.clone();
            Arc::new(Audio::new(name, Arc::clone(&self.config), backend, StreamHealth::new()))
        }

        fn run(&self, audio: &Audio, seconds: f64) {
            let ticks = (seconds / 0.05).round() as usize;
            for _ in 0..ticks {
                self.mixer.advance_time(Duration::from_millis(50));
                audio.update();
            }
        }
    }

    #[test]
    fn test_face_mapping() {
        let origin = Point::new(1024.0, 512.0);
        assert_eq!(Face::North.position(origin), [0.5, 0.25, -1.0]);
        assert_eq!(Face::East.position(origin), [1.0, 0.25, 0.5]);
        assert_eq!(Face::South.position(origin), [-0.5, 0.25, 1.0]);
        assert_eq!(Face::West.position(origin), [-1.0, 0.25, -0.5]);
        assert_eq!(Face::Up.position(origin), [0.0, 1.0, 0.0]);
        assert_eq!(Face::Down.position(origin), [0.0, -1.0, 0.0]);
    }

    #[test]
    #[should_panic(expected = "invalid cube face")]
    fn test_invalid_face_panics() {
        Face::from_index(6);
    }

    #[test]
    fn test_load_primes_and_is_idempotent() {
        let fx = Fixture::new();
        let audio = fx.audio("clip.wav");
        audio.load();
        assert!(audio.is_loaded());
        assert_eq!(audio.state(), AudioState::Initial);
        assert_eq!(fx.mixer.source_count(), 1);
        assert!((audio.cursor() - 0.75).abs() < 1e-9);

        audio.load();
        assert_eq!(fx.mixer.source_count(), 1);
        assert!((audio.cursor() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_unsupported_channels_leave_nothing_behind() {
        let fx = Fixture::new();
        let audio = fx.audio("quad.wav");
        let (_, errors) = count_errors(|| audio.load());
        assert_eq!(errors, 1);
        assert!(!audio.is_loaded());
        assert_eq!(audio.state(), AudioState::Initial);
        assert_eq!(fx.mixer.source_count(), 0);
        assert_eq!(fx.mixer.buffer_count(), 0);
    }

    #[test]
    fn test_missing_file_logs_one_error() {
        let fx = Fixture::new();
        let audio = fx.audio("nothere.ogg");
        let (_, errors) = count_errors(|| audio.load());
        assert_eq!(errors, 1);
        assert!(!audio.is_loaded());
    }

    #[test]
    fn test_play_requires_load() {
        let fx = Fixture::new();
        let audio = fx.audio("clip.wav");
        audio.play();
        assert_eq!(audio.state(), AudioState::Initial);
        audio.pause();
        audio.stop();
        assert_eq!(audio.state(), AudioState::Initial);
    }

    #[test]
    fn test_pause_keeps_and_stop_rewinds() {
        let fx = Fixture::new();
        let audio = fx.audio("clip.wav");
        audio.load();
        audio.play();
        fx.run(&audio, 0.5);

        audio.pause();
        assert_eq!(audio.state(), AudioState::Paused);
        let paused_at = audio.cursor();
        assert!(paused_at > 0.75);
        fx.mixer.advance_time(Duration::from_millis(500));
        audio.update();
        assert_eq!(audio.cursor(), paused_at);

        audio.play();
        assert_eq!(audio.state(), AudioState::Playing);
        assert_eq!(audio.cursor(), paused_at);

        audio.stop();
        assert_eq!(audio.state(), AudioState::Stopped);
        assert_eq!(audio.cursor(), 0.0);

        audio.play();
        assert_eq!(audio.state(), AudioState::Playing);
        assert!((audio.cursor() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_mute_forces_zero_gain() {
        let fx = Fixture::new();
        let audio = fx.audio("clip.wav");
        audio.load();
        audio.play();
        audio.update();
        let source = audio.source().unwrap();
        assert_eq!(fx.mixer.gain(source).unwrap(), 1.0);

        fx.config.set_mute(true);
        audio.update();
        assert_eq!(fx.mixer.gain(source).unwrap(), 0.0);
        assert_eq!(audio.state(), AudioState::Playing);
    }

    #[test]
    fn test_fade_out_pauses_without_rewind() {
        let fx = Fixture::new();
        let audio = fx.audio("clip.wav");
        audio.set_fade_step(0.5);
        audio.load();
        audio.play();
        audio.fade_out();

        audio.update();
        assert_eq!(audio.state(), AudioState::Playing);
        assert_eq!(fx.mixer.gain(audio.source().unwrap()).unwrap(), 0.5);
        audio.update();
        assert_eq!(audio.state(), AudioState::Paused);
        assert!(audio.cursor() > 0.0);
    }

    #[test]
    fn test_set_position_reaches_backend() {
        let fx = Fixture::new();
        let audio = fx.audio("clip.wav");
        audio.set_position(Face::East, Point::new(0.0, 1024.0));
        audio.load();
        let source = audio.source().unwrap();
        assert_eq!(fx.mixer.position(source).unwrap(), [1.0, 0.5, 0.0]);

        audio.set_position(Face::Up, Point::default());
        assert_eq!(fx.mixer.position(source).unwrap(), [0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_match_with_self_is_rejected() {
        let fx = Fixture::new();
        let audio = fx.audio("clip.wav");
        audio.match_with(&audio);
        assert!(!audio.is_matched());
    }

    #[test]
    fn test_unmatch_clears_link() {
        let fx = Fixture::new();
        let a = fx.audio("clip.wav");
        let b = fx.audio("clip.wav");
        a.match_with(&b);
        assert!(a.is_matched());
        a.unmatch();
        assert!(!a.is_matched());
    }

    #[test]
    fn test_dropped_peer_is_ignored() {
        let fx = Fixture::new();
        let a = fx.audio("clip.wav");
        let b = fx.audio("clip.wav");
        a.match_with(&b);
        drop(b);
        a.load();
        a.play();
        assert_eq!(a.state(), AudioState::Playing);
        assert!((a.cursor() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_matched_play_lines_up_with_peer() {
        let fx = Fixture::new();
        let b = fx.audio("clip.wav");
        b.load();
        b.play();
        fx.run(&b, 0.5);
        let b_cursor = b.cursor();

        let a = fx.audio("clip.wav");
        a.load();
        a.match_with(&b);
        a.play();
        assert!((a.cursor() - b_cursor).abs() < 1e-6);
    }

    #[test]
    fn test_load_survives_latched_stream() {
        let fx = Fixture::new();
        let health = StreamHealth::new();
        health.mark_broken();
        let backend: Arc<dyn AudioBackend> = fx.mixer.clone();
        let audio = Audio::new("clip.wav", Arc::clone(&fx.config), backend, health);

        let (_, errors) = count_errors(|| audio.load());
        assert_eq!(errors, 0);
        assert!(audio.is_loaded());
        assert_eq!(fx.mixer.source_count(), 1);

        audio.play();
        audio.update();
        assert_eq!(audio.state(), AudioState::Playing);
    }

    #[test]
    fn test_unload_returns_to_fresh_state() {
        let fx = Fixture::new();
        let audio = fx.audio("clip.wav");
        audio.load();
        audio.play();
        fx.run(&audio, 0.3);
        audio.unload();

        assert!(!audio.is_loaded());
        assert_eq!(audio.state(), AudioState::Initial);
        assert_eq!(audio.cursor(), 0.0);
        assert_eq!(audio.source(), None);
        assert_eq!(fx.mixer.source_count(), 0);
        assert_eq!(fx.mixer.buffer_count(), 0);

        audio.load();
        assert!(audio.is_loaded());
    }

    #[test]
    fn test_lock_timeout_skips_operation() {
        let fx = Fixture::new();
        let audio = fx.audio("clip.wav");
        let guard = audio.inner.lock().unwrap();
        let audio2 = Arc::clone(&audio);
        let (_, errors) = std::thread::spawn(move || count_errors(|| audio2.load()))
            .join()
            .unwrap();
        drop(guard);
        assert_eq!(errors, 1);
        assert!(!audio.is_loaded());
    }
}
