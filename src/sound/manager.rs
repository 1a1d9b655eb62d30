//! Audio manager
//!
//! Factory and registry for [`Audio`] objects sharing one backend, one
//! configuration and one stream-health latch. The owner ticks `update` once
//! per frame, or lets the manager run its own update thread.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::AudioConfig;
use crate::logging::LogModule;
use crate::sound::audio::{Audio, AudioState};
use crate::sound::backend::AudioBackend;
use crate::sound::ring::StreamHealth;
use crate::threading::{self, sleep_unless_stopped, StopFlag, Thread};
use crate::{log_debug, log_info, log_warning};

/// Default interval of the update thread
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_millis(20);

struct Updater {
    stop: StopFlag,
    thread: Thread<()>,
}

pub struct AudioManager {
    config: Arc<AudioConfig>,
    backend: Arc<dyn AudioBackend>,
    health: StreamHealth,
    audios: Mutex<Vec<Arc<Audio>>>,
    updater: Mutex<Option<Updater>>,
}

impl AudioManager {
    pub fn new(config: Arc<AudioConfig>, backend: Arc<dyn AudioBackend>) -> Self {
        log_info!(LogModule::Audio, "Audio manager using {} backend", backend.name());
        Self {
            config,
            backend,
            health: StreamHealth::new(),
            audios: Mutex::new(Vec::new()),
            updater: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &Arc<AudioConfig> {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn AudioBackend> {
        &self.backend
    }

    /// Latch shared by every object this manager creates
    pub fn health(&self) -> &StreamHealth {
        &self.health
    }

    /// Create and register a new audio object
    pub fn create_audio(&self, resource_name: &str) -> Arc<Audio> {
        let audio = Arc::new(Audio::new(
            resource_name,
            Arc::clone(&self.config),
            Arc::clone(&self.backend),
            self.health.clone(),
        ));
        self.register(Arc::clone(&audio));
        audio
    }

    /// Add an object to the update list; registering twice is a no-op
    pub fn register(&self, audio: Arc<Audio>) {
        let mut audios = self.audios.lock();
        if !audios.iter().any(|a| Arc::ptr_eq(a, &audio)) {
            audios.push(audio);
        }
    }

    /// Unload an object and drop it from the registry
    pub fn release(&self, audio: &Arc<Audio>) {
        audio.unload();
        self.audios.lock().retain(|a| !Arc::ptr_eq(a, audio));
    }

    pub fn audio_count(&self) -> usize {
        self.audios.lock().len()
    }

    /// Load on demand, then play
    pub fn request(&self, audio: &Arc<Audio>) {
        if !audio.is_loaded() {
            audio.load();
        }
        if audio.is_loaded() {
            self.register(Arc::clone(audio));
            audio.play();
        }
    }

    /// Tick every registered object
    pub fn update(&self) {
        let audios: Vec<Arc<Audio>> = self.audios.lock().clone();
        for audio in audios {
            audio.update();
        }
    }

    /// Number of registered objects currently playing
    pub fn playing_count(&self) -> usize {
        let audios: Vec<Arc<Audio>> = self.audios.lock().clone();
        audios
            .iter()
            .filter(|a| a.state() == AudioState::Playing)
            .count()
    }

    pub fn set_mute(&self, mute: bool) {
        log_debug!(LogModule::Audio, "Mute {}", if mute { "on" } else { "off" });
        self.config.set_mute(mute);
    }

    pub fn is_mute(&self) -> bool {
        self.config.mute()
    }

    /// Run `update` every `interval` on a background thread
    ///
    /// The thread holds only a weak reference and exits once the manager is
    /// gone. Starting an already running updater does nothing.
    pub fn start_update_thread(self: &Arc<Self>, interval: Duration) -> threading::Result<()> {
        let mut updater = self.updater.lock();
        if updater.is_some() {
            return Ok(());
        }

        let stop = StopFlag::new();
        let flag = stop.clone();
        let manager: Weak<Self> = Arc::downgrade(self);

        let thread = Thread::spawn("audio-update", move || {
            log_debug!(LogModule::Audio, "update thread started");
            while sleep_unless_stopped(&flag, interval) {
                match manager.upgrade() {
                    Some(manager) => manager.update(),
                    None => break,
                }
            }
            log_debug!(LogModule::Audio, "update thread exited");
        })?;

        *updater = Some(Updater { stop, thread });
        Ok(())
    }

    pub fn is_update_thread_running(&self) -> bool {
        self.updater
            .lock()
            .as_ref()
            .map_or(false, |u| u.thread.is_running())
    }

    /// Stop the update thread and wait for it
    pub fn stop_update_thread(&self) {
        let updater = self.updater.lock().take();
        if let Some(updater) = updater {
            updater.stop.stop();
            if let Err(e) = updater.thread.join() {
                log_warning!(LogModule::Audio, "{}", e);
            }
        }
    }

    /// Stop updating and unload every object
    pub fn terminate(&self) {
        self.stop_update_thread();
        let audios: Vec<Arc<Audio>> = std::mem::take(&mut *self.audios.lock());
        for audio in &audios {
            audio.unload();
        }
        log_info!(LogModule::Audio, "Audio manager terminated ({} objects released)", audios.len());
    }
}

impl Drop for AudioManager {
    fn drop(&mut self) {
        // The last reference may be dropped on the update thread itself, so
        // only signal it here
        if let Some(updater) = self.updater.get_mut().take() {
            updater.stop.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sound::mixer::MixerBackend;
    use crate::sound::test_support::wav_bytes;

    fn manager() -> (tempfile::TempDir, Arc<MixerBackend>, Arc<AudioManager>) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("tone.wav"), wav_bytes(1, 8000, 4000)).unwrap();
        let config = Arc::new(AudioConfig::new(dir.path()).with_audio_buffer(4000));
        let mixer = Arc::new(MixerBackend::new(8000));
        let backend: Arc<dyn AudioBackend> = mixer.clone();
        (dir, mixer, Arc::new(AudioManager::new(config, backend)))
    }

    #[test]
    fn test_create_registers_once() {
        let (_dir, _mixer, manager) = manager();
        let audio = manager.create_audio("tone.wav");
        manager.register(Arc::clone(&audio));
        assert_eq!(manager.audio_count(), 1);
        assert_eq!(audio.resource_name(), "tone.wav");
    }

    #[test]
    fn test_request_loads_and_plays() {
        let (_dir, mixer, manager) = manager();
        let audio = manager.create_audio("tone.wav");
        manager.request(&audio);
        assert!(audio.is_loaded());
        assert_eq!(audio.state(), AudioState::Playing);
        assert_eq!(manager.playing_count(), 1);

        for _ in 0..20 {
            mixer.advance_time(Duration::from_millis(50));
            manager.update();
        }
        assert_eq!(audio.state(), AudioState::Stopped);
        assert_eq!(manager.playing_count(), 0);
    }

    #[test]
    fn test_request_missing_does_not_play() {
        let (_dir, _mixer, manager) = manager();
        let audio = manager.create_audio("missing.ogg");
        manager.request(&audio);
        assert_eq!(audio.state(), AudioState::Initial);
    }

    #[test]
    fn test_release_unloads() {
        let (_dir, mixer, manager) = manager();
        let audio = manager.create_audio("tone.wav");
        manager.request(&audio);
        manager.release(&audio);
        assert_eq!(manager.audio_count(), 0);
        assert!(!audio.is_loaded());
        assert_eq!(mixer.source_count(), 0);
    }

    #[test]
    fn test_mute_is_shared() {
        let (_dir, _mixer, manager) = manager();
        manager.set_mute(true);
        assert!(manager.is_mute());
        assert!(manager.config().mute());
    }

    #[test]
    fn test_update_thread_lifecycle() {
        let (_dir, _mixer, manager) = manager();
        manager
            .start_update_thread(Duration::from_millis(5))
            .unwrap();
        manager
            .start_update_thread(Duration::from_millis(5))
            .unwrap();
        assert!(manager.is_update_thread_running());
        manager.stop_update_thread();
        assert!(!manager.is_update_thread_running());
    }

    #[test]
    fn test_terminate_unloads_everything() {
        let (_dir, mixer, manager) = manager();
        let a = manager.create_audio("tone.wav");
        let b = manager.create_audio("tone.wav");
        manager.request(&a);
        manager.request(&b);
        assert_eq!(mixer.source_count(), 2);

        manager.terminate();
        assert_eq!(manager.audio_count(), 0);
        assert_eq!(mixer.source_count(), 0);
        assert_eq!(mixer.buffer_count(), 0);
    }
}
