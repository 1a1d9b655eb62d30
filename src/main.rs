use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;

use scene_audio::cli::Cli;
use scene_audio::config::{load_config, SoundDriver};
use scene_audio::logging::{log_init, LogLevel, LogModule};
use scene_audio::sound::mixer::{OutputThread, DEFAULT_MIXER_FREQUENCY};
use scene_audio::sound::{AudioBackend, AudioManager, MixerBackend, RodioBackend};
use scene_audio::{log_info, log_warning};

/// Update tick and mixer output period
const TICK: Duration = Duration::from_millis(20);

fn main() -> Result<()> {
    let cli = Cli::parse();

    log_init(LogLevel::from_i32(2 + i32::from(cli.verbose)))?;

    let config = load_config(cli.config.as_deref())?;
    let config = Arc::new(cli.merge_into_config(config)?);

    let (backend, output) = open_backend(config.driver())?;
    let manager = Arc::new(AudioManager::new(Arc::clone(&config), backend));

    let audio = manager.create_audio(&cli.resource);
    audio.set_loopable(cli.looping);
    if cli.fade_in {
        audio.set_fade_level(0.0);
        audio.fade_in();
    }

    manager.request(&audio);
    if !audio.is_loaded() {
        manager.terminate();
        anyhow::bail!("Unable to play {}", cli.resource);
    }

    manager
        .start_update_thread(TICK)
        .context("Failed to start the audio update thread")?;

    let started = Instant::now();
    let limit = cli.duration.map(Duration::from_secs_f64);
    while audio.is_playing() {
        if limit.map_or(false, |limit| started.elapsed() >= limit) {
            break;
        }
        thread::sleep(TICK);
    }

    log_info!(
        LogModule::Core,
        "Played {} for {:.2}s",
        cli.resource,
        started.elapsed().as_secs_f64()
    );

    manager.terminate();
    if let Some(output) = output {
        output.stop();
    }
    Ok(())
}

/// Open the configured output, falling back to the silent mixer
fn open_backend(driver: SoundDriver) -> Result<(Arc<dyn AudioBackend>, Option<OutputThread>)> {
    if driver == SoundDriver::Device {
        match RodioBackend::new() {
            Ok(backend) => {
                let backend: Arc<dyn AudioBackend> = Arc::new(backend);
                return Ok((backend, None));
            }
            Err(e) => log_warning!(
                LogModule::Audio,
                "No audio device ({}), using the null driver",
                e
            ),
        }
    }

    let mixer = Arc::new(MixerBackend::new(DEFAULT_MIXER_FREQUENCY));
    let output = mixer
        .spawn_output_thread(TICK)
        .context("Failed to start the mixer output thread")?;
    let backend: Arc<dyn AudioBackend> = mixer;
    Ok((backend, Some(output)))
}
