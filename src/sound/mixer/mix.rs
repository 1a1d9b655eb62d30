// mix.rs - Software mixer backend

//! Software mixer implementing [`AudioBackend`].
//!
//! Every playing source is resampled (nearest frame, 16.16 fixed point),
//! scaled by its gain, panned by its x position and summed into an
//! interleaved 16-bit stereo stream. `mix_channels` is the output callback;
//! tests call it (or `advance`) directly, headless runs drive it from a
//! fake output thread that consumes audio at real-time pace.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::logging::LogModule;
use crate::sound::backend::{
    AudioBackend, BackendError, BackendResult, BufferId, SourceId, SourceState, Vec3,
};
use crate::sound::formats::AudioFormat;
use crate::sound::mixer::buffer::MixerBuffer;
use crate::sound::mixer::source::MixerSource;
use crate::sound::mixer::types::*;
use crate::threading::{sleep_unless_stopped, StopFlag, Thread};
use crate::{log_debug, log_warning};

/// Mixer tables
#[derive(Debug, Default)]
struct MixerState {
    sources: HashMap<SourceId, MixerSource>,
    buffers: HashMap<BufferId, MixerBuffer>,
    next_id: usize,
}

impl MixerState {
    fn alloc_id(&mut self) -> usize {
        self.next_id += 1;
        self.next_id
    }

    fn source(&self, id: SourceId) -> BackendResult<&MixerSource> {
        self.sources.get(&id).ok_or(BackendError::InvalidSource(id))
    }

    fn source_mut(&mut self, id: SourceId) -> BackendResult<&mut MixerSource> {
        self.sources.get_mut(&id).ok_or(BackendError::InvalidSource(id))
    }
}

/// Software mixer backend
#[derive(Debug)]
pub struct MixerBackend {
    frequency: u32,
    state: Mutex<MixerState>,
}

impl MixerBackend {
    pub fn new(frequency: u32) -> Self {
        MixerBackend {
            frequency,
            state: Mutex::new(MixerState::default()),
        }
    }

    /// Output sample rate
    pub fn frequency(&self) -> u32 {
        self.frequency
    }

    /// Number of live sources
    pub fn source_count(&self) -> usize {
        self.state.lock().sources.len()
    }

    /// Number of live buffers
    pub fn buffer_count(&self) -> usize {
        self.state.lock().buffers.len()
    }

    /// Mix all playing sources into `stream` (interleaved stereo i16 LE)
    pub fn mix_channels(&self, stream: &mut [u8]) {
        let mut guard = self.state.lock();
        let MixerState {
            sources, buffers, ..
        } = &mut *guard;

        let frames = stream.len() / MIXER_FRAME_SIZE;
        let mut mixed = vec![0f32; frames * MIXER_CHANNELS];

        for src in sources.values_mut() {
            if src.state != SourceState::Playing {
                continue;
            }
            mix_source(src, buffers, &mut mixed, self.frequency);
        }

        for (out, sample) in stream.chunks_exact_mut(2).zip(mixed.iter()) {
            out.copy_from_slice(&clip(*sample).to_le_bytes());
        }
        for byte in stream[frames * MIXER_FRAME_SIZE..].iter_mut() {
            *byte = 0;
        }
    }

    /// Consume `frames` output frames, discarding the result
    pub fn advance(&self, frames: usize) {
        let mut scratch = vec![0u8; frames * MIXER_FRAME_SIZE];
        self.mix_channels(&mut scratch);
    }

    /// Consume `duration` worth of output
    pub fn advance_time(&self, duration: Duration) {
        let frames = (duration.as_secs_f64() * self.frequency as f64).round() as usize;
        self.advance(frames);
    }

    /// Start a thread that consumes output at real-time pace
    pub fn spawn_output_thread(self: &Arc<Self>, period: Duration) -> BackendResult<OutputThread> {
        let stop = StopFlag::new();
        let mixer = Arc::clone(self);
        let flag = stop.clone();

        let thread = Thread::spawn("mixer-output", move || {
            log_debug!(LogModule::Audio, "mixer output thread started");
            while sleep_unless_stopped(&flag, period) {
                mixer.advance_time(period);
            }
            log_debug!(LogModule::Audio, "mixer output thread exited");
        })
        .map_err(|e| BackendError::DeviceFailure(e.to_string()))?;

        Ok(OutputThread {
            stop,
            thread: Some(thread),
        })
    }
}

impl Default for MixerBackend {
    fn default() -> Self {
        Self::new(DEFAULT_MIXER_FREQUENCY)
    }
}

/// Add one source's contribution to `mixed`
fn mix_source(
    src: &mut MixerSource,
    buffers: &HashMap<BufferId, MixerBuffer>,
    mixed: &mut [f32],
    output_frequency: u32,
) {
    let pan = src.position[0].clamp(-1.0, 1.0);
    let left_gain = src.gain * (1.0 - pan).min(1.0);
    let right_gain = src.gain * (1.0 + pan).min(1.0);

    for out in mixed.chunks_exact_mut(MIXER_CHANNELS) {
        let (left, right) = loop {
            let Some(buf) = src.current().and_then(|id| buffers.get(&id)) else {
                src.state = SourceState::Stopped;
                return;
            };
            let frame = (src.pos >> POSITION_FRAC_BITS) as usize;
            if frame < buf.frames() {
                src.pos += resample_step(buf.frequency, output_frequency).max(1);
                break buf.frame(frame);
            }
            src.advance();
            if src.state != SourceState::Playing {
                return;
            }
        };
        out[0] += left as f32 * left_gain;
        out[1] += right as f32 * right_gain;
    }
}

impl AudioBackend for MixerBackend {
    fn name(&self) -> &'static str {
        "software mixer"
    }

    fn gen_source(&self) -> BackendResult<SourceId> {
        let mut state = self.state.lock();
        let id = state.alloc_id();
        state.sources.insert(id, MixerSource::new());
        Ok(id)
    }

    fn delete_source(&self, source: SourceId) -> BackendResult<()> {
        let mut state = self.state.lock();
        let src = state
            .sources
            .remove(&source)
            .ok_or(BackendError::InvalidSource(source))?;
        for id in src.queue {
            if let Some(buf) = state.buffers.get_mut(&id) {
                buf.state = BufferState::Filled;
            }
        }
        Ok(())
    }

    fn gen_buffers(&self, n: usize) -> BackendResult<Vec<BufferId>> {
        let mut state = self.state.lock();
        let mut ids = Vec::with_capacity(n);
        for _ in 0..n {
            let id = state.alloc_id();
            state.buffers.insert(id, MixerBuffer::new());
            ids.push(id);
        }
        Ok(ids)
    }

    fn delete_buffers(&self, buffers: &[BufferId]) -> BackendResult<()> {
        let mut state = self.state.lock();
        for &id in buffers {
            match state.buffers.get(&id) {
                None => return Err(BackendError::InvalidBuffer(id)),
                Some(buf) if buf.state == BufferState::Queued => {
                    return Err(BackendError::InvalidOperation(format!(
                        "buffer {} is still queued",
                        id
                    )))
                }
                Some(_) => {}
            }
        }
        for id in buffers {
            state.buffers.remove(id);
        }
        Ok(())
    }

    fn buffer_data(
        &self,
        buffer: BufferId,
        format: AudioFormat,
        data: &[u8],
        frequency: u32,
    ) -> BackendResult<()> {
        if frequency == 0 {
            return Err(BackendError::InvalidValue("zero frequency".to_string()));
        }
        let mut state = self.state.lock();
        let buf = state
            .buffers
            .get_mut(&buffer)
            .ok_or(BackendError::InvalidBuffer(buffer))?;
        if buf.state == BufferState::Queued {
            return Err(BackendError::InvalidOperation(format!(
                "buffer {} is queued",
                buffer
            )));
        }
        buf.fill(format, data, frequency);
        Ok(())
    }

    fn queue_buffers(&self, source: SourceId, buffers: &[BufferId]) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.source(source)?;
        for &id in buffers {
            match state.buffers.get(&id) {
                None => return Err(BackendError::InvalidBuffer(id)),
                Some(buf) if buf.state == BufferState::Queued => {
                    return Err(BackendError::InvalidOperation(format!(
                        "buffer {} is already queued",
                        id
                    )))
                }
                Some(_) => {}
            }
        }

        for &id in buffers {
            if let Some(buf) = state.buffers.get_mut(&id) {
                buf.state = BufferState::Queued;
            }
        }
        let src = state.source_mut(source)?;
        src.queue.extend(buffers.iter().copied());
        Ok(())
    }

    fn unqueue_buffers(&self, source: SourceId, n: usize) -> BackendResult<Vec<BufferId>> {
        let mut state = self.state.lock();
        let src = state.source_mut(source)?;
        let processed = src.processed;
        let ids = src.unqueue(n).ok_or_else(|| {
            BackendError::InvalidValue(format!(
                "cannot unqueue {} buffers, {} processed",
                n, processed
            ))
        })?;
        for id in &ids {
            if let Some(buf) = state.buffers.get_mut(id) {
                buf.state = BufferState::Filled;
            }
        }
        Ok(ids)
    }

    fn buffers_processed(&self, source: SourceId) -> BackendResult<usize> {
        Ok(self.state.lock().source(source)?.processed)
    }

    fn buffers_queued(&self, source: SourceId) -> BackendResult<usize> {
        Ok(self.state.lock().source(source)?.queue.len())
    }

    fn source_state(&self, source: SourceId) -> BackendResult<SourceState> {
        Ok(self.state.lock().source(source)?.state)
    }

    fn play(&self, source: SourceId) -> BackendResult<()> {
        self.state.lock().source_mut(source)?.play();
        Ok(())
    }

    fn pause(&self, source: SourceId) -> BackendResult<()> {
        self.state.lock().source_mut(source)?.pause();
        Ok(())
    }

    fn stop(&self, source: SourceId) -> BackendResult<()> {
        self.state.lock().source_mut(source)?.stop();
        Ok(())
    }

    fn set_gain(&self, source: SourceId, gain: f32) -> BackendResult<()> {
        if !gain.is_finite() || gain < 0.0 {
            return Err(BackendError::InvalidValue(format!("gain {}", gain)));
        }
        self.state.lock().source_mut(source)?.gain = gain;
        Ok(())
    }

    fn gain(&self, source: SourceId) -> BackendResult<f32> {
        Ok(self.state.lock().source(source)?.gain)
    }

    fn set_position(&self, source: SourceId, position: Vec3) -> BackendResult<()> {
        self.state.lock().source_mut(source)?.position = position;
        Ok(())
    }

    fn position(&self, source: SourceId) -> BackendResult<Vec3> {
        Ok(self.state.lock().source(source)?.position)
    }
}

/// Handle to the fake output thread; stops it on drop
pub struct OutputThread {
    stop: StopFlag,
    thread: Option<Thread<()>>,
}

impl OutputThread {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.stop();
        if let Some(thread) = self.thread.take() {
            if let Err(e) = thread.join() {
                log_warning!(LogModule::Audio, "mixer output thread: {}", e);
            }
        }
    }
}

impl Drop for OutputThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}
