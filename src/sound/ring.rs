//! Streaming buffer ring
//!
//! A fixed pool of backend buffers attached to one backend source. Buffers
//! are decoded into, queued, played, unqueued and refilled; they are never
//! reallocated while the ring lives. The source and buffers are deleted when
//! the ring is dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::logging::LogModule;
use crate::sound::backend::{
    verify, AudioBackend, BackendError, BufferId, SourceId, SourceState,
};
use crate::sound::decoder::{DecodeChunk, DecodeError, StreamDecoder};
use crate::sound::formats::AudioFormat;
use crate::{log_debug, log_warning};

/// Buffers per loaded audio object
pub const AUDIO_BUFFERS: usize = 3;

/// Shared "streaming is broken" latch
///
/// Set by the first hard decode error; while set, every fill fails
/// immediately. Cleared only by an explicit `reset`.
#[derive(Debug, Clone, Default)]
pub struct StreamHealth(Arc<AtomicBool>);

impl StreamHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_broken(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn mark_broken(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Debug, Error)]
pub enum RingError {
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),
    #[error("audio streaming is disabled after an earlier decode failure")]
    StreamBroken,
    #[error("backend call failed: {0}")]
    Backend(#[from] BackendError),
}

pub type RingResult<T> = Result<T, RingError>;

/// Outcome of filling one buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillStatus {
    /// The buffer holds PCM and was uploaded
    Filled,
    /// The track ended; a final partial buffer may have been uploaded
    Ended { uploaded: bool },
}

/// Outcome of a recycle pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingStatus {
    Streaming,
    /// Everything has been decoded and played
    Ended,
}

pub struct BufferRing {
    backend: Arc<dyn AudioBackend>,
    health: StreamHealth,
    source: SourceId,
    slots: Vec<BufferId>,
    free: Vec<BufferId>,
    format: AudioFormat,
    rate: u32,
    scratch: Vec<u8>,
    /// The decoder reached the end; nothing more to queue until a restart
    exhausted: bool,
    name: String,
}

impl BufferRing {
    /// Allocate a source and `AUDIO_BUFFERS` buffers
    ///
    /// Nothing stays allocated if any backend call fails.
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        health: StreamHealth,
        decoder: &dyn StreamDecoder,
        buffer_size: usize,
        name: impl Into<String>,
    ) -> RingResult<Self> {
        let source = backend.gen_source()?;
        let slots = match backend.gen_buffers(AUDIO_BUFFERS) {
            Ok(slots) => slots,
            Err(e) => {
                verify("delete source", backend.delete_source(source));
                return Err(e.into());
            }
        };

        let frame = decoder.format().bytes_per_frame();
        let buffer_size = (buffer_size / frame).max(1) * frame;

        Ok(Self {
            backend,
            health,
            source,
            free: slots.iter().rev().copied().collect(),
            slots,
            format: decoder.format(),
            rate: decoder.sample_rate(),
            scratch: vec![0; buffer_size],
            exhausted: false,
            name: name.into(),
        })
    }

    pub fn source(&self) -> SourceId {
        self.source
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Playback time held by a fully primed ring, in seconds
    pub fn lead_time(&self) -> f64 {
        let frames = self.scratch.len() / self.format.bytes_per_frame();
        (AUDIO_BUFFERS * frames) as f64 / f64::from(self.rate)
    }

    /// Buffers not currently queued on the source
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Decode one buffer's worth of PCM into `slot` and upload it
    pub fn fill_one(
        &mut self,
        slot: BufferId,
        decoder: &mut dyn StreamDecoder,
        looping: bool,
    ) -> RingResult<FillStatus> {
        if self.health.is_broken() {
            return Err(RingError::StreamBroken);
        }

        let mut filled = 0;
        let mut ended = false;
        // Set on a loop restart, cleared by data; a stream with no PCM at all
        // must not loop forever
        let mut looped_empty = false;
        while filled < self.scratch.len() {
            match decoder.decode_chunk(&mut self.scratch[filled..]) {
                Ok(DecodeChunk::Data(n)) => {
                    filled += n;
                    if n > 0 {
                        looped_empty = false;
                    }
                }
                Ok(DecodeChunk::Hole) => continue,
                Ok(DecodeChunk::EndOfStream) if looping && !looped_empty => {
                    log_debug!(LogModule::Audio, "{}: looping", self.name);
                    if let Err(e) = decoder.rewind() {
                        self.health.mark_broken();
                        return Err(e.into());
                    }
                    looped_empty = true;
                }
                Ok(DecodeChunk::EndOfStream) => {
                    ended = true;
                    break;
                }
                Err(e) => {
                    self.health.mark_broken();
                    return Err(e.into());
                }
            }
        }

        if filled > 0 {
            self.backend
                .buffer_data(slot, self.format, &self.scratch[..filled], self.rate)?;
        }
        if ended {
            if let Err(e) = decoder.rewind() {
                self.health.mark_broken();
                return Err(e.into());
            }
            return Ok(FillStatus::Ended { uploaded: filled > 0 });
        }
        Ok(FillStatus::Filled)
    }

    /// Fill and queue every free buffer
    pub fn prime(&mut self, decoder: &mut dyn StreamDecoder, looping: bool) -> RingResult<()> {
        self.queue_free(decoder, looping)
    }

    fn queue_free(&mut self, decoder: &mut dyn StreamDecoder, looping: bool) -> RingResult<()> {
        while !self.exhausted {
            let Some(slot) = self.free.pop() else {
                break;
            };
            let status = match self.fill_one(slot, decoder, looping) {
                Ok(status) => status,
                Err(e) => {
                    self.free.push(slot);
                    return Err(e);
                }
            };
            match status {
                FillStatus::Filled | FillStatus::Ended { uploaded: true } => {
                    if let Err(e) = self.backend.queue_buffers(self.source, &[slot]) {
                        self.free.push(slot);
                        return Err(e.into());
                    }
                }
                FillStatus::Ended { uploaded: false } => self.free.push(slot),
            }
            if matches!(status, FillStatus::Ended { .. }) {
                self.exhausted = true;
            }
        }
        Ok(())
    }

    fn unqueue_processed(&mut self) -> RingResult<()> {
        let processed = self.backend.buffers_processed(self.source)?;
        if processed > 0 {
            let ids = self.backend.unqueue_buffers(self.source, processed)?;
            self.free.extend(ids);
        }
        Ok(())
    }

    /// Reclaim played buffers, refill and requeue them
    pub fn recycle(
        &mut self,
        decoder: &mut dyn StreamDecoder,
        looping: bool,
    ) -> RingResult<RingStatus> {
        self.unqueue_processed()?;
        if looping {
            self.exhausted = false;
        }
        self.queue_free(decoder, looping)?;

        let queued = self.backend.buffers_queued(self.source)?;
        if self.exhausted && queued == 0 {
            return Ok(RingStatus::Ended);
        }

        if queued > 0 && self.backend.source_state(self.source)? != SourceState::Playing {
            log_warning!(LogModule::Audio, "{}: buffer underrun, restarting source", self.name);
            self.backend.play(self.source)?;
        }
        Ok(RingStatus::Streaming)
    }

    /// Unqueue finished buffers, but only while the source is not playing
    pub fn drain_processed(&mut self) -> RingResult<()> {
        if self.backend.source_state(self.source)? == SourceState::Playing {
            return Ok(());
        }
        self.unqueue_processed()
    }

    /// Drop everything queued and prime again from the decoder's cursor
    pub fn restart(&mut self, decoder: &mut dyn StreamDecoder, looping: bool) -> RingResult<()> {
        self.backend.stop(self.source)?;
        self.unqueue_processed()?;
        self.exhausted = false;
        self.prime(decoder, looping)
    }
}

impl Drop for BufferRing {
    fn drop(&mut self) {
        if let Err(e) = self.backend.stop(self.source) {
            log_warning!(LogModule::Audio, "{}: stop on release: {}", self.name, e);
        }
        if let Err(e) = self.backend.delete_source(self.source) {
            log_warning!(LogModule::Audio, "{}: delete source: {}", self.name, e);
        }
        if let Err(e) = self.backend.delete_buffers(&self.slots) {
            log_warning!(LogModule::Audio, "{}: delete buffers: {}", self.name, e);
        }
    }
}
