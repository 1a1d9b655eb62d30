//! Rodio-based audio backend
//!
//! Implements [`AudioBackend`] on a real output device. rodio's output
//! stream is not `Send`, so a dedicated audio thread owns the device and
//! every source/buffer table; callers talk to it over a command channel and
//! wait (bounded) for the reply.
//!
//! Each source plays through a `SpatialSink` whose emitter follows the
//! source position. Queued buffers are appended to the sink wrapped in a
//! [`TrackedBuffer`], which bumps a shared counter when rodio has pulled its
//! last sample; that counter is the source's processed-buffer count.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamHandle, Source, SpatialSink};

use crate::logging::LogModule;
use crate::sound::backend::{
    AudioBackend, BackendError, BackendResult, BufferId, SourceId, SourceState, Vec3,
};
use crate::sound::formats::AudioFormat;
use crate::threading::Thread;
use crate::{log_debug, log_info, log_warning};

/// Listener ear positions
const LEFT_EAR: Vec3 = [-0.1, 0.0, 0.0];
const RIGHT_EAR: Vec3 = [0.1, 0.0, 0.0];

/// How long a caller waits for the audio thread
const REPLY_TIMEOUT: Duration = Duration::from_millis(250);

/// How long startup waits for the device to open
const STARTUP_TIMEOUT: Duration = Duration::from_secs(2);

type Reply<T> = Sender<BackendResult<T>>;

/// Command sent to the audio thread
enum AudioCmd {
    GenSource(Reply<SourceId>),
    DeleteSource(SourceId, Reply<()>),
    GenBuffers(usize, Reply<Vec<BufferId>>),
    DeleteBuffers(Vec<BufferId>, Reply<()>),
    BufferData(BufferId, AudioFormat, Vec<u8>, u32, Reply<()>),
    QueueBuffers(SourceId, Vec<BufferId>, Reply<()>),
    UnqueueBuffers(SourceId, usize, Reply<Vec<BufferId>>),
    BuffersProcessed(SourceId, Reply<usize>),
    BuffersQueued(SourceId, Reply<usize>),
    State(SourceId, Reply<SourceState>),
    Play(SourceId, Reply<()>),
    Pause(SourceId, Reply<()>),
    Stop(SourceId, Reply<()>),
    SetGain(SourceId, f32, Reply<()>),
    Gain(SourceId, Reply<f32>),
    SetPosition(SourceId, Vec3, Reply<()>),
    Position(SourceId, Reply<Vec3>),
    Shutdown,
}

// =============================================================================
// Tracked buffer
// =============================================================================

/// rodio source that reports when it has been played out
pub struct TrackedBuffer {
    inner: SamplesBuffer<i16>,
    played: Arc<AtomicUsize>,
    finished: bool,
}

impl TrackedBuffer {
    pub fn new(channels: u16, sample_rate: u32, samples: Vec<i16>, played: Arc<AtomicUsize>) -> Self {
        Self {
            inner: SamplesBuffer::new(channels, sample_rate, samples),
            played,
            finished: false,
        }
    }
}

impl Iterator for TrackedBuffer {
    type Item = i16;

    fn next(&mut self) -> Option<i16> {
        let sample = self.inner.next();
        if sample.is_none() && !self.finished {
            self.finished = true;
            self.played.fetch_add(1, Ordering::AcqRel);
        }
        sample
    }
}

impl Source for TrackedBuffer {
    fn current_frame_len(&self) -> Option<usize> {
        self.inner.current_frame_len()
    }

    fn channels(&self) -> u16 {
        self.inner.channels()
    }

    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    fn total_duration(&self) -> Option<Duration> {
        self.inner.total_duration()
    }
}

// =============================================================================
// Audio thread state
// =============================================================================

struct BufferData {
    samples: Vec<i16>,
    channels: u16,
    frequency: u32,
    queued: bool,
}

struct RodioSource {
    sink: Option<SpatialSink>,
    state: SourceState,
    gain: f32,
    position: Vec3,
    queue: VecDeque<BufferId>,
    /// Buffers played out in the current sink
    played: Arc<AtomicUsize>,
    /// Buffers unqueued since the current sink was created
    unqueued: usize,
    /// Set by stop: this many buffers count as processed regardless of the sink
    stopped_processed: Option<usize>,
}

impl RodioSource {
    fn new() -> Self {
        Self {
            sink: None,
            state: SourceState::Initial,
            gain: 1.0,
            position: [0.0, 0.0, 0.0],
            queue: VecDeque::new(),
            played: Arc::new(AtomicUsize::new(0)),
            unqueued: 0,
            stopped_processed: None,
        }
    }

    fn processed(&self) -> usize {
        if let Some(n) = self.stopped_processed {
            return n.min(self.queue.len());
        }
        let played = self.played.load(Ordering::Acquire);
        played.saturating_sub(self.unqueued).min(self.queue.len())
    }

    fn refresh_state(&mut self) {
        if self.state == SourceState::Playing && self.processed() >= self.queue.len() {
            self.state = SourceState::Stopped;
            self.stopped_processed = Some(self.queue.len());
            if let Some(sink) = self.sink.take() {
                sink.stop();
            }
        }
    }
}

struct DeviceState {
    handle: OutputStreamHandle,
    sources: HashMap<SourceId, RodioSource>,
    buffers: HashMap<BufferId, BufferData>,
    next_id: usize,
}

impl DeviceState {
    fn new(handle: OutputStreamHandle) -> Self {
        Self {
            handle,
            sources: HashMap::new(),
            buffers: HashMap::new(),
            next_id: 0,
        }
    }

    fn alloc_id(&mut self) -> usize {
        self.next_id += 1;
        self.next_id
    }

    fn source_mut(&mut self, id: SourceId) -> BackendResult<&mut RodioSource> {
        self.sources.get_mut(&id).ok_or(BackendError::InvalidSource(id))
    }

    fn append(sink: &SpatialSink, buf: &BufferData, played: &Arc<AtomicUsize>) {
        sink.append(TrackedBuffer::new(
            buf.channels,
            buf.frequency,
            buf.samples.clone(),
            Arc::clone(played),
        ));
    }

    fn delete_source(&mut self, id: SourceId) -> BackendResult<()> {
        let mut src = self.sources.remove(&id).ok_or(BackendError::InvalidSource(id))?;
        if let Some(sink) = src.sink.take() {
            sink.stop();
        }
        for buf in &src.queue {
            if let Some(data) = self.buffers.get_mut(buf) {
                data.queued = false;
            }
        }
        Ok(())
    }

    fn delete_buffers(&mut self, ids: &[BufferId]) -> BackendResult<()> {
        for id in ids {
            match self.buffers.get(id) {
                None => return Err(BackendError::InvalidBuffer(*id)),
                Some(buf) if buf.queued => {
                    return Err(BackendError::InvalidOperation(format!(
                        "buffer {} is still queued",
                        id
                    )))
                }
                Some(_) => {}
            }
        }
        for id in ids {
            self.buffers.remove(id);
        }
        Ok(())
    }

    fn buffer_data(
        &mut self,
        id: BufferId,
        format: AudioFormat,
        data: &[u8],
        frequency: u32,
    ) -> BackendResult<()> {
        if frequency == 0 {
            return Err(BackendError::InvalidValue("zero frequency".to_string()));
        }
        let buf = self.buffers.get_mut(&id).ok_or(BackendError::InvalidBuffer(id))?;
        if buf.queued {
            return Err(BackendError::InvalidOperation(format!("buffer {} is queued", id)));
        }
        buf.samples = data
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        buf.channels = format.channels();
        buf.frequency = frequency;
        Ok(())
    }

    fn queue_buffers(&mut self, id: SourceId, ids: &[BufferId]) -> BackendResult<()> {
        if !self.sources.contains_key(&id) {
            return Err(BackendError::InvalidSource(id));
        }
        for buf in ids {
            match self.buffers.get(buf) {
                None => return Err(BackendError::InvalidBuffer(*buf)),
                Some(data) if data.queued => {
                    return Err(BackendError::InvalidOperation(format!(
                        "buffer {} is already queued",
                        buf
                    )))
                }
                Some(_) => {}
            }
        }

        let Self {
            sources, buffers, ..
        } = self;
        let src = sources.get_mut(&id).ok_or(BackendError::InvalidSource(id))?;
        for buf_id in ids {
            if let Some(buf) = buffers.get_mut(buf_id) {
                buf.queued = true;
                if let Some(sink) = &src.sink {
                    Self::append(sink, buf, &src.played);
                }
            }
            src.queue.push_back(*buf_id);
        }
        Ok(())
    }

    fn unqueue_buffers(&mut self, id: SourceId, n: usize) -> BackendResult<Vec<BufferId>> {
        let src = self.source_mut(id)?;
        let processed = src.processed();
        if n > processed {
            return Err(BackendError::InvalidValue(format!(
                "cannot unqueue {} buffers, {} processed",
                n, processed
            )));
        }
        let ids: Vec<BufferId> = src.queue.drain(..n).collect();
        match src.stopped_processed.as_mut() {
            Some(stopped) => *stopped -= n,
            None => src.unqueued += n,
        }
        for buf in &ids {
            if let Some(data) = self.buffers.get_mut(buf) {
                data.queued = false;
            }
        }
        Ok(ids)
    }

    fn play(&mut self, id: SourceId) -> BackendResult<()> {
        let Self {
            handle,
            sources,
            buffers,
            ..
        } = self;
        let src = sources.get_mut(&id).ok_or(BackendError::InvalidSource(id))?;

        match src.state {
            SourceState::Playing => return Ok(()),
            SourceState::Paused => {
                if let Some(sink) = &src.sink {
                    sink.play();
                    src.state = SourceState::Playing;
                    return Ok(());
                }
            }
            SourceState::Initial | SourceState::Stopped => {}
        }

        if let Some(sink) = src.sink.take() {
            sink.stop();
        }
        src.played = Arc::new(AtomicUsize::new(0));
        src.unqueued = 0;
        src.stopped_processed = None;

        if src.queue.is_empty() {
            src.state = SourceState::Stopped;
            src.stopped_processed = Some(0);
            return Ok(());
        }

        let sink = SpatialSink::try_new(handle, src.position, LEFT_EAR, RIGHT_EAR)
            .map_err(|e| BackendError::DeviceFailure(e.to_string()))?;
        sink.set_volume(src.gain);
        for buf_id in &src.queue {
            if let Some(buf) = buffers.get(buf_id) {
                Self::append(&sink, buf, &src.played);
            }
        }
        src.sink = Some(sink);
        src.state = SourceState::Playing;
        Ok(())
    }

    fn pause(&mut self, id: SourceId) -> BackendResult<()> {
        let src = self.source_mut(id)?;
        if src.state == SourceState::Playing {
            if let Some(sink) = &src.sink {
                sink.pause();
            }
            src.state = SourceState::Paused;
        }
        Ok(())
    }

    fn stop(&mut self, id: SourceId) -> BackendResult<()> {
        let src = self.source_mut(id)?;
        if let Some(sink) = src.sink.take() {
            sink.stop();
        }
        src.stopped_processed = Some(src.queue.len());
        src.state = SourceState::Stopped;
        Ok(())
    }

    fn dispatch(&mut self, cmd: AudioCmd) -> bool {
        match cmd {
            AudioCmd::GenSource(reply) => {
                let id = self.alloc_id();
                self.sources.insert(id, RodioSource::new());
                let _ = reply.send(Ok(id));
            }
            AudioCmd::DeleteSource(id, reply) => {
                let _ = reply.send(self.delete_source(id));
            }
            AudioCmd::GenBuffers(n, reply) => {
                let ids: Vec<BufferId> = (0..n)
                    .map(|_| {
                        let id = self.alloc_id();
                        self.buffers.insert(
                            id,
                            BufferData {
                                samples: Vec::new(),
                                channels: 1,
                                frequency: 44100,
                                queued: false,
                            },
                        );
                        id
                    })
                    .collect();
                let _ = reply.send(Ok(ids));
            }
            AudioCmd::DeleteBuffers(ids, reply) => {
                let _ = reply.send(self.delete_buffers(&ids));
            }
            AudioCmd::BufferData(id, format, data, freq, reply) => {
                let _ = reply.send(self.buffer_data(id, format, &data, freq));
            }
            AudioCmd::QueueBuffers(id, ids, reply) => {
                let _ = reply.send(self.queue_buffers(id, &ids));
            }
            AudioCmd::UnqueueBuffers(id, n, reply) => {
                let _ = reply.send(self.unqueue_buffers(id, n));
            }
            AudioCmd::BuffersProcessed(id, reply) => {
                let _ = reply.send(self.source_mut(id).map(|src| {
                    src.refresh_state();
                    src.processed()
                }));
            }
            AudioCmd::BuffersQueued(id, reply) => {
                let _ = reply.send(self.source_mut(id).map(|src| src.queue.len()));
            }
            AudioCmd::State(id, reply) => {
                let _ = reply.send(self.source_mut(id).map(|src| {
                    src.refresh_state();
                    src.state
                }));
            }
            AudioCmd::Play(id, reply) => {
                let _ = reply.send(self.play(id));
            }
            AudioCmd::Pause(id, reply) => {
                let _ = reply.send(self.pause(id));
            }
            AudioCmd::Stop(id, reply) => {
                let _ = reply.send(self.stop(id));
            }
            AudioCmd::SetGain(id, gain, reply) => {
                let _ = reply.send(self.source_mut(id).map(|src| {
                    src.gain = gain;
                    if let Some(sink) = &src.sink {
                        sink.set_volume(gain);
                    }
                }));
            }
            AudioCmd::Gain(id, reply) => {
                let _ = reply.send(self.source_mut(id).map(|src| src.gain));
            }
            AudioCmd::SetPosition(id, position, reply) => {
                let _ = reply.send(self.source_mut(id).map(|src| {
                    src.position = position;
                    if let Some(sink) = &src.sink {
                        sink.set_emitter_position(position);
                    }
                }));
            }
            AudioCmd::Position(id, reply) => {
                let _ = reply.send(self.source_mut(id).map(|src| src.position));
            }
            AudioCmd::Shutdown => {
                for (_, mut src) in self.sources.drain() {
                    if let Some(sink) = src.sink.take() {
                        sink.stop();
                    }
                }
                return false;
            }
        }
        true
    }
}

fn audio_thread_main(rx: Receiver<AudioCmd>, ready: Sender<BackendResult<()>>) {
    let (_stream, handle) = match OutputStream::try_default() {
        Ok(s) => s,
        Err(e) => {
            let _ = ready.send(Err(BackendError::DeviceFailure(e.to_string())));
            return;
        }
    };
    let _ = ready.send(Ok(()));
    log_info!(LogModule::Audio, "rodio audio thread ready");

    let mut device = DeviceState::new(handle);
    while let Ok(cmd) = rx.recv() {
        if !device.dispatch(cmd) {
            break;
        }
    }

    log_debug!(LogModule::Audio, "rodio audio thread exited");
}

// =============================================================================
// Backend handle
// =============================================================================

/// Output-device backend
pub struct RodioBackend {
    sender: Mutex<Option<Sender<AudioCmd>>>,
    thread: Mutex<Option<Thread<()>>>,
}

impl RodioBackend {
    /// Open the default output device
    ///
    /// # Errors
    /// Returns `BackendError::DeviceFailure` if no device can be opened
    pub fn new() -> BackendResult<Self> {
        let (tx, rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();

        let thread = Thread::spawn("rodio-audio", move || audio_thread_main(rx, ready_tx))
            .map_err(|e| BackendError::DeviceFailure(e.to_string()))?;

        match ready_rx.recv_timeout(STARTUP_TIMEOUT) {
            Ok(Ok(())) => Ok(Self {
                sender: Mutex::new(Some(tx)),
                thread: Mutex::new(Some(thread)),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => Err(BackendError::DeviceFailure(
                "audio thread did not start".to_string(),
            )),
        }
    }

    fn request<T>(&self, make: impl FnOnce(Reply<T>) -> AudioCmd) -> BackendResult<T> {
        let (tx, rx) = mpsc::channel();
        {
            let guard = self.sender.lock();
            let sender = guard
                .as_ref()
                .ok_or_else(|| BackendError::DeviceFailure("backend shut down".to_string()))?;
            sender
                .send(make(tx))
                .map_err(|_| BackendError::DeviceFailure("audio thread gone".to_string()))?;
        }
        rx.recv_timeout(REPLY_TIMEOUT)
            .map_err(|_| BackendError::DeviceFailure("audio thread not responding".to_string()))?
    }

    /// Stop the audio thread and release the device
    pub fn shutdown(&self) {
        if let Some(sender) = self.sender.lock().take() {
            let _ = sender.send(AudioCmd::Shutdown);
        }
        if let Some(thread) = self.thread.lock().take() {
            if let Err(e) = thread.join() {
                log_warning!(LogModule::Audio, "rodio audio thread: {}", e);
            }
        }
    }
}

impl Drop for RodioBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl AudioBackend for RodioBackend {
    fn name(&self) -> &'static str {
        "rodio"
    }

    fn gen_source(&self) -> BackendResult<SourceId> {
        self.request(AudioCmd::GenSource)
    }

    fn delete_source(&self, source: SourceId) -> BackendResult<()> {
        self.request(|tx| AudioCmd::DeleteSource(source, tx))
    }

    fn gen_buffers(&self, n: usize) -> BackendResult<Vec<BufferId>> {
        self.request(|tx| AudioCmd::GenBuffers(n, tx))
    }

    fn delete_buffers(&self, buffers: &[BufferId]) -> BackendResult<()> {
        self.request(|tx| AudioCmd::DeleteBuffers(buffers.to_vec(), tx))
    }

    fn buffer_data(
        &self,
        buffer: BufferId,
        format: AudioFormat,
        data: &[u8],
        frequency: u32,
    ) -> BackendResult<()> {
        self.request(|tx| AudioCmd::BufferData(buffer, format, data.to_vec(), frequency, tx))
    }

    fn queue_buffers(&self, source: SourceId, buffers: &[BufferId]) -> BackendResult<()> {
        self.request(|tx| AudioCmd::QueueBuffers(source, buffers.to_vec(), tx))
    }

    fn unqueue_buffers(&self, source: SourceId, n: usize) -> BackendResult<Vec<BufferId>> {
        self.request(|tx| AudioCmd::UnqueueBuffers(source, n, tx))
    }

    fn buffers_processed(&self, source: SourceId) -> BackendResult<usize> {
        self.request(|tx| AudioCmd::BuffersProcessed(source, tx))
    }

    fn buffers_queued(&self, source: SourceId) -> BackendResult<usize> {
        self.request(|tx| AudioCmd::BuffersQueued(source, tx))
    }

    fn source_state(&self, source: SourceId) -> BackendResult<SourceState> {
        self.request(|tx| AudioCmd::State(source, tx))
    }

    fn play(&self, source: SourceId) -> BackendResult<()> {
        self.request(|tx| AudioCmd::Play(source, tx))
    }

    fn pause(&self, source: SourceId) -> BackendResult<()> {
        self.request(|tx| AudioCmd::Pause(source, tx))
    }

    fn stop(&self, source: SourceId) -> BackendResult<()> {
        self.request(|tx| AudioCmd::Stop(source, tx))
    }

    fn set_gain(&self, source: SourceId, gain: f32) -> BackendResult<()> {
        if !gain.is_finite() || gain < 0.0 {
            return Err(BackendError::InvalidValue(format!("gain {}", gain)));
        }
        self.request(|tx| AudioCmd::SetGain(source, gain, tx))
    }

    fn gain(&self, source: SourceId) -> BackendResult<f32> {
        self.request(|tx| AudioCmd::Gain(source, tx))
    }

    fn set_position(&self, source: SourceId, position: Vec3) -> BackendResult<()> {
        self.request(|tx| AudioCmd::SetPosition(source, position, tx))
    }

    fn position(&self, source: SourceId) -> BackendResult<Vec3> {
        self.request(|tx| AudioCmd::Position(source, tx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracked_buffer_counts_once() {
        let played = Arc::new(AtomicUsize::new(0));
        let mut buf = TrackedBuffer::new(2, 8000, vec![1, 2, 3, 4], Arc::clone(&played));
        assert_eq!(buf.channels(), 2);
        assert_eq!(buf.sample_rate(), 8000);

        let samples: Vec<i16> = buf.by_ref().collect();
        assert_eq!(samples, vec![1, 2, 3, 4]);
        assert_eq!(played.load(Ordering::SeqCst), 1);

        assert_eq!(buf.next(), None);
        assert_eq!(played.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_tracked_buffer_finishes_immediately() {
        let played = Arc::new(AtomicUsize::new(0));
        let mut buf = TrackedBuffer::new(1, 8000, Vec::new(), Arc::clone(&played));
        assert_eq!(buf.next(), None);
        assert_eq!(played.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_source_processed_accounting() {
        let mut src = RodioSource::new();
        src.queue.extend([1, 2, 3]);
        assert_eq!(src.processed(), 0);

        src.played.store(2, Ordering::SeqCst);
        assert_eq!(src.processed(), 2);

        src.queue.pop_front();
        src.unqueued = 1;
        assert_eq!(src.processed(), 1);

        src.stopped_processed = Some(2);
        assert_eq!(src.processed(), 2);
        src.queue.push_back(4);
        assert_eq!(src.processed(), 2);
    }

    #[test]
    fn test_source_starves_to_stopped() {
        let mut src = RodioSource::new();
        src.queue.extend([1, 2]);
        src.state = SourceState::Playing;
        src.played.store(2, Ordering::SeqCst);
        src.refresh_state();
        assert_eq!(src.state, SourceState::Stopped);
        assert_eq!(src.processed(), 2);
    }
}
