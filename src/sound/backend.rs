//! Spatial audio backend interface
//!
//! An OpenAL-shaped seam between the playback state machine and whatever
//! produces sound. Sources play a FIFO of queued buffers; a buffer counts as
//! processed once the source has played past it, and only processed buffers
//! may be unqueued. Stopping a source marks every queued buffer processed.
//! Playing a stopped or initial source starts again from the head of its
//! queue.

use thiserror::Error;

use super::formats::AudioFormat;
use crate::log_error;
use crate::logging::LogModule;

/// Handle of a backend source
pub type SourceId = usize;

/// Handle of a backend buffer
pub type BufferId = usize;

/// Listener-relative emitter position
pub type Vec3 = [f32; 3];

/// Playback state of a backend source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Initial,
    Playing,
    Paused,
    Stopped,
}

/// Error type for backend operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("invalid source handle {0}")]
    InvalidSource(SourceId),
    #[error("invalid buffer handle {0}")]
    InvalidBuffer(BufferId),
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    #[error("invalid value: {0}")]
    InvalidValue(String),
    #[error("audio device failure: {0}")]
    DeviceFailure(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Buffer-queue audio backend
///
/// Implementations are shared between the control thread, the update
/// thread and their own output thread, so every method takes `&self`.
pub trait AudioBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn gen_source(&self) -> BackendResult<SourceId>;
    /// Delete a source, detaching any buffers still queued on it
    fn delete_source(&self, source: SourceId) -> BackendResult<()>;

    fn gen_buffers(&self, n: usize) -> BackendResult<Vec<BufferId>>;
    /// Delete buffers; fails if any of them is still queued
    fn delete_buffers(&self, buffers: &[BufferId]) -> BackendResult<()>;
    /// Upload 16-bit little-endian PCM into a buffer that is not queued
    fn buffer_data(
        &self,
        buffer: BufferId,
        format: AudioFormat,
        data: &[u8],
        frequency: u32,
    ) -> BackendResult<()>;

    fn queue_buffers(&self, source: SourceId, buffers: &[BufferId]) -> BackendResult<()>;
    /// Remove the oldest `n` buffers; all of them must be processed
    fn unqueue_buffers(&self, source: SourceId, n: usize) -> BackendResult<Vec<BufferId>>;
    fn buffers_processed(&self, source: SourceId) -> BackendResult<usize>;
    fn buffers_queued(&self, source: SourceId) -> BackendResult<usize>;

    fn source_state(&self, source: SourceId) -> BackendResult<SourceState>;
    fn play(&self, source: SourceId) -> BackendResult<()>;
    fn pause(&self, source: SourceId) -> BackendResult<()>;
    fn stop(&self, source: SourceId) -> BackendResult<()>;

    fn set_gain(&self, source: SourceId, gain: f32) -> BackendResult<()>;
    fn gain(&self, source: SourceId) -> BackendResult<f32>;
    fn set_position(&self, source: SourceId, position: Vec3) -> BackendResult<()>;
    fn position(&self, source: SourceId) -> BackendResult<Vec3>;
}

/// Log a failed backend call and turn the result into an option
pub fn verify<T>(context: &str, result: BackendResult<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            log_error!(LogModule::Audio, "{}: {}", context, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::capture::count_errors;

    #[test]
    fn test_verify_passes_values_through() {
        let (value, errors) = count_errors(|| verify("gain", Ok::<_, BackendError>(0.5f32)));
        assert_eq!(value, Some(0.5));
        assert_eq!(errors, 0);
    }

    #[test]
    fn test_verify_logs_errors() {
        let (value, errors) = count_errors(|| {
            verify::<()>("play", Err(BackendError::InvalidSource(9)))
        });
        assert_eq!(value, None);
        assert_eq!(errors, 1);
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            BackendError::InvalidBuffer(3).to_string(),
            "invalid buffer handle 3"
        );
    }
}
