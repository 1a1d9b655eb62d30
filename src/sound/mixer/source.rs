// source.rs - Audio source state

//! Audio sources for the software mixer.
//!
//! A source plays its buffer queue front to back. `queue[..processed]` have
//! been played; `queue[processed]`, if any, is the buffer being read.

use std::collections::VecDeque;

use crate::sound::backend::{BufferId, SourceState, Vec3};

/// Audio source for playback
#[derive(Debug, Clone)]
pub struct MixerSource {
    /// Current playback state
    pub state: SourceState,
    /// Linear gain
    pub gain: f32,
    /// Emitter position
    pub position: Vec3,
    /// Buffers attached to this source, oldest first
    pub queue: VecDeque<BufferId>,
    /// Number of buffers at the front of `queue` already played
    pub processed: usize,
    /// Fixed-point frame position inside the current buffer
    pub pos: u64,
}

impl MixerSource {
    pub fn new() -> Self {
        MixerSource {
            state: SourceState::Initial,
            gain: 1.0,
            position: [0.0, 0.0, 0.0],
            queue: VecDeque::new(),
            processed: 0,
            pos: 0,
        }
    }

    /// Buffer currently being played, if any
    pub fn current(&self) -> Option<BufferId> {
        self.queue.get(self.processed).copied()
    }

    /// Move on to the next queued buffer
    pub fn advance(&mut self) {
        if self.processed < self.queue.len() {
            self.processed += 1;
        }
        self.pos = 0;
        if self.processed >= self.queue.len() {
            self.state = SourceState::Stopped;
        }
    }

    /// Restart the queue from its head
    pub fn rewind(&mut self) {
        self.processed = 0;
        self.pos = 0;
    }

    pub fn play(&mut self) {
        match self.state {
            SourceState::Playing => {}
            SourceState::Paused => self.state = SourceState::Playing,
            SourceState::Initial | SourceState::Stopped => {
                self.rewind();
                self.state = if self.queue.is_empty() {
                    SourceState::Stopped
                } else {
                    SourceState::Playing
                };
            }
        }
    }

    pub fn pause(&mut self) {
        if self.state == SourceState::Playing {
            self.state = SourceState::Paused;
        }
    }

    pub fn stop(&mut self) {
        self.processed = self.queue.len();
        self.pos = 0;
        self.state = SourceState::Stopped;
    }

    /// Remove the oldest `n` processed buffers
    pub fn unqueue(&mut self, n: usize) -> Option<Vec<BufferId>> {
        if n > self.processed {
            return None;
        }
        self.processed -= n;
        Some(self.queue.drain(..n).collect())
    }
}

impl Default for MixerSource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queued(ids: &[BufferId]) -> MixerSource {
        let mut src = MixerSource::new();
        src.queue.extend(ids.iter().copied());
        src
    }

    #[test]
    fn test_play_from_initial() {
        let mut src = queued(&[1, 2]);
        src.play();
        assert_eq!(src.state, SourceState::Playing);
        assert_eq!(src.current(), Some(1));
    }

    #[test]
    fn test_play_empty_queue_stops() {
        let mut src = MixerSource::new();
        src.play();
        assert_eq!(src.state, SourceState::Stopped);
    }

    #[test]
    fn test_advance_to_end_stops() {
        let mut src = queued(&[1, 2]);
        src.play();
        src.advance();
        assert_eq!(src.current(), Some(2));
        assert_eq!(src.state, SourceState::Playing);
        src.advance();
        assert_eq!(src.current(), None);
        assert_eq!(src.state, SourceState::Stopped);
        assert_eq!(src.processed, 2);
    }

    #[test]
    fn test_pause_resume_keeps_position() {
        let mut src = queued(&[1, 2]);
        src.play();
        src.advance();
        src.pos = 42;
        src.pause();
        assert_eq!(src.state, SourceState::Paused);
        src.play();
        assert_eq!(src.state, SourceState::Playing);
        assert_eq!(src.current(), Some(2));
        assert_eq!(src.pos, 42);
    }

    #[test]
    fn test_pause_only_when_playing() {
        let mut src = queued(&[1]);
        src.pause();
        assert_eq!(src.state, SourceState::Initial);
    }

    #[test]
    fn test_stop_processes_everything() {
        let mut src = queued(&[1, 2, 3]);
        src.play();
        src.stop();
        assert_eq!(src.state, SourceState::Stopped);
        assert_eq!(src.processed, 3);

        src.play();
        assert_eq!(src.processed, 0);
        assert_eq!(src.current(), Some(1));
    }

    #[test]
    fn test_unqueue_only_processed() {
        let mut src = queued(&[1, 2, 3]);
        src.play();
        src.advance();
        assert_eq!(src.unqueue(2), None);
        assert_eq!(src.unqueue(1), Some(vec![1]));
        assert_eq!(src.processed, 0);
        assert_eq!(src.current(), Some(2));
    }
}
