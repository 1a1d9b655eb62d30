// buffer.rs - Audio buffer storage

//! Audio buffers for the software mixer.
//!
//! Buffers hold decoded PCM in its original channel layout and rate; the
//! mixer converts to the output format while mixing.

use crate::sound::formats::AudioFormat;
use crate::sound::mixer::types::BufferState;

/// Audio buffer containing PCM data
#[derive(Debug, Clone)]
pub struct MixerBuffer {
    /// Current buffer state
    pub state: BufferState,
    /// Interleaved samples
    pub samples: Vec<i16>,
    /// Channels in `samples` (1 or 2)
    pub channels: usize,
    /// Sample rate of `samples`
    pub frequency: u32,
}

impl MixerBuffer {
    pub fn new() -> Self {
        MixerBuffer {
            state: BufferState::Initial,
            samples: Vec::new(),
            channels: 1,
            frequency: 0,
        }
    }

    /// Replace the contents with little-endian PCM bytes
    pub fn fill(&mut self, format: AudioFormat, data: &[u8], frequency: u32) {
        self.samples = data
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        self.channels = format.channels() as usize;
        self.samples.truncate(self.samples.len() - self.samples.len() % self.channels);
        self.frequency = frequency;
        self.state = BufferState::Filled;
    }

    /// Number of sample frames held
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }

    /// Left/right pair for `frame`, duplicating mono
    pub fn frame(&self, frame: usize) -> (i16, i16) {
        let base = frame * self.channels;
        if self.channels == 1 {
            (self.samples[base], self.samples[base])
        } else {
            (self.samples[base], self.samples[base + 1])
        }
    }
}

impl Default for MixerBuffer {
    fn default() -> Self {
        Self::new()
    }
}
