//! PCM formats produced by the stream decoders
//!
//! Decoders always emit interleaved signed 16-bit little-endian samples.

/// Audio sample format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioFormat {
    /// 16-bit mono (2 bytes per frame)
    Mono16,
    /// 16-bit stereo (4 bytes per frame)
    #[default]
    Stereo16,
}

impl AudioFormat {
    /// Format for a channel count, if it is mono or stereo
    pub fn from_channels(channels: u16) -> Option<Self> {
        match channels {
            1 => Some(AudioFormat::Mono16),
            2 => Some(AudioFormat::Stereo16),
            _ => None,
        }
    }

    /// Returns the number of bytes per sample frame
    pub fn bytes_per_frame(&self) -> usize {
        match self {
            AudioFormat::Mono16 => 2,
            AudioFormat::Stereo16 => 4,
        }
    }

    pub fn channels(&self) -> u16 {
        match self {
            AudioFormat::Mono16 => 1,
            AudioFormat::Stereo16 => 2,
        }
    }

    pub fn is_stereo(&self) -> bool {
        matches!(self, AudioFormat::Stereo16)
    }

    /// Duration in seconds of `bytes` of PCM at `rate`
    pub fn duration_of(&self, bytes: usize, rate: u32) -> f64 {
        if rate == 0 {
            return 0.0;
        }
        (bytes / self.bytes_per_frame()) as f64 / rate as f64
    }
}
