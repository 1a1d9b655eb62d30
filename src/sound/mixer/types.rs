// types.rs - Core types and constants for the software mixer

//! Core types and constants for the software mixer.

/// Output sample rate used when none is given
pub const DEFAULT_MIXER_FREQUENCY: u32 = 44100;

/// Channels in the mixed output stream (interleaved stereo)
pub const MIXER_CHANNELS: usize = 2;

/// Bytes per output frame (stereo, 16-bit)
pub const MIXER_FRAME_SIZE: usize = MIXER_CHANNELS * 2;

/// Fractional bits of the fixed-point read position
pub const POSITION_FRAC_BITS: u32 = 16;

/// Maximum value for 16-bit signed integer
pub const SINT16_MAX: f32 = 32767.0;

/// Minimum value for 16-bit signed integer
pub const SINT16_MIN: f32 = -32768.0;

/// Lifecycle of a mixer buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Generated, never filled
    Initial,
    /// Holds data, not attached to a source
    Filled,
    /// Attached to a source queue
    Queued,
}

/// Read-position step per output frame for a buffer at `frequency`
pub fn resample_step(frequency: u32, output_frequency: u32) -> u64 {
    if output_frequency == 0 {
        return 0;
    }
    ((frequency as u64) << POSITION_FRAC_BITS) / output_frequency as u64
}

/// Clamp a mixed sample into the 16-bit range
pub fn clip(sample: f32) -> i16 {
    sample.clamp(SINT16_MIN, SINT16_MAX) as i16
}
