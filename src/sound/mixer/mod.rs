// mod.rs - Audio mixer module

//! OpenAL-like software mixer.
//!
//! Owns its own buffer and source tables and mixes playing sources into an
//! interleaved 16-bit stereo stream. Used headless (null driver) and as the
//! deterministic backend in tests.
//!
//! # Architecture
//!
//! - `types` - Constants and buffer states
//! - `buffer` - PCM buffer storage
//! - `source` - Source queue and playback state
//! - `mix` - The backend itself and the mixing loop
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use scene_audio::sound::mixer::MixerBackend;
//!
//! let mixer = Arc::new(MixerBackend::new(44100));
//! let output = mixer.spawn_output_thread(Duration::from_millis(20))?;
//! // ... hand `mixer` to the audio manager ...
//! output.stop();
//! ```

pub mod buffer;
pub mod mix;
pub mod source;
pub mod types;

pub use buffer::MixerBuffer;
pub use mix::{MixerBackend, OutputThread};
pub use source::MixerSource;
pub use types::{BufferState, DEFAULT_MIXER_FREQUENCY, MIXER_FRAME_SIZE};
