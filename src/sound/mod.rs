//! Streaming audio playback
//!
//! Encoded files are held in memory, decoded incrementally and streamed
//! through a small ring of backend buffers. The pieces, leaves first:
//!
//! - `decoder`, `ogg`, `wav` - the `StreamDecoder` trait and its codecs
//! - `backend` - the OpenAL-shaped `AudioBackend` seam
//! - `mixer` - software mixer backend (headless runs and tests)
//! - `rodio_backend` - output-device backend
//! - `ring` - the per-object buffer ring and the stream-health latch
//! - `fade` - gain envelope
//! - `audio` - the playback state machine
//! - `manager` - registry and update tick

pub mod audio;
pub mod backend;
pub mod decoder;
pub mod fade;
pub mod formats;
pub mod manager;
pub mod mixer;
pub mod ogg;
pub mod ring;
pub mod rodio_backend;
pub mod wav;

#[cfg(test)]
pub(crate) mod test_support;

pub use audio::{Audio, AudioState, Face, Point};
pub use backend::{AudioBackend, BackendError, SourceState};
pub use decoder::{open_decoder, DecodeChunk, DecodeError, DecodeResult, StreamDecoder};
pub use fade::FadeEnvelope;
pub use formats::AudioFormat;
pub use manager::AudioManager;
pub use mixer::MixerBackend;
pub use ogg::VorbisDecoder;
pub use ring::{BufferRing, StreamHealth, AUDIO_BUFFERS};
pub use rodio_backend::RodioBackend;
pub use wav::WavDecoder;
