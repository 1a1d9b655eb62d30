//! Stream decoder trait definition
//!
//! Defines the `StreamDecoder` trait implemented by every codec and the
//! content-sniffing constructor that picks one for a byte source.

use std::io::{Read, Seek, SeekFrom};

use thiserror::Error;

use super::formats::AudioFormat;
use super::ogg::VorbisDecoder;
use super::wav::WavDecoder;
use crate::resource::ByteSource;

/// Error type for decoder operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Invalid or corrupted audio data
    #[error("Invalid audio data: {0}")]
    InvalidData(String),
    /// Unsupported audio format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    /// Channel layout other than mono or stereo
    #[error("Unsupported number of channels: {0}")]
    UnsupportedChannels(u16),
    /// Seek failed
    #[error("Seek failed: {0}")]
    SeekFailed(String),
    /// Generic decoder error
    #[error("Decoder error: {0}")]
    DecoderError(String),
    /// Decoder was closed
    #[error("Decoder not open")]
    NotOpen,
}

/// Result type for decoder operations
pub type DecodeResult<T> = Result<T, DecodeError>;

/// Outcome of one `decode_chunk` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeChunk {
    /// This many bytes of PCM were written
    Data(usize),
    /// No more PCM until the stream is rewound
    EndOfStream,
    /// Discontinuity after a seek; call again
    Hole,
}

/// Incremental decoder over an in-memory encoded stream
pub trait StreamDecoder: Send {
    /// Returns the codec name (e.g., "Ogg Vorbis", "WAV")
    fn name(&self) -> &'static str;

    fn format(&self) -> AudioFormat;

    fn sample_rate(&self) -> u32;

    fn channels(&self) -> u16 {
        self.format().channels()
    }

    /// Decode PCM into `buf`
    ///
    /// Writes whole frames only; `buf` must hold at least one frame.
    fn decode_chunk(&mut self, buf: &mut [u8]) -> DecodeResult<DecodeChunk>;

    /// Return to the first sample
    fn rewind(&mut self) -> DecodeResult<()>;

    /// Position the decode cursor at `seconds` (clamped to the stream length)
    fn time_seek(&mut self, seconds: f64) -> DecodeResult<()>;

    /// Decode cursor in seconds
    fn time_tell(&self) -> f64;

    /// Total length in seconds, if known
    fn total_time(&self) -> Option<f64>;

    /// Release the codec state; later calls fail with `NotOpen`
    fn close(&mut self);
}

/// Open the decoder matching the content of `source`
///
/// # Errors
/// * `UnsupportedFormat` - neither an Ogg nor a RIFF/WAVE stream
/// * `UnsupportedChannels` - more than two channels
/// * `InvalidData` - the stream headers are malformed
pub fn open_decoder(mut source: Box<dyn ByteSource>) -> DecodeResult<Box<dyn StreamDecoder>> {
    let mut magic = [0u8; 12];
    let n = read_up_to(&mut source, &mut magic)?;
    source
        .seek(SeekFrom::Start(0))
        .map_err(|e| DecodeError::SeekFailed(e.to_string()))?;

    let magic = &magic[..n];
    if magic.starts_with(b"OggS") {
        Ok(Box::new(VorbisDecoder::open(source)?))
    } else if magic.len() == 12 && &magic[0..4] == b"RIFF" && &magic[8..12] == b"WAVE" {
        Ok(Box::new(WavDecoder::open(source)?))
    } else {
        Err(DecodeError::UnsupportedFormat(format!(
            "{}: unrecognized stream header",
            source.name()
        )))
    }
}

fn read_up_to(source: &mut Box<dyn ByteSource>, buf: &mut [u8]) -> DecodeResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) => return Err(DecodeError::InvalidData(e.to_string())),
        }
    }
    Ok(filled)
}
