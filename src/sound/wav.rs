//! WAV decoder implementation
//!
//! Streams RIFF WAVE audio from a byte source. Supports:
//! - 8-bit and 16-bit PCM (8-bit is widened to 16-bit on output)
//! - `WAVE_FORMAT_EXTENSIBLE` headers carrying PCM
//! - Mono and stereo
//! - Any sample rate

use std::io::{Read, Seek, SeekFrom};

use super::decoder::{DecodeChunk, DecodeError, DecodeResult, StreamDecoder};
use super::formats::AudioFormat;
use crate::resource::ByteSource;

// WAV format codes
const WAVE_FORMAT_PCM: u16 = 1;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// Parsed `fmt ` chunk
#[derive(Debug, Default, Clone, Copy)]
struct WavFormatHeader {
    channels: u16,
    sample_rate: u32,
    block_align: u16,
    bits_per_sample: u16,
}

/// Streaming WAV decoder
pub struct WavDecoder {
    source: Option<Box<dyn ByteSource>>,
    format: AudioFormat,
    header: WavFormatHeader,
    /// Offset of the first sample byte in the source
    data_start: u64,
    /// Length of the sample data in bytes
    data_len: u64,
    /// Sample bytes consumed so far
    data_pos: u64,
    /// Report a hole on the next decode
    discontinuity: bool,
    /// Raw bytes read from the source before conversion
    scratch: Vec<u8>,
}

fn read_bytes<const N: usize>(source: &mut dyn ByteSource) -> DecodeResult<[u8; N]> {
    let mut buf = [0u8; N];
    source
        .read_exact(&mut buf)
        .map_err(|e| DecodeError::InvalidData(format!("truncated header: {}", e)))?;
    Ok(buf)
}

fn read_le_u32(source: &mut dyn ByteSource) -> DecodeResult<u32> {
    Ok(u32::from_le_bytes(read_bytes::<4>(source)?))
}

fn le_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn le_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Parse the body of a `fmt ` chunk
fn parse_format(body: &[u8]) -> DecodeResult<WavFormatHeader> {
    if body.len() < 16 {
        return Err(DecodeError::InvalidData("Format chunk too small".to_string()));
    }

    let mut tag = le_u16(body, 0);
    if tag == WAVE_FORMAT_EXTENSIBLE {
        // Sub-format GUID starts at byte 24; its first two bytes are the tag
        if body.len() < 26 {
            return Err(DecodeError::InvalidData("Extensible format chunk too small".to_string()));
        }
        tag = le_u16(body, 24);
    }
    if tag != WAVE_FORMAT_PCM {
        return Err(DecodeError::UnsupportedFormat(format!(
            "WAV format {} (only PCM supported)",
            tag
        )));
    }

    let header = WavFormatHeader {
        channels: le_u16(body, 2),
        sample_rate: le_u32(body, 4),
        block_align: le_u16(body, 12),
        bits_per_sample: le_u16(body, 14),
    };

    if header.bits_per_sample != 8 && header.bits_per_sample != 16 {
        return Err(DecodeError::UnsupportedFormat(format!(
            "{} bits per sample",
            header.bits_per_sample
        )));
    }
    if header.block_align != header.channels * (header.bits_per_sample / 8) {
        return Err(DecodeError::InvalidData(format!(
            "block align {} does not match {} channels",
            header.block_align, header.channels
        )));
    }
    Ok(header)
}

impl WavDecoder {
    /// Parse the RIFF structure and position the stream at the sample data
    ///
    /// # Errors
    /// * `InvalidData` - malformed RIFF structure
    /// * `UnsupportedFormat` - compressed or unusual sample encoding
    /// * `UnsupportedChannels` - neither mono nor stereo
    pub fn open(mut source: Box<dyn ByteSource>) -> DecodeResult<Self> {
        source
            .seek(SeekFrom::Start(0))
            .map_err(|e| DecodeError::SeekFailed(e.to_string()))?;

        if &read_bytes::<4>(source.as_mut())? != b"RIFF" {
            return Err(DecodeError::InvalidData("Not a RIFF file".to_string()));
        }
        let _riff_size = read_le_u32(source.as_mut())?;
        if &read_bytes::<4>(source.as_mut())? != b"WAVE" {
            return Err(DecodeError::InvalidData("Not a WAVE file".to_string()));
        }

        let mut header = None;
        let (data_start, data_len) = loop {
            let id = read_bytes::<4>(source.as_mut())?;
            let size = read_le_u32(source.as_mut())?;

            match &id {
                b"fmt " => {
                    let mut body = vec![0u8; size as usize];
                    source
                        .read_exact(&mut body)
                        .map_err(|e| DecodeError::InvalidData(format!("truncated fmt chunk: {}", e)))?;
                    if size % 2 == 1 {
                        let _ = read_bytes::<1>(source.as_mut());
                    }
                    header = Some(parse_format(&body)?);
                }
                b"data" => {
                    let start = source.tell();
                    let available = source.len().saturating_sub(start);
                    break (start, u64::from(size).min(available));
                }
                _ => {
                    let skip = i64::from(size) + i64::from(size % 2);
                    source
                        .seek(SeekFrom::Current(skip))
                        .map_err(|e| DecodeError::InvalidData(format!("bad chunk size: {}", e)))?;
                }
            }
        };

        let header =
            header.ok_or_else(|| DecodeError::InvalidData("data chunk before fmt chunk".to_string()))?;
        let format = AudioFormat::from_channels(header.channels)
            .ok_or(DecodeError::UnsupportedChannels(header.channels))?;
        let data_len = data_len - data_len % u64::from(header.block_align);

        Ok(Self {
            source: Some(source),
            format,
            header,
            data_start,
            data_len,
            data_pos: 0,
            discontinuity: false,
            scratch: Vec::new(),
        })
    }

    fn frames_total(&self) -> u64 {
        self.data_len / u64::from(self.header.block_align)
    }

    fn frame_pos(&self) -> u64 {
        self.data_pos / u64::from(self.header.block_align)
    }
}

impl StreamDecoder for WavDecoder {
    fn name(&self) -> &'static str {
        "WAV"
    }

    fn format(&self) -> AudioFormat {
        self.format
    }

    fn sample_rate(&self) -> u32 {
        self.header.sample_rate
    }

    fn decode_chunk(&mut self, buf: &mut [u8]) -> DecodeResult<DecodeChunk> {
        let source = self.source.as_mut().ok_or(DecodeError::NotOpen)?;
        if self.discontinuity {
            self.discontinuity = false;
            return Ok(DecodeChunk::Hole);
        }

        let in_frame = u64::from(self.header.block_align);
        let out_frame = self.format.bytes_per_frame();
        let remaining = (self.data_len - self.data_pos) / in_frame;
        let frames = remaining.min((buf.len() / out_frame) as u64) as usize;
        if frames == 0 {
            return Ok(DecodeChunk::EndOfStream);
        }

        let in_bytes = frames * in_frame as usize;
        self.scratch.resize(in_bytes, 0);
        let read = match source.seek(SeekFrom::Start(self.data_start + self.data_pos)) {
            Ok(_) => source.read_exact(&mut self.scratch),
            Err(e) => Err(e),
        };
        if let Err(e) = read {
            return Err(DecodeError::DecoderError(format!("{}: {}", source.name(), e)));
        }

        if self.header.bits_per_sample == 8 {
            for (i, &byte) in self.scratch.iter().enumerate() {
                let sample = (i16::from(byte) - 128) << 8;
                buf[i * 2..i * 2 + 2].copy_from_slice(&sample.to_le_bytes());
            }
        } else {
            buf[..in_bytes].copy_from_slice(&self.scratch);
        }

        self.data_pos += in_bytes as u64;
        Ok(DecodeChunk::Data(frames * out_frame))
    }

    fn rewind(&mut self) -> DecodeResult<()> {
        if self.source.is_none() {
            return Err(DecodeError::NotOpen);
        }
        self.data_pos = 0;
        self.discontinuity = true;
        Ok(())
    }

    fn time_seek(&mut self, seconds: f64) -> DecodeResult<()> {
        if self.source.is_none() {
            return Err(DecodeError::NotOpen);
        }
        let frame = (seconds.max(0.0) * f64::from(self.header.sample_rate)) as u64;
        self.data_pos = frame.min(self.frames_total()) * u64::from(self.header.block_align);
        self.discontinuity = true;
        Ok(())
    }

    fn time_tell(&self) -> f64 {
        if self.header.sample_rate == 0 {
            return 0.0;
        }
        self.frame_pos() as f64 / f64::from(self.header.sample_rate)
    }

    fn total_time(&self) -> Option<f64> {
        if self.header.sample_rate == 0 {
            return None;
        }
        Some(self.frames_total() as f64 / f64::from(self.header.sample_rate))
    }

    fn close(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.close();
        }
        self.data_pos = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::AudioResource;
    use crate::sound::test_support::{wav_bytes, wav_bytes_8bit};

    fn open(bytes: Vec<u8>) -> DecodeResult<WavDecoder> {
        WavDecoder::open(Box::new(AudioResource::from_bytes("test.wav", bytes)))
    }

    #[test]
    fn test_open_reports_format() {
        let decoder = open(wav_bytes(2, 22050, 2205)).unwrap();
        assert_eq!(decoder.format(), AudioFormat::Stereo16);
        assert_eq!(decoder.sample_rate(), 22050);
        assert_eq!(decoder.channels(), 2);
        assert!((decoder.total_time().unwrap() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_decode_until_end() {
        let mut decoder = open(wav_bytes(1, 8000, 1000)).unwrap();
        let mut buf = vec![0u8; 600];
        let mut total = 0;
        loop {
            match decoder.decode_chunk(&mut buf).unwrap() {
                DecodeChunk::Data(n) => {
                    assert_eq!(n % 2, 0);
                    total += n;
                }
                DecodeChunk::EndOfStream => break,
                DecodeChunk::Hole => panic!("no seek happened"),
            }
        }
        assert_eq!(total, 2000);
        assert!((decoder.time_tell() - 0.125).abs() < 1e-9);
        assert_eq!(decoder.decode_chunk(&mut buf).unwrap(), DecodeChunk::EndOfStream);
    }

    #[test]
    fn test_decoded_samples_match_fixture() {
        let mut decoder = open(wav_bytes(1, 8000, 16)).unwrap();
        let mut buf = vec![0u8; 8];
        assert_eq!(decoder.decode_chunk(&mut buf).unwrap(), DecodeChunk::Data(8));
        let samples: Vec<i16> = buf
            .chunks(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        let expected: Vec<i16> = (0..4).map(crate::sound::test_support::sample_at).collect();
        assert_eq!(samples, expected);
    }

    #[test]
    fn test_eight_bit_is_widened() {
        let mut decoder = open(wav_bytes_8bit(&[1, -1, 0])).unwrap();
        assert_eq!(decoder.format(), AudioFormat::Mono16);
        let mut buf = vec![0u8; 6];
        assert_eq!(decoder.decode_chunk(&mut buf).unwrap(), DecodeChunk::Data(6));
        assert_eq!(i16::from_le_bytes([buf[0], buf[1]]), 256);
        assert_eq!(i16::from_le_bytes([buf[2], buf[3]]), -256);
        assert_eq!(i16::from_le_bytes([buf[4], buf[5]]), 0);
    }

    #[test]
    fn test_seek_and_tell() {
        let mut decoder = open(wav_bytes(2, 8000, 8000)).unwrap();
        decoder.time_seek(0.5).unwrap();
        assert!((decoder.time_tell() - 0.5).abs() < 1e-9);

        let mut buf = vec![0u8; 400];
        assert_eq!(decoder.decode_chunk(&mut buf).unwrap(), DecodeChunk::Hole);
        assert_eq!(decoder.decode_chunk(&mut buf).unwrap(), DecodeChunk::Data(400));
        assert!((decoder.time_tell() - 0.5125).abs() < 1e-9);

        decoder.time_seek(30.0).unwrap();
        assert!((decoder.time_tell() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_rewind() {
        let mut decoder = open(wav_bytes(1, 8000, 800)).unwrap();
        let mut buf = vec![0u8; 1600];
        decoder.decode_chunk(&mut buf).unwrap();
        assert_eq!(decoder.decode_chunk(&mut buf).unwrap(), DecodeChunk::EndOfStream);

        decoder.rewind().unwrap();
        assert_eq!(decoder.time_tell(), 0.0);
        assert_eq!(decoder.decode_chunk(&mut buf).unwrap(), DecodeChunk::Hole);
        assert_eq!(decoder.decode_chunk(&mut buf).unwrap(), DecodeChunk::Data(1600));
    }

    #[test]
    fn test_four_channels_rejected() {
        assert!(matches!(
            open(wav_bytes(4, 8000, 100)),
            Err(DecodeError::UnsupportedChannels(4))
        ));
    }

    #[test]
    fn test_invalid_riff() {
        assert!(matches!(
            open(b"RIFX\0\0\0\0WAVEfmt ".to_vec()),
            Err(DecodeError::InvalidData(_))
        ));
    }

    #[test]
    fn test_closed_decoder() {
        let mut decoder = open(wav_bytes(1, 8000, 10)).unwrap();
        decoder.close();
        let mut buf = vec![0u8; 4];
        assert_eq!(decoder.decode_chunk(&mut buf), Err(DecodeError::NotOpen));
        assert_eq!(decoder.rewind(), Err(DecodeError::NotOpen));
    }

    #[test]
    fn test_wav_decoder_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<WavDecoder>();
    }
}
