//! Ogg Vorbis decoder implementation
//!
//! Uses the `lewton` crate for pure Rust Ogg Vorbis decoding.

use std::io::{Read, Seek, SeekFrom};

use lewton::inside_ogg::OggStreamReader;

use super::decoder::{DecodeChunk, DecodeError, DecodeResult, StreamDecoder};
use super::formats::AudioFormat;
use crate::resource::ByteSource;

type Reader = OggStreamReader<Box<dyn ByteSource>>;

/// Find the duration of an Ogg stream from the granule position of its
/// last page. Leaves the stream at its start.
pub fn calculate_ogg_duration<R: Read + Seek + ?Sized>(data: &mut R, sample_rate: u32) -> Option<f64> {
    const SEARCH_WINDOW: u64 = 65536;
    const PAGE_HEADER: usize = 27;

    let file_size = data.seek(SeekFrom::End(0)).ok()?;
    let search_size = SEARCH_WINDOW.min(file_size);
    data.seek(SeekFrom::Start(file_size - search_size)).ok()?;

    let mut buffer = vec![0u8; search_size as usize];
    let read = data.read_exact(&mut buffer);
    let _ = data.seek(SeekFrom::Start(0));
    read.ok()?;

    // Granule position sits at bytes 6..14 of the page header
    let last_granule = (0..buffer.len().saturating_sub(PAGE_HEADER - 1))
        .rev()
        .filter(|&i| buffer[i..].starts_with(b"OggS"))
        .map(|i| {
            let mut granule = [0u8; 8];
            granule.copy_from_slice(&buffer[i + 6..i + 14]);
            u64::from_le_bytes(granule)
        })
        .find(|&granule| granule != u64::MAX)?;

    if sample_rate == 0 {
        return None;
    }
    Some(last_granule as f64 / sample_rate as f64)
}

/// Ogg Vorbis decoder using lewton
///
/// lewton has no sample-accurate seek, so seeking reopens the stream and
/// decodes forward, discarding samples up to the target.
pub struct VorbisDecoder {
    /// Stream reader; `None` once closed or after a failed reopen
    reader: Option<Reader>,
    /// Name of the byte source, for messages
    source_name: String,
    format: AudioFormat,
    sample_rate: u32,
    /// Total length in seconds
    length: Option<f64>,
    /// Decoded, interleaved samples not yet handed out
    pending: Vec<i16>,
    /// Read position in `pending`
    pending_pos: usize,
    /// PCM frames handed out since the start of the stream
    current_frame: u64,
    /// Report a hole on the next decode
    discontinuity: bool,
}

impl VorbisDecoder {
    /// Open a Vorbis stream and read its headers
    ///
    /// # Errors
    /// * `InvalidData` - not a readable Vorbis stream
    /// * `UnsupportedChannels` - neither mono nor stereo
    pub fn open(mut source: Box<dyn ByteSource>) -> DecodeResult<Self> {
        let source_name = source.name().to_string();

        source_at_start(&mut source)?;
        let reader = OggStreamReader::new(source)
            .map_err(|e| DecodeError::InvalidData(format!("{}: {:?}", source_name, e)))?;

        let channels = reader.ident_hdr.audio_channels as u16;
        let format =
            AudioFormat::from_channels(channels).ok_or(DecodeError::UnsupportedChannels(channels))?;
        let sample_rate = reader.ident_hdr.audio_sample_rate;

        let mut source = reader.into_inner().into_inner();
        let length = calculate_ogg_duration(&mut source, sample_rate);
        let reader = reopen(source, &source_name)?;

        Ok(Self {
            reader: Some(reader),
            source_name,
            format,
            sample_rate,
            length,
            pending: Vec::new(),
            pending_pos: 0,
            current_frame: 0,
            discontinuity: false,
        })
    }

    /// Decode the next packet into `pending`; `false` at end of stream
    fn next_packet(&mut self) -> DecodeResult<bool> {
        let reader = self.reader.as_mut().ok_or(DecodeError::NotOpen)?;
        loop {
            match reader.read_dec_packet_itl() {
                // The first audio packet decodes to nothing
                Ok(Some(samples)) if samples.is_empty() => continue,
                Ok(Some(samples)) => {
                    self.pending = samples;
                    self.pending_pos = 0;
                    return Ok(true);
                }
                Ok(None) => return Ok(false),
                Err(e) => {
                    return Err(DecodeError::DecoderError(format!(
                        "{}: {:?}",
                        self.source_name, e
                    )))
                }
            }
        }
    }

    fn restart(&mut self) -> DecodeResult<()> {
        let reader = self.reader.take().ok_or(DecodeError::NotOpen)?;
        let source = reader.into_inner().into_inner();
        self.reader = Some(reopen(source, &self.source_name)?);
        self.pending.clear();
        self.pending_pos = 0;
        self.current_frame = 0;
        self.discontinuity = true;
        Ok(())
    }

    /// Decode and drop frames until the cursor reaches `target`
    fn skip_to(&mut self, target: u64) -> DecodeResult<()> {
        let channels = self.format.channels() as usize;
        while self.current_frame < target {
            if self.pending_pos >= self.pending.len() && !self.next_packet()? {
                break;
            }
            let available = (self.pending.len() - self.pending_pos) / channels;
            let skip = available.min((target - self.current_frame) as usize);
            self.pending_pos += skip * channels;
            self.current_frame += skip as u64;
        }
        Ok(())
    }
}

fn source_at_start(source: &mut Box<dyn ByteSource>) -> DecodeResult<()> {
    source
        .seek(SeekFrom::Start(0))
        .map(|_| ())
        .map_err(|e| DecodeError::SeekFailed(e.to_string()))
}

fn reopen(mut source: Box<dyn ByteSource>, name: &str) -> DecodeResult<Reader> {
    source_at_start(&mut source)?;
    OggStreamReader::new(source)
        .map_err(|e| DecodeError::SeekFailed(format!("{}: cannot reopen stream: {:?}", name, e)))
}

impl StreamDecoder for VorbisDecoder {
    fn name(&self) -> &'static str {
        "Ogg Vorbis"
    }

    fn format(&self) -> AudioFormat {
        self.format
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn decode_chunk(&mut self, buf: &mut [u8]) -> DecodeResult<DecodeChunk> {
        if self.reader.is_none() {
            return Err(DecodeError::NotOpen);
        }
        if self.discontinuity {
            self.discontinuity = false;
            return Ok(DecodeChunk::Hole);
        }

        let channels = self.format.channels() as usize;
        let frame_bytes = self.format.bytes_per_frame();
        let max_samples = (buf.len() / frame_bytes) * channels;
        let mut written = 0;

        while written < max_samples {
            if self.pending_pos >= self.pending.len() && !self.next_packet()? {
                break;
            }
            let take = (self.pending.len() - self.pending_pos).min(max_samples - written);
            let src = &self.pending[self.pending_pos..self.pending_pos + take];
            for (i, sample) in src.iter().enumerate() {
                let offset = (written + i) * 2;
                buf[offset..offset + 2].copy_from_slice(&sample.to_le_bytes());
            }
            self.pending_pos += take;
            written += take;
        }

        if written == 0 {
            return Ok(DecodeChunk::EndOfStream);
        }
        self.current_frame += (written / channels) as u64;
        Ok(DecodeChunk::Data(written * 2))
    }

    fn rewind(&mut self) -> DecodeResult<()> {
        self.restart()
    }

    fn time_seek(&mut self, seconds: f64) -> DecodeResult<()> {
        let target = (seconds.max(0.0) * self.sample_rate as f64) as u64;
        if target < self.current_frame {
            self.restart()?;
        }
        self.skip_to(target)?;
        self.discontinuity = true;
        Ok(())
    }

    fn time_tell(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.current_frame as f64 / self.sample_rate as f64
    }

    fn total_time(&self) -> Option<f64> {
        self.length
    }

    fn close(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.into_inner().into_inner().close();
        }
        self.pending.clear();
        self.pending_pos = 0;
        self.current_frame = 0;
    }
}
