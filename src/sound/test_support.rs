//! WAV fixtures for the sound unit tests

use std::io::Cursor;

use hound::{SampleFormat, WavSpec, WavWriter};

/// Value of sample `i` in every generated 16-bit fixture
pub fn sample_at(i: usize) -> i16 {
    ((i % 200) as i16 - 100) * 50
}

/// 16-bit PCM WAV with `frames` frames of a sawtooth in every channel
pub fn wav_bytes(channels: u16, sample_rate: u32, frames: usize) -> Vec<u8> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut bytes = Vec::new();
    {
        let mut writer = WavWriter::new(Cursor::new(&mut bytes), spec).unwrap();
        for i in 0..frames {
            for _ in 0..channels {
                writer.write_sample(sample_at(i)).unwrap();
            }
        }
        writer.finalize().unwrap();
    }
    bytes
}

/// 8-bit mono PCM WAV holding `samples`
pub fn wav_bytes_8bit(samples: &[i8]) -> Vec<u8> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: 8000,
        bits_per_sample: 8,
        sample_format: SampleFormat::Int,
    };

    let mut bytes = Vec::new();
    {
        let mut writer = WavWriter::new(Cursor::new(&mut bytes), spec).unwrap();
        for &sample in samples {
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();
    }
    bytes
}
