use std::io::Cursor;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::detector::VadSegment;
use crate::error::VadError;

/// Convert a single 16-bit PCM sample to float in [-1.0, 1.0).
#[inline]
pub fn pcm16_sample_to_f32(sample: i16) -> f32 {
    f32::from(sample) / 32768.0
}

/// Convert a single float sample to 16-bit PCM, clamping to [-1.0, 1.0].
#[inline]
pub fn f32_sample_to_pcm16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0).round() as i16
}

pub fn pcm16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| pcm16_sample_to_f32(s)).collect()
}

pub fn f32_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples.iter().map(|&s| f32_sample_to_pcm16(s)).collect()
}

fn wav_spec(sample_rate: u32) -> hound::WavSpec {
    hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

/// Encode samples as a mono 16-bit PCM RIFF/WAVE byte buffer.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, VadError> {
    let mut cursor = Cursor::new(Vec::new());
    let mut writer = hound::WavWriter::new(&mut cursor, wav_spec(sample_rate))?;
    for &sample in samples {
        writer.write_sample(f32_sample_to_pcm16(sample))?;
    }
    writer.finalize()?;
    Ok(cursor.into_inner())
}

/// Write samples to `path` as a mono 16-bit PCM WAV file.
pub fn write_wav_file(path: &Path, samples: &[f32], sample_rate: u32) -> Result<(), VadError> {
    let mut writer = hound::WavWriter::create(path, wav_spec(sample_rate))?;
    for &sample in samples {
        writer.write_sample(f32_sample_to_pcm16(sample))?;
    }
    writer.finalize()?;
    Ok(())
}

/// Write one WAV per segment under `dir`, slicing each segment out of
/// `samples`. Unlike the streaming emitter this applies no padding and no
/// normalization; the audio is written as detected.
pub fn write_segments(
    dir: &Path,
    samples: &[f32],
    segments: &[VadSegment],
    sample_rate: u32,
) -> Result<Vec<PathBuf>, VadError> {
    std::fs::create_dir_all(dir)?;
    let mut paths = Vec::with_capacity(segments.len());
    for (index, segment) in segments.iter().enumerate() {
        let slice = segment.slice(samples, sample_rate);
        let path = dir.join(format!("segment_{}.wav", index + 1));
        write_wav_file(&path, slice, sample_rate)?;
        debug!(path = %path.display(), samples = slice.len(), "wrote segment");
        paths.push(path);
    }
    Ok(paths)
}
