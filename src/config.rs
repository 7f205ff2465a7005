use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::VadError;

/// Number of trailing samples carried from one model input to the next.
pub const CONTEXT_SAMPLES: usize = 64;

/// Configuration for voice activity detection.
///
/// Immutable once a detector has been created from it. Durations are given in
/// human-friendly units and converted to sample counts against `sample_rate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// Audio sample rate in Hz (must be 8000 or 16000)
    pub sample_rate: u32,
    /// Probability threshold for speech detection (0.0-1.0)
    pub threshold: f32,
    /// Minimum speech duration in ms for a segment to be kept
    pub min_speech_ms: u32,
    /// Minimum silence duration in ms before a segment is closed
    pub min_silence_ms: u32,
    /// Padding added around emitted segments in ms (streaming emitter only)
    pub speech_pad_ms: u32,
    /// Maximum speech duration in seconds before a segment is force-split
    pub max_speech_s: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            threshold: 0.5,
            min_speech_ms: 250,
            min_silence_ms: 100,
            speech_pad_ms: 30,
            max_speech_s: 30.0,
        }
    }
}

impl VadConfig {
    pub fn validate(&self) -> Result<(), VadError> {
        if self.sample_rate != 8000 && self.sample_rate != 16000 {
            return Err(VadError::Config(format!(
                "sample_rate must be 8000 or 16000, got {}",
                self.sample_rate
            )));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(VadError::Config(format!(
                "threshold must be within 0.0..=1.0, got {}",
                self.threshold
            )));
        }
        Ok(())
    }

    /// Model window size in samples: 512 at 16 kHz, 256 at 8 kHz.
    pub fn window_samples(&self) -> usize {
        if self.sample_rate == 8000 {
            256
        } else {
            512
        }
    }

    fn ms_to_samples(&self, ms: u32) -> u64 {
        u64::from(self.sample_rate) * u64::from(ms) / 1000
    }

    pub fn min_speech_samples(&self) -> u64 {
        self.ms_to_samples(self.min_speech_ms)
    }

    pub fn min_silence_samples(&self) -> u64 {
        self.ms_to_samples(self.min_silence_ms)
    }

    pub fn speech_pad_samples(&self) -> u64 {
        self.ms_to_samples(self.speech_pad_ms)
    }

    /// Silence floor (98 ms) below which a silence run is too short to serve
    /// as a split checkpoint when a segment hits the maximum speech duration.
    pub fn max_speech_silence_floor_samples(&self) -> u64 {
        self.ms_to_samples(98)
    }

    /// Longest a segment may run, in samples, before it is force-split. The
    /// window and both pads are reserved out of the configured duration.
    pub fn max_speech_samples(&self) -> u64 {
        let total = (self.sample_rate as f32 * self.max_speech_s) as u64;
        total.saturating_sub(self.window_samples() as u64 + 2 * self.speech_pad_samples())
    }

    /// Consecutive silent windows the streaming segmenter requires before
    /// closing a segment.
    pub fn min_silence_windows(&self) -> u32 {
        (self.min_silence_samples() / self.window_samples() as u64) as u32 + 1
    }
}

/// Read a [`VadConfig`] from a TOML file, falling back to defaults if the
/// file is missing or malformed.
pub fn read_vad_config(path: impl AsRef<Path>) -> VadConfig {
    let path = path.as_ref();
    match std::fs::read_to_string(path) {
        Ok(text) => match toml::from_str(&text) {
            Ok(config) => config,
            Err(e) => {
                warn!("failed to parse {}: {}; using default configuration", path.display(), e);
                VadConfig::default()
            }
        },
        Err(e) => {
            warn!("failed to read {}: {}; using default configuration", path.display(), e);
            VadConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = VadConfig::default();
        assert_eq!(config.sample_rate, 16000);
        assert_eq!(config.threshold, 0.5);
        assert_eq!(config.min_speech_ms, 250);
        assert_eq!(config.min_silence_ms, 100);
        assert_eq!(config.speech_pad_ms, 30);
        assert_eq!(config.max_speech_s, 30.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn window_size_follows_sample_rate() {
        let config = VadConfig::default();
        assert_eq!(config.window_samples(), 512);

        let config = VadConfig { sample_rate: 8000, ..VadConfig::default() };
        assert_eq!(config.window_samples(), 256);
    }

    #[test]
    fn derived_sample_counts() {
        let config = VadConfig::default();
        assert_eq!(config.min_speech_samples(), 4000);
        assert_eq!(config.min_silence_samples(), 1600);
        assert_eq!(config.speech_pad_samples(), 480);
        assert_eq!(config.max_speech_silence_floor_samples(), 1568);
        // 30 s of audio minus one window and both pads
        assert_eq!(config.max_speech_samples(), 480000 - 512 - 960);
    }

    #[test]
    fn min_silence_windows_rounds_up() {
        let config = VadConfig::default();
        // 1600 samples of silence span three full windows, plus one
        assert_eq!(config.min_silence_windows(), 4);

        let config = VadConfig { min_silence_ms: 500, ..VadConfig::default() };
        assert_eq!(config.min_silence_windows(), 16);
    }

    #[test]
    fn validate_rejects_bad_rates_and_thresholds() {
        let config = VadConfig { sample_rate: 44100, ..VadConfig::default() };
        assert!(config.validate().is_err());

        let config = VadConfig { threshold: 1.5, ..VadConfig::default() };
        assert!(config.validate().is_err());

        let config = VadConfig { threshold: -0.1, ..VadConfig::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn read_config_falls_back_to_defaults() {
        let config = read_vad_config("/nonexistent/vad.toml");
        assert_eq!(config.sample_rate, 16000);
    }

    #[test]
    fn read_config_parses_partial_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vad.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "threshold = 0.35\nmin_silence_ms = 200").unwrap();

        let config = read_vad_config(&path);
        assert_eq!(config.threshold, 0.35);
        assert_eq!(config.min_silence_ms, 200);
        // unset fields keep their defaults
        assert_eq!(config.sample_rate, 16000);
    }
}
