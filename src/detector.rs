use std::path::Path;
use std::time::Duration;

use tracing::warn;

use crate::config::VadConfig;
use crate::error::VadError;
use crate::silero_model::SileroModel;

/// Per-frame detection result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadResult {
    pub is_voice: bool,
    pub probability: f32,
    /// Start of the frame on the input sample clock, in milliseconds.
    pub timestamp_ms: i64,
}

/// A detected speech segment, in seconds from the start of input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadSegment {
    pub start_time_s: f32,
    pub end_time_s: f32,
    /// Mean speech probability over the segment's frames.
    pub confidence: f32,
    pub is_speech: bool,
}

impl VadSegment {
    /// Resolve the segment back to its sample range within `samples`.
    pub fn slice<'a>(&self, samples: &'a [f32], sample_rate: u32) -> &'a [f32] {
        let start = ((self.start_time_s * sample_rate as f32) as usize).min(samples.len());
        let end = ((self.end_time_s * sample_rate as f32) as usize).min(samples.len());
        &samples[start..end.max(start)]
    }
}

/// The in-progress segment while the machine is triggered.
#[derive(Debug)]
struct OpenSegment {
    start_sample: u64,
    prob_sum: f32,
    frames: u32,
}

/// Hysteresis-plus-duration segmentation over a stream of frame
/// probabilities.
///
/// Speech opens at `threshold` and only closes below `threshold - 0.15`;
/// probabilities in between keep an open segment alive without advancing the
/// silence clock. A silence run must reach `min_silence_samples` to close a
/// segment, and closed segments shorter than `min_speech_samples` are
/// dropped. Segments running past `max_speech_samples` are split at the last
/// silence run longer than the 98 ms floor when one exists, else hard-cut.
#[derive(Debug)]
struct BatchSegmenter {
    window: u64,
    sample_rate: f32,
    threshold: f32,
    neg_threshold: f32,
    min_speech_samples: u64,
    min_silence_samples: u64,
    silence_floor_samples: u64,
    max_speech_samples: u64,
    triggered: bool,
    current_sample: u64,
    temp_end: u64,
    prev_end: u64,
    next_start: u64,
    open: Option<OpenSegment>,
    segments: Vec<VadSegment>,
}

impl BatchSegmenter {
    fn new(config: &VadConfig) -> Self {
        Self {
            window: config.window_samples() as u64,
            sample_rate: config.sample_rate as f32,
            threshold: config.threshold,
            neg_threshold: config.threshold - 0.15,
            min_speech_samples: config.min_speech_samples(),
            min_silence_samples: config.min_silence_samples(),
            silence_floor_samples: config.max_speech_silence_floor_samples(),
            max_speech_samples: config.max_speech_samples(),
            triggered: false,
            current_sample: 0,
            temp_end: 0,
            prev_end: 0,
            next_start: 0,
            open: None,
            segments: Vec::new(),
        }
    }

    fn reset(&mut self) {
        self.triggered = false;
        self.current_sample = 0;
        self.open = None;
        self.segments.clear();
        self.clear_checkpoints();
    }

    /// Advance the machine by one frame of audio scored at `prob`.
    fn push(&mut self, prob: f32) {
        self.current_sample += self.window;
        let frame_start = self.current_sample - self.window;

        if prob >= self.threshold && self.temp_end != 0 {
            self.temp_end = 0;
            if self.next_start < self.prev_end {
                self.next_start = frame_start;
            }
        }

        if prob >= self.threshold && !self.triggered {
            self.triggered = true;
            self.open = Some(OpenSegment {
                start_sample: frame_start,
                prob_sum: prob,
                frames: 1,
            });
            return;
        }

        if let Some(open) = self.open.as_mut() {
            open.prob_sum += prob;
            open.frames += 1;
        }

        if self.triggered {
            let start = self.open.as_ref().map_or(0, |open| open.start_sample);
            if self.current_sample - start > self.max_speech_samples {
                self.split_at_max_speech(prob);
                return;
            }
        }

        if prob < self.neg_threshold && self.triggered {
            if self.temp_end == 0 {
                self.temp_end = self.current_sample;
            }
            if self.current_sample - self.temp_end > self.silence_floor_samples {
                self.prev_end = self.temp_end;
            }
            if self.current_sample - self.temp_end < self.min_silence_samples {
                return;
            }
            let end = self.temp_end;
            if let Some(open) = self.open.take() {
                if end > open.start_sample && end - open.start_sample > self.min_speech_samples {
                    self.emit(open, end);
                }
            }
            self.clear_checkpoints();
            self.triggered = false;
        }
        // probabilities in [neg_threshold, threshold) while triggered count
        // as continued speech and do not advance the silence clock
    }

    /// The open segment exceeded the maximum speech duration: close it at the
    /// last confirmed silence checkpoint when one exists, else hard-cut at
    /// the current sample.
    fn split_at_max_speech(&mut self, prob: f32) {
        if self.prev_end > 0 {
            let end = self.prev_end;
            if let Some(open) = self.open.take() {
                self.emit(open, end);
            }
            if self.next_start >= end {
                // speech resumed after the checkpoint; continue from there
                self.open = Some(OpenSegment {
                    start_sample: self.next_start,
                    prob_sum: prob,
                    frames: 1,
                });
            } else {
                self.triggered = false;
            }
        } else {
            let end = self.current_sample;
            if let Some(open) = self.open.take() {
                self.emit(open, end);
            }
            self.triggered = false;
        }
        self.clear_checkpoints();
    }

    /// Close any open segment at the end of the buffer. The final segment is
    /// emitted even when shorter than the minimum speech duration.
    fn finalize(&mut self) {
        if let Some(open) = self.open.take() {
            if self.current_sample > open.start_sample {
                self.emit(open, self.current_sample);
            }
        }
        self.clear_checkpoints();
        self.triggered = false;
    }

    fn emit(&mut self, open: OpenSegment, end_sample: u64) {
        self.segments.push(VadSegment {
            start_time_s: open.start_sample as f32 / self.sample_rate,
            end_time_s: end_sample as f32 / self.sample_rate,
            confidence: (open.prob_sum / open.frames as f32).clamp(0.0, 1.0),
            is_speech: true,
        });
    }

    fn clear_checkpoints(&mut self) {
        self.temp_end = 0;
        self.prev_end = 0;
        self.next_start = 0;
    }

    fn current_sample(&self) -> u64 {
        self.current_sample
    }

    fn is_triggered(&self) -> bool {
        self.triggered
    }

    fn open_segment_start(&self) -> Option<u64> {
        self.open.as_ref().map(|open| open.start_sample)
    }

    fn segments(&self) -> &[VadSegment] {
        &self.segments
    }

    fn take_segments(&mut self) -> Vec<VadSegment> {
        std::mem::take(&mut self.segments)
    }
}

/// Voice activity detector over the Silero VAD v5 model.
///
/// Owns the inference session and the segmentation state machine. One
/// detector serves one audio stream at a time; see [`crate::VadStream`] for
/// the chunked streaming overlay.
#[derive(Debug)]
pub struct VadDetector {
    config: VadConfig,
    model: SileroModel,
    segmenter: BatchSegmenter,
}

impl VadDetector {
    /// Load the model and build a ready detector.
    pub fn new(config: VadConfig, model_path: impl AsRef<Path>) -> Result<Self, VadError> {
        config.validate()?;
        let model = SileroModel::new(model_path, config.sample_rate, config.window_samples())?;
        let segmenter = BatchSegmenter::new(&config);
        Ok(Self { config, model, segmenter })
    }

    pub fn config(&self) -> &VadConfig {
        &self.config
    }

    /// Run a single window through the model and the segmentation machine.
    ///
    /// `samples` must be exactly one window (512 samples at 16 kHz, 256 at
    /// 8 kHz); anything else fails with [`VadError::BadFrameSize`] without
    /// touching detector state.
    pub fn process_chunk(&mut self, samples: &[f32]) -> Result<VadResult, VadError> {
        let window = self.config.window_samples();
        if samples.len() != window {
            return Err(VadError::BadFrameSize { expected: window, got: samples.len() });
        }

        let probability = self.model.process(samples)?;
        let frame_start = self.segmenter.current_sample();
        self.segmenter.push(probability);

        Ok(VadResult {
            is_voice: probability >= self.config.threshold,
            probability,
            timestamp_ms: (frame_start * 1000 / u64::from(self.config.sample_rate)) as i64,
        })
    }

    /// Run the model over one window without advancing the segmentation
    /// machine. The streaming overlay keeps its own counters on top of this
    /// kernel.
    pub(crate) fn infer_window(&mut self, samples: &[f32]) -> Result<f32, VadError> {
        let window = self.config.window_samples();
        if samples.len() != window {
            return Err(VadError::BadFrameSize { expected: window, got: samples.len() });
        }
        self.model.process(samples)
    }

    /// Batch pass over a finite buffer: resets, processes every full window
    /// (a trailing partial window is dropped), then closes any open segment
    /// at the end of the buffer.
    ///
    /// If a forward pass fails mid-buffer, the pass is aborted and the
    /// segments finalized before the failure are returned.
    pub fn process_audio(&mut self, samples: &[f32]) -> Result<Vec<VadSegment>, VadError> {
        self.reset();
        let window = self.config.window_samples();
        for frame in samples.chunks_exact(window) {
            match self.process_chunk(frame) {
                Ok(_) => {}
                Err(VadError::Inference(e)) => {
                    warn!("inference failed mid-buffer, aborting batch pass: {e}");
                    return Ok(self.segmenter.take_segments());
                }
                Err(e) => return Err(e),
            }
        }
        self.segmenter.finalize();
        Ok(self.segmenter.take_segments())
    }

    /// Zero the model state and all segmentation counters.
    pub fn reset(&mut self) {
        self.model.reset();
        self.segmenter.reset();
    }

    /// Whether the detector is currently inside a candidate speech region.
    pub fn is_speaking(&self) -> bool {
        self.segmenter.is_triggered()
    }

    /// Duration of the open speech segment, if any.
    pub fn current_speech_duration(&self) -> Option<Duration> {
        self.segmenter.open_segment_start().map(|start| {
            let samples = self.segmenter.current_sample().saturating_sub(start);
            Duration::from_secs_f64(samples as f64 / f64::from(self.config.sample_rate))
        })
    }

    /// Segments finalized so far by a chunk-driven pass.
    pub fn segments(&self) -> &[VadSegment] {
        self.segmenter.segments()
    }
}
