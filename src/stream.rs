use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::detector::VadDetector;
use crate::error::VadError;
use crate::pcm;
use crate::resample::resample;

/// Number of consecutive speech windows required before a segment opens.
const MIN_SPEECH_WINDOWS: u32 = 2;

/// Consecutive-window debounce over per-frame voice flags.
///
/// Speech opens only after [`MIN_SPEECH_WINDOWS`] voiced windows in a row,
/// with the segment start backdated to the first window of the run; it closes
/// after `min_silence_windows` silent windows in a row. This rejects
/// single-window spikes that the batch hysteresis would accept, so the two
/// machines can disagree on boundaries by a window or two.
struct StreamSegmenter {
    min_silence_windows: u32,
    in_speech: bool,
    speech_start_sample: u64,
    speech_end_sample: u64,
    consec_speech: u32,
    consec_silence: u32,
}

impl StreamSegmenter {
    fn new(min_silence_windows: u32) -> Self {
        Self {
            min_silence_windows,
            in_speech: false,
            speech_start_sample: 0,
            speech_end_sample: 0,
            consec_speech: 0,
            consec_silence: 0,
        }
    }

    /// Feed one frame; returns a closed candidate segment when a silence run
    /// long enough to end speech completes.
    fn push(&mut self, voiced: bool, frame_start: u64, window: u64) -> Option<(u64, u64)> {
        if voiced {
            self.consec_speech += 1;
            self.consec_silence = 0;
            if !self.in_speech && self.consec_speech >= MIN_SPEECH_WINDOWS {
                self.in_speech = true;
                // backdate to the first window of the run
                self.speech_start_sample =
                    frame_start - u64::from(self.consec_speech - 1) * window;
            }
            if self.in_speech {
                self.speech_end_sample = frame_start + window;
            }
            None
        } else {
            self.consec_silence += 1;
            self.consec_speech = 0;
            if self.in_speech && self.consec_silence >= self.min_silence_windows {
                self.in_speech = false;
                self.consec_silence = 0;
                Some((self.speech_start_sample, self.speech_end_sample))
            } else {
                None
            }
        }
    }

    /// Close a still-open segment at end of stream.
    fn flush(&mut self) -> Option<(u64, u64)> {
        if !self.in_speech {
            return None;
        }
        self.in_speech = false;
        self.consec_speech = 0;
        self.consec_silence = 0;
        Some((self.speech_start_sample, self.speech_end_sample))
    }
}

/// Pad, slice, resample, and peak-normalize one segment out of the stream's
/// accumulated history.
fn render_segment(
    accumulated: &[f32],
    start: u64,
    end: u64,
    pad: u64,
    input_rate: u32,
    output_rate: u32,
) -> Vec<f32> {
    let lo = start.saturating_sub(pad) as usize;
    let hi = ((end + pad) as usize).min(accumulated.len());
    if lo >= hi {
        return Vec::new();
    }

    let mut samples = accumulated[lo..hi].to_vec();
    if output_rate != input_rate {
        samples = resample(&samples, input_rate, output_rate);
    }

    let peak = samples.iter().fold(0.0f32, |acc, &x| acc.max(x.abs()));
    if peak > 0.0 {
        let gain = 0.9 / peak;
        for sample in &mut samples {
            *sample *= gain;
        }
    }
    samples
}

/// Streaming segment extractor over a shared [`VadDetector`].
///
/// Accepts arbitrarily sized chunks, frames them into fixed windows against
/// the detector's inference kernel, and writes each detected segment as
/// `segment_<N>.wav` under `output_dir`, optionally resampled to
/// `output_rate`. The full sample history of the stream is retained so
/// segment slices stay addressable.
pub struct VadStream {
    detector: Arc<Mutex<VadDetector>>,
    output_dir: PathBuf,
    sample_rate: u32,
    output_rate: u32,
    window: usize,
    threshold: f32,
    speech_pad_samples: u64,
    min_speech_samples: u64,
    accumulated: Vec<f32>,
    total_samples_processed: u64,
    segment_counter: u32,
    segmenter: StreamSegmenter,
}

impl VadStream {
    /// Create a stream writing segments under `output_dir`. Segments are
    /// resampled to `output_rate` when it differs from the detector's rate.
    pub fn new(
        detector: Arc<Mutex<VadDetector>>,
        output_dir: impl Into<PathBuf>,
        output_rate: Option<u32>,
    ) -> Result<Self, VadError> {
        let (sample_rate, window, threshold, speech_pad_samples, min_speech_samples, min_silence_windows) = {
            let guard = detector.lock();
            let config = guard.config();
            (
                config.sample_rate,
                config.window_samples(),
                config.threshold,
                config.speech_pad_samples(),
                config.min_speech_samples(),
                config.min_silence_windows(),
            )
        };

        let output_dir = output_dir.into();
        std::fs::create_dir_all(&output_dir)?;

        Ok(Self {
            detector,
            output_dir,
            sample_rate,
            output_rate: output_rate.unwrap_or(sample_rate),
            window,
            threshold,
            speech_pad_samples,
            min_speech_samples,
            accumulated: Vec::new(),
            total_samples_processed: 0,
            segment_counter: 0,
            segmenter: StreamSegmenter::new(min_silence_windows),
        })
    }

    /// Feed a chunk of any size at the detector's sample rate. Returns the
    /// number of segments written during this call.
    ///
    /// Samples that do not yet fill a whole window are held back and framed
    /// once later chunks complete them; no input is discarded.
    pub fn process_chunk(&mut self, samples: &[f32]) -> Result<u32, VadError> {
        self.accumulated.extend_from_slice(samples);

        let mut emitted = 0;
        loop {
            let framed = self.total_samples_processed as usize;
            if self.accumulated.len() - framed < self.window {
                break;
            }

            let probability = {
                let mut detector = self.detector.lock();
                detector.infer_window(&self.accumulated[framed..framed + self.window])?
            };

            let frame_start = self.total_samples_processed;
            self.total_samples_processed += self.window as u64;

            let voiced = probability >= self.threshold;
            if let Some((start, end)) = self.segmenter.push(voiced, frame_start, self.window as u64)
            {
                if end - start >= self.min_speech_samples && self.write_segment(start, end) {
                    emitted += 1;
                }
            }
        }
        Ok(emitted)
    }

    /// Feed a chunk recorded at `input_sample_rate`, coercing it to the
    /// detector's rate first when they differ.
    pub fn process_chunk_resampled(
        &mut self,
        samples: &[f32],
        input_sample_rate: u32,
    ) -> Result<u32, VadError> {
        if input_sample_rate == self.sample_rate {
            self.process_chunk(samples)
        } else {
            let coerced = resample(samples, input_sample_rate, self.sample_rate);
            self.process_chunk(&coerced)
        }
    }

    /// Flush a still-open segment if it is long enough, then return the total
    /// number of segments written over the life of the stream.
    pub fn finalize(&mut self) -> u32 {
        if let Some((start, end)) = self.segmenter.flush() {
            if end - start >= self.min_speech_samples {
                self.write_segment(start, end);
            }
        }
        self.segment_counter
    }

    /// Total number of segments written so far.
    pub fn segments_written(&self) -> u32 {
        self.segment_counter
    }

    /// Writes `segment_<N>.wav` and advances the counter. A failed write is
    /// logged and skipped; the counter only moves on success, so the next
    /// segment reuses the same number.
    fn write_segment(&mut self, start: u64, end: u64) -> bool {
        let samples = render_segment(
            &self.accumulated,
            start,
            end,
            self.speech_pad_samples,
            self.sample_rate,
            self.output_rate,
        );

        let index = self.segment_counter + 1;
        let path = self.output_dir.join(format!("segment_{index}.wav"));
        match pcm::write_wav_file(&path, &samples, self.output_rate) {
            Ok(()) => {
                self.segment_counter = index;
                debug!(path = %path.display(), samples = samples.len(), "wrote speech segment");
                true
            }
            Err(e) => {
                warn!(path = %path.display(), "skipping segment, WAV write failed: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: u64 = 512;

    fn feed(machine: &mut StreamSegmenter, flags: &[bool]) -> Vec<(u64, u64)> {
        let mut closed = Vec::new();
        for (i, &voiced) in flags.iter().enumerate() {
            if let Some(range) = machine.push(voiced, i as u64 * WINDOW, WINDOW) {
                closed.push(range);
            }
        }
        closed
    }

    #[test]
    fn single_spike_never_opens_speech() {
        let mut machine = StreamSegmenter::new(4);
        let flags = [false, true, false, false, false, false, false];
        assert!(feed(&mut machine, &flags).is_empty());
        assert!(machine.flush().is_none());
    }

    #[test]
    fn speech_start_is_backdated_to_first_window() {
        let mut machine = StreamSegmenter::new(4);
        // speech confirmed at the second voiced window (index 3), backdated
        // to the first (index 2)
        let mut flags = vec![false, false, true, true, true];
        flags.extend(std::iter::repeat(false).take(4));
        let closed = feed(&mut machine, &flags);

        assert_eq!(closed.len(), 1);
        let (start, end) = closed[0];
        assert_eq!(start, 2 * WINDOW);
        // end covers the last voiced window
        assert_eq!(end, 5 * WINDOW);
    }

    #[test]
    fn close_requires_full_silence_run() {
        let mut machine = StreamSegmenter::new(4);
        // 3 silent windows are not enough, the 4th closes
        let mut flags = vec![true, true, true];
        flags.extend([false, false, false]);
        assert!(feed(&mut machine, &flags).is_empty());
        assert!(machine.push(false, 6 * WINDOW, WINDOW).is_some());
    }

    #[test]
    fn silence_run_interrupted_by_speech_starts_over() {
        let mut machine = StreamSegmenter::new(4);
        let flags = [
            true, true, // open
            false, false, false, // not yet closed
            true, // silence counter resets
            false, false, false, // still not closed
        ];
        assert!(feed(&mut machine, &flags).is_empty());
        let closed = machine.push(false, 9 * WINDOW, WINDOW);
        assert_eq!(closed, Some((0, 6 * WINDOW)));
    }

    #[test]
    fn flush_returns_open_segment_once() {
        let mut machine = StreamSegmenter::new(4);
        feed(&mut machine, &[true, true, true]);
        assert_eq!(machine.flush(), Some((0, 3 * WINDOW)));
        assert!(machine.flush().is_none());
    }

    #[test]
    fn segmenter_reopens_after_close() {
        let mut machine = StreamSegmenter::new(2);
        let closed = feed(
            &mut machine,
            &[true, true, false, false, true, true, false, false],
        );
        assert_eq!(closed.len(), 2);
        assert_eq!(closed[0].0, 0);
        assert_eq!(closed[1].0, 4 * WINDOW);
    }

    #[test]
    fn render_pads_and_clamps_to_buffer() {
        let accumulated = vec![0.5f32; 1000];
        // padding would reach past both ends; it must clamp
        let samples = render_segment(&accumulated, 100, 900, 480, 16000, 16000);
        assert_eq!(samples.len(), 1000);
    }

    #[test]
    fn render_normalizes_peak_to_0_9() {
        let mut accumulated = vec![0.0f32; 2000];
        accumulated[500] = 0.3;
        accumulated[600] = -0.45;
        let samples = render_segment(&accumulated, 400, 800, 0, 16000, 16000);
        let peak = samples.iter().fold(0.0f32, |acc, &x| acc.max(x.abs()));
        assert!((peak - 0.9).abs() < 1e-6);
    }

    #[test]
    fn render_leaves_silence_untouched() {
        let accumulated = vec![0.0f32; 2000];
        let samples = render_segment(&accumulated, 400, 800, 0, 16000, 16000);
        assert!(samples.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn render_resamples_to_output_rate() {
        let accumulated = vec![0.25f32; 1600];
        let samples = render_segment(&accumulated, 0, 1600, 0, 16000, 8000);
        assert_eq!(samples.len(), 800);
    }

    // Model-backed streaming tests; see detector.rs for the env var.

    fn model_path() -> String {
        std::env::var("SILERO_VAD_MODEL").unwrap_or_else(|_| "models/silero_vad.onnx".to_string())
    }

    #[test]
    #[ignore = "requires the Silero VAD model file"]
    fn silence_stream_writes_nothing() {
        use crate::config::VadConfig;

        let detector = Arc::new(Mutex::new(
            VadDetector::new(VadConfig::default(), model_path()).unwrap(),
        ));
        let dir = tempfile::tempdir().unwrap();
        let mut stream = VadStream::new(detector, dir.path(), None).unwrap();

        // ragged chunk sizes exercise the tail buffering
        for chunk_len in [100usize, 512, 700, 1024, 333, 4096] {
            let chunk = vec![0.0f32; chunk_len];
            assert_eq!(stream.process_chunk(&chunk).unwrap(), 0);
        }
        assert_eq!(stream.finalize(), 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    #[ignore = "requires the Silero VAD model file"]
    fn chunked_stream_matches_batch_on_silence() {
        use crate::config::VadConfig;

        let mut batch = VadDetector::new(VadConfig::default(), model_path()).unwrap();
        let buffer = vec![0.0f32; 32000];
        let batch_segments = batch.process_audio(&buffer).unwrap();

        let detector = Arc::new(Mutex::new(
            VadDetector::new(VadConfig::default(), model_path()).unwrap(),
        ));
        let dir = tempfile::tempdir().unwrap();
        let mut stream = VadStream::new(detector, dir.path(), None).unwrap();
        for chunk in buffer.chunks(777) {
            stream.process_chunk(chunk).unwrap();
        }
        let written = stream.finalize();

        assert!((written as i64 - batch_segments.len() as i64).abs() <= 1);
    }

    #[test]
    #[ignore = "requires the Silero VAD model file"]
    fn resampled_entry_point_accepts_other_rates() {
        use crate::config::VadConfig;

        let detector = Arc::new(Mutex::new(
            VadDetector::new(VadConfig::default(), model_path()).unwrap(),
        ));
        let dir = tempfile::tempdir().unwrap();
        let mut stream = VadStream::new(detector, dir.path(), Some(8000)).unwrap();

        let chunk = vec![0.0f32; 4410];
        assert_eq!(stream.process_chunk_resampled(&chunk, 44100).unwrap(), 0);
        assert_eq!(stream.finalize(), 0);
    }
}
