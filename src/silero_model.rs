use std::path::Path;

use ndarray::{Array1, Array2, ArrayD};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::{Session, SessionInputs};
use ort::value::Tensor;
use tracing::debug;

use crate::config::CONTEXT_SAMPLES;
use crate::error::VadError;

const STATE_SHAPE: [usize; 3] = [2, 1, 128];
const MODEL_INPUTS: [&str; 3] = ["input", "state", "sr"];
const MODEL_OUTPUTS: [&str; 2] = ["output", "stateN"];

/// The Silero VAD v5 ONNX session together with the recurrent state and the
/// 64-sample acoustic context carried between frames.
///
/// Each forward pass sees `context ++ window` (576 samples at 16 kHz, 320 at
/// 8 kHz) and yields a speech probability plus the next recurrent state. Not
/// thread-safe; callers must serialize.
#[derive(Debug)]
pub struct SileroModel {
    session: Session,
    sample_rate: Array1<i64>,
    state: ArrayD<f32>,
    context: Vec<f32>,
    input_buffer: Array2<f32>,
    window: usize,
}

impl SileroModel {
    pub fn new(
        model_path: impl AsRef<Path>,
        sample_rate: u32,
        window: usize,
    ) -> Result<Self, VadError> {
        let path = model_path.as_ref();

        let session = Session::builder()
            .and_then(|builder| builder.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|builder| builder.with_intra_threads(1))
            .and_then(|builder| builder.with_inter_threads(1))
            .and_then(|builder| builder.commit_from_file(path))
            .map_err(|e| VadError::ModelLoad {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        for name in MODEL_INPUTS {
            if !session.inputs.iter().any(|input| input.name == name) {
                return Err(VadError::ModelLoad {
                    path: path.to_path_buf(),
                    reason: format!("graph is missing input '{name}'"),
                });
            }
        }
        for name in MODEL_OUTPUTS {
            if !session.outputs.iter().any(|output| output.name == name) {
                return Err(VadError::ModelLoad {
                    path: path.to_path_buf(),
                    reason: format!("graph is missing output '{name}'"),
                });
            }
        }

        debug!(path = %path.display(), sample_rate, window, "Silero VAD model loaded");

        Ok(Self {
            session,
            sample_rate: Array1::from_vec(vec![i64::from(sample_rate)]),
            state: ArrayD::<f32>::zeros(STATE_SHAPE.as_slice()),
            context: vec![0.0; CONTEXT_SAMPLES],
            input_buffer: Array2::<f32>::zeros((1, CONTEXT_SAMPLES + window)),
            window,
        })
    }

    /// Run one forward pass over a full window and return the speech
    /// probability. The recurrent state and carried context are updated only
    /// after the pass succeeds.
    pub fn process(&mut self, window: &[f32]) -> Result<f32, VadError> {
        debug_assert_eq!(window.len(), self.window);

        for (i, &sample) in self.context.iter().enumerate() {
            self.input_buffer[[0, i]] = sample;
        }
        for (i, &sample) in window.iter().enumerate() {
            self.input_buffer[[0, CONTEXT_SAMPLES + i]] = sample;
        }

        let input_tensor = Tensor::from_array(self.input_buffer.clone())?;
        let state_tensor = Tensor::from_array(self.state.clone())?;
        let sample_rate_tensor = Tensor::from_array(self.sample_rate.clone())?;

        let inps = ort::inputs![input_tensor, state_tensor, sample_rate_tensor];
        let res = self.session.run(SessionInputs::ValueSlice::<3>(&inps))?;

        let new_state = res["stateN"].try_extract_array::<f32>()?.to_owned();
        let (_, output) = res["output"].try_extract_tensor::<f32>()?;
        let probability = output.first().copied().unwrap_or(0.0);

        self.state = new_state;
        // the tail of this input becomes the context for the next frame
        self.context.copy_from_slice(&window[self.window - CONTEXT_SAMPLES..]);

        Ok(probability)
    }

    /// Zero the recurrent state and carried context.
    pub fn reset(&mut self) {
        self.state = ArrayD::<f32>::zeros(STATE_SHAPE.as_slice());
        self.context.fill(0.0);
    }
}
