use ndarray::{Array1, Array4, ArrayD, IxDyn};

/// Model input carrying the frame, NCHW.
pub const INPUT_SRC: &str = "src";
/// Model input carrying the downsample ratio, shape (1).
pub const INPUT_DOWNSAMPLE_RATIO: &str = "downsample_ratio";
/// Recurrent state inputs, coarsest last.
pub const RECURRENT_INPUTS: [&str; 4] = ["r1i", "r2i", "r3i", "r4i"];
/// Recurrent state outputs, paired index-wise with [`RECURRENT_INPUTS`].
pub const RECURRENT_OUTPUTS: [&str; 4] = ["r1o", "r2o", "r3o", "r4o"];
/// Foreground color output, (1, 3, H, W).
pub const OUTPUT_FGR: &str = "fgr";
/// Alpha output, (1, 1, H, W).
pub const OUTPUT_PHA: &str = "pha";

fn zero_state() -> ArrayD<f32> {
    ArrayD::zeros(IxDyn(&[1, 1, 1, 1]))
}

/// Tensors the driver owns across steps.
#[derive(Debug)]
pub struct PipelineState {
    pub input: Array4<f32>,
    pub recurrent: [ArrayD<f32>; 4],
    pub downsample_ratio: Array1<f32>,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            input: Array4::zeros((1, 3, 1, 1)),
            recurrent: std::array::from_fn(|_| zero_state()),
            downsample_ratio: Array1::from_elem(1, 1.0),
        }
    }
}

impl PipelineState {
    /// Reallocate the input tensor when it does not match the frame.
    ///
    /// Returns true when a reallocation happened.
    pub fn ensure_input_shape(&mut self, width: u32, height: u32) -> bool {
        let shape = [1, 3, height as usize, width as usize];
        if self.input.shape() == shape {
            return false;
        }
        tracing::debug!(
            "Reallocating input tensor {:?} -> {:?}",
            self.input.shape(),
            shape
        );
        self.input = Array4::zeros((1, 3, height as usize, width as usize));
        true
    }

    /// Reset recurrent state to zero scalars.
    pub fn reset_recurrent(&mut self) {
        self.recurrent = std::array::from_fn(|_| zero_state());
    }

    pub fn recurrent_is_zero(&self) -> bool {
        self.recurrent
            .iter()
            .all(|r| r.shape() == [1, 1, 1, 1] && r.iter().all(|&v| v == 0.0))
    }
}
