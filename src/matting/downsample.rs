//! Downsample ratio selection.
//!
//! | Resolution    | Portrait | Full-Body |
//! | ------------- | -------- | --------- |
//! | <= 512x512    | 1        | 1         |
//! | 1280x720      | 0.375    | 0.6       |
//! | 1920x1080     | 0.25     | 0.4       |
//! | 3840x2160     | 0.125    | 0.2       |
//!
//! The full-body column is used. The model downsamples five times: the ratio
//! resize first, then four stride-2 stages. None of them may see an odd
//! dimension, so `floor(dim * ratio)` has to be a multiple of 16.

use crate::config::DownsampleMode;

/// Number of stride-2 stages after the ratio resize.
pub const STRIDED_STAGES: u32 = 4;

const BANDS: [(u64, f32); 4] = [
    (512 * 512, 1.0),
    (1280 * 720, 0.6),
    (1920 * 1080, 0.4),
    (3840 * 2160, 0.2),
];

const FALLBACK_RATIO: f32 = 0.1;

/// Banded ratio for a frame of `width` x `height`.
pub fn ratio(width: u32, height: u32) -> f32 {
    let pixels = width as u64 * height as u64;
    BANDS
        .iter()
        .find(|(limit, _)| pixels <= *limit)
        .map(|(_, ratio)| *ratio)
        .unwrap_or(FALLBACK_RATIO)
}

/// Size the model resizes `dim` to before its strided stages.
pub fn scaled_dimension(dim: u32, ratio: f32) -> u32 {
    (dim as f64 * ratio as f64).floor() as u32
}

/// True when every stage sees even dimensions for this frame and ratio.
pub fn stages_stay_even(width: u32, height: u32, ratio: f32) -> bool {
    let multiple = 1 << STRIDED_STAGES;
    [width, height].iter().all(|&dim| {
        let scaled = scaled_dimension(dim, ratio);
        scaled > 0 && scaled % multiple == 0
    })
}

#[derive(Debug, Clone, PartialEq)]
pub enum DownsamplePolicy {
    Banded,
    Fixed(f32),
}

impl From<DownsampleMode> for DownsamplePolicy {
    fn from(mode: DownsampleMode) -> Self {
        match mode {
            DownsampleMode::Auto => Self::Banded,
            DownsampleMode::Fixed(ratio) => Self::Fixed(ratio),
        }
    }
}

impl DownsamplePolicy {
    /// Ratio to feed the model for this frame.
    ///
    /// A fixed ratio that would produce odd intermediate dimensions is
    /// replaced by the banded ratio.
    pub fn ratio(&self, width: u32, height: u32) -> f32 {
        match *self {
            Self::Banded => ratio(width, height),
            Self::Fixed(fixed) if stages_stay_even(width, height, fixed) => fixed,
            Self::Fixed(_) => ratio(width, height),
        }
    }

    /// Whether [`ratio`](Self::ratio) had to fall back for this frame.
    pub fn falls_back(&self, width: u32, height: u32) -> bool {
        match *self {
            Self::Banded => false,
            Self::Fixed(fixed) => !stages_stay_even(width, height, fixed),
        }
    }
}
