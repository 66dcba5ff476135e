//! Runtime configuration for the matting pipeline.

use serde::{Deserialize, Serialize};

use crate::error::{MattingError, Result};

/// Width and height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl From<(u32, u32)> for Resolution {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// How recurrent hidden state (r1..r4) moves between steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrentMode {
    /// Each step's `r1o..r4o` outputs become the next step's `r1i..r4i`.
    #[default]
    Carry,
    /// Zero scalars are fed on every step; the model runs without temporal memory.
    Stateless,
}

/// Source of the per-step downsample ratio.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownsampleMode {
    /// Banded by pixel count.
    #[default]
    Auto,
    /// Constant ratio in (0, 1].
    Fixed(f32),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MattingConfig {
    /// Size of the presentation output surface. Independent of the frame size.
    pub output_resolution: Resolution,
    pub recurrent_mode: RecurrentMode,
    pub downsample: DownsampleMode,
    /// Upper bound on ticks skipped after consecutive engine failures.
    pub max_backoff_ticks: u32,
}

impl Default for MattingConfig {
    fn default() -> Self {
        Self {
            output_resolution: Resolution::new(1920, 1080),
            recurrent_mode: RecurrentMode::Carry,
            downsample: DownsampleMode::Auto,
            max_backoff_ticks: 32,
        }
    }
}

impl MattingConfig {
    /// Parse and validate a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| MattingError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.output_resolution.width == 0 || self.output_resolution.height == 0 {
            return Err(MattingError::Config(format!(
                "output resolution must be non-zero, got {}",
                self.output_resolution
            )));
        }
        if let DownsampleMode::Fixed(ratio) = self.downsample {
            if !(ratio > 0.0 && ratio <= 1.0) {
                return Err(MattingError::Config(format!(
                    "fixed downsample ratio must be in (0, 1], got {}",
                    ratio
                )));
            }
        }
        if self.max_backoff_ticks == 0 {
            return Err(MattingError::Config(
                "max_backoff_ticks must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
