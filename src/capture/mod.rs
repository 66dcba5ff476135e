#[cfg(feature = "webcam")]
mod v4l_capture;

#[cfg(feature = "webcam")]
pub use v4l_capture::WebcamCapture;

use image::RgbaImage;

/// Trait for frame sources feeding the matting pipeline
pub trait FrameSource {
    /// The frame for this tick, or `None` when nothing is available yet.
    fn current_frame(&mut self) -> Option<&RgbaImage>;
}

/// Frame holder assigned by the host, e.g. from a decoder or render target.
#[derive(Debug, Default)]
pub struct FrameSlot {
    frame: Option<RgbaImage>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_frame(frame: RgbaImage) -> Self {
        Self { frame: Some(frame) }
    }

    pub fn set(&mut self, frame: RgbaImage) {
        self.frame = Some(frame);
    }

    pub fn clear(&mut self) {
        self.frame = None;
    }
}

impl FrameSource for FrameSlot {
    fn current_frame(&mut self) -> Option<&RgbaImage> {
        self.frame.as_ref()
    }
}
