use super::FrameSource;
use anyhow::{Context, Result};
use image::RgbaImage;
use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType, Resolution};
use nokhwa::Camera;

/// Webcam frame source. Each call to `current_frame` captures a new frame.
pub struct WebcamCapture {
    camera: Camera,
    latest: Option<RgbaImage>,
}

impl WebcamCapture {
    pub fn new(device_index: u32, width: u32, height: u32) -> Result<Self> {
        tracing::info!(
            "Initializing webcam {} at {}x{}",
            device_index,
            width,
            height
        );

        let index = CameraIndex::Index(device_index);
        let requested = RequestedFormat::new::<RgbAFormat>(RequestedFormatType::HighestResolution(
            Resolution::new(width, height),
        ));

        let mut camera = Camera::new(index, requested).context("Failed to open camera")?;

        camera
            .open_stream()
            .context("Failed to open camera stream")?;

        let actual = camera.resolution();
        tracing::info!(
            "Webcam initialized at {}x{}",
            actual.width(),
            actual.height()
        );

        Ok(Self {
            camera,
            latest: None,
        })
    }

    fn capture(&mut self) -> Result<RgbaImage> {
        let frame = self.camera.frame().context("Failed to capture frame")?;

        frame
            .decode_image::<RgbAFormat>()
            .context("Failed to decode frame")
    }
}

impl FrameSource for WebcamCapture {
    fn current_frame(&mut self) -> Option<&RgbaImage> {
        match self.capture() {
            Ok(frame) => self.latest = Some(frame),
            Err(e) => {
                // Treated as a missing frame; the driver idles this tick.
                tracing::warn!("{:#}", e);
                self.latest = None;
            }
        }
        self.latest.as_ref()
    }
}
