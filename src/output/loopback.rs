use super::{composite, copy_into, DisplaySink, FGR_PARAM, PHA_PARAM};
use crate::error::SinkError;
use crate::resources::Texture;
use anyhow::{Context, Result};
use image::{imageops, Rgba, RgbaImage};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use v4l::video::Output;
use v4l::{Device, Format, FourCC};

/// v4l2loopback sink.
///
/// Composites the matted foreground over a solid background into the
/// presentation surface and writes that surface to the device as YUYV.
pub struct V4L2Output {
    file: File,
    width: u32,
    height: u32,
    background: Rgba<u8>,
    show_matte: bool,
    fgr: Option<RgbaImage>,
    pha: Option<RgbaImage>,
}

impl V4L2Output {
    pub fn new<P: AsRef<Path>>(
        device_path: P,
        width: u32,
        height: u32,
        background: Rgba<u8>,
        show_matte: bool,
    ) -> Result<Self> {
        let path = device_path.as_ref();
        tracing::info!(
            "Opening v4l2loopback device at {} ({}x{})",
            path.display(),
            width,
            height
        );

        let device = Device::with_path(path)
            .with_context(|| format!("Failed to open v4l2loopback device at {}", path.display()))?;
        let format = Format::new(width, height, FourCC::new(b"YUYV"));
        let negotiated = Output::set_format(&device, &format)
            .context("Failed to set v4l2loopback output format")?;
        if negotiated.width != width || negotiated.height != height {
            anyhow::bail!(
                "v4l2loopback device negotiated {}x{}, expected {}x{}",
                negotiated.width,
                negotiated.height,
                width,
                height
            );
        }

        // v4l2loopback accepts raw frame data written to the device file
        let file = File::options()
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open v4l2loopback device at {}", path.display()))?;

        tracing::info!("v4l2loopback device opened successfully");

        Ok(Self {
            file,
            width,
            height,
            background,
            show_matte,
            fgr: None,
            pha: None,
        })
    }

    fn write_frame(&mut self, frame: &RgbaImage) -> Result<(), SinkError> {
        let frame = if frame.dimensions() != (self.width, self.height) {
            imageops::resize(
                frame,
                self.width,
                self.height,
                imageops::FilterType::Triangle,
            )
        } else {
            frame.clone()
        };

        self.file.write_all(&rgba_to_yuyv(&frame))?;
        Ok(())
    }
}

impl DisplaySink for V4L2Output {
    fn set_texture(&mut self, name: &str, texture: &Texture) -> Result<(), SinkError> {
        let slot = match name {
            FGR_PARAM => &mut self.fgr,
            PHA_PARAM => &mut self.pha,
            other => return Err(SinkError::MissingParameter(other.to_string())),
        };
        copy_into(slot, texture.image());
        Ok(())
    }

    fn render(&mut self, target: &mut Texture) -> Result<(), SinkError> {
        let (Some(fgr), Some(pha)) = (self.fgr.as_ref(), self.pha.as_ref()) else {
            return Ok(());
        };

        let (width, height) = target.dimensions();
        *target.image_mut() = if self.show_matte {
            imageops::resize(pha, width, height, imageops::FilterType::Triangle)
        } else {
            composite(fgr, pha, self.background, width, height)
        };

        self.write_frame(target.image())
    }
}

/// Convert an RGBA frame to YUV422 (YUYV), ignoring alpha.
fn rgba_to_yuyv(image: &RgbaImage) -> Vec<u8> {
    let (width, height) = image.dimensions();
    let mut yuyv = Vec::with_capacity((width * height * 2) as usize);

    for y in 0..height {
        for x in (0..width).step_by(2) {
            let pixel1 = image.get_pixel(x, y);
            let pixel2 = if x + 1 < width {
                image.get_pixel(x + 1, y)
            } else {
                pixel1
            };

            let (y1, u1, v1) = rgb_to_yuv(pixel1[0], pixel1[1], pixel1[2]);
            let (y2, u2, v2) = rgb_to_yuv(pixel2[0], pixel2[1], pixel2[2]);

            // Chroma is shared by the pixel pair
            let u = ((u1 as u16 + u2 as u16) / 2) as u8;
            let v = ((v1 as u16 + v2 as u16) / 2) as u8;

            yuyv.extend_from_slice(&[y1, u, y2, v]);
        }
    }

    yuyv
}

fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let r = r as f32;
    let g = g as f32;
    let b = b as f32;

    let y = (0.299 * r + 0.587 * g + 0.114 * b).clamp(0.0, 255.0) as u8;
    let u = ((-0.147 * r - 0.289 * g + 0.436 * b) + 128.0).clamp(0.0, 255.0) as u8;
    let v = ((0.615 * r - 0.515 * g - 0.100 * b) + 128.0).clamp(0.0, 255.0) as u8;

    (y, u, v)
}
