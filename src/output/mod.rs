#[cfg(feature = "webcam")]
mod loopback;
mod material;
mod presenter;

#[cfg(feature = "webcam")]
pub use loopback::V4L2Output;
pub use material::MaterialSink;
pub use presenter::ResultPresenter;

use image::{imageops, Rgba, RgbaImage};

use crate::error::SinkError;
use crate::resources::Texture;

/// Texture parameter receiving the foreground color buffer.
pub const FGR_PARAM: &str = "_FgrTex";
/// Texture parameter receiving the alpha buffer.
pub const PHA_PARAM: &str = "_PhaTex";

/// Trait for output destinations
pub trait DisplaySink {
    /// Bind a result buffer to one of the sink's named texture parameters.
    fn set_texture(&mut self, name: &str, texture: &Texture) -> Result<(), SinkError>;

    /// Draw the bound textures into the presentation surface.
    fn render(&mut self, target: &mut Texture) -> Result<(), SinkError> {
        let _ = target;
        Ok(())
    }
}

/// Copy `source` into `slot`, reusing its allocation when the size matches.
pub(crate) fn copy_into(slot: &mut Option<RgbaImage>, source: &RgbaImage) {
    match slot {
        Some(image) if image.dimensions() == source.dimensions() => {
            image.copy_from_slice(source.as_raw());
        }
        _ => *slot = Some(source.clone()),
    }
}

/// Composite `fgr` over a solid `background` using the red channel of `pha`
/// as coverage, at `width` x `height`.
pub fn composite(
    fgr: &RgbaImage,
    pha: &RgbaImage,
    background: Rgba<u8>,
    width: u32,
    height: u32,
) -> RgbaImage {
    let fit = |image: &RgbaImage| {
        if image.dimensions() == (width, height) {
            image.clone()
        } else {
            imageops::resize(image, width, height, imageops::FilterType::Triangle)
        }
    };
    let fgr = fit(fgr);
    let pha = fit(pha);

    RgbaImage::from_fn(width, height, |x, y| {
        let f = fgr.get_pixel(x, y);
        let alpha = pha.get_pixel(x, y)[0] as f32 / 255.0;
        let mix = |c: usize| {
            (f[c] as f32 * alpha + background[c] as f32 * (1.0 - alpha))
                .round()
                .clamp(0.0, 255.0) as u8
        };
        Rgba([mix(0), mix(1), mix(2), 255])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opaque_alpha_keeps_foreground() {
        let fgr = RgbaImage::from_pixel(2, 2, Rgba([10, 200, 30, 255]));
        let pha = RgbaImage::from_pixel(2, 2, Rgba([255, 255, 255, 255]));
        let out = composite(&fgr, &pha, Rgba([0, 255, 0, 255]), 2, 2);
        assert!(out.pixels().all(|p| p.0 == [10, 200, 30, 255]));
    }

    #[test]
    fn transparent_alpha_shows_background() {
        let fgr = RgbaImage::from_pixel(2, 2, Rgba([10, 200, 30, 255]));
        let pha = RgbaImage::new(2, 2);
        let out = composite(&fgr, &pha, Rgba([0, 255, 0, 255]), 4, 4);
        assert_eq!(out.dimensions(), (4, 4));
        assert!(out.pixels().all(|p| p.0 == [0, 255, 0, 255]));
    }

    #[test]
    fn copy_reuses_a_same_sized_buffer() {
        let mut slot = None;
        copy_into(&mut slot, &RgbaImage::from_pixel(2, 2, Rgba([1, 2, 3, 4])));
        let buffer = slot.as_ref().unwrap().as_raw().as_ptr();

        copy_into(&mut slot, &RgbaImage::from_pixel(2, 2, Rgba([5, 6, 7, 8])));
        assert_eq!(slot.as_ref().unwrap().as_raw().as_ptr(), buffer);
        assert!(slot.as_ref().unwrap().pixels().all(|p| p.0 == [5, 6, 7, 8]));

        copy_into(&mut slot, &RgbaImage::new(3, 1));
        assert_eq!(slot.as_ref().unwrap().dimensions(), (3, 1));
    }

    #[test]
    fn half_alpha_blends() {
        let fgr = RgbaImage::from_pixel(1, 1, Rgba([200, 0, 0, 255]));
        let pha = RgbaImage::from_pixel(1, 1, Rgba([128, 128, 128, 128]));
        let out = composite(&fgr, &pha, Rgba([0, 0, 0, 255]), 1, 1);
        assert_eq!(out.get_pixel(0, 0).0, [100, 0, 0, 255]);
    }
}
