use image::{imageops, Rgba, RgbaImage};
use ndarray::{Array4, ArrayD};

use crate::error::{MattingError, Result};

/// Write an RGBA frame into an existing (1, 3, H, W) tensor.
///
/// Values are normalized to [0, 1] and alpha is dropped. The tensor must
/// already match the frame's dimensions.
pub fn frame_to_tensor(frame: &RgbaImage, tensor: &mut Array4<f32>) -> Result<()> {
    let _span = tracing::debug_span!("preprocess").entered();

    let (width, height) = frame.dimensions();
    let expected = [1, 3, height as usize, width as usize];
    if tensor.shape() != expected {
        return Err(MattingError::shape(format!("{:?}", expected), tensor.shape()));
    }

    for (x, y, pixel) in frame.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        tensor[[0, 0, y, x]] = pixel[0] as f32 / 255.0;
        tensor[[0, 1, y, x]] = pixel[1] as f32 / 255.0;
        tensor[[0, 2, y, x]] = pixel[2] as f32 / 255.0;
    }

    Ok(())
}

fn to_u8(value: f32) -> u8 {
    (value * 255.0).round().clamp(0.0, 255.0) as u8
}

/// Check that `tensor` is a (1, `channels`, H, W) output.
pub fn check_output(tensor: &ArrayD<f32>, channels: usize) -> Result<()> {
    let shape = tensor.shape();
    if shape.len() != 4 || shape[0] != 1 || shape[1] != channels {
        return Err(MattingError::shape(format!("[1, {}, H, W]", channels), shape));
    }
    Ok(())
}

/// Render a (1, C, H, W) output tensor into `target`.
///
/// Three channels are written as RGB with opaque alpha; a single channel is
/// replicated into every component. Outputs whose spatial size differs from
/// the target are resized.
pub fn tensor_to_image(tensor: &ArrayD<f32>, target: &mut RgbaImage) -> Result<()> {
    let _span = tracing::debug_span!("postprocess").entered();

    let shape = tensor.shape();
    if shape.len() != 4 || shape[0] != 1 || !(shape[1] == 1 || shape[1] == 3) {
        return Err(MattingError::shape("[1, 1|3, H, W]", shape));
    }
    let (channels, height, width) = (shape[1], shape[2], shape[3]);

    let rendered = RgbaImage::from_fn(width as u32, height as u32, |x, y| {
        let (x, y) = (x as usize, y as usize);
        if channels == 3 {
            Rgba([
                to_u8(tensor[[0, 0, y, x]]),
                to_u8(tensor[[0, 1, y, x]]),
                to_u8(tensor[[0, 2, y, x]]),
                255,
            ])
        } else {
            let value = to_u8(tensor[[0, 0, y, x]]);
            Rgba([value, value, value, value])
        }
    });

    // If dimensions match, no resize needed
    if rendered.dimensions() == target.dimensions() {
        *target = rendered;
    } else {
        *target = imageops::resize(
            &rendered,
            target.width(),
            target.height(),
            imageops::FilterType::Lanczos3,
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    #[test]
    fn frame_is_written_channel_major() {
        let mut frame = RgbaImage::new(2, 1);
        frame.put_pixel(0, 0, Rgba([255, 0, 51, 7]));
        frame.put_pixel(1, 0, Rgba([0, 255, 0, 255]));
        let mut tensor = Array4::zeros((1, 3, 1, 2));

        frame_to_tensor(&frame, &mut tensor).unwrap();

        assert_eq!(tensor[[0, 0, 0, 0]], 1.0);
        assert_eq!(tensor[[0, 1, 0, 0]], 0.0);
        assert!((tensor[[0, 2, 0, 0]] - 0.2).abs() < 1e-6);
        assert_eq!(tensor[[0, 1, 0, 1]], 1.0);
    }

    #[test]
    fn mismatched_tensor_is_rejected() {
        let frame = RgbaImage::new(4, 4);
        let mut tensor = Array4::zeros((1, 3, 2, 2));
        let err = frame_to_tensor(&frame, &mut tensor).unwrap_err();
        assert!(matches!(err, MattingError::Shape { .. }));
    }

    #[test]
    fn alpha_channel_fills_every_component() {
        let tensor = ArrayD::from_elem(IxDyn(&[1, 1, 2, 2]), 0.5f32);
        let mut target = RgbaImage::new(2, 2);

        tensor_to_image(&tensor, &mut target).unwrap();

        assert!(target.pixels().all(|p| p.0 == [128, 128, 128, 128]));
    }

    #[test]
    fn out_of_range_values_clamp() {
        let mut tensor = ArrayD::zeros(IxDyn(&[1, 3, 1, 1]));
        tensor[[0, 0, 0, 0]] = 1.7;
        tensor[[0, 1, 0, 0]] = -0.3;
        tensor[[0, 2, 0, 0]] = 0.0;
        let mut target = RgbaImage::new(1, 1);

        tensor_to_image(&tensor, &mut target).unwrap();

        assert_eq!(target.get_pixel(0, 0).0, [255, 0, 0, 255]);
    }

    #[test]
    fn smaller_output_is_resized_to_target() {
        let tensor = ArrayD::from_elem(IxDyn(&[1, 3, 4, 4]), 1.0f32);
        let mut target = RgbaImage::new(8, 6);

        tensor_to_image(&tensor, &mut target).unwrap();

        assert_eq!(target.dimensions(), (8, 6));
    }

    #[test]
    fn output_check_pins_the_channel_count() {
        let fgr = ArrayD::zeros(IxDyn(&[1, 3, 4, 4]));
        assert!(check_output(&fgr, 3).is_ok());
        assert!(check_output(&fgr, 1).is_err());
        assert!(check_output(&ArrayD::zeros(IxDyn(&[3, 4, 4])), 3).is_err());
    }

    #[test]
    fn unexpected_channel_count_is_rejected() {
        let tensor = ArrayD::zeros(IxDyn(&[1, 2, 4, 4]));
        let mut target = RgbaImage::new(4, 4);
        assert!(tensor_to_image(&tensor, &mut target).is_err());
    }
}
