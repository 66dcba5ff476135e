use ndarray::ArrayD;

use super::{DisplaySink, FGR_PARAM, PHA_PARAM};
use crate::config::Resolution;
use crate::error::Result;
use crate::matting::preprocess;
use crate::resources::{Texture, TextureAllocator, TextureId};

/// Owns the result buffers and the presentation output surface, and forwards
/// results to the display sink.
///
/// Result buffers always track the frame size. The output surface tracks the
/// configured presentation resolution and nothing else.
pub struct ResultPresenter {
    allocator: TextureAllocator,
    foreground: Option<Texture>,
    alpha: Option<Texture>,
    output_surface: Option<Texture>,
    bound_target: Option<TextureId>,
    previous_resolution: Option<Resolution>,
    sink: Option<Box<dyn DisplaySink>>,
    result_updates: u64,
    missing_sink_warned: bool,
}

impl Default for ResultPresenter {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ResultPresenter {
    pub fn new(sink: Option<Box<dyn DisplaySink>>) -> Self {
        Self {
            allocator: TextureAllocator::new(),
            foreground: None,
            alpha: None,
            output_surface: None,
            bound_target: None,
            previous_resolution: None,
            sink,
            result_updates: 0,
            missing_sink_warned: false,
        }
    }

    pub fn set_sink(&mut self, sink: Option<Box<dyn DisplaySink>>) {
        self.sink = sink;
        self.missing_sink_warned = false;
    }

    /// Keep the output surface at `resolution` and make sure it is bound.
    ///
    /// Reallocates only when the resolution differs from the previous call.
    pub fn update_output_surface(&mut self, resolution: Resolution) {
        let changed = self.previous_resolution != Some(resolution);
        let surface = self.allocator.get_or_create(
            &mut self.output_surface,
            resolution.width,
            resolution.height,
            "ResultRT",
            changed,
        );
        let surface_id = surface.id();

        // A recreated surface invalidates the old binding.
        if self.bound_target != Some(surface_id) {
            tracing::debug!("Binding output surface {} ({})", surface.label(), resolution);
            self.bound_target = Some(surface_id);
        }
        self.previous_resolution = Some(resolution);
    }

    /// Size the result buffers to the current frame.
    pub fn prepare_results(&mut self, width: u32, height: u32) {
        self.allocator
            .get_or_create(&mut self.foreground, width, height, "ForegroundRT", false);
        self.allocator
            .get_or_create(&mut self.alpha, width, height, "AlphaRT", false);
    }

    /// Convert the read-back output tensors into the result buffers.
    ///
    /// Both tensors are checked first, so a bad step leaves both buffers as
    /// they were.
    pub fn write_results(&mut self, fgr: &ArrayD<f32>, pha: &ArrayD<f32>) -> Result<()> {
        preprocess::check_output(fgr, 3)?;
        preprocess::check_output(pha, 1)?;

        let (Some(foreground), Some(alpha)) = (self.foreground.as_mut(), self.alpha.as_mut())
        else {
            return Err(crate::error::MattingError::shape(
                "prepared result buffers",
                "none",
            ));
        };
        preprocess::tensor_to_image(fgr, foreground.image_mut())?;
        preprocess::tensor_to_image(pha, alpha.image_mut())?;
        self.result_updates += 1;
        Ok(())
    }

    /// Hand both result buffers to the sink and render into the output surface.
    ///
    /// Failures are logged; the pipeline carries on with the next frame.
    pub fn publish(&mut self) {
        let (Some(foreground), Some(alpha)) = (self.foreground.as_ref(), self.alpha.as_ref())
        else {
            return;
        };
        let Some(sink) = self.sink.as_mut() else {
            if !self.missing_sink_warned {
                tracing::warn!("No display sink attached; results are not being shown");
                self.missing_sink_warned = true;
            }
            return;
        };

        let bound = sink
            .set_texture(FGR_PARAM, foreground)
            .and_then(|_| sink.set_texture(PHA_PARAM, alpha));
        if let Err(e) = bound {
            tracing::error!(
                "NOTE: Please make sure the sink uses a material with {} and {}. Error: {}",
                FGR_PARAM,
                PHA_PARAM,
                e
            );
            return;
        }

        if let Some(surface) = self.output_surface.as_mut() {
            if self.bound_target == Some(surface.id()) {
                if let Err(e) = sink.render(surface) {
                    tracing::warn!("Failed to render into output surface: {}", e);
                }
            }
        }
    }

    pub fn foreground(&self) -> Option<&Texture> {
        self.foreground.as_ref()
    }

    pub fn alpha(&self) -> Option<&Texture> {
        self.alpha.as_ref()
    }

    pub fn output_surface(&self) -> Option<&Texture> {
        self.output_surface.as_ref()
    }

    pub fn bound_target(&self) -> Option<TextureId> {
        self.bound_target
    }

    /// Number of times the result buffers received a converted step.
    pub fn result_updates(&self) -> u64 {
        self.result_updates
    }

    pub fn allocator(&self) -> &TextureAllocator {
        &self.allocator
    }

    /// Release every owned texture. Safe to call more than once.
    pub fn shutdown(&mut self) {
        self.allocator.release_slot(&mut self.foreground);
        self.allocator.release_slot(&mut self.alpha);
        self.allocator.release_slot(&mut self.output_surface);
        self.bound_target = None;
        self.previous_resolution = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::MaterialSink;
    use ndarray::IxDyn;

    #[test]
    fn output_surface_is_reallocated_only_on_resolution_change() {
        let mut presenter = ResultPresenter::default();

        presenter.update_output_surface(Resolution::new(1280, 720));
        let first = presenter.bound_target().unwrap();
        presenter.update_output_surface(Resolution::new(1280, 720));
        assert_eq!(presenter.bound_target(), Some(first));
        assert_eq!(presenter.allocator().created(), 1);

        presenter.update_output_surface(Resolution::new(640, 360));
        let second = presenter.bound_target().unwrap();
        assert_ne!(first, second);
        assert_eq!(presenter.output_surface().unwrap().dimensions(), (640, 360));
        assert_eq!(presenter.allocator().released(), 1);
    }

    #[test]
    fn result_buffers_follow_frame_not_output_surface() {
        let mut presenter = ResultPresenter::default();
        presenter.update_output_surface(Resolution::new(1280, 720));

        presenter.prepare_results(320, 240);

        assert_eq!(presenter.foreground().unwrap().dimensions(), (320, 240));
        assert_eq!(presenter.alpha().unwrap().dimensions(), (320, 240));
        assert_eq!(presenter.output_surface().unwrap().dimensions(), (1280, 720));
    }

    #[test]
    fn write_without_prepare_is_an_error() {
        let mut presenter = ResultPresenter::default();
        let fgr = ArrayD::zeros(IxDyn(&[1, 3, 2, 2]));
        let pha = ArrayD::zeros(IxDyn(&[1, 1, 2, 2]));
        assert!(presenter.write_results(&fgr, &pha).is_err());
        assert_eq!(presenter.result_updates(), 0);
    }

    #[test]
    fn malformed_alpha_leaves_both_buffers_untouched() {
        let mut presenter = ResultPresenter::default();
        presenter.prepare_results(2, 2);
        let fgr = ArrayD::from_elem(IxDyn(&[1, 3, 2, 2]), 1.0f32);
        let pha = ArrayD::from_elem(IxDyn(&[1, 1, 2, 2]), 1.0f32);
        presenter.write_results(&fgr, &pha).unwrap();

        let dark = ArrayD::zeros(IxDyn(&[1, 3, 2, 2]));
        let bad_pha = ArrayD::zeros(IxDyn(&[1, 2, 2, 2]));
        assert!(presenter.write_results(&dark, &bad_pha).is_err());

        let foreground = presenter.foreground().unwrap().image();
        assert!(foreground.pixels().all(|p| p.0 == [255, 255, 255, 255]));
        let alpha = presenter.alpha().unwrap().image();
        assert!(alpha.pixels().all(|p| p.0 == [255, 255, 255, 255]));
        assert_eq!(presenter.result_updates(), 1);
    }

    #[test]
    fn publish_renders_composite_into_output_surface() {
        let sink = MaterialSink::default().with_background(image::Rgba([0, 0, 255, 255]));
        let mut presenter = ResultPresenter::new(Some(Box::new(sink)));
        presenter.update_output_surface(Resolution::new(4, 4));
        presenter.prepare_results(2, 2);

        let fgr = ArrayD::from_elem(IxDyn(&[1, 3, 2, 2]), 1.0f32);
        let pha = ArrayD::from_elem(IxDyn(&[1, 1, 2, 2]), 1.0f32);
        presenter.write_results(&fgr, &pha).unwrap();
        presenter.publish();

        let surface = presenter.output_surface().unwrap();
        assert!(surface.image().pixels().all(|p| p.0 == [255, 255, 255, 255]));
    }

    #[test]
    fn shutdown_releases_everything_once() {
        let mut presenter = ResultPresenter::default();
        presenter.update_output_surface(Resolution::new(8, 8));
        presenter.prepare_results(4, 4);

        presenter.shutdown();
        presenter.shutdown();

        assert_eq!(presenter.allocator().live(), 0);
        assert_eq!(presenter.allocator().released(), 3);
        assert!(presenter.bound_target().is_none());
    }
}
