//! The matting component: frame source, driver and presenter in one loop.

use crate::capture::FrameSource;
use crate::config::{MattingConfig, Resolution};
use crate::engine::InferenceEngine;
use crate::matting::{DriverState, MattingDriver};
use crate::output::{DisplaySink, ResultPresenter};
use crate::resources::Texture;

pub struct MattingPipeline<E: InferenceEngine> {
    driver: MattingDriver<E>,
    presenter: ResultPresenter,
    source: Option<Box<dyn FrameSource>>,
    config: MattingConfig,
}

impl<E: InferenceEngine> MattingPipeline<E> {
    pub fn new(engine: E, config: MattingConfig, sink: Option<Box<dyn DisplaySink>>) -> Self {
        tracing::info!(
            "Matting pipeline created, output surface {}",
            config.output_resolution
        );
        Self {
            driver: MattingDriver::new(engine, &config),
            presenter: ResultPresenter::new(sink),
            source: None,
            config,
        }
    }

    pub fn set_source(&mut self, source: Box<dyn FrameSource>) {
        self.source = Some(source);
    }

    pub fn clear_source(&mut self) {
        self.source = None;
    }

    pub fn set_sink(&mut self, sink: Option<Box<dyn DisplaySink>>) {
        self.presenter.set_sink(sink);
    }

    pub fn set_output_resolution(&mut self, resolution: Resolution) {
        self.config.output_resolution = resolution;
    }

    pub fn config(&self) -> &MattingConfig {
        &self.config
    }

    /// Per-frame host update: keep the output surface sized and bound.
    pub fn update(&mut self) {
        if self.driver.state() == DriverState::ShutDown {
            return;
        }
        self.presenter
            .update_output_surface(self.config.output_resolution);
    }

    /// Advance inference by one tick. The source is only asked for a frame
    /// when a new step starts.
    pub fn tick(&mut self) -> DriverState {
        let source = self
            .source
            .as_deref_mut()
            .map(|source| source as &mut dyn FrameSource);
        self.driver.tick_source(source, &mut self.presenter)
    }

    /// `update` followed by `tick`, the usual once-per-render-frame call.
    pub fn frame(&mut self) -> DriverState {
        self.update();
        self.tick()
    }

    pub fn output_surface(&self) -> Option<&Texture> {
        self.presenter.output_surface()
    }

    pub fn driver(&self) -> &MattingDriver<E> {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut MattingDriver<E> {
        &mut self.driver
    }

    pub fn presenter(&self) -> &ResultPresenter {
        &self.presenter
    }

    /// Release the engine, tensors and textures. Safe to call more than once.
    pub fn shutdown(&mut self) {
        self.driver.shutdown();
        self.presenter.shutdown();
    }
}

impl<E: InferenceEngine> Drop for MattingPipeline<E> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
