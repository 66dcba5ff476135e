//! Streaming RobustVideoMatting.
//!
//! Frames go in through a [`capture::FrameSource`], are pushed through a
//! recurrent matting model behind [`engine::InferenceEngine`], and come out as
//! foreground and alpha buffers handed to an [`output::DisplaySink`]. The whole
//! loop advances by non-blocking ticks driven by the host.

pub mod capture;
pub mod config;
pub mod engine;
pub mod error;
pub mod matting;
pub mod output;
pub mod pipeline;
pub mod resources;

pub use config::{DownsampleMode, MattingConfig, RecurrentMode, Resolution};
pub use error::{EngineError, MattingError, SinkError};
pub use matting::{DriverState, DriverStats, MattingDriver};
pub use pipeline::MattingPipeline;
