pub mod downsample;
pub mod preprocess;
mod rvm;
pub mod types;

pub use downsample::DownsamplePolicy;
pub use rvm::{Backoff, DriverState, DriverStats, MattingDriver};
pub use types::PipelineState;
