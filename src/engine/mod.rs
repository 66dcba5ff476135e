//! Inference engine capability interface.
//!
//! The driver only ever talks to an engine through [`InferenceEngine`], which
//! lets it run against ONNX Runtime in production and a scripted fake in tests.

#[cfg(feature = "onnx")]
mod onnx;

#[cfg(feature = "onnx")]
pub use onnx::{OrtEngine, OrtOptions};

use std::future::Future;
use std::pin::Pin;

use ndarray::{ArrayD, ArrayViewD};

use crate::error::EngineError;

/// Host copy of an output tensor, delivered once the engine finishes the run.
pub type ReadbackFuture = Pin<Box<dyn Future<Output = Result<ArrayD<f32>, EngineError>> + Send>>;

/// Reference to a named output of the most recently scheduled run.
///
/// Only valid until the next [`InferenceEngine::schedule`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRef {
    name: String,
    run: u64,
}

impl OutputRef {
    pub fn new(name: impl Into<String>, run: u64) -> Self {
        Self {
            name: name.into(),
            run,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sequence number of the run this output belongs to.
    pub fn run(&self) -> u64 {
        self.run
    }
}

/// Trait for inference backends driving a recurrent matting model
pub trait InferenceEngine {
    /// Stage a named input for the next run. The engine copies the data.
    fn set_input(&mut self, name: &str, tensor: ArrayViewD<'_, f32>) -> Result<(), EngineError>;

    /// Start executing the staged inputs. Must not block on the result.
    fn schedule(&mut self) -> Result<(), EngineError>;

    /// Look up an output of the current run without waiting for it.
    fn peek_output(&mut self, name: &str) -> Result<OutputRef, EngineError>;

    /// Request an asynchronous host copy of `output`.
    fn readback_async(&mut self, output: &OutputRef) -> Result<ReadbackFuture, EngineError>;

    /// Dispose of the current run's outputs. Required before the next `schedule`.
    fn release_outputs(&mut self);

    /// Release the engine. Calling it more than once is a no-op.
    fn shutdown(&mut self);
}

impl<E: InferenceEngine + ?Sized> InferenceEngine for Box<E> {
    fn set_input(&mut self, name: &str, tensor: ArrayViewD<'_, f32>) -> Result<(), EngineError> {
        (**self).set_input(name, tensor)
    }

    fn schedule(&mut self) -> Result<(), EngineError> {
        (**self).schedule()
    }

    fn peek_output(&mut self, name: &str) -> Result<OutputRef, EngineError> {
        (**self).peek_output(name)
    }

    fn readback_async(&mut self, output: &OutputRef) -> Result<ReadbackFuture, EngineError> {
        (**self).readback_async(output)
    }

    fn release_outputs(&mut self) {
        (**self).release_outputs()
    }

    fn shutdown(&mut self) {
        (**self).shutdown()
    }
}
