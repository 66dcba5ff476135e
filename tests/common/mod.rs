#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use image::{Rgba, RgbaImage};
use ndarray::{ArrayD, ArrayViewD, IxDyn};
use vidmatte::engine::{InferenceEngine, OutputRef, ReadbackFuture};
use vidmatte::EngineError;

/// Alpha value the fake model reports for every pixel.
pub const FAKE_ALPHA: f32 = 0.75;

/// Everything the fake engine observed, shared with the test body.
#[derive(Debug, Default)]
pub struct FakeLog {
    pub staged: HashMap<String, ArrayD<f32>>,
    pub submissions: u64,
    pub ratios: Vec<f32>,
    pub src_shapes: Vec<Vec<usize>>,
    /// r1i..r4i as seen by each submission.
    pub recurrent_inputs: Vec<Vec<ArrayD<f32>>>,
    pub outputs_live: bool,
    pub single_in_flight_violations: u64,
    pub releases: u64,
    pub shutdowns: u64,
    /// Polls each readback returns `Pending` before completing.
    pub readback_latency: usize,
    /// Remaining `schedule` calls that fail.
    pub fail_schedules: u32,
    /// Remaining readbacks that resolve to an error.
    pub fail_readbacks: u32,
    current: Option<HashMap<String, ArrayD<f32>>>,
    run: u64,
}

/// Scripted stand-in for a recurrent matting model.
///
/// `fgr` echoes `src`, `pha` is [`FAKE_ALPHA`] everywhere, and `rNo` is filled
/// with the submission number so carried state can be traced.
#[derive(Clone, Default)]
pub struct FakeEngine {
    log: Arc<Mutex<FakeLog>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(polls: usize) -> Self {
        let engine = Self::new();
        engine.log().readback_latency = polls;
        engine
    }

    pub fn log(&self) -> std::sync::MutexGuard<'_, FakeLog> {
        self.log.lock().unwrap()
    }
}

impl InferenceEngine for FakeEngine {
    fn set_input(&mut self, name: &str, tensor: ArrayViewD<'_, f32>) -> Result<(), EngineError> {
        self.log().staged.insert(name.to_string(), tensor.to_owned());
        Ok(())
    }

    fn schedule(&mut self) -> Result<(), EngineError> {
        let mut log = self.log();
        if log.outputs_live {
            log.single_in_flight_violations += 1;
        }
        if log.fail_schedules > 0 {
            log.fail_schedules -= 1;
            return Err(EngineError::Execution("scripted failure".to_string()));
        }

        let src = log
            .staged
            .get("src")
            .cloned()
            .ok_or_else(|| EngineError::MissingOutput("src".to_string()))?;
        let ratio = log.staged.get("downsample_ratio").map(|r| r[[0]]).unwrap_or(-1.0);
        let recurrent: Vec<ArrayD<f32>> = ["r1i", "r2i", "r3i", "r4i"]
            .iter()
            .filter_map(|name| log.staged.get(*name).cloned())
            .collect();

        log.submissions += 1;
        log.run += 1;
        let marker = log.submissions as f32;
        let shape = src.shape().to_vec();

        let mut outputs = HashMap::new();
        outputs.insert(
            "pha".to_string(),
            ArrayD::from_elem(IxDyn(&[1, 1, shape[2], shape[3]]), FAKE_ALPHA),
        );
        outputs.insert("fgr".to_string(), src);
        for name in ["r1o", "r2o", "r3o", "r4o"] {
            outputs.insert(name.to_string(), ArrayD::from_elem(IxDyn(&[1, 2, 2, 2]), marker));
        }

        log.ratios.push(ratio);
        log.src_shapes.push(shape);
        log.recurrent_inputs.push(recurrent);
        log.current = Some(outputs);
        log.outputs_live = true;
        Ok(())
    }

    fn peek_output(&mut self, name: &str) -> Result<OutputRef, EngineError> {
        let log = self.log();
        match log.current.as_ref() {
            Some(outputs) if outputs.contains_key(name) => Ok(OutputRef::new(name, log.run)),
            Some(_) => Err(EngineError::MissingOutput(name.to_string())),
            None => Err(EngineError::Execution("no run scheduled".to_string())),
        }
    }

    fn readback_async(&mut self, output: &OutputRef) -> Result<ReadbackFuture, EngineError> {
        let mut log = self.log();
        let result = if log.fail_readbacks > 0 {
            log.fail_readbacks -= 1;
            Err(EngineError::Execution("scripted readback failure".to_string()))
        } else {
            log.current
                .as_ref()
                .and_then(|outputs| outputs.get(output.name()).cloned())
                .ok_or_else(|| EngineError::MissingOutput(output.name().to_string()))
        };
        Ok(Box::pin(DelayedReadback {
            remaining: log.readback_latency,
            result: Some(result),
        }))
    }

    fn release_outputs(&mut self) {
        let mut log = self.log();
        if log.outputs_live {
            log.releases += 1;
        }
        log.outputs_live = false;
        log.current = None;
    }

    fn shutdown(&mut self) {
        self.log().shutdowns += 1;
    }
}

struct DelayedReadback {
    remaining: usize,
    result: Option<Result<ArrayD<f32>, EngineError>>,
}

impl Future for DelayedReadback {
    type Output = Result<ArrayD<f32>, EngineError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.remaining > 0 {
            self.remaining -= 1;
            cx.waker().wake_by_ref();
            return Poll::Pending;
        }
        Poll::Ready(self.result.take().unwrap_or(Err(EngineError::ReadbackCanceled)))
    }
}

pub fn solid_frame(width: u32, height: u32, color: [u8; 4]) -> RgbaImage {
    RgbaImage::from_pixel(width, height, Rgba(color))
}
