use std::task::{Context, Poll};

use futures::task::noop_waker_ref;
use futures::FutureExt;
use image::RgbaImage;
use ndarray::ArrayD;

use super::downsample::DownsamplePolicy;
use super::preprocess;
use super::types::{
    PipelineState, INPUT_DOWNSAMPLE_RATIO, INPUT_SRC, OUTPUT_FGR, OUTPUT_PHA, RECURRENT_INPUTS,
    RECURRENT_OUTPUTS,
};
use crate::capture::FrameSource;
use crate::config::{MattingConfig, RecurrentMode};
use crate::engine::{InferenceEngine, ReadbackFuture};
use crate::error::{EngineError, MattingError};
use crate::output::ResultPresenter;

/// Externally visible driver state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Waiting for a frame.
    Idle,
    /// A step is in flight.
    Stepping,
    ShutDown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverStats {
    pub submissions: u64,
    pub completed: u64,
    pub failed: u64,
    pub idle_ticks: u64,
    pub backoff_ticks: u64,
}

/// Skip schedule after consecutive engine failures.
#[derive(Debug, Clone)]
pub struct Backoff {
    consecutive_failures: u32,
    remaining: u32,
    max_ticks: u32,
}

impl Backoff {
    pub fn new(max_ticks: u32) -> Self {
        Self {
            consecutive_failures: 0,
            remaining: 0,
            max_ticks: max_ticks.max(1),
        }
    }

    /// Register a failure and return how many ticks will be skipped.
    pub fn record_failure(&mut self) -> u32 {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let exponent = (self.consecutive_failures - 1).min(31);
        self.remaining = (1u32 << exponent).min(self.max_ticks);
        self.remaining
    }

    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
        self.remaining = 0;
    }

    /// Consume one tick of backoff. Returns true while steps are suspended.
    pub fn suspend(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

enum Readback {
    Pending(ReadbackFuture),
    Ready(ArrayD<f32>),
}

impl Readback {
    fn poll(&mut self, cx: &mut Context<'_>) -> Result<bool, EngineError> {
        if let Readback::Pending(future) = self {
            match future.poll_unpin(cx) {
                Poll::Ready(Ok(tensor)) => *self = Readback::Ready(tensor),
                Poll::Ready(Err(e)) => return Err(e),
                Poll::Pending => return Ok(false),
            }
        }
        Ok(true)
    }

    fn take(self) -> Option<ArrayD<f32>> {
        match self {
            Readback::Ready(tensor) => Some(tensor),
            Readback::Pending(_) => None,
        }
    }
}

struct PendingStep {
    fgr: Readback,
    pha: Readback,
    recurrent: Vec<Readback>,
}

impl PendingStep {
    /// Poll every readback once. True when all have completed.
    fn poll(&mut self) -> Result<bool, EngineError> {
        let mut cx = Context::from_waker(noop_waker_ref());
        let mut done = self.fgr.poll(&mut cx)?;
        done &= self.pha.poll(&mut cx)?;
        for readback in &mut self.recurrent {
            done &= readback.poll(&mut cx)?;
        }
        Ok(done)
    }
}

enum Phase {
    Idle,
    /// Inputs submitted; outputs are peeked on the next tick.
    Submitted { width: u32, height: u32 },
    AwaitingReadback(PendingStep),
}

/// Recurrent inference driver for RobustVideoMatting.
///
/// Advances by one non-blocking [`tick`](Self::tick) per host frame. A step spans
/// at least two ticks: one to submit, then one or more to read back. The tick
/// that completes a step also submits the next one. Only one step is ever in
/// flight, and its outputs are released before the next submission.
pub struct MattingDriver<E: InferenceEngine> {
    engine: E,
    state: Option<PipelineState>,
    phase: Phase,
    policy: DownsamplePolicy,
    recurrent_mode: RecurrentMode,
    backoff: Backoff,
    stats: DriverStats,
    fallback_warned_for: Option<(u32, u32)>,
    discard_carried: bool,
}

/// Adapts a borrowed frame to [`FrameSource`].
struct BorrowedFrame<'a>(Option<&'a RgbaImage>);

impl FrameSource for BorrowedFrame<'_> {
    fn current_frame(&mut self) -> Option<&RgbaImage> {
        self.0
    }
}

impl<E: InferenceEngine> MattingDriver<E> {
    pub fn new(engine: E, config: &MattingConfig) -> Self {
        match config.recurrent_mode {
            RecurrentMode::Carry => {
                tracing::info!("Recurrent state is carried between frames")
            }
            RecurrentMode::Stateless => tracing::warn!(
                "Running stateless: r1i..r4i stay at zero and temporal memory is discarded"
            ),
        }

        Self {
            engine,
            state: Some(PipelineState::default()),
            phase: Phase::Idle,
            policy: config.downsample.into(),
            recurrent_mode: config.recurrent_mode,
            backoff: Backoff::new(config.max_backoff_ticks),
            stats: DriverStats::default(),
            fallback_warned_for: None,
            discard_carried: false,
        }
    }

    pub fn state(&self) -> DriverState {
        match (&self.state, &self.phase) {
            (None, _) => DriverState::ShutDown,
            (Some(_), Phase::Idle) => DriverState::Idle,
            (Some(_), _) => DriverState::Stepping,
        }
    }

    pub fn stats(&self) -> DriverStats {
        self.stats
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn pipeline_state(&self) -> Option<&PipelineState> {
        self.state.as_ref()
    }

    pub fn recurrent_mode(&self) -> RecurrentMode {
        self.recurrent_mode
    }

    /// Reset hidden state to zeros, e.g. after a camera switch or scene cut.
    pub fn reset_state(&mut self) {
        tracing::info!("Resetting RVM hidden states");
        if let Some(state) = self.state.as_mut() {
            state.reset_recurrent();
        }
        // The step in flight was fed the old state; its outputs must not win.
        self.discard_carried = !matches!(self.phase, Phase::Idle);
    }

    /// Advance the pipeline by one host tick. Never blocks and never fails;
    /// errors are logged and the step is skipped.
    pub fn tick(&mut self, frame: Option<&RgbaImage>, presenter: &mut ResultPresenter) -> DriverState {
        let mut source = BorrowedFrame(frame);
        self.tick_source(Some(&mut source), presenter)
    }

    /// Like [`tick`](Self::tick), but only pulls a frame from `source` when a
    /// new step is about to start.
    pub fn tick_source(
        &mut self,
        source: Option<&mut dyn FrameSource>,
        presenter: &mut ResultPresenter,
    ) -> DriverState {
        if self.state.is_none() {
            return DriverState::ShutDown;
        }

        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Idle => self.begin_step(source),
            Phase::Submitted { width, height } => {
                self.request_readback(width, height, presenter, source)
            }
            Phase::AwaitingReadback(pending) => self.poll_readback(pending, presenter, source),
        }

        self.state()
    }

    fn begin_step(&mut self, source: Option<&mut dyn FrameSource>) {
        let Some(source) = source else {
            self.stats.idle_ticks += 1;
            return;
        };
        if self.backoff.suspend() {
            self.stats.backoff_ticks += 1;
            return;
        }
        let Some(frame) = source.current_frame() else {
            self.stats.idle_ticks += 1;
            return;
        };

        let (width, height) = frame.dimensions();
        if self.policy.falls_back(width, height) && self.fallback_warned_for != Some((width, height)) {
            tracing::warn!(
                "Fixed downsample ratio produces odd stage dimensions at {}x{}; using banded ratio",
                width,
                height
            );
            self.fallback_warned_for = Some((width, height));
        }
        let ratio = self.policy.ratio(width, height);

        match self.submit(frame, ratio) {
            Ok(()) => {
                self.stats.submissions += 1;
                self.phase = Phase::Submitted { width, height };
            }
            Err(e) => self.fail(e),
        }
    }

    fn submit(&mut self, frame: &RgbaImage, ratio: f32) -> Result<(), MattingError> {
        let _span = tracing::debug_span!("rvm_submit").entered();
        let Some(state) = self.state.as_mut() else {
            return Err(EngineError::ShutDown.into());
        };

        let (width, height) = frame.dimensions();
        if state.ensure_input_shape(width, height) && self.recurrent_mode == RecurrentMode::Carry {
            // Hidden state from another resolution cannot be fed back.
            state.reset_recurrent();
        }
        preprocess::frame_to_tensor(frame, &mut state.input)?;
        state.downsample_ratio[0] = ratio;

        tracing::debug!("Submitting {}x{} frame, downsample_ratio={}", width, height, ratio);

        self.engine.set_input(INPUT_SRC, state.input.view().into_dyn())?;
        for (name, tensor) in RECURRENT_INPUTS.iter().zip(state.recurrent.iter()) {
            self.engine.set_input(name, tensor.view())?;
        }
        self.engine
            .set_input(INPUT_DOWNSAMPLE_RATIO, state.downsample_ratio.view().into_dyn())?;
        self.engine.schedule()?;
        Ok(())
    }

    fn request_readback(
        &mut self,
        width: u32,
        height: u32,
        presenter: &mut ResultPresenter,
        source: Option<&mut dyn FrameSource>,
    ) {
        let pending = match self.start_readback() {
            Ok(pending) => pending,
            Err(e) => return self.fail(e.into()),
        };
        presenter.prepare_results(width, height);
        // A readback that is already complete is consumed on this tick.
        self.poll_readback(pending, presenter, source);
    }

    fn start_readback(&mut self) -> Result<PendingStep, EngineError> {
        let fgr = self.engine.peek_output(OUTPUT_FGR)?;
        let pha = self.engine.peek_output(OUTPUT_PHA)?;

        let mut recurrent = Vec::new();
        if self.recurrent_mode == RecurrentMode::Carry {
            for name in RECURRENT_OUTPUTS {
                let output = self.engine.peek_output(name)?;
                recurrent.push(Readback::Pending(self.engine.readback_async(&output)?));
            }
        }

        Ok(PendingStep {
            fgr: Readback::Pending(self.engine.readback_async(&fgr)?),
            pha: Readback::Pending(self.engine.readback_async(&pha)?),
            recurrent,
        })
    }

    fn poll_readback(
        &mut self,
        mut pending: PendingStep,
        presenter: &mut ResultPresenter,
        source: Option<&mut dyn FrameSource>,
    ) {
        match pending.poll() {
            Ok(true) => {}
            Ok(false) => {
                self.phase = Phase::AwaitingReadback(pending);
                return;
            }
            Err(e) => return self.fail(e.into()),
        }

        let PendingStep { fgr, pha, recurrent } = pending;
        let (Some(fgr), Some(pha)) = (fgr.take(), pha.take()) else {
            return self.fail(EngineError::ReadbackCanceled.into());
        };

        if let Err(e) = presenter.write_results(&fgr, &pha) {
            return self.fail(e);
        }
        // Read-back copies are done with; release them before the next submit.
        drop(fgr);
        drop(pha);

        let discard = std::mem::take(&mut self.discard_carried);
        if self.recurrent_mode == RecurrentMode::Carry && !discard {
            let carried: Vec<ArrayD<f32>> = recurrent.into_iter().filter_map(Readback::take).collect();
            if let (Some(state), Ok(carried)) = (self.state.as_mut(), <[ArrayD<f32>; 4]>::try_from(carried)) {
                state.recurrent = carried;
            }
        }

        self.engine.release_outputs();
        presenter.publish();

        self.stats.completed += 1;
        self.backoff.reset();

        // Straight into the next step; the only waits are after submit and
        // while readbacks are pending.
        self.begin_step(source);
    }

    fn fail(&mut self, error: MattingError) {
        self.engine.release_outputs();
        self.discard_carried = false;
        self.stats.failed += 1;
        let skip = self.backoff.record_failure();
        tracing::warn!(
            "Skipping matting step ({} consecutive failures, backing off {} ticks): {}",
            self.backoff.consecutive_failures(),
            skip,
            error
        );
        self.phase = Phase::Idle;
    }

    /// Release tensors and the engine. Outstanding readbacks are abandoned.
    /// Safe to call more than once.
    pub fn shutdown(&mut self) {
        if self.state.is_none() {
            return;
        }
        self.phase = Phase::Idle;
        self.engine.release_outputs();
        self.engine.shutdown();
        self.state = None;
        tracing::info!(
            "Matting driver shut down after {} steps ({} failed)",
            self.stats.completed,
            self.stats.failed
        );
    }
}

impl<E: InferenceEngine> Drop for MattingDriver<E> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
