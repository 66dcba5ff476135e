use std::collections::HashMap;
use std::path::Path;
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use futures::channel::oneshot;
use futures::FutureExt;
use ndarray::{ArrayD, ArrayViewD};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::{Session, SessionInputValue};
use ort::value::Tensor;

use super::{InferenceEngine, OutputRef, ReadbackFuture};
use crate::error::EngineError;

type RunOutcome = Result<HashMap<String, ArrayD<f32>>, EngineError>;
type OutputSender = oneshot::Sender<Result<ArrayD<f32>, EngineError>>;

#[derive(Debug, Clone)]
pub struct OrtOptions {
    pub intra_threads: usize,
}

impl Default for OrtOptions {
    fn default() -> Self {
        Self { intra_threads: 4 }
    }
}

/// ONNX Runtime backend.
///
/// The session lives on a dedicated worker thread so that [`schedule`] hands
/// the staged inputs over and returns immediately. Readbacks resolve once the
/// worker has finished the run.
///
/// [`schedule`]: InferenceEngine::schedule
pub struct OrtEngine {
    jobs: Option<mpsc::Sender<Job>>,
    worker: Option<JoinHandle<()>>,
    input_names: Vec<String>,
    output_names: Vec<String>,
    staged: Vec<(String, ArrayD<f32>)>,
    current: Option<Arc<RunSlot>>,
    run: u64,
}

struct Job {
    inputs: Vec<(String, ArrayD<f32>)>,
    slot: Arc<RunSlot>,
}

/// Result of one run plus the readbacks waiting on it.
#[derive(Default)]
struct RunSlot {
    state: Mutex<RunState>,
}

#[derive(Default)]
struct RunState {
    outcome: Option<RunOutcome>,
    waiters: Vec<(String, OutputSender)>,
}

impl RunSlot {
    fn complete(&self, outcome: RunOutcome) {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        for (name, tx) in guard.waiters.drain(..) {
            // The receiver may already be gone if the step was abandoned.
            let _ = tx.send(lookup(&outcome, &name));
        }
        guard.outcome = Some(outcome);
    }

    fn subscribe(&self, name: &str) -> oneshot::Receiver<Result<ArrayD<f32>, EngineError>> {
        let (tx, rx) = oneshot::channel();
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.outcome.as_ref() {
            Some(outcome) => {
                let _ = tx.send(lookup(outcome, name));
            }
            None => guard.waiters.push((name.to_string(), tx)),
        }
        rx
    }
}

fn lookup(outcome: &RunOutcome, name: &str) -> Result<ArrayD<f32>, EngineError> {
    match outcome {
        Ok(outputs) => outputs
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::MissingOutput(name.to_string())),
        Err(e) => Err(e.clone()),
    }
}

impl OrtEngine {
    /// Load an ONNX model and start its worker thread.
    pub fn load<P: AsRef<Path>>(model_path: P, options: &OrtOptions) -> Result<Self, EngineError> {
        let path = model_path.as_ref();
        let load_err = |e: &dyn std::fmt::Display| EngineError::Load(format!("{}: {}", path.display(), e));

        tracing::info!("Loading matting model from {}", path.display());

        let builder = Session::builder()
            .map_err(|e| load_err(&e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| load_err(&e))?
            .with_intra_threads(options.intra_threads)
            .map_err(|e| load_err(&e))?;

        #[cfg(feature = "tensorrt")]
        let builder = builder
            .with_execution_providers([
                ort::execution_providers::TensorRTExecutionProvider::default().build(),
            ])
            .map_err(|e| load_err(&e))?;

        #[cfg(feature = "cuda")]
        let builder = builder
            .with_execution_providers([
                ort::execution_providers::CUDAExecutionProvider::default().build(),
            ])
            .map_err(|e| load_err(&e))?;

        let session = builder.commit_from_file(path).map_err(|e| load_err(&e))?;

        let input_names: Vec<String> = session.inputs.iter().map(|i| i.name.clone()).collect();
        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
        tracing::info!("Model inputs: {:?}", input_names);
        tracing::info!("Model outputs: {:?}", output_names);

        let (jobs, rx) = mpsc::channel();
        let worker_outputs = output_names.clone();
        let worker = thread::Builder::new()
            .name("ort-worker".to_string())
            .spawn(move || worker_loop(session, worker_outputs, rx))
            .map_err(|e| load_err(&e))?;

        tracing::info!("Matting model loaded successfully");

        Ok(Self {
            jobs: Some(jobs),
            worker: Some(worker),
            input_names,
            output_names,
            staged: Vec::new(),
            current: None,
            run: 0,
        })
    }
}

fn worker_loop(mut session: Session, output_names: Vec<String>, jobs: mpsc::Receiver<Job>) {
    for job in jobs {
        let _span = tracing::debug_span!("inference").entered();
        let outcome = run_session(&mut session, &output_names, job.inputs);
        if let Err(e) = &outcome {
            tracing::debug!("Run failed: {}", e);
        }
        job.slot.complete(outcome);
    }
    tracing::debug!("ONNX worker exiting");
}

fn run_session(
    session: &mut Session,
    output_names: &[String],
    inputs: Vec<(String, ArrayD<f32>)>,
) -> RunOutcome {
    let exec_err = |e: ort::Error| EngineError::Execution(e.to_string());

    let mut values: Vec<(String, SessionInputValue<'static>)> = Vec::with_capacity(inputs.len());
    for (name, array) in inputs {
        let tensor = Tensor::from_array(array).map_err(exec_err)?;
        values.push((name, tensor.into()));
    }

    let outputs = session.run(values).map_err(exec_err)?;

    let mut extracted = HashMap::with_capacity(output_names.len());
    for name in output_names {
        let view = outputs[name.as_str()]
            .try_extract_array::<f32>()
            .map_err(exec_err)?;
        extracted.insert(name.clone(), view.to_owned());
    }
    Ok(extracted)
}

impl InferenceEngine for OrtEngine {
    fn set_input(&mut self, name: &str, tensor: ArrayViewD<'_, f32>) -> Result<(), EngineError> {
        if self.jobs.is_none() {
            return Err(EngineError::ShutDown);
        }
        if !self.input_names.iter().any(|n| n == name) {
            return Err(EngineError::InvalidInput {
                name: name.to_string(),
                reason: "model has no such input".to_string(),
            });
        }
        self.staged.retain(|(n, _)| n != name);
        self.staged.push((name.to_string(), tensor.to_owned()));
        Ok(())
    }

    fn schedule(&mut self) -> Result<(), EngineError> {
        let jobs = self.jobs.as_ref().ok_or(EngineError::ShutDown)?;
        if self.current.is_some() {
            return Err(EngineError::Execution(
                "previous run's outputs have not been released".to_string(),
            ));
        }

        let slot = Arc::new(RunSlot::default());
        let job = Job {
            inputs: std::mem::take(&mut self.staged),
            slot: Arc::clone(&slot),
        };
        jobs.send(job).map_err(|_| EngineError::ShutDown)?;

        self.run += 1;
        self.current = Some(slot);
        Ok(())
    }

    fn peek_output(&mut self, name: &str) -> Result<OutputRef, EngineError> {
        if self.current.is_none() {
            return Err(EngineError::Execution("no run has been scheduled".to_string()));
        }
        if !self.output_names.iter().any(|n| n == name) {
            return Err(EngineError::MissingOutput(name.to_string()));
        }
        Ok(OutputRef::new(name, self.run))
    }

    fn readback_async(&mut self, output: &OutputRef) -> Result<ReadbackFuture, EngineError> {
        let slot = match self.current.as_ref() {
            Some(slot) if output.run() == self.run => slot,
            _ => {
                return Err(EngineError::Execution(format!(
                    "output `{}` belongs to a released run",
                    output.name()
                )))
            }
        };

        let rx = slot.subscribe(output.name());
        Ok(Box::pin(rx.map(|received| {
            received.unwrap_or(Err(EngineError::ReadbackCanceled))
        })))
    }

    fn release_outputs(&mut self) {
        self.current = None;
    }

    fn shutdown(&mut self) {
        self.staged.clear();
        self.current = None;
        // Dropping the sender ends the worker loop after any in-flight run.
        if self.jobs.take().is_none() {
            return;
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!("ONNX worker thread panicked");
            }
        }
        tracing::info!("ONNX engine shut down");
    }
}

impl Drop for OrtEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
