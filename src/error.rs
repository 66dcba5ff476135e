use thiserror::Error;

/// Errors raised by an inference engine at submission, execution or readback.
///
/// Cloneable so a single failed run can be delivered to every readback that
/// was waiting on it.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    #[error("failed to load model: {0}")]
    Load(String),

    #[error("invalid input `{name}`: {reason}")]
    InvalidInput { name: String, reason: String },

    #[error("inference failed: {0}")]
    Execution(String),

    #[error("model has no output named `{0}`")]
    MissingOutput(String),

    #[error("readback was canceled before completion")]
    ReadbackCanceled,

    #[error("engine has been shut down")]
    ShutDown,
}

/// Errors raised by a display sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink has no texture parameter named `{0}`")]
    MissingParameter(String),

    #[error("sink I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("sink format error: {0}")]
    Format(String),
}

#[derive(Debug, Error)]
pub enum MattingError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("shape mismatch: expected {expected}, got {actual}")]
    Shape { expected: String, actual: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl MattingError {
    pub(crate) fn shape(expected: impl Into<String>, actual: impl std::fmt::Debug) -> Self {
        Self::Shape {
            expected: expected.into(),
            actual: format!("{:?}", actual),
        }
    }
}

pub type Result<T, E = MattingError> = std::result::Result<T, E>;
