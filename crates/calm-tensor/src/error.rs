use thiserror::Error;

/// Non-fatal tensor/shape errors, surfaced as `Result` before any device
/// resource is touched. Raised by prepare-time weight-block shape
/// validation, which checks an uploaded block's byte length against the
/// length the model config implies before a single kernel runs against it.
#[derive(Error, Debug)]
pub enum TensorError {
    #[error("weight block shape mismatch: expected {expected} bytes, got {got} bytes")]
    ShapeMismatch { expected: usize, got: usize },
}

pub type Result<T> = std::result::Result<T, TensorError>;

/// A device fault: allocation failure, kernel launch failure, or
/// synchronization error. Per the error handling design these are fatal:
/// there is no recovery path, so callers log and terminate rather than
/// propagate a `Result`.
pub struct DeviceFault {
    pub kernel: &'static str,
    pub location: &'static std::panic::Location<'static>,
    pub message: String,
}

impl DeviceFault {
    #[track_caller]
    pub fn new(kernel: &'static str, message: impl Into<String>) -> Self {
        DeviceFault {
            kernel,
            location: std::panic::Location::caller(),
            message: message.into(),
        }
    }

    /// Log the fault and terminate the process. Never returns.
    pub fn fatal(self) -> ! {
        tracing::error!(
            kernel = self.kernel,
            file = self.location.file(),
            line = self.location.line(),
            error = %self.message,
            "device fault: terminating"
        );
        std::process::exit(1);
    }
}
