use std::fmt;

use thiserror::Error;

/// Phase tags attached to device faults so callers can tell which engine
/// program failed. The set is closed: load, execute, and the two staged
/// transfer programs.
pub mod phase {
    pub const LOAD_ENGINE: &str = "load engine";
    pub const EXECUTE_ENGINE: &str = "execute engine";
    pub const DEVICE_TO_HOST: &str = "device to host";
    pub const HOST_TO_DEVICE: &str = "host to device";
}

/// Host backing-storage allocation failure. Recoverable: surfaced to the
/// caller, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("host allocation of {byte_len} bytes failed: {reason}")]
pub struct AllocationError {
    pub byte_len: usize,
    pub reason: String,
}

impl AllocationError {
    pub fn new(byte_len: usize, reason: impl Into<String>) -> Self {
        Self {
            byte_len,
            reason: reason.into(),
        }
    }
}

/// Raw hardware/runtime failure reported by a device engine. The executor
/// wraps it with the phase it occurred in before returning it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct EngineError(pub String);

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Executor error surfaced to callers.
///
/// Invariant violations (a compiled program whose metadata contradicts
/// itself, or buffer state that risks silent corruption) are deliberately
/// not represented here: they abort via panic instead of returning.
#[derive(Debug)]
pub enum ExecutorError {
    Allocation(AllocationError),
    Argument { message: String },
    DeviceFault { phase: &'static str, message: String },
}

impl ExecutorError {
    pub fn argument(message: impl Into<String>) -> Self {
        ExecutorError::Argument {
            message: message.into(),
        }
    }

    pub fn device_fault(phase: &'static str, err: EngineError) -> Self {
        ExecutorError::DeviceFault {
            phase,
            message: err.0,
        }
    }
}

impl From<AllocationError> for ExecutorError {
    fn from(err: AllocationError) -> Self {
        ExecutorError::Allocation(err)
    }
}

impl fmt::Display for ExecutorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutorError::Allocation(err) => write!(f, "{err}"),
            ExecutorError::Argument { message } => {
                write!(f, "invalid argument: {message}")
            }
            ExecutorError::DeviceFault { phase, message } => {
                write!(f, "device fault [{phase}]: {message}")
            }
        }
    }
}

impl std::error::Error for ExecutorError {}

/// Convenience alias for results returned by executor routines.
pub type ExecutorResult<T> = Result<T, ExecutorError>;
