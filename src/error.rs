use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackerError {
    #[error("Device error {code}: {explanation}")]
    Device { code: i32, explanation: String },
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
    #[error("Unknown stream: {0}")]
    UnknownStream(String),
    #[error("Unknown inlet: {0}")]
    UnknownInlet(u32),
    #[error("Capability unavailable: {0}")]
    CapabilityUnavailable(String),
    #[error("Not in calibration mode, call enter_calibration_mode first")]
    NotInCalibrationMode,
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Failure reported by the vendor SDK, wrapped verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceFailure {
    pub code: i32,
    pub explanation: String,
}

impl DeviceFailure {
    pub fn new(code: i32, explanation: impl Into<String>) -> Self {
        Self {
            code,
            explanation: explanation.into(),
        }
    }
}

impl From<DeviceFailure> for TrackerError {
    fn from(failure: DeviceFailure) -> Self {
        TrackerError::Device {
            code: failure.code,
            explanation: failure.explanation,
        }
    }
}

impl std::fmt::Display for DeviceFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.explanation, self.code)
    }
}

impl std::error::Error for DeviceFailure {}

pub type DeviceResult<T> = Result<T, DeviceFailure>;
