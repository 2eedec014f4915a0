//! Custom error types for the application.
//!
//! Two error families are defined here with `thiserror`:
//!
//! - **`TransportError`**: communication faults on the serial link. They are
//!   always recoverable at the task level: the task that hit one is marked as
//!   failed, the stale connection is discarded and the next task reopens it.
//!   Every wire-level failure has its own variant so a timeout can never be
//!   confused with a malformed reply.
//! - **`DtError`**: logic faults (unknown task type, unknown parameter key,
//!   duplicate scenario, malformed scenario definition) and configuration
//!   problems (wrapping [`crate::config::ConfigError`]). These are returned
//!   to the caller instead of being absorbed into a task message.
//!
//! Messages are language-agnostic. Operator-facing text is produced by the
//! task layer from these errors.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DtError>;

/// Communication fault on the serial link to the device.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("No STM32 device found. Device is offline?")]
    NoDevice,

    #[error("Opening device {path} failed: {reason}")]
    Open { path: String, reason: String },

    #[error("Serial support not enabled. Rebuild with --features serial")]
    SerialFeatureDisabled,

    #[error("Device connection is not open")]
    NotConnected,

    #[error("Clearing serial buffers failed: {0}")]
    Clear(#[source] std::io::Error),

    #[error("Write to serial port failed: {0}")]
    Write(#[source] std::io::Error),

    #[error("Read from serial port failed: {0}")]
    Read(#[source] std::io::Error),

    #[error("On {command}: empty answer or timeout expired")]
    Timeout { command: String },

    #[error("On {command}: MCU BUSY")]
    DeviceBusy { command: String },

    #[error("On {command}: ACK was not received (got {received:02x?})")]
    MissingAck { command: String, received: Vec<u8> },

    #[error("On {command}: END was not received")]
    MissingTerminator { command: String },

    #[error(
        "On {command}: number of bytes in the reply ({received}) does not match expected one ({expected})"
    )]
    UnexpectedReplySize {
        command: String,
        expected: usize,
        received: usize,
    },

    #[error(
        "On {command}: reply declares {declared} words but carries {actual}"
    )]
    LengthMismatch {
        command: String,
        declared: usize,
        actual: usize,
    },
}

impl TransportError {
    /// True when the device reported it is busy and needs a reboot.
    pub fn is_device_busy(&self) -> bool {
        matches!(self, TransportError::DeviceBusy { .. })
    }

    /// True for faults raised because nothing arrived before the read timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout { .. })
    }
}

/// Logic and configuration faults.
#[derive(Error, Debug)]
pub enum DtError {
    #[error("Unknown task type '{0}'")]
    UnknownTaskType(String),

    #[error("Task '{task}' has no parameter '{parameter}'")]
    UnknownParameter { task: String, parameter: String },

    #[error("Parameter '{0}' is read-only")]
    ReadOnlyParameter(String),

    #[error("Scenario with name '{0}' already exists")]
    DuplicateScenario(String),

    #[error("Malformed scenario definition: {0}")]
    MalformedScenario(String),

    #[error("Task already has identity {0}")]
    IdentityAlreadyAssigned(u64),

    #[error("Unknown control directive '{0}'")]
    UnknownDirective(String),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error("Orchestrator channel closed")]
    ChannelClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TransportError::Timeout {
            command: "STATUS".into(),
        };
        assert_eq!(err.to_string(), "On STATUS: empty answer or timeout expired");
        assert!(err.is_timeout());
        assert!(!err.is_device_busy());
    }

    #[test]
    fn test_transport_error_wraps_into_dt_error() {
        let err: DtError = TransportError::NoDevice.into();
        assert_eq!(err.to_string(), "No STM32 device found. Device is offline?");
    }

    #[test]
    fn test_length_mismatch_is_distinct_from_timeout() {
        let err = TransportError::LengthMismatch {
            command: "GET PWR".into(),
            declared: 3,
            actual: 2,
        };
        assert!(!err.is_timeout());
        assert!(err.to_string().contains("declares 3 words"));
    }
}
