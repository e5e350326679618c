//! Error handling for scanstage
//!
//! Provides typed errors for every layer of the stack:
//! - Transport errors (serial link)
//! - Protocol errors (command acknowledgment, timeouts, firmware rejects)
//! - Motion errors (validation, alarm recovery, homing)
//! - Scan errors (per-point capture/storage failures, run lifecycle)
//!
//! All error types use `thiserror`. Errors cross the protocol/motion
//! boundary as typed results, never as panics.

use crate::data::Axis;
use thiserror::Error;

/// Serial link error type.
///
/// Link-level failures are fatal to the connection; the reconnect policy
/// lives with the caller, not here.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// Port does not exist on this system
    #[error("Port not found: {port}")]
    PortNotFound {
        /// The requested port name.
        port: String,
    },

    /// Port exists but could not be opened
    #[error("Failed to open port {port}: {reason}")]
    FailedToOpen {
        /// The requested port name.
        port: String,
        /// Why the open failed.
        reason: String,
    },

    /// Read side of the link failed
    #[error("Serial read failed: {reason}")]
    ReadFailed {
        /// The underlying I/O failure.
        reason: String,
    },

    /// Write side of the link failed
    #[error("Serial write failed: {reason}")]
    WriteFailed {
        /// The underlying I/O failure.
        reason: String,
    },

    /// Operation attempted on a closed transport
    #[error("Transport is closed")]
    Closed,
}

/// Protocol-level error type.
///
/// Covers command correlation failures between the client and the
/// firmware.
#[derive(Error, Debug, Clone)]
pub enum ProtocolError {
    /// No acknowledgment arrived within the command timeout.
    ///
    /// For motion-bearing commands the motion layer may still conclude
    /// success from a confirmed-idle status; that policy does not live
    /// here.
    #[error("Command timed out after {timeout_ms}ms")]
    Timeout {
        /// The timeout that elapsed, in milliseconds.
        timeout_ms: u64,
    },

    /// Firmware rejected the command with `error:<code>`
    #[error("Command rejected by firmware: error:{code}")]
    Rejected {
        /// The firmware error code.
        code: u8,
    },

    /// Firmware raised `ALARM:<code>` while the command was outstanding
    #[error("Firmware alarm {code} raised")]
    AlarmRaised {
        /// The firmware alarm code.
        code: u8,
    },

    /// The controller rebooted (greeting seen) while a command was outstanding
    #[error("Controller reset while command was outstanding")]
    LinkReset,

    /// The client's background task has shut down
    #[error("Protocol client is shut down")]
    Shutdown,
}

/// Motion layer error type.
#[derive(Error, Debug, Clone)]
pub enum MotionError {
    /// Target coordinate outside the axis travel limits.
    ///
    /// Raised by validation before any wire traffic.
    #[error("{axis} axis target {value} outside limits [{min}, {max}]")]
    OutOfRange {
        /// The offending axis.
        axis: Axis,
        /// The rejected coordinate.
        value: f64,
        /// Lower travel bound.
        min: f64,
        /// Upper travel bound.
        max: f64,
    },

    /// Machine still alarmed after the bounded unlock retries
    #[error("Alarm not cleared after {attempts} unlock attempts")]
    AlarmNotCleared {
        /// How many unlock commands were sent.
        attempts: u32,
    },

    /// Homing cycle did not complete
    #[error("Homing failed: {reason}")]
    HomingFailed {
        /// Why homing was declared failed.
        reason: String,
    },
}

/// Scan run error type.
#[derive(Error, Debug, Clone)]
pub enum ScanError {
    /// Capture collaborator failed at a point (point-level, policy-driven)
    #[error("Capture failed at point {point_index}: {reason}")]
    CaptureFailed {
        /// Index of the point in the pattern.
        point_index: usize,
        /// The collaborator's failure message.
        reason: String,
    },

    /// Storage collaborator failed at a point (point-level, policy-driven)
    #[error("Storage failed at point {point_index}: {reason}")]
    StorageFailed {
        /// Index of the point in the pattern.
        point_index: usize,
        /// The collaborator's failure message.
        reason: String,
    },

    /// A run was started with an empty pattern
    #[error("Scan pattern contains no points")]
    EmptyPattern,

    /// A run was started while another was still active
    #[error("A scan run is already active")]
    RunActive,

    /// The run was cancelled before completing
    #[error("Scan run cancelled")]
    Cancelled,
}

/// Main error type for scanstage.
///
/// A unified error that can represent any failure from any layer. This is
/// the primary error type in public APIs.
#[derive(Error, Debug)]
pub enum Error {
    /// Serial link error
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Protocol error
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Motion error
    #[error(transparent)]
    Motion(#[from] MotionError),

    /// Scan run error
    #[error(transparent)]
    Scan(#[from] ScanError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a command timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Protocol(ProtocolError::Timeout { .. }))
    }

    /// Check if this is a link-level failure
    pub fn is_transport_error(&self) -> bool {
        matches!(self, Error::Transport(_))
    }

    /// Check if this is a validation rejection (never reached the wire)
    pub fn is_out_of_range(&self) -> bool {
        matches!(self, Error::Motion(MotionError::OutOfRange { .. }))
    }

    /// Check if this is a point-level scan failure
    pub fn is_point_error(&self) -> bool {
        matches!(
            self,
            Error::Scan(ScanError::CaptureFailed { .. } | ScanError::StorageFailed { .. })
        )
    }
}

/// Result type using [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MotionError::OutOfRange {
            axis: Axis::Z,
            value: 150.0,
            min: 0.0,
            max: 100.0,
        };
        assert_eq!(err.to_string(), "Z axis target 150 outside limits [0, 100]");

        let err = ProtocolError::Timeout { timeout_ms: 2000 };
        assert_eq!(err.to_string(), "Command timed out after 2000ms");
    }

    #[test]
    fn test_predicates() {
        let err: Error = ProtocolError::Timeout { timeout_ms: 100 }.into();
        assert!(err.is_timeout());
        assert!(!err.is_transport_error());

        let err: Error = ScanError::CaptureFailed {
            point_index: 3,
            reason: "sensor busy".into(),
        }
        .into();
        assert!(err.is_point_error());
    }

    #[test]
    fn test_conversions() {
        let transport = TransportError::Closed;
        let err: Error = transport.into();
        assert!(matches!(err, Error::Transport(TransportError::Closed)));
    }
}
