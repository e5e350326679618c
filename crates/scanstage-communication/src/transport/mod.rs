//! Transport layer: line-oriented serial communication
//!
//! The transport owns the serial handle and nothing else: it reads raw
//! bytes, splits them into newline-terminated lines, and writes outgoing
//! lines. It has no protocol knowledge — classification of lines belongs
//! to the protocol client. OS-level I/O failures surface as
//! [`TransportError`]; retry and reconnect policy live with the caller.

pub mod mock;
pub mod serial;

pub use mock::{MockHandle, MockTransport};
pub use serial::{list_ports, SerialPortInfo, SerialTransport};

use scanstage_core::TransportError;
use serde::{Deserialize, Serialize};

/// Parameters for opening a serial connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// Serial port path (e.g., "/dev/ttyUSB0", "COM3")
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Read timeout in milliseconds.
    ///
    /// Kept short so the reader loop can interleave reads with writes and
    /// timeout checks.
    pub read_timeout_ms: u64,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115200,
            read_timeout_ms: 50,
        }
    }
}

/// Result type for transport operations
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Line-oriented transport over a serial link.
///
/// A transport instance is owned by exactly one reader task; the protocol
/// client serializes every write through that task, so implementations
/// take `&mut self` and need no internal locking.
pub trait LineTransport: Send {
    /// Read the next complete line.
    ///
    /// Waits at most the configured read timeout; returns `Ok(None)` when
    /// the timeout passes without a complete line. The line terminator is
    /// stripped.
    fn read_line(&mut self) -> TransportResult<Option<String>>;

    /// Write a line followed by a newline terminator
    fn write_line(&mut self, line: &str) -> TransportResult<()>;

    /// Write raw bytes with no terminator.
    ///
    /// Used for single-byte realtime commands the firmware consumes
    /// outside the line protocol.
    fn write_raw(&mut self, bytes: &[u8]) -> TransportResult<()>;

    /// Close the link. Further operations return [`TransportError::Closed`].
    fn close(&mut self) -> TransportResult<()>;
}
