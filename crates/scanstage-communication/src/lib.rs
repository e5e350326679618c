//! # Scanstage Communication
//!
//! Serial transport, protocol client, and motion controller for scanstage.
//! Talks to GRBL/FluidNC-class motion controllers over a line-oriented
//! serial link: a background reader correlates asynchronous firmware
//! responses with outstanding commands and keeps a live status cache, and
//! the motion layer builds validated positioning, homing, and
//! alarm-recovery procedures on top of it.

pub mod motion;
pub mod protocol;
pub mod transport;

pub use motion::{MotionConfig, MotionController};
pub use protocol::{
    parse_line, parse_status, MessageLog, ProtocolClient, ProtocolConfig, Response, StatusReport,
    RESET, STATUS_QUERY,
};
pub use transport::{
    list_ports, ConnectionParams, LineTransport, MockHandle, MockTransport, SerialPortInfo,
    SerialTransport,
};
