//! # Scanstage Core
//!
//! Core types, traits, and utilities for scanstage. Provides the
//! fundamental abstractions shared by the communication and scan crates:
//! position and limit types, the machine state model, the error taxonomy,
//! the motion control interface, and the application event bus.

pub mod data;
pub mod error;
pub mod event_bus;
pub mod motion;

pub use data::{
    Axis, AxisLimits, MachineLimits, MachineState, Position, ScanPhase, StatusSnapshot,
};

pub use error::{Error, MotionError, ProtocolError, Result, ScanError, TransportError};

pub use motion::MotionControl;

// Re-export event bus for convenience
pub use event_bus::{
    event_bus, AppEvent, ConnectionEvent, EventBus, EventBusConfig, EventCategory, EventFilter,
    MachineEvent, ScanEvent, SubscriptionId,
};
