//! Event type definitions for the event bus.
//!
//! Events are organized by category and designed to be cloneable and
//! serializable for logging and replay.

use serde::{Deserialize, Serialize};

use crate::data::{MachineState, Position, ScanPhase};

/// Root event enum for all application events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AppEvent {
    /// Serial connection lifecycle
    Connection(ConnectionEvent),
    /// Machine state and alarms
    Machine(MachineEvent),
    /// Scan run progress
    Scan(ScanEvent),
}

impl AppEvent {
    /// Get the category of this event
    pub fn category(&self) -> EventCategory {
        match self {
            AppEvent::Connection(_) => EventCategory::Connection,
            AppEvent::Machine(_) => EventCategory::Machine,
            AppEvent::Scan(_) => EventCategory::Scan,
        }
    }

    /// Get a short description of this event for logging
    pub fn description(&self) -> String {
        match self {
            AppEvent::Connection(e) => e.description(),
            AppEvent::Machine(e) => e.description(),
            AppEvent::Scan(e) => e.description(),
        }
    }
}

/// Event category for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventCategory {
    /// Serial connection lifecycle events.
    Connection,
    /// Machine state and alarm events.
    Machine,
    /// Scan run progress events.
    Scan,
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventCategory::Connection => write!(f, "Connection"),
            EventCategory::Machine => write!(f, "Machine"),
            EventCategory::Scan => write!(f, "Scan"),
        }
    }
}

/// Reason the serial connection went away
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DisconnectReason {
    /// User requested disconnect
    UserRequested,
    /// Connection lost unexpectedly
    ConnectionLost,
    /// Error occurred
    Error(String),
}

/// Connection-related events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConnectionEvent {
    /// Starting a connection attempt.
    Connecting {
        /// Serial port path being connected to.
        port: String,
    },
    /// Successfully connected.
    Connected {
        /// Serial port path that was connected.
        port: String,
    },
    /// Disconnected from the device.
    Disconnected {
        /// Serial port path that was disconnected.
        port: String,
        /// Reason for the disconnection.
        reason: DisconnectReason,
    },
}

impl ConnectionEvent {
    fn description(&self) -> String {
        match self {
            ConnectionEvent::Connecting { port } => format!("Connecting to {}", port),
            ConnectionEvent::Connected { port } => format!("Connected to {}", port),
            ConnectionEvent::Disconnected { port, reason } => {
                format!("Disconnected from {} ({:?})", port, reason)
            }
        }
    }
}

/// Machine state events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MachineEvent {
    /// Reported machine state changed.
    StateChanged {
        /// Previous state.
        from: MachineState,
        /// New state.
        to: MachineState,
    },
    /// Firmware raised an alarm.
    AlarmRaised {
        /// The firmware alarm code.
        code: u8,
        /// Decoded alarm text.
        description: String,
    },
    /// Alarm was unlocked.
    AlarmCleared,
    /// Homing cycle completed and the machine has an absolute reference.
    Homed,
}

impl MachineEvent {
    fn description(&self) -> String {
        match self {
            MachineEvent::StateChanged { from, to } => format!("State {} -> {}", from, to),
            MachineEvent::AlarmRaised { code, description } => {
                format!("Alarm {}: {}", code, description)
            }
            MachineEvent::AlarmCleared => "Alarm cleared".to_string(),
            MachineEvent::Homed => "Homing complete".to_string(),
        }
    }
}

/// Scan run progress events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScanEvent {
    /// A run started.
    Started {
        /// Session identifier for the run.
        session_id: String,
        /// Number of points in the pattern.
        total_points: usize,
    },
    /// The run moved to a new phase.
    PhaseChanged {
        /// The new phase.
        phase: ScanPhase,
        /// Index of the point being worked, if inside the point loop.
        point_index: Option<usize>,
    },
    /// A point finished (successfully or not).
    PointFinished {
        /// Index of the point in the pattern.
        point_index: usize,
        /// Stage position the point was captured at.
        position: Position,
        /// Whether capture and storage both succeeded.
        success: bool,
    },
    /// The run was paused.
    Paused {
        /// Phase the run will resume into.
        resume_phase: ScanPhase,
    },
    /// The run resumed.
    Resumed {
        /// Phase the run resumed into.
        phase: ScanPhase,
    },
    /// The run was cancelled and unwound to idle.
    Cancelled,
    /// The run finished.
    Completed {
        /// Points that succeeded.
        succeeded: usize,
        /// Points that failed but were skipped by policy.
        failed: usize,
    },
    /// The run aborted with a fatal error.
    Failed {
        /// Why the run failed.
        reason: String,
    },
}

impl ScanEvent {
    fn description(&self) -> String {
        match self {
            ScanEvent::Started {
                session_id,
                total_points,
            } => format!("Scan {} started ({} points)", session_id, total_points),
            ScanEvent::PhaseChanged { phase, point_index } => match point_index {
                Some(i) => format!("Phase {} (point {})", phase, i),
                None => format!("Phase {}", phase),
            },
            ScanEvent::PointFinished {
                point_index,
                success,
                ..
            } => format!(
                "Point {} {}",
                point_index,
                if *success { "ok" } else { "failed" }
            ),
            ScanEvent::Paused { resume_phase } => format!("Paused (will resume {})", resume_phase),
            ScanEvent::Resumed { phase } => format!("Resumed into {}", phase),
            ScanEvent::Cancelled => "Cancelled".to_string(),
            ScanEvent::Completed { succeeded, failed } => {
                format!("Completed: {} ok, {} failed", succeeded, failed)
            }
            ScanEvent::Failed { reason } => format!("Failed: {}", reason),
        }
    }
}
