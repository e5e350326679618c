//! Data models for stage positions, axis limits, and machine status
//!
//! This module provides:
//! - Position tracking across the four stage axes (X, Y, Z, C)
//! - Per-axis travel limits with continuous (wrapping) axis support
//! - Machine states as reported by the motion controller firmware
//! - Timestamped status snapshots with staleness detection
//! - The scan run phase state machine

use crate::error::MotionError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// Identifier for one of the four stage axes.
///
/// X, Y, Z are linear gantry axes; C is the turntable rotation axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    /// Horizontal gantry axis
    X,
    /// Depth gantry axis
    Y,
    /// Vertical gantry axis
    Z,
    /// Turntable rotation axis
    C,
}

impl Axis {
    /// All axes in wire order
    pub const ALL: [Axis; 4] = [Axis::X, Axis::Y, Axis::Z, Axis::C];

    /// Single-letter G-code word for this axis
    pub fn letter(&self) -> char {
        match self {
            Axis::X => 'X',
            Axis::Y => 'Y',
            Axis::Z => 'Z',
            Axis::C => 'C',
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// Stage position across all four axes, in millimeters (degrees for C).
///
/// Positions are immutable value objects; helpers return new values rather
/// than mutating shared state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// X-axis position
    pub x: f64,
    /// Y-axis position
    pub y: f64,
    /// Z-axis position
    pub z: f64,
    /// C-axis (turntable) angle
    pub c: f64,
}

impl Position {
    /// Create a position from explicit coordinates
    pub fn new(x: f64, y: f64, z: f64, c: f64) -> Self {
        debug_assert!(
            x.is_finite() && y.is_finite() && z.is_finite() && c.is_finite(),
            "Position axes must be finite: x={x}, y={y}, z={z}, c={c}"
        );
        Self { x, y, z, c }
    }

    /// Value of a single axis
    pub fn axis(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
            Axis::C => self.c,
        }
    }

    /// Copy of this position with one axis replaced
    pub fn with_axis(mut self, axis: Axis, value: f64) -> Self {
        match axis {
            Axis::X => self.x = value,
            Axis::Y => self.y = value,
            Axis::Z => self.z = value,
            Axis::C => self.c = value,
        }
        self
    }

    /// Euclidean distance to another position over the linear axes
    pub fn distance_to(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Check that every axis is within `tolerance` of `other`
    pub fn approx_eq(&self, other: &Position, tolerance: f64) -> bool {
        Axis::ALL
            .iter()
            .all(|&a| (self.axis(a) - other.axis(a)).abs() <= tolerance)
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::new(0.0, 0.0, 0.0, 0.0)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "X:{:.3} Y:{:.3} Z:{:.3} C:{:.3}",
            self.x, self.y, self.z, self.c
        )
    }
}

/// Travel limits and feed rate ceiling for a single axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisLimits {
    /// Minimum reachable coordinate
    pub min: f64,
    /// Maximum reachable coordinate
    pub max: f64,
    /// Maximum feed rate (units per minute)
    pub max_feed_rate: f64,
    /// Continuous axes wrap into range instead of rejecting out-of-range targets
    pub continuous: bool,
}

impl AxisLimits {
    /// Limits for a linear axis with hard travel bounds
    pub fn linear(min: f64, max: f64, max_feed_rate: f64) -> Self {
        Self {
            min,
            max,
            max_feed_rate,
            continuous: false,
        }
    }

    /// Limits for a continuous (wrapping) axis such as a turntable
    pub fn wrapping(min: f64, max: f64, max_feed_rate: f64) -> Self {
        Self {
            min,
            max,
            max_feed_rate,
            continuous: true,
        }
    }

    /// Width of the travel range
    pub fn span(&self) -> f64 {
        self.max - self.min
    }

    /// Check a coordinate against the travel bounds
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Normalize a coordinate into `[min, min + span)`.
    ///
    /// Only meaningful for continuous axes; linear axes are returned
    /// unchanged.
    pub fn wrap(&self, value: f64) -> f64 {
        if !self.continuous || self.span() <= 0.0 {
            return value;
        }
        (value - self.min).rem_euclid(self.span()) + self.min
    }
}

/// Travel limits for every stage axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MachineLimits {
    /// X-axis limits
    pub x: AxisLimits,
    /// Y-axis limits
    pub y: AxisLimits,
    /// Z-axis limits
    pub z: AxisLimits,
    /// C-axis limits
    pub c: AxisLimits,
}

impl MachineLimits {
    /// Limits for a single axis
    pub fn axis(&self, axis: Axis) -> &AxisLimits {
        match axis {
            Axis::X => &self.x,
            Axis::Y => &self.y,
            Axis::Z => &self.z,
            Axis::C => &self.c,
        }
    }

    /// Validate a target against the travel limits.
    ///
    /// Continuous axes are wrapped into range; the first linear axis out of
    /// bounds rejects the whole target. A validated target has seen no wire
    /// traffic yet, so rejection here is free of side effects.
    pub fn normalize(&self, target: Position) -> Result<Position, MotionError> {
        let mut normalized = target;
        for axis in Axis::ALL {
            let limits = self.axis(axis);
            let value = target.axis(axis);
            if limits.continuous {
                normalized = normalized.with_axis(axis, limits.wrap(value));
            } else if !limits.contains(value) {
                return Err(MotionError::OutOfRange {
                    axis,
                    value,
                    min: limits.min,
                    max: limits.max,
                });
            }
        }
        Ok(normalized)
    }
}

impl Default for MachineLimits {
    fn default() -> Self {
        Self {
            x: AxisLimits::linear(0.0, 200.0, 3000.0),
            y: AxisLimits::linear(0.0, 200.0, 3000.0),
            z: AxisLimits::linear(0.0, 100.0, 1500.0),
            c: AxisLimits::wrapping(0.0, 360.0, 7200.0),
        }
    }
}

/// Machine state as reported by the firmware.
///
/// Produced only by parsing status reports; never set directly on command
/// issuance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MachineState {
    /// No status report received yet
    Unknown,
    /// Idle and ready for commands
    Idle,
    /// Executing motion
    Run,
    /// Feed hold active
    Hold,
    /// Jog motion in progress
    Jog,
    /// Homing cycle in progress
    Home,
    /// Safety lockout; requires explicit unlock before further motion
    Alarm,
    /// Safety door interlock triggered
    Door,
    /// Low-power sleep state
    Sleep,
    /// Serial link is down
    Disconnected,
}

impl MachineState {
    /// Parse the state field of a status report.
    ///
    /// Sub-state suffixes such as `Hold:0` or `Door:1` are accepted and
    /// mapped to their base state.
    pub fn from_report(state: &str) -> Self {
        let base = state.split(':').next().unwrap_or(state);
        match base {
            "Idle" => MachineState::Idle,
            "Run" => MachineState::Run,
            "Hold" => MachineState::Hold,
            "Jog" => MachineState::Jog,
            "Home" => MachineState::Home,
            "Alarm" => MachineState::Alarm,
            "Door" => MachineState::Door,
            "Sleep" => MachineState::Sleep,
            _ => MachineState::Unknown,
        }
    }

    /// Check if this state indicates active motion
    pub fn is_moving(&self) -> bool {
        matches!(
            self,
            MachineState::Run | MachineState::Jog | MachineState::Home
        )
    }

    /// Check if this state indicates a safety lockout
    pub fn is_error(&self) -> bool {
        matches!(self, MachineState::Alarm)
    }

    /// Check if the serial link is believed up
    pub fn is_connected(&self) -> bool {
        !matches!(self, MachineState::Disconnected)
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "Unknown"),
            Self::Idle => write!(f, "Idle"),
            Self::Run => write!(f, "Run"),
            Self::Hold => write!(f, "Hold"),
            Self::Jog => write!(f, "Jog"),
            Self::Home => write!(f, "Home"),
            Self::Alarm => write!(f, "Alarm"),
            Self::Door => write!(f, "Door"),
            Self::Sleep => write!(f, "Sleep"),
            Self::Disconnected => write!(f, "Disconnected"),
        }
    }
}

/// Point-in-time view of the machine state and position.
///
/// Snapshots are immutable values swapped atomically through a watch
/// channel: the background reader is the only writer, every other task
/// reads without locking. `received_at` increases monotonically; consumers
/// may observe a stale snapshot but can always detect it through [`age`]
/// — staleness is never interpreted as an alarm.
///
/// [`age`]: StatusSnapshot::age
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusSnapshot {
    /// Machine state from the report
    pub state: MachineState,
    /// Machine position from the report
    pub position: Position,
    /// When the report was received
    pub received_at: Instant,
}

impl StatusSnapshot {
    /// Snapshot stamped with the current time
    pub fn new(state: MachineState, position: Position) -> Self {
        Self {
            state,
            position,
            received_at: Instant::now(),
        }
    }

    /// Initial snapshot before any report has arrived
    pub fn disconnected() -> Self {
        Self::new(MachineState::Disconnected, Position::default())
    }

    /// Time elapsed since the report was received
    pub fn age(&self) -> Duration {
        self.received_at.elapsed()
    }

    /// Check whether this snapshot is older than `threshold`
    pub fn is_stale(&self, threshold: Duration) -> bool {
        self.age() > threshold
    }
}

/// Phase of a scan run.
///
/// Exactly one run is active at a time; the run owns its phase, current
/// point index, and per-point outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanPhase {
    /// No run in progress
    Idle,
    /// Validating the pattern and collaborators
    Initializing,
    /// Homing the stage before the first point
    Homing,
    /// Positioning the stage at the current point
    Moving,
    /// Capturing images at the current point
    Capturing,
    /// Persisting captured images
    Storing,
    /// Run suspended; resumes into the phase it paused from
    Paused,
    /// Cancel requested; unwinding the in-flight point
    Cancelling,
    /// Run finished; per-point failures may still be recorded
    Completed,
    /// Run aborted by a fatal error
    Failed,
}

impl ScanPhase {
    /// Check if this phase is terminal for the run
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanPhase::Completed | ScanPhase::Failed)
    }

    /// Check if a pause request is honored in this phase
    pub fn is_pausable(&self) -> bool {
        matches!(
            self,
            ScanPhase::Moving | ScanPhase::Capturing | ScanPhase::Storing
        )
    }

    /// Check if a transition from this phase to `target` is valid.
    pub fn can_transition_to(&self, target: ScanPhase) -> bool {
        use ScanPhase::*;
        if *self == target {
            return true;
        }
        match (self, target) {
            // Run lifecycle
            (Idle, Initializing) => true,
            (Initializing, Homing | Moving | Failed) => true,
            (Homing, Moving | Failed) => true,
            // Point loop
            (Moving, Capturing | Completed | Failed) => true,
            (Capturing, Storing | Moving | Completed | Failed) => true,
            (Storing, Moving | Completed | Failed) => true,
            // Pause suspends the point loop and resumes into the same phase
            (Moving | Capturing | Storing, Paused) => true,
            (Paused, Moving | Capturing | Storing) => true,
            // Cancel is honored from any non-terminal phase
            (phase, Cancelling) if !phase.is_terminal() => true,
            (Cancelling, Idle) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Initializing => write!(f, "Initializing"),
            Self::Homing => write!(f, "Homing"),
            Self::Moving => write!(f, "Moving"),
            Self::Capturing => write!(f, "Capturing"),
            Self::Storing => write!(f, "Storing"),
            Self::Paused => write!(f, "Paused"),
            Self::Cancelling => write!(f, "Cancelling"),
            Self::Completed => write!(f, "Completed"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_axis_accessors() {
        let pos = Position::new(1.0, 2.0, 3.0, 45.0);
        assert_eq!(pos.axis(Axis::X), 1.0);
        assert_eq!(pos.axis(Axis::C), 45.0);
        assert_eq!(pos.with_axis(Axis::Z, 9.0).z, 9.0);
    }

    #[test]
    fn test_position_approx_eq() {
        let a = Position::new(10.0, 10.0, 5.0, 90.0);
        let b = Position::new(10.005, 9.995, 5.0, 90.0);
        assert!(a.approx_eq(&b, 0.01));
        assert!(!a.approx_eq(&b, 0.001));
    }

    #[test]
    fn test_wrapping_axis_normalizes() {
        let limits = MachineLimits::default();
        let normalized = limits
            .normalize(Position::new(10.0, 10.0, 10.0, 450.0))
            .unwrap();
        assert!((normalized.c - 90.0).abs() < 1e-9);

        let negative = limits
            .normalize(Position::new(10.0, 10.0, 10.0, -90.0))
            .unwrap();
        assert!((negative.c - 270.0).abs() < 1e-9);
    }

    #[test]
    fn test_linear_axis_rejects_out_of_range() {
        let limits = MachineLimits::default();
        let err = limits
            .normalize(Position::new(10.0, 250.0, 10.0, 0.0))
            .unwrap_err();
        match err {
            MotionError::OutOfRange { axis, value, .. } => {
                assert_eq!(axis, Axis::Y);
                assert_eq!(value, 250.0);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_machine_state_from_report() {
        assert_eq!(MachineState::from_report("Idle"), MachineState::Idle);
        assert_eq!(MachineState::from_report("Hold:0"), MachineState::Hold);
        assert_eq!(MachineState::from_report("Door:1"), MachineState::Door);
        assert_eq!(MachineState::from_report("Wat"), MachineState::Unknown);
    }

    #[test]
    fn test_snapshot_staleness() {
        let snapshot = StatusSnapshot::new(MachineState::Idle, Position::default());
        assert!(!snapshot.is_stale(Duration::from_secs(3)));
        assert!(snapshot.is_stale(Duration::ZERO));
    }

    #[test]
    fn test_scan_phase_transitions() {
        use ScanPhase::*;
        assert!(Idle.can_transition_to(Initializing));
        assert!(Moving.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Moving));
        assert!(Storing.can_transition_to(Completed));
        assert!(Capturing.can_transition_to(Cancelling));
        assert!(Cancelling.can_transition_to(Idle));
        assert!(!Completed.can_transition_to(Cancelling));
        assert!(!Idle.can_transition_to(Moving));
        assert!(!Paused.can_transition_to(Completed));
    }
}
