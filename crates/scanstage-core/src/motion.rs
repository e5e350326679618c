//! Motion control interface
//!
//! Defines the single typed interface the scan orchestrator drives. The
//! concrete implementation lives in the communication crate; tests and dry
//! runs substitute doubles.

use crate::data::{Axis, MachineState, Position};
use crate::error::Result;
use async_trait::async_trait;

/// Typed, validated motion operations over the stage.
#[async_trait]
pub trait MotionControl: Send + Sync {
    /// Move all changed axes to `target` in one combined command.
    ///
    /// Validates the target against the axis limits before any wire
    /// traffic. `feed_rate` of `None` uses the configured default. Returns
    /// once motion has completed (the machine settled back to idle), not
    /// merely once the command was acknowledged.
    async fn move_to(&self, target: Position, feed_rate: Option<f64>) -> Result<()>;

    /// Run the homing cycle, restricted to `axes` when given.
    ///
    /// Clears an alarm state first if needed. Returns once the firmware
    /// reports homing complete and the machine verifies idle.
    async fn home(&self, axes: Option<&[Axis]>) -> Result<()>;

    /// Last known stage position (cached; may be stale)
    fn position(&self) -> Position;

    /// Last known machine state (cached; may be stale)
    fn machine_state(&self) -> MachineState;

    /// Whether a homing cycle has completed since connect/alarm
    fn is_homed(&self) -> bool;

    /// Halt the machine immediately, bypassing the command queue
    async fn emergency_stop(&self) -> Result<()>;
}
