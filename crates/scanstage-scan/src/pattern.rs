//! Scan pattern generation
//!
//! Patterns are generated up front as ordered, indexable, finite point
//! lists. The orchestrator walks the list; it never asks a generator for
//! "the next point".

use scanstage_core::Position;
use serde::{Deserialize, Serialize};

/// Camera focus behavior at a point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusMode {
    /// Keep the focus set before the run started
    #[default]
    Fixed,
    /// Autofocus before each capture at this point
    AutoPerPoint,
}

/// One stop in a scan pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanPoint {
    /// Stage position to capture from
    pub position: Position,
    /// Focus behavior at this point
    pub focus_mode: FocusMode,
    /// Number of frames to capture
    pub capture_count: u32,
}

impl ScanPoint {
    /// Point with default focus and a single frame
    pub fn at(position: Position) -> Self {
        Self {
            position,
            focus_mode: FocusMode::default(),
            capture_count: 1,
        }
    }
}

/// Rectangular grid sweep at a fixed height and turntable angle.
///
/// Rows are walked boustrophedon (alternating direction) so the stage
/// never makes a full-width rapid between rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridPattern {
    /// First X coordinate
    pub x_start: f64,
    /// Last X coordinate
    pub x_end: f64,
    /// Number of columns
    pub x_steps: usize,
    /// First Y coordinate
    pub y_start: f64,
    /// Last Y coordinate
    pub y_end: f64,
    /// Number of rows
    pub y_steps: usize,
    /// Fixed Z height for the sweep
    pub z_height: f64,
    /// Fixed turntable angle for the sweep
    pub c_angle: f64,
    /// Focus behavior at every point
    pub focus_mode: FocusMode,
    /// Frames per point
    pub capture_count: u32,
}

impl GridPattern {
    /// Generate the ordered point list
    pub fn generate(&self) -> Vec<ScanPoint> {
        let x_steps = self.x_steps.max(1);
        let y_steps = self.y_steps.max(1);
        let mut points = Vec::with_capacity(x_steps * y_steps);

        for row in 0..y_steps {
            let y = interpolate(self.y_start, self.y_end, row, y_steps);
            let columns: Vec<usize> = if row % 2 == 0 {
                (0..x_steps).collect()
            } else {
                (0..x_steps).rev().collect()
            };
            for col in columns {
                let x = interpolate(self.x_start, self.x_end, col, x_steps);
                points.push(ScanPoint {
                    position: Position::new(x, y, self.z_height, self.c_angle),
                    focus_mode: self.focus_mode,
                    capture_count: self.capture_count,
                });
            }
        }
        points
    }
}

/// Cylindrical sweep: turntable rotations at a set of Z heights.
///
/// The camera stays at a fixed X/Y standoff while the part rotates; each
/// height level walks the full set of angles before the stage lifts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CylindricalPattern {
    /// Fixed camera X position
    pub x_position: f64,
    /// Fixed camera Y position
    pub y_position: f64,
    /// First Z height
    pub z_start: f64,
    /// Last Z height
    pub z_end: f64,
    /// Number of height levels
    pub z_steps: usize,
    /// Turntable positions per level
    pub angle_steps: usize,
    /// Angle of the first stop (degrees)
    pub angle_offset: f64,
    /// Focus behavior at every point
    pub focus_mode: FocusMode,
    /// Frames per point
    pub capture_count: u32,
}

impl CylindricalPattern {
    /// Generate the ordered point list
    pub fn generate(&self) -> Vec<ScanPoint> {
        let z_steps = self.z_steps.max(1);
        let angle_steps = self.angle_steps.max(1);
        let angle_increment = 360.0 / angle_steps as f64;
        let mut points = Vec::with_capacity(z_steps * angle_steps);

        for level in 0..z_steps {
            let z = interpolate(self.z_start, self.z_end, level, z_steps);
            for stop in 0..angle_steps {
                let c = (self.angle_offset + stop as f64 * angle_increment).rem_euclid(360.0);
                points.push(ScanPoint {
                    position: Position::new(self.x_position, self.y_position, z, c),
                    focus_mode: self.focus_mode,
                    capture_count: self.capture_count,
                });
            }
        }
        points
    }
}

/// Declarative pattern description, loadable from a config or request
/// body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PatternSpec {
    /// Rectangular grid sweep
    Grid(GridPattern),
    /// Cylindrical turntable sweep
    Cylindrical(CylindricalPattern),
    /// Explicit point list
    Explicit {
        /// The points, in scan order.
        points: Vec<ScanPoint>,
    },
}

impl PatternSpec {
    /// Generate the ordered point list
    pub fn generate(&self) -> Vec<ScanPoint> {
        match self {
            PatternSpec::Grid(grid) => grid.generate(),
            PatternSpec::Cylindrical(cylinder) => cylinder.generate(),
            PatternSpec::Explicit { points } => points.clone(),
        }
    }
}

/// Evenly spaced value for `step` of `steps` between `start` and `end`
fn interpolate(start: f64, end: f64, step: usize, steps: usize) -> f64 {
    if steps <= 1 {
        return start;
    }
    start + (end - start) * (step as f64 / (steps - 1) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_is_boustrophedon() {
        let pattern = GridPattern {
            x_start: 0.0,
            x_end: 10.0,
            x_steps: 3,
            y_start: 0.0,
            y_end: 10.0,
            y_steps: 2,
            z_height: 5.0,
            c_angle: 0.0,
            focus_mode: FocusMode::Fixed,
            capture_count: 1,
        };
        let points = pattern.generate();
        assert_eq!(points.len(), 6);

        let xs: Vec<f64> = points.iter().map(|p| p.position.x).collect();
        assert_eq!(xs, vec![0.0, 5.0, 10.0, 10.0, 5.0, 0.0]);
        assert!(points.iter().all(|p| p.position.z == 5.0));
    }

    #[test]
    fn test_cylindrical_walks_angles_per_level() {
        let pattern = CylindricalPattern {
            x_position: 100.0,
            y_position: 50.0,
            z_start: 0.0,
            z_end: 30.0,
            z_steps: 2,
            angle_steps: 4,
            angle_offset: 0.0,
            focus_mode: FocusMode::Fixed,
            capture_count: 2,
        };
        let points = pattern.generate();
        assert_eq!(points.len(), 8);

        let first_level: Vec<f64> = points[..4].iter().map(|p| p.position.c).collect();
        assert_eq!(first_level, vec![0.0, 90.0, 180.0, 270.0]);
        assert!(points[..4].iter().all(|p| p.position.z == 0.0));
        assert!(points[4..].iter().all(|p| p.position.z == 30.0));
        assert!(points.iter().all(|p| p.capture_count == 2));
    }

    #[test]
    fn test_angle_offset_wraps() {
        let pattern = CylindricalPattern {
            x_position: 0.0,
            y_position: 0.0,
            z_start: 0.0,
            z_end: 0.0,
            z_steps: 1,
            angle_steps: 2,
            angle_offset: 270.0,
            focus_mode: FocusMode::Fixed,
            capture_count: 1,
        };
        let angles: Vec<f64> = pattern.generate().iter().map(|p| p.position.c).collect();
        assert_eq!(angles, vec![270.0, 90.0]);
    }

    #[test]
    fn test_degenerate_steps_produce_one_point() {
        let pattern = GridPattern {
            x_start: 5.0,
            x_end: 5.0,
            x_steps: 0,
            y_start: 5.0,
            y_end: 5.0,
            y_steps: 0,
            z_height: 0.0,
            c_angle: 0.0,
            focus_mode: FocusMode::Fixed,
            capture_count: 1,
        };
        assert_eq!(pattern.generate().len(), 1);
    }
}
