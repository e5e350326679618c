//! Status report parsing
//!
//! Parses firmware status reports of the form
//! `<State|MPos:x,y,z,c|WCO:x,y,z,c|FS:feed,spindle|...>` into a typed
//! report. Firmware can be configured to report machine (`MPos`) or work
//! (`WPos`) coordinates; when only work coordinates and an offset are
//! present, the machine position is derived as `MPos = WPos + WCO`.

use scanstage_core::{MachineState, Position};

/// Parsed status report
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    /// Machine state from the leading field
    pub state: MachineState,
    /// Machine position (`MPos`), if reported
    pub machine_position: Option<Position>,
    /// Work position (`WPos`), if reported
    pub work_position: Option<Position>,
    /// Work coordinate offset (`WCO`), if reported
    pub work_offset: Option<Position>,
    /// Current feed rate from `F:` or `FS:`, if reported
    pub feed_rate: Option<f64>,
}

impl StatusReport {
    /// Resolve the machine position, deriving it from the work position
    /// and an offset when the report carried only work coordinates.
    ///
    /// `residual_offset` is the last offset seen on the wire; firmware
    /// omits `WCO` from most reports to save bandwidth.
    pub fn resolve_machine_position(&self, residual_offset: Option<Position>) -> Option<Position> {
        if let Some(mpos) = self.machine_position {
            return Some(mpos);
        }
        let wpos = self.work_position?;
        let wco = self.work_offset.or(residual_offset)?;
        Some(Position::new(
            wpos.x + wco.x,
            wpos.y + wco.y,
            wpos.z + wco.z,
            wpos.c + wco.c,
        ))
    }
}

/// Parse a status report line.
///
/// Returns `None` unless the line is bracketed `<...>` and carries at
/// least a state field.
pub fn parse_status(line: &str) -> Option<StatusReport> {
    let line = line.trim();
    if !line.starts_with('<') || !line.ends_with('>') {
        return None;
    }
    let body = &line[1..line.len() - 1];

    let mut parts = body.split('|');
    let state_field = parts.next()?.trim();
    if state_field.is_empty() {
        return None;
    }

    let mut report = StatusReport {
        state: MachineState::from_report(state_field),
        machine_position: None,
        work_position: None,
        work_offset: None,
        feed_rate: None,
    };

    for part in parts {
        let part = part.trim();
        if let Some(pos_str) = part.strip_prefix("MPos:") {
            report.machine_position = parse_axes(pos_str);
        } else if let Some(pos_str) = part.strip_prefix("WPos:") {
            report.work_position = parse_axes(pos_str);
        } else if let Some(offset_str) = part.strip_prefix("WCO:") {
            report.work_offset = parse_axes(offset_str);
        } else if let Some(rate_str) = part.strip_prefix("F:") {
            report.feed_rate = rate_str.trim().parse::<f64>().ok();
        } else if let Some(fs_str) = part.strip_prefix("FS:") {
            report.feed_rate = fs_str
                .split(',')
                .next()
                .and_then(|f| f.trim().parse::<f64>().ok());
        }
        // Other fields (Bf:, Ov:, Pn:, ...) are not needed here.
    }

    Some(report)
}

/// Parse a comma-separated coordinate list into a position.
///
/// Three coordinates are accepted for controllers configured without the
/// rotary axis; the C axis then defaults to zero.
fn parse_axes(pos_str: &str) -> Option<Position> {
    let coords: Vec<f64> = pos_str
        .split(',')
        .map(|s| s.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .ok()?;

    if coords.len() < 3 {
        return None;
    }

    Some(Position::new(
        coords[0],
        coords[1],
        coords[2],
        coords.get(3).copied().unwrap_or(0.0),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_report() {
        let report = parse_status("<Idle|MPos:0.000,0.000,0.000,0.000>").unwrap();
        assert_eq!(report.state, MachineState::Idle);
        assert_eq!(
            report.machine_position,
            Some(Position::new(0.0, 0.0, 0.0, 0.0))
        );
    }

    #[test]
    fn test_three_axis_report() {
        let report = parse_status("<Run|MPos:10.000,5.000,2.500>").unwrap();
        let mpos = report.machine_position.unwrap();
        assert_eq!(mpos.c, 0.0);
        assert_eq!(mpos.x, 10.0);
    }

    #[test]
    fn test_work_position_resolution() {
        let report = parse_status("<Idle|WPos:10.000,10.000,0.000,0.000>").unwrap();
        assert_eq!(report.machine_position, None);

        let residual = Some(Position::new(5.0, 0.0, 0.0, 0.0));
        let resolved = report.resolve_machine_position(residual).unwrap();
        assert_eq!(resolved.x, 15.0);

        // Without any offset the machine position cannot be derived.
        assert_eq!(report.resolve_machine_position(None), None);
    }

    #[test]
    fn test_wco_in_report_wins() {
        let report =
            parse_status("<Idle|WPos:1.000,2.000,3.000,0.000|WCO:10.000,10.000,10.000,0.000>")
                .unwrap();
        let resolved = report
            .resolve_machine_position(Some(Position::new(99.0, 99.0, 99.0, 0.0)))
            .unwrap();
        assert_eq!(resolved.x, 11.0);
        assert_eq!(resolved.z, 13.0);
    }

    #[test]
    fn test_feed_rate_fields() {
        let report = parse_status("<Run|MPos:0,0,0,0|FS:1500.0,0>").unwrap();
        assert_eq!(report.feed_rate, Some(1500.0));

        let report = parse_status("<Run|MPos:0,0,0,0|F:800>").unwrap();
        assert_eq!(report.feed_rate, Some(800.0));
    }

    #[test]
    fn test_substate_suffix() {
        let report = parse_status("<Hold:0|MPos:0,0,0,0>").unwrap();
        assert_eq!(report.state, MachineState::Hold);
    }

    #[test]
    fn test_rejects_non_reports() {
        assert!(parse_status("ok").is_none());
        assert!(parse_status("<>").is_none());
        assert!(parse_status("[MSG:Homing done]").is_none());
    }

    #[test]
    fn test_garbage_coordinates_dropped() {
        let report = parse_status("<Idle|MPos:a,b,c,d>").unwrap();
        assert_eq!(report.machine_position, None);
    }
}
