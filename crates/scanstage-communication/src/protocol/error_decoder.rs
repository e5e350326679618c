//! Firmware error and alarm code decoder
//! Converts numeric error and alarm codes to human-readable messages

/// Decode a firmware error code to a human-readable message
pub fn decode_error(code: u8) -> String {
    match code {
        1 => "G-code words consist of a letter and a value. Letter was not found.".to_string(),
        2 => "Numeric value format is not valid or missing an expected value.".to_string(),
        3 => "'$' system command was not recognized or supported.".to_string(),
        4 => "Negative value received for an expected positive value.".to_string(),
        5 => "Homing cycle is not enabled via settings.".to_string(),
        8 => "'$' command cannot be used unless the controller is idle.".to_string(),
        9 => "G-code locked out during alarm or jog state.".to_string(),
        10 => "Soft limits cannot be enabled without homing also enabled.".to_string(),
        11 => "Max characters per line exceeded. Line was not processed and executed.".to_string(),
        15 => "Jog target exceeds machine travel. Command ignored.".to_string(),
        16 => "Jog command with no '=' or contains prohibited g-code.".to_string(),
        20 => "Unsupported or invalid g-code command found in block.".to_string(),
        21 => "More than one g-code command from same modal group found in block.".to_string(),
        22 => "Feed rate has not yet been set or is undefined.".to_string(),
        23 => "G-code command in block requires an integer value.".to_string(),
        24 => "Two G-code commands that both require the use of axis words were detected."
            .to_string(),
        25 => "A G-code word was repeated in the block.".to_string(),
        26 => "A G-code command requires axis words in the block, but none were detected."
            .to_string(),
        _ => format!("Unknown error code {}", code),
    }
}

/// Decode a firmware alarm code to a human-readable message
pub fn decode_alarm(code: u8) -> String {
    match code {
        1 => "Hard limit triggered. Machine position is likely lost; re-homing is strongly \
              recommended."
            .to_string(),
        2 => "Motion target exceeds machine travel. Position safely retained; alarm may be \
              unlocked."
            .to_string(),
        3 => "Reset while in motion. Position cannot be guaranteed; re-homing is strongly \
              recommended."
            .to_string(),
        6 => "Homing fail. Reset during active homing cycle.".to_string(),
        7 => "Homing fail. Safety door was opened during active homing cycle.".to_string(),
        8 => "Homing fail. Cycle failed to clear limit switch when pulling off.".to_string(),
        9 => "Homing fail. Could not find limit switch within search distance.".to_string(),
        _ => format!("Unknown alarm code {}", code),
    }
}

/// Format an error code with its description
pub fn format_error(code: u8) -> String {
    format!("error:{} ({})", code, decode_error(code))
}

/// Format an alarm code with its description
pub fn format_alarm(code: u8) -> String {
    format!("ALARM:{} ({})", code, decode_alarm(code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_codes() {
        assert!(decode_error(9).contains("locked out"));
        assert!(decode_alarm(9).contains("limit switch"));
    }

    #[test]
    fn test_unknown_codes() {
        assert_eq!(decode_error(200), "Unknown error code 200");
        assert_eq!(decode_alarm(200), "Unknown alarm code 200");
    }

    #[test]
    fn test_formatting() {
        assert!(format_error(22).starts_with("error:22 ("));
        assert!(format_alarm(1).starts_with("ALARM:1 ("));
    }
}
