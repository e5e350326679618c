//! Incoming line classification
//!
//! Every line arriving from the controller is classified into one of a
//! small set of responses. The reader loop routes each class differently:
//! acknowledgments resolve pending commands, status reports refresh the
//! snapshot cache, bracketed messages feed the message log, and anything
//! unrecognized is logged and dropped without blocking the reader.

use super::status::{parse_status, StatusReport};
use std::fmt;

/// Classified controller response
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// `ok` acknowledgment
    Ok,
    /// `error:<code>` rejection
    Error(u8),
    /// `ALARM:<code>` safety lockout notification
    Alarm(u8),
    /// Status report `<State|...>`
    Status(StatusReport),
    /// Bracketed informational message `[MSG:...]` (content without the
    /// wrapper)
    Message(String),
    /// Other bracketed output such as `[GC:...]` or `[VER:...]`
    Info(String),
    /// Firmware startup greeting
    Greeting(String),
    /// Anything else
    Unrecognized(String),
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Error(code) => write!(f, "{}", super::error_decoder::format_error(*code)),
            Self::Alarm(code) => write!(f, "{}", super::error_decoder::format_alarm(*code)),
            Self::Status(report) => write!(f, "status:{}", report.state),
            Self::Message(msg) => write!(f, "msg:{}", msg),
            Self::Info(info) => write!(f, "info:{}", info),
            Self::Greeting(text) => write!(f, "greeting:{}", text),
            Self::Unrecognized(line) => write!(f, "unrecognized:{}", line),
        }
    }
}

/// Classify a single line from the controller.
///
/// Returns `None` for empty lines.
pub fn parse_line(line: &str) -> Option<Response> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    if line == "ok" {
        return Some(Response::Ok);
    }

    if let Some(code_str) = line.strip_prefix("error:") {
        if let Ok(code) = code_str.trim().parse::<u8>() {
            return Some(Response::Error(code));
        }
    }

    // GRBL emits `ALARM:n`; some forks lowercase it.
    let lower = line.to_ascii_lowercase();
    if let Some(code_str) = lower.strip_prefix("alarm:") {
        if let Ok(code) = code_str.trim().parse::<u8>() {
            return Some(Response::Alarm(code));
        }
    }

    if line.starts_with('<') && line.ends_with('>') {
        if let Some(report) = parse_status(line) {
            return Some(Response::Status(report));
        }
        return Some(Response::Unrecognized(line.to_string()));
    }

    if line.starts_with('[') && line.ends_with(']') {
        let body = &line[1..line.len() - 1];
        if let Some(msg) = body.strip_prefix("MSG:") {
            return Some(Response::Message(msg.trim().to_string()));
        }
        return Some(Response::Info(body.to_string()));
    }

    if line.starts_with("Grbl ") || line.starts_with("FluidNC ") {
        return Some(Response::Greeting(line.to_string()));
    }

    Some(Response::Unrecognized(line.to_string()))
}
