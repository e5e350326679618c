//! Scripted in-memory transport
//!
//! Stands in for a serial-connected controller in tests and dry runs. The
//! test side holds a [`MockHandle`] to script responses and inspect
//! traffic while the protocol client owns the [`MockTransport`].

use super::{LineTransport, TransportResult};
use parking_lot::Mutex;
use scanstage_core::TransportError;
use std::collections::VecDeque;
use std::sync::Arc;

/// Scripted reply to a written line
#[derive(Debug, Clone, Default)]
struct Reply {
    /// Lines queued for the reader when the command is seen
    lines: Vec<String>,
    /// New status report handed out on subsequent `?` queries
    set_status: Option<String>,
}

#[derive(Default)]
struct MockState {
    /// Lines waiting to be read by the client
    incoming: VecDeque<String>,
    /// Every line the client wrote, in order
    sent: Vec<String>,
    /// Every raw byte the client wrote, in order
    raw: Vec<u8>,
    /// Scripted replies keyed by command prefix
    replies: Vec<(String, Reply)>,
    /// Status report line handed out on `?`
    status_line: Option<String>,
    closed: bool,
}

impl MockState {
    fn on_written(&mut self, line: &str) {
        let reply = self
            .replies
            .iter()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, reply)| reply.clone());
        if let Some(reply) = reply {
            self.incoming.extend(reply.lines.iter().cloned());
            if let Some(status) = reply.set_status {
                self.status_line = Some(status);
            }
        }
    }
}

/// Transport half handed to the protocol client
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

/// Test half: scripts responses, inspects traffic
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Create a connected transport/handle pair
    pub fn new() -> (MockTransport, MockHandle) {
        let state = Arc::new(Mutex::new(MockState::default()));
        (
            MockTransport {
                state: state.clone(),
            },
            MockHandle { state },
        )
    }
}

impl MockHandle {
    /// Queue a line for the client to read (unsolicited traffic)
    pub fn push_line(&self, line: impl Into<String>) {
        self.state.lock().incoming.push_back(line.into());
    }

    /// Script a reply: when a written line starts with `prefix`, queue
    /// `lines` for the reader.
    pub fn respond(&self, prefix: impl Into<String>, lines: Vec<&str>) {
        self.respond_with(prefix, lines, None);
    }

    /// Script a reply that also changes the status report subsequently
    /// handed out for `?` queries.
    pub fn respond_with(
        &self,
        prefix: impl Into<String>,
        lines: Vec<&str>,
        set_status: Option<&str>,
    ) {
        self.state.lock().replies.push((
            prefix.into(),
            Reply {
                lines: lines.into_iter().map(String::from).collect(),
                set_status: set_status.map(String::from),
            },
        ));
    }

    /// Set the status report line handed out on `?` queries
    pub fn set_status(&self, line: impl Into<String>) {
        self.state.lock().status_line = Some(line.into());
    }

    /// Lines the client has written so far
    pub fn sent_lines(&self) -> Vec<String> {
        self.state.lock().sent.clone()
    }

    /// Count of sent lines starting with `prefix`
    pub fn sent_count(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .sent
            .iter()
            .filter(|l| l.starts_with(prefix))
            .count()
    }

    /// Raw bytes the client has written so far
    pub fn raw_bytes(&self) -> Vec<u8> {
        self.state.lock().raw.clone()
    }

    /// Simulate losing the link: every further operation fails
    pub fn fail_link(&self) {
        self.state.lock().closed = true;
    }
}

impl LineTransport for MockTransport {
    fn read_line(&mut self) -> TransportResult<Option<String>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(TransportError::Closed);
        }
        Ok(state.incoming.pop_front())
    }

    fn write_line(&mut self, line: &str) -> TransportResult<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(TransportError::Closed);
        }
        state.sent.push(line.to_string());
        state.on_written(line);
        Ok(())
    }

    fn write_raw(&mut self, bytes: &[u8]) -> TransportResult<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(TransportError::Closed);
        }
        state.raw.extend_from_slice(bytes);
        if bytes.contains(&b'?') {
            if let Some(status) = state.status_line.clone() {
                state.incoming.push_back(status);
            }
        }
        Ok(())
    }

    fn close(&mut self) -> TransportResult<()> {
        self.state.lock().closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_reply() {
        let (mut transport, handle) = MockTransport::new();
        handle.respond("G1", vec!["ok"]);

        transport.write_line("G1 X10.000 F1500").unwrap();
        assert_eq!(transport.read_line().unwrap().as_deref(), Some("ok"));
        assert_eq!(transport.read_line().unwrap(), None);
        assert_eq!(handle.sent_lines(), vec!["G1 X10.000 F1500"]);
    }

    #[test]
    fn test_status_query() {
        let (mut transport, handle) = MockTransport::new();
        handle.set_status("<Idle|MPos:0.000,0.000,0.000,0.000>");

        transport.write_raw(b"?").unwrap();
        assert_eq!(
            transport.read_line().unwrap().as_deref(),
            Some("<Idle|MPos:0.000,0.000,0.000,0.000>")
        );
    }

    #[test]
    fn test_reply_updates_status() {
        let (mut transport, handle) = MockTransport::new();
        handle.set_status("<Idle|MPos:0.000,0.000,0.000,0.000>");
        handle.respond_with(
            "G1",
            vec!["ok"],
            Some("<Idle|MPos:10.000,0.000,0.000,0.000>"),
        );

        transport.write_line("G1 X10.000 F1500").unwrap();
        transport.read_line().unwrap(); // ok
        transport.write_raw(b"?").unwrap();
        assert_eq!(
            transport.read_line().unwrap().as_deref(),
            Some("<Idle|MPos:10.000,0.000,0.000,0.000>")
        );
    }
}
