//! Protocol client
//!
//! Turns the raw line transport into correlated command results and a live
//! status cache. A single background task owns the transport exclusively:
//! it is the only reader, and every write — normal commands, priority
//! commands, realtime bytes, the periodic status poll — funnels through it,
//! so the wire is never written from two call sites concurrently.
//!
//! Correlation model: the wire protocol supports at most one outstanding
//! normal command (it is not proven safe for pipelining). Each accepted
//! command becomes a pending entry with a oneshot result channel; `ok` and
//! `error:` responses resolve the oldest entry. Priority commands (unlock,
//! status query, reset) bypass the single-slot discipline because the
//! firmware services them out of band. A command that times out frees the
//! slot — whether a missing `ok` still means success is decided by the
//! motion layer, which knows whether the command was motion-bearing.

use crate::protocol::response::{parse_line, Response};
use crate::protocol::{error_decoder, status::StatusReport};
use crate::transport::LineTransport;
use parking_lot::RwLock;
use scanstage_core::event_bus::{event_bus, AppEvent, MachineEvent};
use scanstage_core::{Error, MachineState, Position, ProtocolError, Result, StatusSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// Reader loop tick; bounds how quickly writes and timeouts are serviced
const TICK: Duration = Duration::from_millis(10);

/// Realtime status query byte
pub const STATUS_QUERY: u8 = b'?';
/// Realtime reset byte (0x18, Ctrl-X)
pub const RESET: u8 = 0x18;

/// Configuration for the protocol client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Default acknowledgment timeout for commands, in milliseconds
    pub command_timeout_ms: u64,
    /// Interval between automatic status polls, in milliseconds
    pub poll_interval_ms: u64,
    /// Snapshot age beyond which the cache counts as stale, in milliseconds
    pub staleness_threshold_ms: u64,
    /// Bounded capacity of the bracketed-message log
    pub message_log_capacity: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: 2000,
            poll_interval_ms: 200,
            staleness_threshold_ms: 3000,
            message_log_capacity: 50,
        }
    }
}

impl ProtocolConfig {
    /// Default command timeout as a duration
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Staleness threshold as a duration
    pub fn staleness_threshold(&self) -> Duration {
        Duration::from_millis(self.staleness_threshold_ms)
    }
}

/// Bounded log of bracketed `[MSG:...]` lines.
///
/// Entries carry monotonically increasing sequence numbers so consumers
/// (homing detection, diagnostics) can scan incrementally without racing
/// the reader.
#[derive(Debug)]
pub struct MessageLog {
    entries: VecDeque<(u64, String)>,
    next_seq: u64,
    capacity: usize,
}

impl MessageLog {
    fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            next_seq: 0,
            capacity,
        }
    }

    fn push(&mut self, text: String) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((self.next_seq, text));
        self.next_seq += 1;
    }

    /// Sequence number the next message will receive
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Entries with sequence number `seq` or later, oldest first
    pub fn since(&self, seq: u64) -> Vec<(u64, String)> {
        self.entries
            .iter()
            .filter(|(s, _)| *s >= seq)
            .cloned()
            .collect()
    }

    /// The most recent messages, oldest first
    pub fn recent(&self) -> Vec<String> {
        self.entries.iter().map(|(_, m)| m.clone()).collect()
    }
}

struct PendingCommand {
    text: String,
    submitted_at: Instant,
    timeout: Duration,
    result: oneshot::Sender<std::result::Result<(), ProtocolError>>,
}

struct LineRequest {
    text: String,
    timeout: Duration,
    result: oneshot::Sender<std::result::Result<(), ProtocolError>>,
}

enum PriorityRequest {
    /// Line command written ahead of the normal queue (e.g. `$X`)
    Line(LineRequest),
    /// Single realtime byte, no acknowledgment expected
    Realtime(u8),
}

/// Client handle over the background reader task.
///
/// Cheap to share via reference; all methods take `&self`.
pub struct ProtocolClient {
    command_tx: mpsc::Sender<LineRequest>,
    priority_tx: mpsc::Sender<PriorityRequest>,
    shutdown_tx: watch::Sender<bool>,
    status_rx: watch::Receiver<StatusSnapshot>,
    messages: Arc<RwLock<MessageLog>>,
    config: ProtocolConfig,
    io_task: Option<JoinHandle<()>>,
}

impl ProtocolClient {
    /// Take ownership of a transport and start the background reader.
    pub fn connect(transport: Box<dyn LineTransport>, config: ProtocolConfig) -> Self {
        let (command_tx, command_rx) = mpsc::channel(16);
        let (priority_tx, priority_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (status_tx, status_rx) = watch::channel(StatusSnapshot::disconnected());
        let messages = Arc::new(RwLock::new(MessageLog::new(config.message_log_capacity)));

        let io = IoTask {
            transport,
            command_rx,
            priority_rx,
            shutdown_rx,
            status_tx,
            messages: messages.clone(),
            pending: VecDeque::new(),
            residual_offset: None,
            last_state: MachineState::Disconnected,
            last_position: Position::default(),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        };
        let io_task = tokio::spawn(io.run());

        Self {
            command_tx,
            priority_tx,
            shutdown_tx,
            status_rx,
            messages,
            config,
            io_task: Some(io_task),
        }
    }

    /// Send a normal command and await its acknowledgment.
    ///
    /// Queued behind any outstanding command; at most one normal command is
    /// on the wire at a time.
    pub async fn send(&self, text: impl Into<String>, timeout: Duration) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(LineRequest {
                text: text.into(),
                timeout,
                result: tx,
            })
            .await
            .map_err(|_| ProtocolError::Shutdown)?;
        rx.await
            .map_err(|_| ProtocolError::Shutdown)?
            .map_err(Error::from)
    }

    /// Send a priority line command (e.g. `$X`) and await its
    /// acknowledgment.
    ///
    /// Written ahead of the normal queue even while a normal command is
    /// outstanding; its `ok` joins the pending FIFO for correlation.
    pub async fn send_priority(&self, text: impl Into<String>, timeout: Duration) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.priority_tx
            .send(PriorityRequest::Line(LineRequest {
                text: text.into(),
                timeout,
                result: tx,
            }))
            .await
            .map_err(|_| ProtocolError::Shutdown)?;
        rx.await
            .map_err(|_| ProtocolError::Shutdown)?
            .map_err(Error::from)
    }

    /// Send a single realtime byte (status query, reset).
    ///
    /// No acknowledgment is expected; the firmware consumes these outside
    /// the line protocol.
    pub fn send_realtime(&self, byte: u8) -> Result<()> {
        self.priority_tx
            .try_send(PriorityRequest::Realtime(byte))
            .map_err(|_| ProtocolError::Shutdown)?;
        Ok(())
    }

    /// Last cached status snapshot (non-blocking, always available).
    ///
    /// May be stale; check [`StatusSnapshot::age`] against
    /// [`ProtocolClient::staleness_threshold`] when freshness matters.
    pub fn cached_status(&self) -> StatusSnapshot {
        *self.status_rx.borrow()
    }

    /// Whether the cache is older than the configured staleness threshold
    pub fn is_stale(&self) -> bool {
        self.cached_status()
            .is_stale(self.config.staleness_threshold())
    }

    /// Configured staleness threshold
    pub fn staleness_threshold(&self) -> Duration {
        self.config.staleness_threshold()
    }

    /// Configured default command timeout
    pub fn command_timeout(&self) -> Duration {
        self.config.command_timeout()
    }

    /// Issue a status query and await a snapshot newer than this call.
    ///
    /// Used sparingly — only when a decision must not be based on a
    /// possibly stale cache (e.g. "is the machine alarmed before homing").
    pub async fn query_status(&self, timeout: Duration) -> Result<StatusSnapshot> {
        let mut rx = self.status_rx.clone();
        rx.borrow_and_update();
        self.send_realtime(STATUS_QUERY)?;

        tokio::time::timeout(timeout, rx.changed())
            .await
            .map_err(|_| ProtocolError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            })?
            .map_err(|_| ProtocolError::Shutdown)?;
        let snapshot = *rx.borrow_and_update();
        Ok(snapshot)
    }

    /// Sequence number the next bracketed message will receive
    pub fn message_seq(&self) -> u64 {
        self.messages.read().next_seq()
    }

    /// Bracketed messages with sequence number `seq` or later
    pub fn messages_since(&self, seq: u64) -> Vec<(u64, String)> {
        self.messages.read().since(seq)
    }

    /// The most recent bracketed messages, for diagnostics
    pub fn recent_messages(&self) -> Vec<String> {
        self.messages.read().recent()
    }

    /// Stop the background reader and drain pending results.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.io_task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ProtocolClient {
    fn drop(&mut self) {
        // Last-resort cleanup if shutdown() was not awaited. Aborting the
        // task drops its pending oneshot senders, which resolves any
        // waiting callers with a shutdown error rather than hanging them.
        if let Some(task) = self.io_task.take() {
            let _ = self.shutdown_tx.send(true);
            task.abort();
        }
    }
}

/// State owned by the background reader task
struct IoTask {
    transport: Box<dyn LineTransport>,
    command_rx: mpsc::Receiver<LineRequest>,
    priority_rx: mpsc::Receiver<PriorityRequest>,
    shutdown_rx: watch::Receiver<bool>,
    status_tx: watch::Sender<StatusSnapshot>,
    messages: Arc<RwLock<MessageLog>>,
    pending: VecDeque<PendingCommand>,
    /// Last work coordinate offset seen; firmware omits WCO from most
    /// reports
    residual_offset: Option<Position>,
    last_state: MachineState,
    last_position: Position,
    poll_interval: Duration,
}

impl IoTask {
    async fn run(mut self) {
        let mut last_poll = Instant::now();

        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }

            // 1. READ PHASE: drain every complete line available
            loop {
                match self.transport.read_line() {
                    Ok(Some(line)) => self.handle_line(&line),
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!("Transport failed: {}", e);
                        self.publish_state(MachineState::Disconnected);
                        self.drain_pending(ProtocolError::Shutdown);
                        return;
                    }
                }
            }

            // 2. TIMEOUT PHASE: expire the oldest pending command(s)
            while self
                .pending
                .front()
                .is_some_and(|front| front.submitted_at.elapsed() >= front.timeout)
            {
                if let Some(expired) = self.pending.pop_front() {
                    tracing::warn!(
                        command = %expired.text,
                        "No acknowledgment within {:?}; freeing the slot",
                        expired.timeout
                    );
                    let _ = expired.result.send(Err(ProtocolError::Timeout {
                        timeout_ms: expired.timeout.as_millis() as u64,
                    }));
                }
            }

            // 3. PRIORITY PHASE: realtime bytes and queue-jumping lines
            while let Ok(request) = self.priority_rx.try_recv() {
                match request {
                    PriorityRequest::Realtime(byte) => {
                        if let Err(e) = self.transport.write_raw(&[byte]) {
                            tracing::error!("Realtime write failed: {}", e);
                        }
                    }
                    PriorityRequest::Line(request) => self.write_command(request),
                }
            }

            // 4. WRITE PHASE: next normal command, if the slot is free
            if self.pending.is_empty() {
                if let Ok(request) = self.command_rx.try_recv() {
                    self.write_command(request);
                }
            }

            // 5. POLL PHASE: keep the status cache fresh
            if last_poll.elapsed() >= self.poll_interval {
                if let Err(e) = self.transport.write_raw(&[STATUS_QUERY]) {
                    tracing::error!("Status poll failed: {}", e);
                }
                last_poll = Instant::now();
            }

            tokio::time::sleep(TICK).await;
        }

        // Orderly shutdown: nothing may be left waiting on a result.
        self.drain_pending(ProtocolError::Shutdown);
        self.drain_requests();
        let _ = self.transport.close();
    }

    fn write_command(&mut self, request: LineRequest) {
        tracing::trace!(command = %request.text, "-> wire");
        match self.transport.write_line(&request.text) {
            Ok(()) => self.pending.push_back(PendingCommand {
                text: request.text,
                submitted_at: Instant::now(),
                timeout: request.timeout,
                result: request.result,
            }),
            Err(e) => {
                tracing::error!(command = %request.text, "Write failed: {}", e);
                let _ = request.result.send(Err(ProtocolError::Shutdown));
            }
        }
    }

    fn handle_line(&mut self, line: &str) {
        tracing::trace!(line, "<- wire");
        let Some(response) = parse_line(line) else {
            return;
        };
        match response {
            Response::Status(report) => self.apply_status(report),
            Response::Ok => match self.pending.pop_front() {
                Some(command) => {
                    let _ = command.result.send(Ok(()));
                }
                None => tracing::warn!("Received ok with no command outstanding"),
            },
            Response::Error(code) => {
                tracing::warn!("Firmware rejected command: {}", error_decoder::format_error(code));
                match self.pending.pop_front() {
                    Some(command) => {
                        let _ = command.result.send(Err(ProtocolError::Rejected { code }));
                    }
                    None => tracing::warn!("Received error with no command outstanding"),
                }
            }
            Response::Alarm(code) => {
                tracing::warn!("{}", error_decoder::format_alarm(code));
                event_bus().publish(AppEvent::Machine(MachineEvent::AlarmRaised {
                    code,
                    description: error_decoder::decode_alarm(code),
                }));
            }
            Response::Message(text) => {
                tracing::debug!(message = %text, "Controller message");
                self.messages.write().push(text);
            }
            Response::Info(info) => tracing::debug!(info = %info, "Controller info"),
            Response::Greeting(text) => {
                tracing::info!("Controller greeting: {}", text);
                // A greeting mid-session means the firmware rebooted; any
                // outstanding acknowledgments are never coming.
                self.drain_pending(ProtocolError::LinkReset);
            }
            Response::Unrecognized(text) => {
                tracing::debug!(line = %text, "Dropped unrecognized line");
            }
        }
    }

    fn apply_status(&mut self, report: StatusReport) {
        if let Some(offset) = report.work_offset {
            self.residual_offset = Some(offset);
        }
        if let Some(position) = report.resolve_machine_position(self.residual_offset) {
            self.last_position = position;
        }
        self.publish_state(report.state);
    }

    fn publish_state(&mut self, state: MachineState) {
        if state != self.last_state {
            event_bus().publish(AppEvent::Machine(MachineEvent::StateChanged {
                from: self.last_state,
                to: state,
            }));
            self.last_state = state;
        }
        let _ = self
            .status_tx
            .send(StatusSnapshot::new(state, self.last_position));
    }

    fn drain_pending(&mut self, error: ProtocolError) {
        for command in self.pending.drain(..) {
            let _ = command.result.send(Err(error.clone()));
        }
    }

    fn drain_requests(&mut self) {
        while let Ok(request) = self.command_rx.try_recv() {
            let _ = request.result.send(Err(ProtocolError::Shutdown));
        }
        while let Ok(request) = self.priority_rx.try_recv() {
            if let PriorityRequest::Line(request) = request {
                let _ = request.result.send(Err(ProtocolError::Shutdown));
            }
        }
    }
}
