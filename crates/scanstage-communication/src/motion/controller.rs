//! Motion controller
//!
//! Presents typed, validated motion operations over the protocol client
//! and owns the two behaviors that make this firmware family workable:
//!
//! 1. The dropped-acknowledgment heuristic: the firmware occasionally
//!    executes a command successfully yet never emits `ok`. For
//!    motion-bearing commands only, a timeout followed by a fresh
//!    confirmed-idle status is treated as success.
//! 2. Homing completion detection: per-axis "homed" messages can arrive
//!    while the machine is still alarmed, so they never end the wait on
//!    their own — only the final homing-done marker does, with sustained
//!    idle as the fallback.

use crate::protocol::{ProtocolClient, RESET};
use async_trait::async_trait;
use scanstage_core::event_bus::{event_bus, AppEvent, MachineEvent};
use scanstage_core::{
    Axis, MachineLimits, MachineState, MotionControl, MotionError, Position, ProtocolError, Result,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Configuration for the motion controller.
///
/// The settle timeout and homing idle window were chosen empirically
/// against real hardware; treat them as tunables, not constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotionConfig {
    /// Travel limits for every axis
    pub limits: MachineLimits,
    /// Feed rate used when a move does not specify one (units/min)
    pub default_feed_rate: f64,
    /// Per-axis tolerance when comparing positions (mm / degrees)
    pub position_tolerance: f64,
    /// Acknowledgment timeout for issued commands, in milliseconds
    pub command_timeout_ms: u64,
    /// How long a move may take to settle back to idle, in milliseconds
    pub settle_timeout_ms: u64,
    /// Poll interval inside settle/homing wait loops, in milliseconds
    pub settle_poll_ms: u64,
    /// Timeout for fresh status queries, in milliseconds
    pub status_query_timeout_ms: u64,
    /// Maximum unlock (`$X`) attempts before giving up on an alarm
    pub unlock_attempts: u32,
    /// Backoff between unlock attempts, in milliseconds
    pub unlock_backoff_ms: u64,
    /// How quickly the firmware must accept a homing command, in
    /// milliseconds (homing itself takes far longer)
    pub homing_accept_timeout_ms: u64,
    /// Overall homing cycle timeout, in milliseconds
    pub homing_timeout_ms: u64,
    /// Continuous idle window that counts as homing completion when no
    /// final marker arrives, in milliseconds
    pub homing_idle_window_ms: u64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            limits: MachineLimits::default(),
            default_feed_rate: 1500.0,
            position_tolerance: 0.05,
            command_timeout_ms: 2000,
            settle_timeout_ms: 10_000,
            settle_poll_ms: 50,
            status_query_timeout_ms: 1500,
            unlock_attempts: 3,
            unlock_backoff_ms: 250,
            homing_accept_timeout_ms: 3000,
            homing_timeout_ms: 60_000,
            homing_idle_window_ms: 5000,
        }
    }
}

impl MotionConfig {
    fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
    fn settle_timeout(&self) -> Duration {
        Duration::from_millis(self.settle_timeout_ms)
    }
    fn settle_poll(&self) -> Duration {
        Duration::from_millis(self.settle_poll_ms)
    }
    fn status_query_timeout(&self) -> Duration {
        Duration::from_millis(self.status_query_timeout_ms)
    }
    fn unlock_backoff(&self) -> Duration {
        Duration::from_millis(self.unlock_backoff_ms)
    }
    fn homing_accept_timeout(&self) -> Duration {
        Duration::from_millis(self.homing_accept_timeout_ms)
    }
    fn homing_timeout(&self) -> Duration {
        Duration::from_millis(self.homing_timeout_ms)
    }
    fn homing_idle_window(&self) -> Duration {
        Duration::from_millis(self.homing_idle_window_ms)
    }
}

/// Typed motion operations over a connected protocol client.
pub struct MotionController {
    client: ProtocolClient,
    config: MotionConfig,
    homed: AtomicBool,
}

impl MotionController {
    /// Wrap a connected protocol client
    pub fn new(client: ProtocolClient, config: MotionConfig) -> Self {
        Self {
            client,
            config,
            homed: AtomicBool::new(false),
        }
    }

    /// Access the underlying protocol client
    pub fn client(&self) -> &ProtocolClient {
        &self.client
    }

    /// Shut down the underlying client, draining pending results
    pub async fn shutdown(self) {
        self.client.shutdown().await;
    }

    /// Feed rate for a move: the requested (or default) rate, capped by
    /// the slowest ceiling among the axes taking part.
    fn effective_feed_rate(&self, axes: &[Axis], requested: Option<f64>) -> f64 {
        let ceiling = axes
            .iter()
            .map(|&a| self.config.limits.axis(a).max_feed_rate)
            .fold(f64::INFINITY, f64::min);
        requested.unwrap_or(self.config.default_feed_rate).min(ceiling)
    }

    /// Poll the cache until a snapshot received after `issued_at` shows
    /// the machine idle at the target. Motion execution is asynchronous to
    /// acknowledgment — a report polled right after the ack can still show
    /// the pre-motion idle state — so completion requires freshness and
    /// the target position, not idleness alone.
    async fn await_settle(&self, issued_at: Instant, target: &Position) -> Result<()> {
        let deadline = issued_at + self.config.settle_timeout();
        loop {
            let snapshot = self.client.cached_status();
            if snapshot.received_at > issued_at
                && snapshot.state == MachineState::Idle
                && snapshot
                    .position
                    .approx_eq(target, self.config.position_tolerance)
            {
                return Ok(());
            }
            if Instant::now() > deadline {
                return Err(ProtocolError::Timeout {
                    timeout_ms: self.config.settle_timeout_ms,
                }
                .into());
            }
            tokio::time::sleep(self.config.settle_poll()).await;
        }
    }

    /// Bounded `$X` retry loop for an alarmed machine.
    async fn clear_alarm(&self) -> Result<()> {
        for attempt in 1..=self.config.unlock_attempts {
            tracing::info!(attempt, "Sending unlock");
            match self
                .client
                .send_priority("$X", self.config.command_timeout())
                .await
            {
                Ok(()) => {}
                // The unlock may execute without an ack; the re-query decides.
                Err(e) if e.is_timeout() => {}
                Err(e) => return Err(e),
            }
            tokio::time::sleep(self.config.unlock_backoff()).await;

            let snapshot = self
                .client
                .query_status(self.config.status_query_timeout())
                .await?;
            if snapshot.state != MachineState::Alarm {
                event_bus().publish(AppEvent::Machine(MachineEvent::AlarmCleared));
                return Ok(());
            }
        }
        Err(MotionError::AlarmNotCleared {
            attempts: self.config.unlock_attempts,
        }
        .into())
    }

    /// One homing cycle: alarm check, send, completion wait, idle verify.
    async fn home_cycle(&self, command: &str) -> Result<()> {
        // Never trust the cache here: a stale Alarm falsely blocks homing,
        // a stale Idle falsely permits it over a truly alarmed machine.
        let snapshot = self
            .client
            .query_status(self.config.status_query_timeout())
            .await?;
        if snapshot.state == MachineState::Alarm {
            self.clear_alarm().await?;
        }

        let message_mark = self.client.message_seq();
        let started_at = Instant::now();

        // The firmware accepts the command quickly even though the cycle
        // takes tens of seconds; acceptance gets its own short timeout.
        self.client
            .send(command, self.config.homing_accept_timeout())
            .await?;

        self.await_homing_completion(message_mark, started_at)
            .await?;

        let snapshot = self
            .client
            .query_status(self.config.status_query_timeout())
            .await?;
        if snapshot.state != MachineState::Idle {
            return Err(MotionError::HomingFailed {
                reason: format!("machine reports {} after homing", snapshot.state),
            }
            .into());
        }
        Ok(())
    }

    /// Wait for the homing cycle to finish.
    ///
    /// Per-axis `Homed:` messages are logged but do not end the wait —
    /// they were observed arriving while the machine was still alarmed.
    /// Completion is the final homing-done marker, or (fallback) idle
    /// sustained for the configured window after homing start.
    async fn await_homing_completion(&self, message_mark: u64, started_at: Instant) -> Result<()> {
        let deadline = started_at + self.config.homing_timeout();
        let mut cursor = message_mark;
        let mut idle_since: Option<Instant> = None;

        loop {
            for (seq, text) in self.client.messages_since(cursor) {
                cursor = seq + 1;
                if is_homing_done_marker(&text) {
                    tracing::info!("Homing done marker received");
                    return Ok(());
                }
                if let Some(axis) = axis_homed_marker(&text) {
                    tracing::debug!(axis, "Axis reported homed");
                }
            }

            let snapshot = self.client.cached_status();
            if snapshot.received_at > started_at {
                if snapshot.state == MachineState::Idle {
                    let since = *idle_since.get_or_insert_with(Instant::now);
                    if since.elapsed() >= self.config.homing_idle_window() {
                        tracing::info!("Homing completion inferred from sustained idle");
                        return Ok(());
                    }
                } else {
                    idle_since = None;
                }
            }

            if Instant::now() > deadline {
                return Err(MotionError::HomingFailed {
                    reason: "timed out waiting for completion".to_string(),
                }
                .into());
            }
            tokio::time::sleep(self.config.settle_poll()).await;
        }
    }
}

#[async_trait]
impl MotionControl for MotionController {
    async fn move_to(&self, target: Position, feed_rate: Option<f64>) -> Result<()> {
        // Validation first; a rejected target has produced no wire traffic.
        let target = self.config.limits.normalize(target)?;

        let current = self.client.cached_status().position;
        let changed: Vec<Axis> = Axis::ALL
            .into_iter()
            .filter(|&a| {
                (target.axis(a) - current.axis(a)).abs() > self.config.position_tolerance
            })
            .collect();
        if changed.is_empty() {
            tracing::debug!(%target, "Already at target");
            return Ok(());
        }

        // One combined line for all changed axes. Per-axis sequencing was
        // both slower and a source of redundant wire traffic.
        let feed = self.effective_feed_rate(&changed, feed_rate);
        let command = format_move(&changed, &target, feed);
        let issued_at = Instant::now();

        match self.client.send(&command, self.config.command_timeout()).await {
            Ok(()) => self.await_settle(issued_at, &target).await,
            Err(e) if e.is_timeout() => {
                // Missing `ok` with confirmed-idle state means the motion
                // completed and the acknowledgment was dropped. Only
                // motion-bearing commands get this benefit of the doubt.
                let snapshot = self
                    .client
                    .query_status(self.config.status_query_timeout())
                    .await?;
                if snapshot.state == MachineState::Idle {
                    tracing::warn!(
                        command = %command,
                        "Acknowledgment lost but machine is idle; treating move as complete"
                    );
                    Ok(())
                } else {
                    Err(e)
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn home(&self, axes: Option<&[Axis]>) -> Result<()> {
        self.homed.store(false, Ordering::SeqCst);
        match axes {
            None => self.home_cycle("$H").await?,
            Some(list) => {
                for axis in list {
                    self.home_cycle(&format!("$H{}", axis.letter())).await?;
                }
            }
        }
        self.homed.store(true, Ordering::SeqCst);
        event_bus().publish(AppEvent::Machine(MachineEvent::Homed));
        Ok(())
    }

    fn position(&self) -> Position {
        self.client.cached_status().position
    }

    fn machine_state(&self) -> MachineState {
        self.client.cached_status().state
    }

    fn is_homed(&self) -> bool {
        self.homed.load(Ordering::SeqCst)
    }

    async fn emergency_stop(&self) -> Result<()> {
        tracing::warn!("Emergency stop");
        self.client.send_realtime(RESET)?;
        self.homed.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Format a combined move command for the changed axes
fn format_move(axes: &[Axis], target: &Position, feed_rate: f64) -> String {
    let mut command = String::from("G1");
    for &axis in axes {
        command.push_str(&format!(" {}{:.3}", axis.letter(), target.axis(axis)));
    }
    command.push_str(&format!(" F{:.0}", feed_rate));
    command
}

/// Final homing-completion marker
fn is_homing_done_marker(text: &str) -> bool {
    text.to_ascii_lowercase().contains("homing done")
}

/// Per-axis homed marker; returns the axis list text
fn axis_homed_marker(text: &str) -> Option<&str> {
    text.strip_prefix("Homed:")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_move_changed_axes_only() {
        let target = Position::new(10.0, 20.0, 5.0, 90.0);
        let command = format_move(&[Axis::X, Axis::C], &target, 1500.0);
        assert_eq!(command, "G1 X10.000 C90.000 F1500");
    }

    #[test]
    fn test_homing_markers() {
        assert!(is_homing_done_marker("Homing done"));
        assert!(is_homing_done_marker("DBG: Homing done"));
        assert!(!is_homing_done_marker("Homed:X"));
        assert_eq!(axis_homed_marker("Homed:XY"), Some("XY"));
        assert_eq!(axis_homed_marker("Homing Cycle X"), None);
    }
}
