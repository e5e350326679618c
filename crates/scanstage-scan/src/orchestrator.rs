//! Scan orchestrator
//!
//! Sequences a scan pattern through the motion controller and the
//! capture/storage/lighting collaborators. The run is a phase state
//! machine: homing and positioning happen through [`MotionControl`],
//! per-point failures are recorded against the point and handled by
//! policy, and progress is observable both through [`status`] and as
//! events on the application bus.
//!
//! Cancellation is cooperative: the cancel flag is observed at the top of
//! each point iteration and between phases, so an in-flight motion always
//! finishes before the run unwinds to idle — a command is never abandoned
//! half-issued.
//!
//! [`status`]: ScanOrchestrator::status

use crate::collaborator::{Capture, Lighting, PointMetadata, Storage};
use crate::pattern::ScanPoint;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use scanstage_core::event_bus::{event_bus, AppEvent, ScanEvent};
use scanstage_core::{Error, MotionControl, Position, Result, ScanError, ScanPhase};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// How long the point loop sleeps between pause-flag checks
const PAUSE_POLL: Duration = Duration::from_millis(25);

/// What to do when capture or storage fails at a point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointFailurePolicy {
    /// Record the failure against the point and continue with the next one
    #[default]
    SkipAndContinue,
    /// Abort the whole run on the first point failure
    AbortRun,
}

/// Configuration for scan runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Point-level failure handling
    pub failure_policy: PointFailurePolicy,
    /// Home the stage before the first point if it is not homed yet
    pub home_before_scan: bool,
    /// Feed rate for positioning moves; `None` uses the motion default
    pub feed_rate: Option<f64>,
    /// Lighting zone driven for the capture batch
    pub lighting_zone: u8,
    /// Lighting brightness during the batch (0.0–1.0)
    pub lighting_level: f64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            failure_policy: PointFailurePolicy::default(),
            home_before_scan: true,
            feed_rate: None,
            lighting_zone: 0,
            lighting_level: 0.8,
        }
    }
}

/// Outcome recorded for one point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointOutcome {
    /// Capture and storage both succeeded
    Completed {
        /// Number of frames captured.
        images: usize,
    },
    /// The point failed and was skipped by policy
    Failed {
        /// What went wrong.
        reason: String,
    },
}

impl PointOutcome {
    /// Whether the point succeeded
    pub fn is_ok(&self) -> bool {
        matches!(self, PointOutcome::Completed { .. })
    }
}

/// Per-point record in the final report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointRecord {
    /// Index of the point in the pattern
    pub point_index: usize,
    /// Stage position of the point
    pub position: Position,
    /// What happened
    pub outcome: PointOutcome,
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    /// The run walked the whole pattern. Points may still have failed —
    /// partial success is a completed run unless configured otherwise.
    Completed,
    /// The run aborted on a fatal error
    Failed {
        /// Why the run aborted.
        reason: String,
    },
    /// The run was cancelled and unwound cleanly
    Cancelled,
}

/// Final report for a scan run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    /// Session identifier
    pub session_id: String,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run ended
    pub finished_at: DateTime<Utc>,
    /// Points in the pattern
    pub total_points: usize,
    /// Per-point outcomes, in pattern order, for every point reached
    pub points: Vec<PointRecord>,
    /// How the run ended
    pub outcome: RunOutcome,
}

impl ScanReport {
    /// Number of points that succeeded
    pub fn succeeded(&self) -> usize {
        self.points.iter().filter(|p| p.outcome.is_ok()).count()
    }

    /// Number of points that failed
    pub fn failed(&self) -> usize {
        self.points.len() - self.succeeded()
    }
}

/// Progress snapshot for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStatus {
    /// Current phase
    pub phase: ScanPhase,
    /// Index of the point being worked
    pub point_index: usize,
    /// Points in the pattern
    pub total_points: usize,
}

/// State shared between the run task and its observers
#[derive(Debug)]
struct RunShared {
    session_id: String,
    phase: RwLock<ScanPhase>,
    point_index: AtomicUsize,
    total_points: usize,
    pause_requested: AtomicBool,
    cancel_requested: AtomicBool,
}

impl RunShared {
    fn new(session_id: String, total_points: usize) -> Self {
        // Born Initializing, not Idle: the run counts as active from the
        // moment start() registers it, not from when its task first runs.
        Self {
            session_id,
            phase: RwLock::new(ScanPhase::Initializing),
            point_index: AtomicUsize::new(0),
            total_points,
            pause_requested: AtomicBool::new(false),
            cancel_requested: AtomicBool::new(false),
        }
    }

    fn phase(&self) -> ScanPhase {
        *self.phase.read()
    }

    fn set_phase(&self, next: ScanPhase) {
        let mut phase = self.phase.write();
        if !phase.can_transition_to(next) {
            tracing::warn!(from = %*phase, to = %next, "Unexpected phase transition");
        }
        *phase = next;
        event_bus().publish(AppEvent::Scan(ScanEvent::PhaseChanged {
            phase: next,
            point_index: if next.is_pausable() {
                Some(self.point_index.load(Ordering::SeqCst))
            } else {
                None
            },
        }));
    }

    fn status(&self) -> ScanStatus {
        ScanStatus {
            phase: self.phase(),
            point_index: self.point_index.load(Ordering::SeqCst),
            total_points: self.total_points,
        }
    }

    fn is_active(&self) -> bool {
        !matches!(
            self.phase(),
            ScanPhase::Idle | ScanPhase::Completed | ScanPhase::Failed
        )
    }
}

/// Handle to a running scan
#[derive(Debug)]
pub struct RunHandle {
    shared: Arc<RunShared>,
    task: JoinHandle<ScanReport>,
}

impl RunHandle {
    /// Session identifier of the run
    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    /// Progress snapshot
    pub fn status(&self) -> ScanStatus {
        self.shared.status()
    }

    /// Request a pause at the next phase boundary
    pub fn pause(&self) {
        self.shared.pause_requested.store(true, Ordering::SeqCst);
    }

    /// Resume a paused run
    pub fn resume(&self) {
        self.shared.pause_requested.store(false, Ordering::SeqCst);
    }

    /// Request cancellation; the in-flight point operation finishes first
    pub fn cancel(&self) {
        self.shared.cancel_requested.store(true, Ordering::SeqCst);
    }

    /// Wait for the run to end and take its report
    pub async fn wait(self) -> Result<ScanReport> {
        self.task
            .await
            .map_err(|e| Error::other(format!("scan task failed: {e}")))
    }
}

/// Sequences scan runs; exactly one run is active at a time.
pub struct ScanOrchestrator {
    motion: Arc<dyn MotionControl>,
    capture: Arc<dyn Capture>,
    storage: Arc<dyn Storage>,
    lighting: Arc<dyn Lighting>,
    config: ScanConfig,
    active: Mutex<Option<Arc<RunShared>>>,
}

impl ScanOrchestrator {
    /// Wire the orchestrator to its collaborators
    pub fn new(
        motion: Arc<dyn MotionControl>,
        capture: Arc<dyn Capture>,
        storage: Arc<dyn Storage>,
        lighting: Arc<dyn Lighting>,
        config: ScanConfig,
    ) -> Self {
        Self {
            motion,
            capture,
            storage,
            lighting,
            config,
            active: Mutex::new(None),
        }
    }

    /// Start a run over `pattern`.
    ///
    /// Fails with [`ScanError::EmptyPattern`] for an empty pattern and
    /// [`ScanError::RunActive`] while another run is still active.
    pub fn start(&self, pattern: Vec<ScanPoint>) -> Result<RunHandle> {
        if pattern.is_empty() {
            return Err(ScanError::EmptyPattern.into());
        }

        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|run| run.is_active()) {
            return Err(ScanError::RunActive.into());
        }

        let session_id = Uuid::new_v4().to_string();
        let shared = Arc::new(RunShared::new(session_id, pattern.len()));
        *active = Some(shared.clone());

        let run = ScanRun {
            shared: shared.clone(),
            motion: self.motion.clone(),
            capture: self.capture.clone(),
            storage: self.storage.clone(),
            lighting: self.lighting.clone(),
            config: self.config.clone(),
            pattern,
        };
        let task = tokio::spawn(run.execute());

        Ok(RunHandle { shared, task })
    }

    /// Progress of the active run, or an idle status
    pub fn status(&self) -> ScanStatus {
        match self.active.lock().as_ref() {
            Some(run) => run.status(),
            None => ScanStatus {
                phase: ScanPhase::Idle,
                point_index: 0,
                total_points: 0,
            },
        }
    }

    /// Pause the active run, if any
    pub fn pause(&self) {
        if let Some(run) = self.active.lock().as_ref() {
            run.pause_requested.store(true, Ordering::SeqCst);
        }
    }

    /// Resume the active run, if any
    pub fn resume(&self) {
        if let Some(run) = self.active.lock().as_ref() {
            run.pause_requested.store(false, Ordering::SeqCst);
        }
    }

    /// Cancel the active run, if any
    pub fn cancel(&self) {
        if let Some(run) = self.active.lock().as_ref() {
            run.cancel_requested.store(true, Ordering::SeqCst);
        }
    }
}

/// Everything the spawned run task owns
struct ScanRun {
    shared: Arc<RunShared>,
    motion: Arc<dyn MotionControl>,
    capture: Arc<dyn Capture>,
    storage: Arc<dyn Storage>,
    lighting: Arc<dyn Lighting>,
    config: ScanConfig,
    pattern: Vec<ScanPoint>,
}

/// Why the point loop stopped early
enum Interrupt {
    Cancelled,
    Fatal(String),
}

impl ScanRun {
    async fn execute(self) -> ScanReport {
        let started_at = Utc::now();
        event_bus().publish(AppEvent::Scan(ScanEvent::Started {
            session_id: self.shared.session_id.clone(),
            total_points: self.pattern.len(),
        }));

        let mut points = Vec::with_capacity(self.pattern.len());
        let outcome = match self.run_phases(&mut points).await {
            Ok(()) => {
                self.shared.set_phase(ScanPhase::Completed);
                let succeeded = points.iter().filter(|p| p.outcome.is_ok()).count();
                event_bus().publish(AppEvent::Scan(ScanEvent::Completed {
                    succeeded,
                    failed: points.len() - succeeded,
                }));
                RunOutcome::Completed
            }
            Err(Interrupt::Cancelled) => {
                self.shared.set_phase(ScanPhase::Cancelling);
                event_bus().publish(AppEvent::Scan(ScanEvent::Cancelled));
                self.shared.set_phase(ScanPhase::Idle);
                RunOutcome::Cancelled
            }
            Err(Interrupt::Fatal(reason)) => {
                self.shared.set_phase(ScanPhase::Failed);
                event_bus().publish(AppEvent::Scan(ScanEvent::Failed {
                    reason: reason.clone(),
                }));
                RunOutcome::Failed { reason }
            }
        };

        ScanReport {
            session_id: self.shared.session_id.clone(),
            started_at,
            finished_at: Utc::now(),
            total_points: self.pattern.len(),
            points,
            outcome,
        }
    }

    async fn run_phases(
        &self,
        points: &mut Vec<PointRecord>,
    ) -> std::result::Result<(), Interrupt> {
        self.shared.set_phase(ScanPhase::Initializing);

        if self.config.home_before_scan && !self.motion.is_homed() {
            self.shared.set_phase(ScanPhase::Homing);
            self.motion
                .home(None)
                .await
                .map_err(|e| Interrupt::Fatal(format!("homing failed: {e}")))?;
        }

        // Lighting frames the whole capture batch, not individual points.
        if let Err(e) = self
            .lighting
            .set_brightness(self.config.lighting_zone, self.config.lighting_level)
            .await
        {
            tracing::warn!("Lighting setup failed: {e}");
        }

        let result = self.point_loop(points).await;

        if let Err(e) = self
            .lighting
            .set_brightness(self.config.lighting_zone, 0.0)
            .await
        {
            tracing::warn!("Lighting teardown failed: {e}");
        }

        result
    }

    async fn point_loop(
        &self,
        points: &mut Vec<PointRecord>,
    ) -> std::result::Result<(), Interrupt> {
        for (index, point) in self.pattern.iter().enumerate() {
            self.shared.point_index.store(index, Ordering::SeqCst);
            self.checkpoint(ScanPhase::Moving).await?;

            self.shared.set_phase(ScanPhase::Moving);
            if let Err(e) = self
                .motion
                .move_to(point.position, self.config.feed_rate)
                .await
            {
                self.record_failure(points, index, point, format!("move failed: {e}"))?;
                continue;
            }

            self.checkpoint(ScanPhase::Capturing).await?;
            self.shared.set_phase(ScanPhase::Capturing);
            let images = match self.capture.capture_at(point).await {
                Ok(images) => images,
                Err(e) => {
                    self.record_failure(points, index, point, format!("capture failed: {e}"))?;
                    continue;
                }
            };

            self.checkpoint(ScanPhase::Storing).await?;
            self.shared.set_phase(ScanPhase::Storing);
            let image_count = images.len();
            let metadata = PointMetadata {
                point_index: index,
                position: point.position,
                captured_at: Utc::now(),
            };
            if let Err(e) = self
                .storage
                .store(&self.shared.session_id, images, metadata)
                .await
            {
                self.record_failure(points, index, point, format!("storage failed: {e}"))?;
                continue;
            }

            points.push(PointRecord {
                point_index: index,
                position: point.position,
                outcome: PointOutcome::Completed {
                    images: image_count,
                },
            });
            event_bus().publish(AppEvent::Scan(ScanEvent::PointFinished {
                point_index: index,
                position: point.position,
                success: true,
            }));
        }
        Ok(())
    }

    /// Observe cancel and pause before entering `next_phase`.
    ///
    /// Pause records the phase it will resume into (not just that the run
    /// is paused) and holds here until resumed or cancelled.
    async fn checkpoint(&self, next_phase: ScanPhase) -> std::result::Result<(), Interrupt> {
        if self.shared.cancel_requested.load(Ordering::SeqCst) {
            return Err(Interrupt::Cancelled);
        }

        if self.shared.pause_requested.load(Ordering::SeqCst) {
            event_bus().publish(AppEvent::Scan(ScanEvent::Paused {
                resume_phase: next_phase,
            }));
            self.shared.set_phase(ScanPhase::Paused);
            while self.shared.pause_requested.load(Ordering::SeqCst) {
                if self.shared.cancel_requested.load(Ordering::SeqCst) {
                    return Err(Interrupt::Cancelled);
                }
                tokio::time::sleep(PAUSE_POLL).await;
            }
            event_bus().publish(AppEvent::Scan(ScanEvent::Resumed { phase: next_phase }));
        }
        Ok(())
    }

    /// Record a point failure and decide whether the run goes on.
    fn record_failure(
        &self,
        points: &mut Vec<PointRecord>,
        index: usize,
        point: &ScanPoint,
        reason: String,
    ) -> std::result::Result<(), Interrupt> {
        tracing::warn!(point = index, "{reason}");
        points.push(PointRecord {
            point_index: index,
            position: point.position,
            outcome: PointOutcome::Failed {
                reason: reason.clone(),
            },
        });
        event_bus().publish(AppEvent::Scan(ScanEvent::PointFinished {
            point_index: index,
            position: point.position,
            success: false,
        }));

        match self.config.failure_policy {
            PointFailurePolicy::SkipAndContinue => Ok(()),
            PointFailurePolicy::AbortRun => Err(Interrupt::Fatal(reason)),
        }
    }
}
