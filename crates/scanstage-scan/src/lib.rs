//! # Scanstage Scan
//!
//! Scan patterns, collaborator contracts, and the scan orchestrator.
//! Drives multi-point scanning: a pattern generator produces an ordered
//! point list, and the orchestrator walks it through motion, capture, and
//! storage with pause/resume/cancel and per-point failure policy.

pub mod collaborator;
pub mod orchestrator;
pub mod pattern;

pub use collaborator::{
    Capture, CapturedImage, Lighting, NoOpCapture, NoOpLighting, NoOpStorage, PointMetadata,
    Storage,
};
pub use orchestrator::{
    PointFailurePolicy, PointOutcome, PointRecord, RunHandle, RunOutcome, ScanConfig,
    ScanOrchestrator, ScanReport, ScanStatus,
};
pub use pattern::{CylindricalPattern, FocusMode, GridPattern, PatternSpec, ScanPoint};
