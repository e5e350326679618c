//! Collaborator contracts
//!
//! Capture, storage, and lighting are external collaborators: the
//! orchestrator drives them through these traits and never sees their
//! internals (camera pipelines, session directories, PWM drivers). No-op
//! implementations back tests and dry runs.

use crate::pattern::ScanPoint;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scanstage_core::{Position, Result};
use serde::{Deserialize, Serialize};

/// A single captured frame
#[derive(Debug, Clone)]
pub struct CapturedImage {
    /// Frame index within the point's capture burst
    pub frame_index: u32,
    /// Encoded image bytes
    pub data: Vec<u8>,
}

/// Metadata stored alongside a point's images
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointMetadata {
    /// Index of the point in the pattern
    pub point_index: usize,
    /// Stage position the images were captured at
    pub position: Position,
    /// When the capture finished
    pub captured_at: DateTime<Utc>,
}

/// Image capture collaborator.
///
/// Synchronous from the orchestrator's point of view: the call returns
/// when every requested frame has been captured.
#[async_trait]
pub trait Capture: Send + Sync {
    /// Capture the frames requested by `point`
    async fn capture_at(&self, point: &ScanPoint) -> Result<Vec<CapturedImage>>;
}

/// Session storage collaborator
#[async_trait]
pub trait Storage: Send + Sync {
    /// Persist a point's images and metadata under the session
    async fn store(
        &self,
        session_id: &str,
        images: Vec<CapturedImage>,
        metadata: PointMetadata,
    ) -> Result<()>;
}

/// Lighting collaborator.
///
/// Driven before and after a capture batch, not per frame.
#[async_trait]
pub trait Lighting: Send + Sync {
    /// Set a lighting zone's brightness (0.0–1.0)
    async fn set_brightness(&self, zone: u8, level: f64) -> Result<()>;
}

/// Capture stand-in that produces empty frames
#[derive(Debug, Default)]
pub struct NoOpCapture;

#[async_trait]
impl Capture for NoOpCapture {
    async fn capture_at(&self, point: &ScanPoint) -> Result<Vec<CapturedImage>> {
        Ok((0..point.capture_count)
            .map(|frame_index| CapturedImage {
                frame_index,
                data: Vec::new(),
            })
            .collect())
    }
}

/// Storage stand-in that discards everything
#[derive(Debug, Default)]
pub struct NoOpStorage;

#[async_trait]
impl Storage for NoOpStorage {
    async fn store(
        &self,
        _session_id: &str,
        _images: Vec<CapturedImage>,
        _metadata: PointMetadata,
    ) -> Result<()> {
        Ok(())
    }
}

/// Lighting stand-in that accepts any level
#[derive(Debug, Default)]
pub struct NoOpLighting;

#[async_trait]
impl Lighting for NoOpLighting {
    async fn set_brightness(&self, _zone: u8, _level: f64) -> Result<()> {
        Ok(())
    }
}
